//! 错误隐藏.
//!
//! 图像的全部 slice 处理完毕后, 网格中仍未解码的宏块视为损坏.
//! 按 `EcStrategy` 用上一幅图像的同位宏块或继承的运动矢量填充,
//! 没有可用的上一幅图像时填充灰色.

use log::debug;

use super::config::EcActiveIdc;
use super::inter::predict_partition;
use super::macroblock_state::MbGrid;
use super::picture::Picture;

/// 错误隐藏策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EcStrategy {
    Disabled,
    /// 复制上一幅图像的同位宏块, `frame` 为真时整帧复制
    CopyPrevious { frame: bool },
    /// 以邻居或同位宏块的运动矢量做运动补偿
    MotionCopy,
}

impl EcStrategy {
    pub(super) fn from_idc(idc: EcActiveIdc) -> Self {
        if !idc.is_enabled() {
            Self::Disabled
        } else if idc.copies_motion() {
            Self::MotionCopy
        } else {
            Self::CopyPrevious {
                frame: idc.is_frame_copy(),
            }
        }
    }

    pub(super) fn is_enabled(self) -> bool {
        self != Self::Disabled
    }
}

/// 对图像中损坏的宏块执行隐藏, 返回被隐藏的宏块数
pub(super) fn conceal_picture(
    strategy: EcStrategy,
    pic: &mut Picture,
    grid: &mut MbGrid,
    prev: Option<&Picture>,
) -> u32 {
    if !strategy.is_enabled() {
        return 0;
    }
    let damaged = grid.undecoded_count();
    if damaged == 0 {
        return 0;
    }
    let whole_frame = matches!(strategy, EcStrategy::CopyPrevious { frame: true });
    let prev = prev.filter(|p| p.mb_width == pic.mb_width && p.mb_height == pic.mb_height);
    let mb_width = grid.mb_width.max(1);

    let mut concealed = 0u32;
    for addr in 0..grid.infos.len() {
        if !whole_frame && grid.infos[addr].is_decoded() {
            continue;
        }
        let (mb_x, mb_y) = (addr % mb_width, addr / mb_width);
        let motion = match strategy {
            EcStrategy::MotionCopy => inherited_motion(grid, addr, prev),
            _ => None,
        };
        match (prev, motion) {
            (Some(reference), Some(mv)) => {
                predict_partition(pic, reference, mb_x * 16, mb_y * 16, 16, 16, mv, None);
            }
            (Some(reference), None) => pic.copy_mb_from(reference, mb_x, mb_y),
            (None, _) => fill_mb_gray(pic, mb_x, mb_y),
        }
        if let Some(slot) = pic.mb_motion.get_mut(addr) {
            *slot = motion;
        }
        let info = &mut grid.infos[addr];
        info.concealed = true;
        concealed += 1;
    }
    pic.concealed = true;
    debug!(
        "H264: 错误隐藏完成, strategy={:?}, damaged={}, concealed={}, has_prev={}",
        strategy,
        damaged,
        concealed,
        prev.is_some()
    );
    concealed
}

/// 运动隐藏使用的运动矢量: 左、上方已解码的帧间宏块, 否则取上一幅图像的同位宏块
fn inherited_motion(grid: &MbGrid, addr: usize, prev: Option<&Picture>) -> Option<[i16; 2]> {
    let mb_width = grid.mb_width.max(1);
    let inter_mv = |nb: usize| {
        let info = grid.infos.get(nb)?;
        (info.is_decoded() && !info.concealed && !info.kind.is_intra()).then_some(info.mv[0])
    };
    let left = (addr % mb_width > 0).then(|| addr - 1).and_then(inter_mv);
    let top = (addr >= mb_width).then(|| addr - mb_width).and_then(inter_mv);
    left.or(top)
        .or_else(|| prev.and_then(|p| p.mb_motion.get(addr).copied().flatten()))
}

fn fill_mb_gray(pic: &mut Picture, mb_x: usize, mb_y: usize) {
    for c in 0..3 {
        let size = if c == 0 { 16 } else { 8 };
        let stride = pic.strides[c];
        for row in 0..size {
            let off = (mb_y * size + row) * stride + mb_x * size;
            if let Some(dst) = pic.planes[c].get_mut(off..off + size) {
                dst.fill(128);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::h264::macroblock_state::MbKind;
    use crate::decoders::h264::picture::FramePool;

    fn half_decoded_grid() -> MbGrid {
        let mut grid = MbGrid::new(2, 1);
        grid.infos[0].slice_id = 0;
        grid.infos[0].kind = MbKind::PInter;
        grid
    }

    #[test]
    fn test_strategy_from_idc() {
        assert_eq!(EcStrategy::from_idc(EcActiveIdc::Disable), EcStrategy::Disabled);
        assert_eq!(
            EcStrategy::from_idc(EcActiveIdc::FrameCopy),
            EcStrategy::CopyPrevious { frame: true }
        );
        assert_eq!(
            EcStrategy::from_idc(EcActiveIdc::SliceCopyCrossIdr),
            EcStrategy::CopyPrevious { frame: false }
        );
        assert_eq!(
            EcStrategy::from_idc(EcActiveIdc::SliceMvCopyCrossIdrFreezeResChange),
            EcStrategy::MotionCopy
        );
    }

    #[test]
    fn test_slice_copy_only_touches_damaged_mbs() {
        let mut pool = FramePool::new(2);
        let (_, mut prev) = pool.acquire(2, 1).expect("分配应成功");
        prev.fill(200, 90);
        let (_, mut cur) = pool.acquire(2, 1).expect("分配应成功");
        cur.fill(10, 10);
        let mut grid = half_decoded_grid();
        let n = conceal_picture(EcStrategy::CopyPrevious { frame: false }, &mut cur, &mut grid, Some(&prev));
        assert_eq!(n, 1);
        assert_eq!(cur.planes[0][0], 10, "已解码宏块保持不变");
        assert_eq!(cur.planes[0][16], 200);
        assert!(grid.infos[1].concealed);
        assert!(cur.concealed);
    }

    #[test]
    fn test_frame_copy_replaces_everything() {
        let mut pool = FramePool::new(2);
        let (_, mut prev) = pool.acquire(2, 1).expect("分配应成功");
        prev.fill(200, 90);
        let (_, mut cur) = pool.acquire(2, 1).expect("分配应成功");
        cur.fill(10, 10);
        let mut grid = half_decoded_grid();
        let n = conceal_picture(EcStrategy::CopyPrevious { frame: true }, &mut cur, &mut grid, Some(&prev));
        assert_eq!(n, 2);
        assert_eq!(cur.planes[0][0], 200);
    }

    #[test]
    fn test_motion_copy_uses_left_neighbor_mv() {
        let mut pool = FramePool::new(2);
        let (_, mut prev) = pool.acquire(2, 1).expect("分配应成功");
        let stride = prev.strides[0];
        for y in 0..16 {
            for x in 0..32 {
                prev.planes[0][y * stride + x] = (x * 5) as u8;
            }
        }
        let (_, mut cur) = pool.acquire(2, 1).expect("分配应成功");
        let mut grid = half_decoded_grid();
        // 左邻居向右 2 个像素
        grid.infos[0].mv = [[8, 0]; 16];
        conceal_picture(EcStrategy::MotionCopy, &mut cur, &mut grid, Some(&prev));
        assert_eq!(cur.planes[0][16], prev.planes[0][18]);
        assert_eq!(cur.mb_motion[1], Some([8, 0]));
    }

    #[test]
    fn test_gray_fill_without_previous_picture() {
        let mut pool = FramePool::new(1);
        let (_, mut cur) = pool.acquire(2, 1).expect("分配应成功");
        cur.fill(0, 0);
        let mut grid = half_decoded_grid();
        conceal_picture(EcStrategy::CopyPrevious { frame: false }, &mut cur, &mut grid, None);
        assert_eq!(cur.planes[0][16], 128);
        assert_eq!(cur.planes[1][8], 128);
    }

    #[test]
    fn test_disabled_does_nothing() {
        let mut pool = FramePool::new(1);
        let (_, mut cur) = pool.acquire(2, 1).expect("分配应成功");
        let mut grid = half_decoded_grid();
        assert_eq!(conceal_picture(EcStrategy::Disabled, &mut cur, &mut grid, None), 0);
        assert!(!grid.infos[1].concealed);
    }
}
