//! H.264 环路去块滤波 (8.7).
//!
//! 整幅图像解码完成后按宏块光栅顺序执行: 每个宏块先滤亮度垂直边,
//! 再滤亮度水平边, 色度同理. 边界强度 (bS) 由帧内属性、非零系数与
//! 运动信息决定, alpha/beta/tc0 以两侧平均 QP 加 slice 偏移查表.
//! 被隐藏的宏块不参与滤波.

use super::common::{chroma_qp_from_luma_with_offset, clip_u8};
use super::macroblock_state::{MbGrid, MbInfo};
use super::picture::Picture;

/// 单个 slice 的去块参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) struct SliceFilterParams {
    pub disable_idc: u32,
    pub offset_a: i32,
    pub offset_b: i32,
}

/// 图像级去块参数, `slices` 以 slice 序号寻址
pub(super) struct DeblockParams<'a> {
    pub slices: &'a [SliceFilterParams],
    pub chroma_qp_offset: [i32; 2],
}

/// 对整幅图像执行去块滤波
pub(super) fn deblock_picture(pic: &mut Picture, grid: &MbGrid, params: &DeblockParams) {
    let mb_width = grid.mb_width;
    for (addr, info) in grid.infos.iter().enumerate() {
        if !info.is_decoded() || info.concealed {
            continue;
        }
        let Some(slice) = params.slices.get(info.slice_id as usize).copied() else {
            continue;
        };
        if slice.disable_idc == 1 {
            continue;
        }
        let mb_x = addr % mb_width;
        let mb_y = addr / mb_width;
        let left = edge_neighbor(grid, (mb_x > 0).then(|| addr - 1), info, slice.disable_idc);
        let top = edge_neighbor(grid, (mb_y > 0).then(|| addr - mb_width), info, slice.disable_idc);
        let ctx = MbEdges { cur: info, left, top };

        // 亮度: 垂直边 x4 = 0..3, 水平边 y4 = 0..3
        let mut bs_v = [[0u8; 4]; 4];
        let mut bs_h = [[0u8; 4]; 4];
        for e in 0..4 {
            for k in 0..4 {
                bs_v[e][k] = ctx.strength(true, e, k);
                bs_h[e][k] = ctx.strength(false, e, k);
            }
        }
        let luma_stride = pic.strides[0];
        for (e, bs) in bs_v.iter().enumerate() {
            if let Some(p) = ctx.p_mb(true, e) {
                let th = Thresholds::new(avg_qp(p.qp, info.qp), slice);
                filter_luma_edge(&mut pic.planes[0], luma_stride, mb_x * 16 + e * 4, mb_y * 16, true, bs, &th);
            }
        }
        for (e, bs) in bs_h.iter().enumerate() {
            if let Some(p) = ctx.p_mb(false, e) {
                let th = Thresholds::new(avg_qp(p.qp, info.qp), slice);
                filter_luma_edge(&mut pic.planes[0], luma_stride, mb_x * 16, mb_y * 16 + e * 4, false, bs, &th);
            }
        }

        // 色度: 边 0 与边 2 对应亮度 4x4 边 0 与 2
        for c in 0..2 {
            let plane = &mut pic.planes[c + 1];
            let stride = pic.strides[c + 1];
            let offset = params.chroma_qp_offset[c];
            let qpc = |qp: i32| chroma_qp_from_luma_with_offset(qp, offset);
            for e in [0usize, 2] {
                if let Some(p) = ctx.p_mb(true, e) {
                    let th = Thresholds::new(avg_qp(qpc(p.qp), qpc(info.qp)), slice);
                    filter_chroma_edge(plane, stride, mb_x * 8 + e * 2, mb_y * 8, true, &bs_v[e], &th);
                }
            }
            for e in [0usize, 2] {
                if let Some(p) = ctx.p_mb(false, e) {
                    let th = Thresholds::new(avg_qp(qpc(p.qp), qpc(info.qp)), slice);
                    filter_chroma_edge(plane, stride, mb_x * 8, mb_y * 8 + e * 2, false, &bs_h[e], &th);
                }
            }
        }
    }
}

/// 宏块边界另一侧的邻居, idc=2 时不跨 slice
fn edge_neighbor<'a>(grid: &'a MbGrid, nb_addr: Option<usize>, cur: &MbInfo, disable_idc: u32) -> Option<&'a MbInfo> {
    let nb = grid.infos.get(nb_addr?)?;
    if !nb.is_decoded() || nb.concealed {
        return None;
    }
    if disable_idc == 2 && nb.slice_id != cur.slice_id {
        return None;
    }
    Some(nb)
}

fn avg_qp(p: i32, q: i32) -> i32 {
    (p + q + 1) >> 1
}

// ============================================================
// 边界强度
// ============================================================

/// 当前宏块及其可参与滤波的左/上邻居
struct MbEdges<'a> {
    cur: &'a MbInfo,
    left: Option<&'a MbInfo>,
    top: Option<&'a MbInfo>,
}

impl<'a> MbEdges<'a> {
    /// 第 `e` 条边 p 侧所在宏块, 宏块边界上邻居不可用时返回 `None`
    fn p_mb(&self, vertical: bool, e: usize) -> Option<&'a MbInfo> {
        match (e, vertical) {
            (0, true) => self.left,
            (0, false) => self.top,
            _ => Some(self.cur),
        }
    }

    /// 第 `e` 条边上第 `k` 段 (4 个样本) 的 bS
    fn strength(&self, vertical: bool, e: usize, k: usize) -> u8 {
        let Some(p) = self.p_mb(vertical, e) else {
            return 0;
        };
        let (q_raster, p_raster) = if vertical {
            let q = k * 4 + e;
            let p = if e == 0 { k * 4 + 3 } else { q - 1 };
            (q, p)
        } else {
            let q = e * 4 + k;
            let p = if e == 0 { 12 + k } else { q - 4 };
            (q, p)
        };
        boundary_strength(p, p_raster, self.cur, q_raster, e == 0)
    }
}

/// 两个 4x4 块之间的 bS (8.7.2.1, 仅帧编码)
pub(super) fn boundary_strength(p: &MbInfo, p_raster: usize, q: &MbInfo, q_raster: usize, mb_edge: bool) -> u8 {
    if p.kind.is_intra() || q.kind.is_intra() {
        return if mb_edge { 4 } else { 3 };
    }
    if p.total_coeff[p_raster] != 0 || q.total_coeff[q_raster] != 0 {
        return 2;
    }
    let b8 = |raster: usize| (raster / 8) * 2 + (raster % 4) / 2;
    if p.ref_pic[b8(p_raster)] != q.ref_pic[b8(q_raster)] {
        return 1;
    }
    let (mp, mq) = (p.mv[p_raster], q.mv[q_raster]);
    let far = |a: i16, b: i16| (i32::from(a) - i32::from(b)).abs() >= 4;
    u8::from(far(mp[0], mq[0]) || far(mp[1], mq[1]))
}

// ============================================================
// 样本滤波
// ============================================================

struct Thresholds {
    alpha: i32,
    beta: i32,
    index_a: usize,
}

impl Thresholds {
    fn new(qp_av: i32, slice: SliceFilterParams) -> Self {
        let index_a = (qp_av + slice.offset_a).clamp(0, 51) as usize;
        let index_b = (qp_av + slice.offset_b).clamp(0, 51) as usize;
        Self {
            alpha: i32::from(ALPHA_TABLE[index_a]),
            beta: i32::from(BETA_TABLE[index_b]),
            index_a,
        }
    }

    fn tc0(&self, bs: u8) -> i32 {
        i32::from(TC0_TABLE[self.index_a][usize::from(bs.clamp(1, 3)) - 1])
    }
}

/// 亮度边: (x, y) 为 q0 侧第一段的起点, 共 16 条样本线
fn filter_luma_edge(plane: &mut [u8], stride: usize, x: usize, y: usize, vertical: bool, bs: &[u8; 4], th: &Thresholds) {
    let step = if vertical { 1 } else { stride };
    for (k, &strength) in bs.iter().enumerate() {
        if strength == 0 {
            continue;
        }
        for i in 0..4 {
            let line = k * 4 + i;
            let q0 = if vertical { (y + line) * stride + x } else { y * stride + x + line };
            filter_samples(plane, q0, step, strength, th, false);
        }
    }
}

/// 色度边: 8 条样本线, 每 2 条共用一个亮度段的 bS
fn filter_chroma_edge(plane: &mut [u8], stride: usize, x: usize, y: usize, vertical: bool, bs: &[u8; 4], th: &Thresholds) {
    let step = if vertical { 1 } else { stride };
    for line in 0..8 {
        let strength = bs[line / 2];
        if strength == 0 {
            continue;
        }
        let q0 = if vertical { (y + line) * stride + x } else { y * stride + x + line };
        filter_samples(plane, q0, step, strength, th, true);
    }
}

/// 单条样本线滤波 (8.7.2.3 / 8.7.2.4)
fn filter_samples(plane: &mut [u8], q0: usize, step: usize, bs: u8, th: &Thresholds, chroma: bool) {
    let reach = if chroma { 2 } else { 4 };
    if q0 < reach * step || q0 + (reach - 1) * step >= plane.len() {
        return;
    }
    let at = |i: isize| -> i32 {
        let idx = (q0 as isize + i * step as isize) as usize;
        i32::from(plane[idx])
    };
    let (p0, p1, q0v, q1) = (at(-1), at(-2), at(0), at(1));
    if (p0 - q0v).abs() >= th.alpha || (p1 - p0).abs() >= th.beta || (q1 - q0v).abs() >= th.beta {
        return;
    }
    let (p2, q2) = if chroma { (0, 0) } else { (at(-3), at(2)) };
    let ap = (p2 - p0).abs();
    let aq = (q2 - q0v).abs();
    let mut out: [(isize, i32); 6] = [(0, -1); 6];
    let mut n = 0usize;
    let mut set = |pos: isize, v: i32| {
        out[n] = (pos, v);
        n += 1;
    };

    if bs < 4 {
        let tc0 = th.tc0(bs);
        let tc = if chroma {
            tc0 + 1
        } else {
            tc0 + i32::from(ap < th.beta) + i32::from(aq < th.beta)
        };
        let delta = ((((q0v - p0) << 2) + (p1 - q1) + 4) >> 3).clamp(-tc, tc);
        set(-1, p0 + delta);
        set(0, q0v - delta);
        if !chroma {
            if ap < th.beta {
                set(-2, p1 + ((p2 + ((p0 + q0v + 1) >> 1) - (p1 << 1)) >> 1).clamp(-tc0, tc0));
            }
            if aq < th.beta {
                set(1, q1 + ((q2 + ((p0 + q0v + 1) >> 1) - (q1 << 1)) >> 1).clamp(-tc0, tc0));
            }
        }
    } else if chroma {
        set(-1, (2 * p1 + p0 + q1 + 2) >> 2);
        set(0, (2 * q1 + q0v + p1 + 2) >> 2);
    } else {
        let (p3, q3) = (at(-4), at(3));
        let strong = (p0 - q0v).abs() < ((th.alpha >> 2) + 2);
        if ap < th.beta && strong {
            set(-1, (p2 + 2 * p1 + 2 * p0 + 2 * q0v + q1 + 4) >> 3);
            set(-2, (p2 + p1 + p0 + q0v + 2) >> 2);
            set(-3, (2 * p3 + 3 * p2 + p1 + p0 + q0v + 4) >> 3);
        } else {
            set(-1, (2 * p1 + p0 + q1 + 2) >> 2);
        }
        if aq < th.beta && strong {
            set(0, (p1 + 2 * p0 + 2 * q0v + 2 * q1 + q2 + 4) >> 3);
            set(1, (p0 + q0v + q1 + q2 + 2) >> 2);
            set(2, (2 * q3 + 3 * q2 + q1 + q0v + p0 + 4) >> 3);
        } else {
            set(0, (2 * q1 + q0v + p1 + 2) >> 2);
        }
    }

    for &(pos, v) in out.iter().take(n) {
        let idx = (q0 as isize + pos * step as isize) as usize;
        plane[idx] = clip_u8(v);
    }
}

// ============================================================
// 阈值表 (表 8-16 / 8-17)
// ============================================================

#[rustfmt::skip]
const ALPHA_TABLE: [u8; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    4, 4, 5, 6, 7, 8, 9, 10, 12, 13, 15, 17, 20, 22, 25, 28,
    32, 36, 40, 45, 50, 56, 63, 71, 80, 90, 101, 113, 127, 144, 162, 182,
    203, 226, 255, 255,
];

#[rustfmt::skip]
const BETA_TABLE: [u8; 52] = [
    0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
    2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 6, 6, 7, 7, 8, 8,
    9, 9, 10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16, 16,
    17, 17, 18, 18,
];

/// tC0[indexA][bS - 1]
#[rustfmt::skip]
const TC0_TABLE: [[u8; 3]; 52] = [
    [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0],
    [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0], [0, 0, 0],
    [0, 0, 0], [0, 0, 1], [0, 0, 1], [0, 0, 1], [0, 0, 1], [0, 1, 1], [0, 1, 1], [1, 1, 1],
    [1, 1, 1], [1, 1, 1], [1, 1, 1], [1, 1, 2], [1, 1, 2], [1, 1, 2], [1, 1, 2], [1, 2, 3],
    [1, 2, 3], [2, 2, 3], [2, 2, 4], [2, 3, 4], [2, 3, 4], [3, 3, 5], [3, 4, 6], [3, 4, 6],
    [4, 5, 7], [4, 5, 8], [4, 6, 9], [5, 7, 10], [6, 8, 11], [6, 8, 13], [7, 10, 14], [8, 11, 16],
    [9, 12, 18], [10, 13, 20], [11, 15, 23], [13, 17, 25],
];
