//! 运动矢量预测 (8.4.1).
//!
//! 邻居 A/B/C (C 不可用时取 D) 的可用性由 `MbPos::locate` 决定,
//! 宏块内部的 C 还要求其所在 4x4 块在解码顺序上先于当前分区.

use tao_core::{TaoError, TaoResult};

use super::common::{blk4x4_index, median3};
use super::macroblock::{MbRecord, MbType};
use super::macroblock_state::{MbInfo, MbPos};

/// 邻居分区的 (ref_idx, mv); 帧内邻居可用但 ref_idx 为 -1
type Candidate = Option<(i8, [i16; 2])>;

fn candidate(pos: &MbPos, cur: &MbInfo, x4: i32, y4: i32) -> Candidate {
    let (info, raster) = pos.locate(cur, x4, y4)?;
    if info.kind.is_intra() {
        return Some((-1, [0, 0]));
    }
    Some((info.ref_idx[raster], info.mv[raster]))
}

/// C 邻居, 在宏块内部时检查解码顺序, 不可用时退回 D
fn candidate_c(pos: &MbPos, cur: &MbInfo, x4: usize, y4: usize, w4: usize) -> Candidate {
    let cx = (x4 + w4) as i32;
    let cy = y4 as i32 - 1;
    let inside = cy >= 0 && cx < 4;
    let c = if inside && blk4x4_index(cx as usize, cy as usize) > blk4x4_index(x4, y4) {
        None
    } else {
        candidate(pos, cur, cx, cy)
    };
    c.or_else(|| candidate(pos, cur, x4 as i32 - 1, y4 as i32 - 1))
}

/// 分区 (x4, y4, w4, h4) 在参考索引 `ref_idx` 下的预测运动矢量
pub(super) fn predict_mv(pos: &MbPos, cur: &MbInfo, part: (usize, usize, usize, usize), ref_idx: i8) -> [i16; 2] {
    let (x4, y4, w4, h4) = part;
    let a = candidate(pos, cur, x4 as i32 - 1, y4 as i32);
    let b = candidate(pos, cur, x4 as i32, y4 as i32 - 1);
    let c = candidate_c(pos, cur, x4, y4, w4);

    // 16x8 / 8x16 的方向性预测
    let directional = match (w4, h4, x4, y4) {
        (4, 2, _, 0) => Some(b),
        (4, 2, _, 2) => Some(a),
        (2, 4, 0, _) => Some(a),
        (2, 4, 2, _) => Some(c),
        _ => None,
    };
    if let Some(Some((r, mv))) = directional {
        if r == ref_idx {
            return mv;
        }
    }

    let (b, c) = if b.is_none() && c.is_none() && a.is_some() {
        (a, a)
    } else {
        (b, c)
    };
    let unpack = |n: Candidate| n.unwrap_or((-1, [0, 0]));
    let (ra, ma) = unpack(a);
    let (rb, mb) = unpack(b);
    let (rc, mc) = unpack(c);
    let matches = [ra == ref_idx, rb == ref_idx, rc == ref_idx];
    if matches.iter().filter(|&&m| m).count() == 1 {
        if matches[0] {
            return ma;
        }
        if matches[1] {
            return mb;
        }
        return mc;
    }
    [
        median3(i32::from(ma[0]), i32::from(mb[0]), i32::from(mc[0])) as i16,
        median3(i32::from(ma[1]), i32::from(mb[1]), i32::from(mc[1])) as i16,
    ]
}

/// P_Skip 的运动矢量 (8.4.1.1)
pub(super) fn predict_skip_mv(pos: &MbPos, cur: &MbInfo) -> [i16; 2] {
    if pos.left().is_none() || pos.top().is_none() {
        return [0, 0];
    }
    let zero_ref0 = |n: Candidate| matches!(n, Some((0, [0, 0])));
    if zero_ref0(candidate(pos, cur, -1, 0)) || zero_ref0(candidate(pos, cur, 0, -1)) {
        return [0, 0];
    }
    predict_mv(pos, cur, (0, 0, 4, 4), 0)
}

/// 按分区顺序推导宏块全部运动矢量, 逐个写入 `rec.info.mv`
pub(super) fn derive_motion(pos: &MbPos, rec: &mut MbRecord) -> TaoResult<()> {
    if rec.mb_type == MbType::PSkip {
        let mv = predict_skip_mv(pos, &rec.info);
        rec.info.fill_motion(0, 0, 4, 4, 0, mv);
        return Ok(());
    }
    for idx in 0..rec.parts.len() {
        let part = rec.parts[idx];
        let ref_idx = part.ref_idx as i8;
        let pred = predict_mv(pos, &rec.info, (part.x4, part.y4, part.w4, part.h4), ref_idx);
        let mv = [
            add_mv(pred[0], part.mvd[0])?,
            add_mv(pred[1], part.mvd[1])?,
        ];
        rec.info.fill_motion(part.x4, part.y4, part.w4, part.h4, ref_idx, mv);
    }
    Ok(())
}

fn add_mv(pred: i16, mvd: i16) -> TaoResult<i16> {
    let sum = i32::from(pred) + i32::from(mvd);
    i16::try_from(sum).map_err(|_| TaoError::InvalidData(format!("H264: 运动矢量超出范围, value={}", sum)))
}
