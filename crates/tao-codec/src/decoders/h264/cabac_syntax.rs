//! CABAC 宏块语法读取 (9.3.2, 9.3.3.1).
//!
//! 每个语法元素的二值化与 ctxIdxInc 推导都在这里完成,
//! 邻居信息统一经由 `MbPos` 获取.

use tao_core::{TaoError, TaoResult};

use super::cabac::{CabacCtx, CabacDecoder, init_contexts};
use super::macroblock::{BlockCat, MbSyntaxReader, MbType, SubMbType};
use super::macroblock_state::{MbInfo, MbKind, MbPos};

/// 各 ctxBlockCat 的 significant/last 上下文偏移
const SIG_CTX_OFFSET: [usize; 5] = [0, 15, 29, 44, 47];
/// 各 ctxBlockCat 的 coeff_abs_level_minus1 上下文偏移
const ABS_CTX_OFFSET: [usize; 5] = [0, 10, 20, 30, 39];

const CTX_MB_TYPE_I: usize = 3;
const CTX_MB_SKIP: usize = 11;
const CTX_MB_TYPE_P: usize = 14;
const CTX_MB_TYPE_I_IN_P: usize = 17;
const CTX_SUB_MB_TYPE: usize = 21;
const CTX_MVD_X: usize = 40;
const CTX_MVD_Y: usize = 47;
const CTX_REF_IDX: usize = 54;
const CTX_QP_DELTA: usize = 60;
const CTX_CHROMA_PRED: usize = 64;
const CTX_PREV_INTRA4X4: usize = 68;
const CTX_REM_INTRA4X4: usize = 69;
const CTX_CBP_LUMA: usize = 73;
const CTX_CBP_CHROMA: usize = 77;
const CTX_CODED_BLOCK_FLAG: usize = 85;
const CTX_SIGNIFICANT: usize = 105;
const CTX_LAST: usize = 166;
const CTX_ABS_LEVEL: usize = 227;

/// mb_qp_delta 一元码的最大 bin 数
const MAX_QP_DELTA_BINS: u32 = 104;
/// ref_idx 一元码的最大 bin 数
const MAX_REF_IDX_BINS: u32 = 32;

pub(super) struct CabacReader<'a> {
    dec: CabacDecoder<'a>,
    ctxs: Vec<CabacCtx>,
    /// 解码顺序上前一个宏块的 mb_qp_delta 是否非零
    prev_qp_delta_nonzero: bool,
}

impl<'a> CabacReader<'a> {
    /// `init_idc` 为 `None` 表示 I slice
    pub(super) fn new(rbsp: &'a [u8], header_bits: usize, init_idc: Option<u32>, slice_qp: i32) -> TaoResult<Self> {
        Ok(Self {
            dec: CabacDecoder::new(rbsp, header_bits)?,
            ctxs: init_contexts(init_idc, slice_qp)?,
            prev_qp_delta_nonzero: false,
        })
    }

    fn bin(&mut self, ctx_idx: usize) -> u32 {
        self.dec.decode_decision(&mut self.ctxs[ctx_idx])
    }

    /// k 阶指数哥伦布旁路后缀 (9.3.2.3)
    fn exp_golomb_bypass(&mut self, mut k: u32) -> TaoResult<u32> {
        let mut value = 0u32;
        while self.dec.decode_bypass() == 1 {
            value += 1 << k;
            k += 1;
            if k >= 30 {
                return Err(TaoError::InvalidData("H264: CABAC 指数哥伦布后缀过长".into()));
            }
        }
        while k > 0 {
            k -= 1;
            value += self.dec.decode_bypass() << k;
        }
        Ok(value)
    }

    /// I 宏块类型, `in_p` 时为 P slice 中的帧内后缀
    fn read_intra_mb_type(&mut self, pos: &MbPos, in_p: bool) -> TaoResult<u32> {
        let (base, first) = if in_p {
            (CTX_MB_TYPE_I_IN_P, CTX_MB_TYPE_I_IN_P)
        } else {
            let cond = |info: Option<&MbInfo>| usize::from(info.is_some_and(|m| m.kind != MbKind::I4x4));
            let inc = cond(pos.left()) + cond(pos.top());
            (CTX_MB_TYPE_I, CTX_MB_TYPE_I + inc)
        };
        if self.bin(first) == 0 {
            return Ok(0);
        }
        if self.dec.decode_terminate() == 1 {
            return Ok(25);
        }
        // 后续 bin 的 ctxIdxInc 见表 9-39
        let (luma_ctx, chroma_ctx, chroma2_ctx, pred0_ctx, pred1_ctx) = if in_p {
            (base + 1, base + 2, base + 2, base + 3, base + 3)
        } else {
            (base + 3, base + 4, base + 5, base + 6, base + 7)
        };
        let luma = self.bin(luma_ctx);
        let chroma = if self.bin(chroma_ctx) == 0 {
            0
        } else {
            1 + self.bin(chroma2_ctx)
        };
        let pred = (self.bin(pred0_ctx) << 1) | self.bin(pred1_ctx);
        Ok(1 + pred + 4 * chroma + 12 * luma)
    }
}

impl MbSyntaxReader for CabacReader<'_> {
    fn read_skip(&mut self, pos: &MbPos) -> TaoResult<bool> {
        let cond = |info: Option<&MbInfo>| usize::from(info.is_some_and(|m| m.kind != MbKind::PSkip));
        let inc = cond(pos.left()) + cond(pos.top());
        Ok(self.bin(CTX_MB_SKIP + inc) == 1)
    }

    fn read_mb_type(&mut self, pos: &MbPos, p_slice: bool) -> TaoResult<MbType> {
        if !p_slice {
            return MbType::from_i_raw(self.read_intra_mb_type(pos, false)?);
        }
        if self.bin(CTX_MB_TYPE_P) == 1 {
            let raw = self.read_intra_mb_type(pos, true)?;
            return MbType::from_p_raw(5 + raw);
        }
        let raw = if self.bin(CTX_MB_TYPE_P + 1) == 0 {
            3 * self.bin(CTX_MB_TYPE_P + 2)
        } else {
            2 - self.bin(CTX_MB_TYPE_P + 3)
        };
        MbType::from_p_raw(raw)
    }

    fn read_sub_mb_type(&mut self) -> TaoResult<SubMbType> {
        let raw = if self.bin(CTX_SUB_MB_TYPE) == 1 {
            0
        } else if self.bin(CTX_SUB_MB_TYPE + 1) == 0 {
            1
        } else if self.bin(CTX_SUB_MB_TYPE + 2) == 1 {
            2
        } else {
            3
        };
        SubMbType::from_raw(raw)
    }

    fn read_ref_idx(&mut self, pos: &MbPos, cur: &MbInfo, x4: usize, y4: usize, _num_ref: u32) -> TaoResult<u32> {
        let cond = |nb: Option<(&MbInfo, usize)>| {
            usize::from(nb.is_some_and(|(m, r)| {
                m.kind != MbKind::PSkip && !m.kind.is_intra() && m.ref_idx[r] > 0
            }))
        };
        let a = cond(pos.locate(cur, x4 as i32 - 1, y4 as i32));
        let b = cond(pos.locate(cur, x4 as i32, y4 as i32 - 1));
        if self.bin(CTX_REF_IDX + a + 2 * b) == 0 {
            return Ok(0);
        }
        let mut value = 1;
        let mut ctx = CTX_REF_IDX + 4;
        while self.bin(ctx) == 1 {
            value += 1;
            ctx = CTX_REF_IDX + 5;
            if value > MAX_REF_IDX_BINS {
                return Err(TaoError::InvalidData(format!("H264: CABAC ref_idx 过大, value={}", value)));
            }
        }
        Ok(value)
    }

    fn read_mvd(&mut self, pos: &MbPos, cur: &MbInfo, x4: usize, y4: usize, comp: usize) -> TaoResult<i32> {
        let abs_of = |nb: Option<(&MbInfo, usize)>| nb.map_or(0, |(m, r)| i32::from(m.mvd[r][comp]).abs());
        let sum = abs_of(pos.locate(cur, x4 as i32 - 1, y4 as i32))
            + abs_of(pos.locate(cur, x4 as i32, y4 as i32 - 1));
        let base = if comp == 0 { CTX_MVD_X } else { CTX_MVD_Y };
        let inc = match sum {
            s if s < 3 => 0,
            s if s <= 32 => 1,
            _ => 2,
        };
        if self.bin(base + inc) == 0 {
            return Ok(0);
        }
        // 前缀为 uCoff=9 的截断一元码
        let mut prefix = 1u32;
        while prefix < 9 {
            let inc = [3, 4, 5, 6, 6, 6, 6, 6][prefix as usize - 1];
            if self.bin(base + inc) == 0 {
                break;
            }
            prefix += 1;
        }
        let mut value = prefix;
        if prefix >= 9 {
            value += self.exp_golomb_bypass(3)?;
        }
        let value = value as i32;
        Ok(if self.dec.decode_bypass() == 1 { -value } else { value })
    }

    fn read_intra4x4_mode(&mut self) -> TaoResult<Option<u8>> {
        if self.bin(CTX_PREV_INTRA4X4) == 1 {
            return Ok(None);
        }
        let mut rem = 0u8;
        for i in 0..3 {
            rem |= (self.bin(CTX_REM_INTRA4X4) as u8) << i;
        }
        Ok(Some(rem))
    }

    fn read_intra_chroma_pred_mode(&mut self, pos: &MbPos) -> TaoResult<u8> {
        let cond = |info: Option<&MbInfo>| {
            usize::from(info.is_some_and(|m| {
                m.kind.is_intra() && m.kind != MbKind::IPcm && m.chroma_pred_mode != 0
            }))
        };
        let inc = cond(pos.left()) + cond(pos.top());
        if self.bin(CTX_CHROMA_PRED + inc) == 0 {
            return Ok(0);
        }
        if self.bin(CTX_CHROMA_PRED + 3) == 0 {
            return Ok(1);
        }
        Ok(2 + self.bin(CTX_CHROMA_PRED + 3) as u8)
    }

    fn read_coded_block_pattern(&mut self, pos: &MbPos, cur: &MbInfo, _intra: bool) -> TaoResult<u8> {
        let mut luma = 0u8;
        for b8 in 0..4usize {
            let bx = (b8 & 1) * 2;
            let by = (b8 >> 1) * 2;
            // 当前宏块内的邻居使用已解出的位
            let a = if bx > 0 {
                usize::from(luma & (1 << (b8 - 1)) == 0)
            } else {
                luma_cbp_cond(pos.locate(cur, -1, by as i32))
            };
            let b = if by > 0 {
                usize::from(luma & (1 << (b8 - 2)) == 0)
            } else {
                luma_cbp_cond(pos.locate(cur, bx as i32, -1))
            };
            luma |= (self.bin(CTX_CBP_LUMA + a + 2 * b) as u8) << b8;
        }

        let chroma_cond = |info: Option<&MbInfo>, level: u8| {
            usize::from(info.is_some_and(|m| {
                m.kind == MbKind::IPcm || (m.kind != MbKind::PSkip && m.cbp_chroma() >= level)
            }))
        };
        let (left, top) = (pos.left(), pos.top());
        let inc = chroma_cond(left, 1) + 2 * chroma_cond(top, 1);
        let chroma = if self.bin(CTX_CBP_CHROMA + inc) == 0 {
            0
        } else {
            let inc = chroma_cond(left, 2) + 2 * chroma_cond(top, 2);
            1 + self.bin(CTX_CBP_CHROMA + 4 + inc) as u8
        };
        Ok(luma | (chroma << 4))
    }

    fn read_mb_qp_delta(&mut self) -> TaoResult<i32> {
        let inc = usize::from(self.prev_qp_delta_nonzero);
        if self.bin(CTX_QP_DELTA + inc) == 0 {
            self.prev_qp_delta_nonzero = false;
            return Ok(0);
        }
        let mut k = 1u32;
        let mut ctx = CTX_QP_DELTA + 2;
        while self.bin(ctx) == 1 {
            k += 1;
            ctx = CTX_QP_DELTA + 3;
            if k > MAX_QP_DELTA_BINS {
                return Err(TaoError::InvalidData("H264: CABAC mb_qp_delta 过长".into()));
            }
        }
        self.prev_qp_delta_nonzero = true;
        // 映射见表 9-3
        let magnitude = k.div_ceil(2) as i32;
        Ok(if k % 2 == 1 { magnitude } else { -magnitude })
    }

    fn clear_qp_delta(&mut self) {
        self.prev_qp_delta_nonzero = false;
    }

    fn read_residual_block(&mut self, pos: &MbPos, cur: &MbInfo, cat: BlockCat, levels: &mut [i32]) -> TaoResult<u8> {
        let ctx_cat = cat.ctx_cat();
        let (a, b) = coded_block_flag_conds(pos, cur, cat);
        if self.bin(CTX_CODED_BLOCK_FLAG + ctx_cat * 4 + a + 2 * b) == 0 {
            return Ok(0);
        }

        let max = levels.len();
        let sig_base = CTX_SIGNIFICANT + SIG_CTX_OFFSET[ctx_cat];
        let last_base = CTX_LAST + SIG_CTX_OFFSET[ctx_cat];
        let mut significant = [0usize; 16];
        let mut count = 0usize;
        let mut reached_last = false;
        for i in 0..max.saturating_sub(1) {
            let inc = if ctx_cat == 3 { i.min(2) } else { i };
            if self.bin(sig_base + inc) == 1 {
                significant[count] = i;
                count += 1;
                if self.bin(last_base + inc) == 1 {
                    reached_last = true;
                    break;
                }
            }
        }
        if !reached_last {
            significant[count] = max - 1;
            count += 1;
        }

        let abs_base = CTX_ABS_LEVEL + ABS_CTX_OFFSET[ctx_cat];
        let gt1_cap = if ctx_cat == 3 { 3 } else { 4 };
        let mut num_gt1 = 0usize;
        let mut num_eq1 = 0usize;
        for &scan in significant[..count].iter().rev() {
            let inc0 = if num_gt1 != 0 { 0 } else { (1 + num_eq1).min(4) };
            let mut minus1 = 0u32;
            if self.bin(abs_base + inc0) == 1 {
                let inc = 5 + num_gt1.min(gt1_cap);
                minus1 = 1;
                while minus1 < 14 && self.bin(abs_base + inc) == 1 {
                    minus1 += 1;
                }
                if minus1 >= 14 {
                    minus1 += self.exp_golomb_bypass(0)?;
                }
            }
            let abs = minus1 as i32 + 1;
            if abs == 1 {
                num_eq1 += 1;
            } else {
                num_gt1 += 1;
            }
            levels[scan] = if self.dec.decode_bypass() == 1 { -abs } else { abs };
        }
        Ok(count as u8)
    }

    fn read_pcm_samples(&mut self, out: &mut Vec<u8>) -> TaoResult<()> {
        self.dec.read_pcm(out, 384)
    }

    fn end_of_slice(&mut self) -> TaoResult<bool> {
        Ok(self.dec.decode_terminate() == 1)
    }

    fn overrun(&self) -> bool {
        self.dec.overrun()
    }
}

// ============================================================
// ctxIdxInc 推导
// ============================================================

/// coded_block_pattern 亮度位的邻居条件 (9.3.3.1.1.4)
fn luma_cbp_cond(nb: Option<(&MbInfo, usize)>) -> usize {
    match nb {
        None => 0,
        Some((m, _)) if m.kind == MbKind::IPcm => 0,
        Some((m, raster)) => {
            let b8 = (raster / 8) * 2 + (raster % 4) / 2;
            usize::from(m.kind == MbKind::PSkip || m.cbp_luma() & (1 << b8) == 0)
        }
    }
}

/// coded_block_flag 的邻居条件 (9.3.3.1.1.9), 邻居不可用时帧内取 1
fn coded_block_flag_conds(pos: &MbPos, cur: &MbInfo, cat: BlockCat) -> (usize, usize) {
    let unavailable = usize::from(cur.kind.is_intra());
    let resolve = |coded: Option<bool>| coded.map_or(unavailable, usize::from);
    let (a, b) = match cat {
        BlockCat::LumaDc => {
            let dc = |m: &MbInfo| m.coded_dc & 0x01 != 0;
            (pos.left().map(dc), pos.top().map(dc))
        }
        BlockCat::LumaAc { x4, y4 } | BlockCat::Luma4x4 { x4, y4 } => {
            let coded = |(m, r): (&MbInfo, usize)| m.total_coeff[r] != 0;
            (
                pos.locate(cur, x4 as i32 - 1, y4 as i32).map(coded),
                pos.locate(cur, x4 as i32, y4 as i32 - 1).map(coded),
            )
        }
        BlockCat::ChromaDc { comp } => {
            let dc = |m: &MbInfo| m.coded_dc & (0x02 << comp) != 0;
            (pos.left().map(dc), pos.top().map(dc))
        }
        BlockCat::ChromaAc { comp, x2, y2 } => {
            let coded = |(m, i): (&MbInfo, usize)| m.chroma_total_coeff[comp][i] != 0;
            (
                pos.locate_chroma(cur, x2 as i32 - 1, y2 as i32).map(coded),
                pos.locate_chroma(cur, x2 as i32, y2 as i32 - 1).map(coded),
            )
        }
    };
    (resolve(a), resolve(b))
}
