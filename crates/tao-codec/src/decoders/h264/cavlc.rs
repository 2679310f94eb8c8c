//! CAVLC 宏块语法读取.
//!
//! coeff_token / total_zeros / run_before 采用表 9-5 ~ 9-10 的码字,
//! 以 (码字, 码长) 数组形式保存, 读取时按码长逐项比对.

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::macroblock::{BlockCat, MbSyntaxReader, MbType, SubMbType, cbp_from_code_num};
use super::macroblock_state::{MbInfo, MbPos};

/// level_prefix 的上限
const MAX_LEVEL_PREFIX: u32 = 19;

/// CAVLC 语法读取器
pub(super) struct CavlcReader<'a> {
    br: BitReader<'a>,
    /// 剩余的 mb_skip_run, `None` 表示下一个宏块需要重新读取
    skip_run: Option<u32>,
}

impl<'a> CavlcReader<'a> {
    /// 在 slice 数据起始位置创建读取器
    pub(super) fn new(rbsp: &'a [u8], header_bits: usize) -> TaoResult<Self> {
        let mut br = BitReader::new(rbsp);
        br.skip_bits(header_bits)?;
        Ok(Self { br, skip_run: None })
    }

    fn read_coeff_token(&mut self, n_c: i32) -> TaoResult<(usize, usize)> {
        let idx = if n_c < 0 {
            read_vlc(
                &mut self.br,
                &CHROMA_DC_COEFF_TOKEN_BITS.map(u16::from),
                &CHROMA_DC_COEFF_TOKEN_LENS,
                "coeff_token",
            )?
        } else {
            let table = match n_c {
                0 | 1 => 0,
                2 | 3 => 1,
                4..=7 => 2,
                _ => 3,
            };
            read_vlc(
                &mut self.br,
                &COEFF_TOKEN_BITS[table],
                &COEFF_TOKEN_LENS[table],
                "coeff_token",
            )?
        };
        Ok(map_coeff_token(idx))
    }

    /// 读取一个残差块, 返回非零系数个数 (7.3.5.3.2)
    fn read_coeffs(&mut self, n_c: i32, levels: &mut [i32]) -> TaoResult<u8> {
        let max_coeffs = levels.len();
        let (trailing_ones, total_coeff) = self.read_coeff_token(n_c)?;
        if total_coeff == 0 {
            return Ok(0);
        }
        if total_coeff > max_coeffs {
            return Err(TaoError::InvalidData(format!(
                "H264: total_coeff 超出范围, total_coeff={}, max={}",
                total_coeff, max_coeffs
            )));
        }

        let mut level = [0i32; 16];
        let mut suffix_length: u32 = u32::from(total_coeff > 10 && trailing_ones < 3);
        for i in 0..total_coeff {
            if i < trailing_ones {
                level[i] = if self.br.read_flag()? { -1 } else { 1 };
                continue;
            }
            let level_prefix = self.read_level_prefix()?;
            let mut level_code = (level_prefix.min(15) << suffix_length) as i32;
            if suffix_length > 0 || level_prefix >= 14 {
                let suffix_size = if level_prefix == 14 && suffix_length == 0 {
                    4
                } else if level_prefix >= 15 {
                    level_prefix - 3
                } else {
                    suffix_length
                };
                level_code += self.br.read_bits(suffix_size)? as i32;
            }
            if level_prefix >= 15 && suffix_length == 0 {
                level_code += 15;
            }
            if level_prefix >= 16 {
                level_code += (1 << (level_prefix - 3)) - 4096;
            }
            if i == trailing_ones && trailing_ones < 3 {
                level_code += 2;
            }
            level[i] = if level_code & 1 == 0 {
                (level_code + 2) >> 1
            } else {
                -((level_code + 1) >> 1)
            };
            if suffix_length == 0 {
                suffix_length = 1;
            }
            if level[i].abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
                suffix_length += 1;
            }
        }

        let mut zeros_left = if total_coeff < max_coeffs {
            let total_zeros = if max_coeffs == 4 {
                read_vlc(
                    &mut self.br,
                    &CHROMA_DC_TOTAL_ZERO_BITS[total_coeff - 1].map(u16::from),
                    &CHROMA_DC_TOTAL_ZERO_LENS[total_coeff - 1],
                    "total_zeros",
                )?
            } else {
                read_vlc(
                    &mut self.br,
                    &TOTAL_ZERO_BITS[total_coeff - 1].map(u16::from),
                    &TOTAL_ZERO_LENS[total_coeff - 1],
                    "total_zeros",
                )?
            };
            if total_zeros + total_coeff > max_coeffs {
                return Err(TaoError::InvalidData(format!(
                    "H264: total_zeros 超出范围, total_zeros={}, total_coeff={}",
                    total_zeros, total_coeff
                )));
            }
            total_zeros
        } else {
            0
        };

        let mut run = [0usize; 16];
        for r in run.iter_mut().take(total_coeff - 1) {
            if zeros_left == 0 {
                break;
            }
            let table = zeros_left.min(7) - 1;
            let run_before = read_vlc(
                &mut self.br,
                &RUN_BEFORE_BITS[table].map(u16::from),
                &RUN_BEFORE_LENS[table],
                "run_before",
            )?;
            if run_before > zeros_left {
                return Err(TaoError::InvalidData(format!(
                    "H264: run_before 超出范围, run_before={}, zeros_left={}",
                    run_before, zeros_left
                )));
            }
            *r = run_before;
            zeros_left -= run_before;
        }
        run[total_coeff - 1] = zeros_left;

        // 从最低频开始放置, level 按逆序保存
        let mut pos = 0usize;
        for i in (0..total_coeff).rev() {
            pos += run[i];
            let slot = levels.get_mut(pos).ok_or_else(|| {
                TaoError::InvalidData(format!("H264: 系数位置越界, pos={}", pos))
            })?;
            *slot = level[i];
            pos += 1;
        }
        Ok(total_coeff as u8)
    }

    fn read_level_prefix(&mut self) -> TaoResult<u32> {
        let mut prefix = 0u32;
        while self.br.read_bit()? == 0 {
            prefix += 1;
            if prefix > MAX_LEVEL_PREFIX {
                return Err(TaoError::InvalidData(format!(
                    "H264: level_prefix 超出范围, value={}",
                    prefix
                )));
            }
        }
        Ok(prefix)
    }
}

impl MbSyntaxReader for CavlcReader<'_> {
    fn read_skip(&mut self, _pos: &MbPos) -> TaoResult<bool> {
        let remaining = match self.skip_run {
            Some(n) => n,
            None => self.br.read_ue()?,
        };
        if remaining > 0 {
            self.skip_run = Some(remaining - 1);
            return Ok(true);
        }
        self.skip_run = None;
        Ok(false)
    }

    fn read_mb_type(&mut self, _pos: &MbPos, p_slice: bool) -> TaoResult<MbType> {
        let raw = self.br.read_ue()?;
        if p_slice {
            MbType::from_p_raw(raw)
        } else {
            MbType::from_i_raw(raw)
        }
    }

    fn read_sub_mb_type(&mut self) -> TaoResult<SubMbType> {
        SubMbType::from_raw(self.br.read_ue()?)
    }

    fn read_ref_idx(&mut self, _pos: &MbPos, _cur: &MbInfo, _x4: usize, _y4: usize, num_ref: u32) -> TaoResult<u32> {
        self.br.read_te(num_ref.saturating_sub(1))
    }

    fn read_mvd(&mut self, _pos: &MbPos, _cur: &MbInfo, _x4: usize, _y4: usize, _comp: usize) -> TaoResult<i32> {
        self.br.read_se()
    }

    fn read_intra4x4_mode(&mut self) -> TaoResult<Option<u8>> {
        if self.br.read_flag()? {
            Ok(None)
        } else {
            Ok(Some(self.br.read_bits(3)? as u8))
        }
    }

    fn read_intra_chroma_pred_mode(&mut self, _pos: &MbPos) -> TaoResult<u8> {
        let mode = self.br.read_ue()?;
        u8::try_from(mode).map_err(|_| {
            TaoError::InvalidData(format!("H264: intra_chroma_pred_mode 非法, value={}", mode))
        })
    }

    fn read_coded_block_pattern(&mut self, _pos: &MbPos, _cur: &MbInfo, intra: bool) -> TaoResult<u8> {
        cbp_from_code_num(self.br.read_ue()?, intra)
    }

    fn read_mb_qp_delta(&mut self) -> TaoResult<i32> {
        self.br.read_se()
    }

    fn read_residual_block(&mut self, pos: &MbPos, cur: &MbInfo, cat: BlockCat, levels: &mut [i32]) -> TaoResult<u8> {
        let n_c = match cat {
            BlockCat::LumaDc => luma_nc(pos, cur, 0, 0),
            BlockCat::LumaAc { x4, y4 } | BlockCat::Luma4x4 { x4, y4 } => luma_nc(pos, cur, x4, y4),
            BlockCat::ChromaDc { .. } => -1,
            BlockCat::ChromaAc { comp, x2, y2 } => chroma_nc(pos, cur, comp, x2, y2),
        };
        self.read_coeffs(n_c, levels)
    }

    fn read_pcm_samples(&mut self, out: &mut Vec<u8>) -> TaoResult<()> {
        self.br.align_to_byte();
        let bytes = self.br.read_bytes(384)?;
        out.clear();
        out.extend_from_slice(bytes);
        Ok(())
    }

    fn end_of_slice(&mut self) -> TaoResult<bool> {
        if matches!(self.skip_run, Some(n) if n > 0) {
            return Ok(false);
        }
        Ok(!self.br.more_rbsp_data())
    }
}

// ============================================================
// nC 推导 (9.2.1)
// ============================================================

fn combine_nc(a: Option<u8>, b: Option<u8>) -> i32 {
    match (a, b) {
        (Some(a), Some(b)) => (i32::from(a) + i32::from(b) + 1) >> 1,
        (Some(n), None) | (None, Some(n)) => i32::from(n),
        (None, None) => 0,
    }
}

fn luma_nc(pos: &MbPos, cur: &MbInfo, x4: usize, y4: usize) -> i32 {
    let a = pos
        .locate(cur, x4 as i32 - 1, y4 as i32)
        .map(|(info, raster)| info.total_coeff[raster]);
    let b = pos
        .locate(cur, x4 as i32, y4 as i32 - 1)
        .map(|(info, raster)| info.total_coeff[raster]);
    combine_nc(a, b)
}

fn chroma_nc(pos: &MbPos, cur: &MbInfo, comp: usize, x2: usize, y2: usize) -> i32 {
    let a = pos
        .locate_chroma(cur, x2 as i32 - 1, y2 as i32)
        .map(|(info, idx)| info.chroma_total_coeff[comp][idx]);
    let b = pos
        .locate_chroma(cur, x2 as i32, y2 as i32 - 1)
        .map(|(info, idx)| info.chroma_total_coeff[comp][idx]);
    combine_nc(a, b)
}

// ============================================================
// 变长码表
// ============================================================

/// 按 (码字, 码长) 表读取一个变长码, 返回其索引
fn read_vlc(br: &mut BitReader, bits: &[u16], lens: &[u8], what: &str) -> TaoResult<usize> {
    let left = br.bits_left();
    for (idx, (&code, &len)) in bits.iter().zip(lens.iter()).enumerate() {
        let len = usize::from(len);
        if len == 0 || len > left {
            continue;
        }
        if br.peek_bits(len as u32)? == u32::from(code) {
            br.skip_bits(len)?;
            return Ok(idx);
        }
    }
    Err(TaoError::InvalidData(format!(
        "H264: {} 码字非法, bit_pos={}",
        what,
        br.bits_read()
    )))
}

/// coeff_token 码表索引 → (TrailingOnes, TotalCoeff)
fn map_coeff_token(idx: usize) -> (usize, usize) {
    const TRAILING_ONES: [usize; 6] = [0, 0, 1, 0, 1, 2];
    const TOTAL_COEFF: [usize; 6] = [0, 1, 1, 2, 2, 2];
    if idx < 6 {
        (TRAILING_ONES[idx], TOTAL_COEFF[idx])
    } else {
        ((idx - 6) & 3, (idx + 6) >> 2)
    }
}

#[rustfmt::skip]
pub(super) const COEFF_TOKEN_BITS: [[u16; 62]; 4] = [
    [
        0x01, 0x05, 0x01, 0x07, 0x04, 0x01, 0x07, 0x06, 0x05, 0x03, 0x07, 0x06, 0x05, 0x03, 0x07, 0x06,
        0x05, 0x04, 0x0F, 0x06, 0x05, 0x04, 0x0B, 0x0E, 0x05, 0x04, 0x08, 0x0A, 0x0D, 0x04, 0x0F, 0x0E,
        0x09, 0x04, 0x0B, 0x0A, 0x0D, 0x0C, 0x0F, 0x0E, 0x09, 0x0C, 0x0B, 0x0A, 0x0D, 0x08, 0x0F, 0x01,
        0x09, 0x0C, 0x0B, 0x0E, 0x0D, 0x08, 0x07, 0x0A, 0x09, 0x0C, 0x04, 0x06, 0x05, 0x08,
    ],
    [
        0x03, 0x0B, 0x02, 0x07, 0x07, 0x03, 0x07, 0x0A, 0x09, 0x05, 0x07, 0x06, 0x05, 0x04, 0x04, 0x06,
        0x05, 0x06, 0x07, 0x06, 0x05, 0x08, 0x0F, 0x06, 0x05, 0x04, 0x0B, 0x0E, 0x0D, 0x04, 0x0F, 0x0A,
        0x09, 0x04, 0x0B, 0x0E, 0x0D, 0x0C, 0x08, 0x0A, 0x09, 0x08, 0x0F, 0x0E, 0x0D, 0x0C, 0x0B, 0x0A,
        0x09, 0x0C, 0x07, 0x0B, 0x06, 0x08, 0x09, 0x08, 0x0A, 0x01, 0x07, 0x06, 0x05, 0x04,
    ],
    [
        0x0F, 0x0F, 0x0E, 0x0B, 0x0F, 0x0D, 0x08, 0x0C, 0x0E, 0x0C, 0x0F, 0x0A, 0x0B, 0x0B, 0x0B, 0x08,
        0x09, 0x0A, 0x09, 0x0E, 0x0D, 0x09, 0x08, 0x0A, 0x09, 0x08, 0x0F, 0x0E, 0x0D, 0x0D, 0x0B, 0x0E,
        0x0A, 0x0C, 0x0F, 0x0A, 0x0D, 0x0C, 0x0B, 0x0E, 0x09, 0x0C, 0x08, 0x0A, 0x0D, 0x08, 0x0D, 0x07,
        0x09, 0x0C, 0x09, 0x0C, 0x0B, 0x0A, 0x05, 0x08, 0x07, 0x06, 0x01, 0x04, 0x03, 0x02,
    ],
    [
        0x03, 0x00, 0x01, 0x04, 0x05, 0x06, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11,
        0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E, 0x1F, 0x20, 0x21,
        0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28, 0x29, 0x2A, 0x2B, 0x2C, 0x2D, 0x2E, 0x2F, 0x30, 0x31,
        0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x3A, 0x3B, 0x3C, 0x3D, 0x3E, 0x3F,
    ],
];

#[rustfmt::skip]
pub(super) const COEFF_TOKEN_LENS: [[u8; 62]; 4] = [
    [
         1,  6,  2,  8,  6,  3,  9,  8,  7,  5, 10,  9,  8,  6, 11, 10,
         9,  7, 13, 11, 10,  8, 13, 13, 11,  9, 13, 13, 13, 10, 14, 14,
        13, 11, 14, 14, 14, 13, 15, 15, 14, 14, 15, 15, 15, 14, 16, 15,
        15, 15, 16, 16, 16, 15, 16, 16, 16, 16, 16, 16, 16, 16,
    ],
    [
         2,  6,  2,  6,  5,  3,  7,  6,  6,  4,  8,  6,  6,  4,  8,  7,
         7,  5,  9,  8,  8,  6, 11,  9,  9,  6, 11, 11, 11,  7, 12, 11,
        11,  9, 12, 12, 12, 11, 12, 12, 12, 11, 13, 13, 13, 12, 13, 13,
        13, 13, 13, 14, 13, 13, 14, 14, 14, 13, 14, 14, 14, 14,
    ],
    [
         4,  6,  4,  6,  5,  4,  6,  5,  5,  4,  7,  5,  5,  4,  7,  5,
         5,  4,  7,  6,  6,  4,  7,  6,  6,  4,  8,  7,  7,  5,  8,  8,
         7,  6,  9,  8,  8,  7,  9,  9,  8,  8,  9,  9,  9,  8, 10,  9,
         9,  9, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10, 10,
    ],
    [6; 62],
];

pub(super) const CHROMA_DC_COEFF_TOKEN_BITS: [u8; 14] = [1, 7, 1, 4, 6, 1, 3, 3, 2, 5, 2, 3, 2, 0];
pub(super) const CHROMA_DC_COEFF_TOKEN_LENS: [u8; 14] = [2, 6, 1, 6, 6, 3, 6, 7, 7, 6, 6, 8, 8, 7];

#[rustfmt::skip]
pub(super) const TOTAL_ZERO_BITS: [[u8; 16]; 15] = [
    [1, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 3, 2, 1],
    [7, 6, 5, 4, 3, 5, 4, 3, 2, 3, 2, 3, 2, 1, 0, 0],
    [5, 7, 6, 5, 4, 3, 4, 3, 2, 3, 2, 1, 1, 0, 0, 0],
    [3, 7, 5, 4, 6, 5, 4, 3, 3, 2, 2, 1, 0, 0, 0, 0],
    [5, 4, 3, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0, 0, 0],
    [1, 1, 7, 6, 5, 4, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0],
    [1, 1, 5, 4, 3, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 1, 3, 3, 2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 1, 3, 2, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 1, 3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 2, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

#[rustfmt::skip]
pub(super) const TOTAL_ZERO_LENS: [[u8; 16]; 15] = [
    [1, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 9],
    [3, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 6, 6, 6, 6, 0],
    [4, 3, 3, 3, 4, 4, 3, 3, 4, 5, 5, 6, 5, 6, 0, 0],
    [5, 3, 4, 4, 3, 3, 3, 4, 3, 4, 5, 5, 5, 0, 0, 0],
    [4, 4, 4, 3, 3, 3, 3, 3, 4, 5, 4, 5, 0, 0, 0, 0],
    [6, 5, 3, 3, 3, 3, 3, 3, 4, 3, 6, 0, 0, 0, 0, 0],
    [6, 5, 3, 3, 3, 2, 3, 4, 3, 6, 0, 0, 0, 0, 0, 0],
    [6, 4, 5, 3, 2, 2, 3, 3, 6, 0, 0, 0, 0, 0, 0, 0],
    [6, 6, 4, 2, 2, 3, 2, 5, 0, 0, 0, 0, 0, 0, 0, 0],
    [5, 5, 3, 2, 2, 2, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 4, 3, 3, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [4, 4, 2, 1, 3, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 3, 1, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [2, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
];

pub(super) const CHROMA_DC_TOTAL_ZERO_BITS: [[u8; 4]; 3] = [[1, 1, 1, 0], [1, 1, 0, 0], [1, 0, 0, 0]];
pub(super) const CHROMA_DC_TOTAL_ZERO_LENS: [[u8; 4]; 3] = [[1, 2, 3, 3], [1, 2, 2, 0], [1, 1, 0, 0]];

#[rustfmt::skip]
pub(super) const RUN_BEFORE_BITS: [[u8; 15]; 7] = [
    [1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 2, 3, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0],
    [3, 0, 1, 3, 2, 5, 4, 0, 0, 0, 0, 0, 0, 0, 0],
    [7, 6, 5, 4, 3, 2, 1, 1, 1, 1, 1, 1, 1, 1, 1],
];

#[rustfmt::skip]
pub(super) const RUN_BEFORE_LENS: [[u8; 15]; 7] = [
    [1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,  0,  0],
    [1, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,  0,  0],
    [2, 2, 2, 2, 0, 0, 0, 0, 0, 0, 0, 0, 0,  0,  0],
    [2, 2, 2, 3, 3, 0, 0, 0, 0, 0, 0, 0, 0,  0,  0],
    [2, 2, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0, 0,  0,  0],
    [2, 3, 3, 3, 3, 3, 3, 0, 0, 0, 0, 0, 0,  0,  0],
    [3, 3, 3, 3, 3, 3, 3, 4, 5, 6, 7, 8, 9, 10, 11],
];
