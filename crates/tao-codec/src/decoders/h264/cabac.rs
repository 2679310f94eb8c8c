//! CABAC 算术解码引擎 (9.3.1.2, 9.3.3.2).
//!
//! 引擎按位读取 slice 数据, 维护 9 位的 codIRange / codIOffset.
//! 越过数据末尾时补 0 并记录越界, 由 slice 循环在宏块结束后检查.

use tao_core::{TaoError, TaoResult};

use super::cabac_init_pb::CABAC_INIT_PB;

/// 帧编码下使用的上下文个数 (ctxIdx 0..=275)
pub(super) const CABAC_CTX_COUNT: usize = 276;

// ============================================================
// 上下文模型
// ============================================================

/// 单个上下文: pStateIdx 与 valMPS
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct CabacCtx {
    pub state: u8,
    pub mps: u8,
}

impl CabacCtx {
    /// 由 (m, n) 与 SliceQP 初始化 (9.3.1.1)
    fn from_init(m: i8, n: i8, qp: i32) -> Self {
        let qp = qp.clamp(0, 51);
        let pre = (((i32::from(m) * qp) >> 4) + i32::from(n)).clamp(1, 126);
        if pre <= 63 {
            Self {
                state: (63 - pre) as u8,
                mps: 0,
            }
        } else {
            Self {
                state: (pre - 64) as u8,
                mps: 1,
            }
        }
    }
}

/// 为一个 slice 初始化全部上下文
///
/// `init_idc` 为 `None` 时使用 I slice 的初始化表.
pub(super) fn init_contexts(init_idc: Option<u32>, slice_qp: i32) -> TaoResult<Vec<CabacCtx>> {
    let table: &[(i8, i8); CABAC_CTX_COUNT] = match init_idc {
        None => &CABAC_INIT_I,
        Some(idc) => CABAC_INIT_PB.get(idc as usize).ok_or_else(|| {
            TaoError::InvalidData(format!("H264: cabac_init_idc 非法, value={}", idc))
        })?,
    };
    Ok(table
        .iter()
        .map(|&(m, n)| CabacCtx::from_init(m, n, slice_qp))
        .collect())
}

// ============================================================
// 算术解码引擎
// ============================================================

pub(super) struct CabacDecoder<'a> {
    data: &'a [u8],
    /// 下一个待读取的位
    pos: usize,
    range: u32,
    offset: u32,
    overrun: bool,
}

impl<'a> CabacDecoder<'a> {
    /// 在 slice 数据起始处建立引擎, 先跳过 cabac_alignment_one_bit
    pub(super) fn new(data: &'a [u8], header_bits: usize) -> TaoResult<Self> {
        let mut dec = Self {
            data,
            pos: header_bits.div_ceil(8) * 8,
            range: 510,
            offset: 0,
            overrun: false,
        };
        dec.init_engine()?;
        Ok(dec)
    }

    /// 解码引擎初始化 (9.3.1.2)
    fn init_engine(&mut self) -> TaoResult<()> {
        if self.pos >= self.data.len() * 8 {
            return Err(TaoError::InvalidData("H264: CABAC slice 数据为空".into()));
        }
        self.range = 510;
        self.offset = 0;
        for _ in 0..9 {
            self.offset = (self.offset << 1) | self.read_bit();
        }
        if self.offset >= 510 {
            return Err(TaoError::InvalidData(format!(
                "H264: CABAC codIOffset 初始值非法, value={}",
                self.offset
            )));
        }
        Ok(())
    }

    fn read_bit(&mut self) -> u32 {
        let byte = self.pos >> 3;
        let bit = match self.data.get(byte) {
            Some(&b) => u32::from((b >> (7 - (self.pos & 7))) & 1),
            None => {
                self.overrun = true;
                0
            }
        };
        self.pos += 1;
        bit
    }

    pub(super) fn overrun(&self) -> bool {
        self.overrun
    }

    /// 常规 bin 解码 (9.3.3.2.1)
    pub(super) fn decode_decision(&mut self, ctx: &mut CabacCtx) -> u32 {
        let q = ((self.range >> 6) & 3) as usize;
        let lps = u32::from(RANGE_TAB_LPS[ctx.state as usize][q]);
        self.range -= lps;
        let bin;
        if self.offset >= self.range {
            bin = u32::from(1 - ctx.mps);
            self.offset -= self.range;
            self.range = lps;
            if ctx.state == 0 {
                ctx.mps = 1 - ctx.mps;
            }
            ctx.state = NEXT_STATE_LPS[ctx.state as usize];
        } else {
            bin = u32::from(ctx.mps);
            ctx.state = NEXT_STATE_MPS[ctx.state as usize];
        }
        while self.range < 256 {
            self.range <<= 1;
            self.offset = (self.offset << 1) | self.read_bit();
        }
        bin
    }

    /// 旁路 bin 解码 (9.3.3.2.3)
    pub(super) fn decode_bypass(&mut self) -> u32 {
        self.offset = (self.offset << 1) | self.read_bit();
        if self.offset >= self.range {
            self.offset -= self.range;
            1
        } else {
            0
        }
    }

    /// 终止 bin 解码 (9.3.3.2.2), 返回 1 时不做重归一化
    pub(super) fn decode_terminate(&mut self) -> u32 {
        self.range -= 2;
        if self.offset >= self.range {
            return 1;
        }
        while self.range < 256 {
            self.range <<= 1;
            self.offset = (self.offset << 1) | self.read_bit();
        }
        0
    }

    /// 读取 I_PCM 样本后重新初始化引擎
    ///
    /// 调用前 mb_type 的终止 bin 已解出 1, 读取位置停在最后一个引擎位之后.
    pub(super) fn read_pcm(&mut self, out: &mut Vec<u8>, len: usize) -> TaoResult<()> {
        let start = self.pos.div_ceil(8);
        let end = start + len;
        let samples = self.data.get(start..end).ok_or_else(|| {
            TaoError::InvalidData(format!(
                "H264: I_PCM 数据不足, need={}, left={}",
                len,
                self.data.len().saturating_sub(start)
            ))
        })?;
        out.clear();
        out.extend_from_slice(samples);
        self.pos = end * 8;
        self.init_engine()
    }
}

// ============================================================
// 状态转移表 (表 9-44, 9-45)
// ============================================================

#[rustfmt::skip]
pub(super) const NEXT_STATE_MPS: [u8; 64] = [
     1,  2,  3,  4,  5,  6,  7,  8,  9, 10, 11, 12, 13, 14, 15, 16,
    17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32,
    33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48,
    49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

#[rustfmt::skip]
pub(super) const NEXT_STATE_LPS: [u8; 64] = [
     0,  0,  1,  2,  2,  4,  4,  5,  6,  7,  8,  9,  9, 11, 11, 12,
    13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21, 21, 22, 22, 23, 24,
    24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33,
    33, 33, 34, 34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

#[rustfmt::skip]
pub(super) const RANGE_TAB_LPS: [[u8; 4]; 64] = [
    [128, 176, 208, 240], [128, 167, 197, 227], [128, 158, 187, 216], [123, 150, 178, 205],
    [116, 142, 169, 195], [111, 135, 160, 185], [105, 128, 152, 175], [100, 122, 144, 166],
    [ 95, 116, 137, 158], [ 90, 110, 130, 150], [ 85, 104, 123, 142], [ 81,  99, 117, 135],
    [ 77,  94, 111, 128], [ 73,  89, 105, 122], [ 69,  85, 100, 116], [ 66,  80,  95, 110],
    [ 62,  76,  90, 104], [ 59,  72,  86,  99], [ 56,  69,  81,  94], [ 53,  65,  77,  89],
    [ 51,  62,  73,  85], [ 48,  59,  69,  80], [ 46,  56,  66,  76], [ 43,  53,  63,  72],
    [ 41,  50,  59,  69], [ 39,  48,  56,  65], [ 37,  45,  54,  62], [ 35,  43,  51,  59],
    [ 33,  41,  48,  56], [ 32,  39,  46,  53], [ 30,  37,  43,  50], [ 29,  35,  41,  48],
    [ 27,  33,  39,  45], [ 26,  31,  37,  43], [ 24,  30,  35,  41], [ 23,  28,  33,  39],
    [ 22,  27,  32,  37], [ 21,  26,  30,  35], [ 20,  24,  29,  33], [ 19,  23,  27,  31],
    [ 18,  22,  26,  30], [ 17,  21,  25,  28], [ 16,  20,  23,  27], [ 15,  19,  22,  25],
    [ 14,  18,  21,  24], [ 14,  17,  20,  23], [ 13,  16,  19,  22], [ 12,  15,  18,  21],
    [ 12,  14,  17,  20], [ 11,  14,  16,  19], [ 11,  13,  15,  18], [ 10,  12,  15,  17],
    [ 10,  12,  14,  16], [  9,  11,  13,  15], [  9,  11,  12,  14], [  8,  10,  12,  14],
    [  8,   9,  11,  13], [  7,   9,  11,  12], [  7,   9,  10,  12], [  7,   8,  10,  11],
    [  6,   8,   9,  11], [  6,   7,   9,  10], [  6,   7,   8,   9], [  2,   2,   2,   2],
];

/// I slice 上下文初始化 (m, n), 表 9-12 ~ 9-23 中 cabac_init_idc 无关的一列
#[rustfmt::skip]
const CABAC_INIT_I: [(i8, i8); CABAC_CTX_COUNT] = [
    // 0 - 10
    (20, -15), (2, 54), (3, 74), (20, -15), (2, 54), (3, 74), (-28, 127), (-23, 104),
    (-6, 53), (-1, 54), (7, 51),
    // 11 - 59: I slice 不使用
    (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0),
    (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0),
    (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0),
    (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0),
    (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0), (0, 0),
    // 60 - 69
    (0, 41), (0, 63), (0, 63), (0, 63), (-9, 83), (4, 86), (0, 97), (-7, 72),
    (13, 41), (3, 62),
    // 70 - 104
    (0, 11), (1, 55), (0, 69), (-17, 127), (-13, 102), (0, 82), (-7, 74), (-21, 107),
    (-27, 127), (-31, 127), (-24, 127), (-18, 95), (-27, 127), (-21, 114), (-30, 127), (-17, 123),
    (-12, 115), (-16, 122), (-11, 115), (-12, 63), (-2, 68), (-15, 84), (-13, 104), (-3, 70),
    (-8, 93), (-10, 90), (-30, 127), (-1, 74), (-6, 97), (-7, 91), (-20, 127), (-4, 56),
    (-5, 82), (-7, 76), (-22, 125),
    // 105 - 165
    (-7, 93), (-11, 87), (-3, 77), (-5, 71), (-4, 63), (-4, 68), (-12, 84), (-7, 62),
    (-7, 65), (8, 61), (5, 56), (-2, 66), (1, 64), (0, 61), (-2, 78), (1, 50),
    (7, 52), (10, 35), (0, 44), (11, 38), (1, 45), (0, 46), (5, 44), (31, 17),
    (1, 51), (7, 50), (28, 19), (16, 33), (14, 62), (-13, 108), (-15, 100), (-13, 101),
    (-13, 91), (-12, 94), (-10, 88), (-16, 84), (-10, 86), (-7, 83), (-13, 87), (-19, 94),
    (1, 70), (0, 72), (-5, 74), (18, 59), (-8, 102), (-15, 100), (0, 95), (-4, 75),
    (2, 72), (-11, 75), (-3, 71), (15, 46), (-13, 69), (0, 62), (0, 65), (21, 37),
    (-15, 72), (9, 57), (16, 54), (0, 62), (12, 72),
    // 166 - 226
    (24, 0), (15, 9), (8, 25), (13, 18), (15, 9), (13, 19), (10, 37), (12, 18),
    (6, 29), (20, 33), (15, 30), (4, 45), (1, 58), (0, 62), (7, 61), (12, 38),
    (11, 45), (15, 39), (11, 42), (13, 44), (16, 45), (12, 41), (10, 49), (30, 34),
    (18, 42), (10, 55), (17, 51), (17, 46), (0, 89), (26, -19), (22, -17), (26, -17),
    (30, -25), (28, -20), (33, -23), (37, -27), (33, -23), (40, -28), (38, -17), (33, -11),
    (40, -15), (41, -6), (38, 1), (41, 17), (30, -6), (27, 3), (26, 22), (37, -16),
    (35, -4), (38, -8), (38, -3), (37, 3), (38, 5), (42, 0), (35, 16), (39, 22),
    (14, 48), (27, 37), (21, 60), (12, 68), (2, 97),
    // 227 - 275
    (-3, 71), (-6, 42), (-5, 50), (-3, 54), (-2, 62), (0, 58), (1, 63), (-2, 72),
    (-1, 74), (-9, 91), (-5, 67), (-5, 27), (-3, 39), (-2, 44), (0, 46), (-16, 64),
    (-8, 68), (-10, 78), (-6, 77), (-10, 86), (-12, 92), (-15, 55), (-10, 60), (-6, 62),
    (-4, 65), (-12, 73), (-8, 76), (-7, 80), (-9, 88), (-17, 110), (-11, 97), (-20, 84),
    (-11, 79), (-6, 73), (-4, 74), (-13, 86), (-13, 96), (-11, 97), (-19, 117), (-8, 78),
    (-5, 33), (-4, 48), (-2, 53), (-3, 62), (-13, 71), (-10, 79), (-12, 86), (-13, 90),
    (-14, 97),
];
