//! 宏块语法层.
//!
//! `MbSyntaxReader` 抽象出 CAVLC 与 CABAC 共有的语法元素读取接口,
//! `decode_macroblock` 按 7.3.5 的顺序驱动读取并生成 `MbRecord`.

use tao_core::{TaoError, TaoResult};

use super::common::{BLK4X4_XY, ZIGZAG_4X4, wrap_qp};
use super::macroblock_state::{MbInfo, MbKind, MbPos};

// ============================================================
// 宏块类型
// ============================================================

/// 宏块类型 (仅 I/P slice)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MbType {
    I4x4,
    I16x16 {
        pred_mode: u8,
        cbp_luma: u8,
        cbp_chroma: u8,
    },
    IPcm,
    P16x16,
    P16x8,
    P8x16,
    P8x8,
    P8x8Ref0,
    PSkip,
}

impl MbType {
    /// I slice 的 mb_type (表 7-11)
    pub(super) fn from_i_raw(raw: u32) -> TaoResult<Self> {
        match raw {
            0 => Ok(Self::I4x4),
            1..=24 => {
                let t = raw - 1;
                Ok(Self::I16x16 {
                    pred_mode: (t % 4) as u8,
                    cbp_chroma: ((t / 4) % 3) as u8,
                    cbp_luma: if raw >= 13 { 15 } else { 0 },
                })
            }
            25 => Ok(Self::IPcm),
            _ => Err(TaoError::InvalidData(format!(
                "H264: I 宏块 mb_type 非法, value={}",
                raw
            ))),
        }
    }

    /// P slice 的 mb_type (表 7-13), 5 及以上为帧内类型
    pub(super) fn from_p_raw(raw: u32) -> TaoResult<Self> {
        match raw {
            0 => Ok(Self::P16x16),
            1 => Ok(Self::P16x8),
            2 => Ok(Self::P8x16),
            3 => Ok(Self::P8x8),
            4 => Ok(Self::P8x8Ref0),
            _ => Self::from_i_raw(raw - 5),
        }
    }

    pub(super) fn kind(self) -> MbKind {
        match self {
            Self::I4x4 => MbKind::I4x4,
            Self::I16x16 { .. } => MbKind::I16x16,
            Self::IPcm => MbKind::IPcm,
            Self::PSkip => MbKind::PSkip,
            _ => MbKind::PInter,
        }
    }

    pub(super) fn is_intra(self) -> bool {
        self.kind().is_intra()
    }

    pub(super) fn has_sub_partitions(self) -> bool {
        matches!(self, Self::P8x8 | Self::P8x8Ref0)
    }

    /// 宏块级分区 (x4, y4, w4, h4)
    pub(super) fn partitions(self) -> &'static [(usize, usize, usize, usize)] {
        match self {
            Self::P16x16 | Self::PSkip => &[(0, 0, 4, 4)],
            Self::P16x8 => &[(0, 0, 4, 2), (0, 2, 4, 2)],
            Self::P8x16 => &[(0, 0, 2, 4), (2, 0, 2, 4)],
            Self::P8x8 | Self::P8x8Ref0 => &[(0, 0, 2, 2), (2, 0, 2, 2), (0, 2, 2, 2), (2, 2, 2, 2)],
            _ => &[],
        }
    }
}

/// P 子宏块类型 (表 7-17)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(super) enum SubMbType {
    #[default]
    P8x8,
    P8x4,
    P4x8,
    P4x4,
}

impl SubMbType {
    pub(super) fn from_raw(raw: u32) -> TaoResult<Self> {
        match raw {
            0 => Ok(Self::P8x8),
            1 => Ok(Self::P8x4),
            2 => Ok(Self::P4x8),
            3 => Ok(Self::P4x4),
            _ => Err(TaoError::InvalidData(format!(
                "H264: sub_mb_type 非法, value={}",
                raw
            ))),
        }
    }

    /// 子分区相对 8x8 左上角的 (x4, y4, w4, h4)
    pub(super) fn partitions(self) -> &'static [(usize, usize, usize, usize)] {
        match self {
            Self::P8x8 => &[(0, 0, 2, 2)],
            Self::P8x4 => &[(0, 0, 2, 1), (0, 1, 2, 1)],
            Self::P4x8 => &[(0, 0, 1, 2), (1, 0, 1, 2)],
            Self::P4x4 => &[(0, 0, 1, 1), (1, 0, 1, 1), (0, 1, 1, 1), (1, 1, 1, 1)],
        }
    }
}

/// 单个运动分区, 坐标以 4x4 块为单位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct PartMotion {
    pub x4: usize,
    pub y4: usize,
    pub w4: usize,
    pub h4: usize,
    pub ref_idx: u8,
    pub mvd: [i16; 2],
}

// ============================================================
// 残差块类别
// ============================================================

/// 残差块类别及其在宏块内的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum BlockCat {
    /// Intra16x16 DC (16 个系数)
    LumaDc,
    /// Intra16x16 AC (15 个系数)
    LumaAc { x4: usize, y4: usize },
    /// 普通 4x4 亮度块 (16 个系数)
    Luma4x4 { x4: usize, y4: usize },
    /// 色度 DC (4 个系数)
    ChromaDc { comp: usize },
    /// 色度 AC (15 个系数)
    ChromaAc { comp: usize, x2: usize, y2: usize },
}

impl BlockCat {
    /// ctxBlockCat 编号
    pub(super) fn ctx_cat(self) -> usize {
        match self {
            Self::LumaDc => 0,
            Self::LumaAc { .. } => 1,
            Self::Luma4x4 { .. } => 2,
            Self::ChromaDc { .. } => 3,
            Self::ChromaAc { .. } => 4,
        }
    }

    pub(super) fn max_coeffs(self) -> usize {
        match self {
            Self::LumaDc | Self::Luma4x4 { .. } => 16,
            Self::LumaAc { .. } | Self::ChromaAc { .. } => 15,
            Self::ChromaDc { .. } => 4,
        }
    }
}

// ============================================================
// 宏块记录
// ============================================================

/// 单个宏块的解析结果, 系数已按光栅顺序放置
#[derive(Debug, Clone)]
pub(super) struct MbRecord {
    pub mb_type: MbType,
    pub sub_types: [SubMbType; 4],
    pub parts: Vec<PartMotion>,
    /// 16 个 4x4 亮度块, 以宏块内光栅索引寻址
    pub luma: [[i32; 16]; 16],
    /// Intra16x16 亮度 DC, 4x4 矩阵 (行为 y4, 列为 x4)
    pub luma_dc: [i32; 16],
    pub chroma_dc: [[i32; 4]; 2],
    pub chroma_ac: [[[i32; 16]; 4]; 2],
    pub pcm: Vec<u8>,
    pub qp_delta: i32,
    /// 当前宏块的邻居信息, 解码完成后写回网格
    pub info: MbInfo,
}

impl Default for MbRecord {
    fn default() -> Self {
        Self {
            mb_type: MbType::I4x4,
            sub_types: [SubMbType::default(); 4],
            parts: Vec::with_capacity(16),
            luma: [[0; 16]; 16],
            luma_dc: [0; 16],
            chroma_dc: [[0; 4]; 2],
            chroma_ac: [[[0; 16]; 4]; 2],
            pcm: Vec::new(),
            qp_delta: 0,
            info: MbInfo::default(),
        }
    }
}

impl MbRecord {
    /// 为下一个宏块清空记录, `qp` 为当前的 QP_Y,PRED
    pub(super) fn reset(&mut self, slice_id: i32, qp: i32) {
        self.mb_type = MbType::I4x4;
        self.sub_types = [SubMbType::default(); 4];
        self.parts.clear();
        self.luma = [[0; 16]; 16];
        self.luma_dc = [0; 16];
        self.chroma_dc = [[0; 4]; 2];
        self.chroma_ac = [[[0; 16]; 4]; 2];
        self.pcm.clear();
        self.qp_delta = 0;
        self.info = MbInfo {
            slice_id,
            qp,
            ..MbInfo::default()
        };
    }

    /// 标记为 P_Skip
    pub(super) fn set_skip(&mut self) {
        self.mb_type = MbType::PSkip;
        self.info.kind = MbKind::PSkip;
        self.info.fill_ref_idx(0, 0, 4, 4, 0);
        self.parts.push(PartMotion {
            x4: 0,
            y4: 0,
            w4: 4,
            h4: 4,
            ref_idx: 0,
            mvd: [0, 0],
        });
    }

    pub(super) fn has_residual(&self) -> bool {
        matches!(self.mb_type, MbType::I16x16 { .. }) || self.info.cbp != 0
    }
}

// ============================================================
// 语法元素读取接口
// ============================================================

/// CAVLC/CABAC 共用的宏块语法读取接口
pub(super) trait MbSyntaxReader {
    /// 读取当前宏块是否跳过 (仅 P slice)
    fn read_skip(&mut self, pos: &MbPos) -> TaoResult<bool>;

    /// 读取 mb_type
    fn read_mb_type(&mut self, pos: &MbPos, p_slice: bool) -> TaoResult<MbType>;

    fn read_sub_mb_type(&mut self) -> TaoResult<SubMbType>;

    /// 读取分区 (x4, y4) 的 ref_idx_l0, `num_ref` 为当前激活的参考数
    fn read_ref_idx(&mut self, pos: &MbPos, cur: &MbInfo, x4: usize, y4: usize, num_ref: u32) -> TaoResult<u32>;

    /// 读取分区 (x4, y4) 的 mvd 分量, `comp` 0 为水平 1 为垂直
    fn read_mvd(&mut self, pos: &MbPos, cur: &MbInfo, x4: usize, y4: usize, comp: usize) -> TaoResult<i32>;

    /// 读取 Intra4x4 预测模式, `None` 表示采用预测模式, 否则为 rem_intra4x4_pred_mode
    fn read_intra4x4_mode(&mut self) -> TaoResult<Option<u8>>;

    fn read_intra_chroma_pred_mode(&mut self, pos: &MbPos) -> TaoResult<u8>;

    /// 读取 coded_block_pattern (低 4 位亮度, 高位色度)
    fn read_coded_block_pattern(&mut self, pos: &MbPos, cur: &MbInfo, intra: bool) -> TaoResult<u8>;

    fn read_mb_qp_delta(&mut self) -> TaoResult<i32>;

    /// 当前宏块不含 mb_qp_delta 时调用
    fn clear_qp_delta(&mut self) {}

    /// 读取一个残差块, 系数按扫描顺序写入 `levels`, 返回非零系数个数
    fn read_residual_block(&mut self, pos: &MbPos, cur: &MbInfo, cat: BlockCat, levels: &mut [i32]) -> TaoResult<u8>;

    /// 读取 I_PCM 样本 (256 亮度 + 128 色度)
    fn read_pcm_samples(&mut self, out: &mut Vec<u8>) -> TaoResult<()>;

    /// 读取当前宏块之后的 slice 结束判定
    fn end_of_slice(&mut self) -> TaoResult<bool>;

    /// 是否已经越过 slice 数据末尾
    fn overrun(&self) -> bool {
        false
    }
}

/// slice 级的宏块解码参数
#[derive(Debug, Clone, Copy)]
pub(super) struct MbParams {
    pub p_slice: bool,
    pub num_ref_idx_active: u32,
    pub constrained_intra_pred: bool,
}

/// 解码一个宏块的语法, 返回是否到达 slice 末尾
pub(super) fn decode_macroblock<R: MbSyntaxReader + ?Sized>(
    reader: &mut R,
    pos: &MbPos,
    params: &MbParams,
    rec: &mut MbRecord,
) -> TaoResult<bool> {
    if params.p_slice && reader.read_skip(pos)? {
        rec.set_skip();
        reader.clear_qp_delta();
    } else {
        decode_macroblock_layer(reader, pos, params, rec)?;
    }
    reader.end_of_slice()
}

fn decode_macroblock_layer<R: MbSyntaxReader + ?Sized>(
    reader: &mut R,
    pos: &MbPos,
    params: &MbParams,
    rec: &mut MbRecord,
) -> TaoResult<()> {
    let mb_type = reader.read_mb_type(pos, params.p_slice)?;
    rec.mb_type = mb_type;
    rec.info.kind = mb_type.kind();

    if mb_type == MbType::IPcm {
        reader.read_pcm_samples(&mut rec.pcm)?;
        rec.info.mark_pcm();
        reader.clear_qp_delta();
        return Ok(());
    }

    if mb_type.has_sub_partitions() {
        for sub in rec.sub_types.iter_mut() {
            *sub = reader.read_sub_mb_type()?;
        }
    }

    match mb_type {
        MbType::I4x4 => {
            for &(x4, y4) in BLK4X4_XY.iter() {
                let predicted = predicted_intra4x4_mode(pos, &rec.info, x4, y4, params.constrained_intra_pred);
                let mode = match reader.read_intra4x4_mode()? {
                    None => predicted,
                    Some(rem) if rem < predicted => rem,
                    Some(rem) => rem + 1,
                };
                rec.info.intra4x4_modes[y4 * 4 + x4] = mode;
            }
            rec.info.chroma_pred_mode = read_chroma_mode(reader, pos)?;
        }
        MbType::I16x16 { .. } => {
            rec.info.chroma_pred_mode = read_chroma_mode(reader, pos)?;
        }
        _ => decode_inter_prediction(reader, pos, params, rec)?,
    }

    let cbp = match mb_type {
        MbType::I16x16 {
            cbp_luma,
            cbp_chroma,
            ..
        } => cbp_luma | (cbp_chroma << 4),
        _ => reader.read_coded_block_pattern(pos, &rec.info, mb_type.is_intra())?,
    };
    rec.info.cbp = cbp;

    if rec.has_residual() {
        let delta = reader.read_mb_qp_delta()?;
        if !(-26..=25).contains(&delta) {
            return Err(TaoError::InvalidData(format!(
                "H264: mb_qp_delta 超出范围, value={}",
                delta
            )));
        }
        rec.qp_delta = delta;
        rec.info.qp = wrap_qp(i64::from(rec.info.qp) + i64::from(delta));
        decode_residual(reader, pos, rec)?;
    } else {
        reader.clear_qp_delta();
    }
    Ok(())
}

fn read_chroma_mode<R: MbSyntaxReader + ?Sized>(reader: &mut R, pos: &MbPos) -> TaoResult<u8> {
    let mode = reader.read_intra_chroma_pred_mode(pos)?;
    if mode > 3 {
        return Err(TaoError::InvalidData(format!(
            "H264: intra_chroma_pred_mode 非法, value={}",
            mode
        )));
    }
    Ok(mode)
}

/// 读取分区的 ref_idx 与 mvd; 先读全部 ref_idx, 再读全部 mvd
fn decode_inter_prediction<R: MbSyntaxReader + ?Sized>(
    reader: &mut R,
    pos: &MbPos,
    params: &MbParams,
    rec: &mut MbRecord,
) -> TaoResult<()> {
    let mb_type = rec.mb_type;
    let read_refs = params.num_ref_idx_active > 1 && mb_type != MbType::P8x8Ref0;

    // (x4, y4, w4, h4) 形式的全部分区, 8x8 模式下展开子分区
    let mut layout: Vec<(usize, usize, usize, usize, usize)> = Vec::with_capacity(16);
    if mb_type.has_sub_partitions() {
        for (b8, &(bx, by, _, _)) in mb_type.partitions().iter().enumerate() {
            for &(sx, sy, w4, h4) in rec.sub_types[b8].partitions() {
                layout.push((bx + sx, by + sy, w4, h4, b8));
            }
        }
    } else {
        for (idx, &(x4, y4, w4, h4)) in mb_type.partitions().iter().enumerate() {
            layout.push((x4, y4, w4, h4, idx));
        }
    }

    let mut refs = [0u8; 4];
    for (idx, &(x4, y4, w4, h4)) in mb_type.partitions().iter().enumerate() {
        let ref_idx = if read_refs {
            reader.read_ref_idx(pos, &rec.info, x4, y4, params.num_ref_idx_active)?
        } else {
            0
        };
        if ref_idx >= params.num_ref_idx_active {
            return Err(TaoError::InvalidData(format!(
                "H264: ref_idx_l0 超出范围, ref_idx={}, num_ref={}",
                ref_idx, params.num_ref_idx_active
            )));
        }
        refs[idx] = ref_idx as u8;
        rec.info.fill_ref_idx(x4, y4, w4, h4, ref_idx as i8);
    }

    for &(x4, y4, w4, h4, owner) in layout.iter() {
        let mvd_x = reader.read_mvd(pos, &rec.info, x4, y4, 0)?;
        let mvd_y = reader.read_mvd(pos, &rec.info, x4, y4, 1)?;
        let mvd = [clamp_mvd(mvd_x)?, clamp_mvd(mvd_y)?];
        rec.info.fill_mvd(x4, y4, w4, h4, mvd);
        rec.parts.push(PartMotion {
            x4,
            y4,
            w4,
            h4,
            ref_idx: refs[owner],
            mvd,
        });
    }
    Ok(())
}

fn clamp_mvd(v: i32) -> TaoResult<i16> {
    i16::try_from(v).map_err(|_| TaoError::InvalidData(format!("H264: mvd 超出范围, value={}", v)))
}

fn decode_residual<R: MbSyntaxReader + ?Sized>(reader: &mut R, pos: &MbPos, rec: &mut MbRecord) -> TaoResult<()> {
    let mut levels = [0i32; 16];
    let intra16 = matches!(rec.mb_type, MbType::I16x16 { .. });

    if intra16 {
        levels.fill(0);
        let n = reader.read_residual_block(pos, &rec.info, BlockCat::LumaDc, &mut levels)?;
        for (scan, &level) in levels.iter().enumerate() {
            rec.luma_dc[ZIGZAG_4X4[scan]] = level;
        }
        if n > 0 {
            rec.info.coded_dc |= 0x01;
        }
    }

    let cbp_luma = rec.info.cbp_luma();
    for (blk, &(x4, y4)) in BLK4X4_XY.iter().enumerate() {
        let raster = y4 * 4 + x4;
        if cbp_luma & (1 << (blk / 4)) == 0 {
            continue;
        }
        levels.fill(0);
        let (cat, first) = if intra16 {
            (BlockCat::LumaAc { x4, y4 }, 1)
        } else {
            (BlockCat::Luma4x4 { x4, y4 }, 0)
        };
        let n = reader.read_residual_block(pos, &rec.info, cat, &mut levels[..cat.max_coeffs()])?;
        rec.info.total_coeff[raster] = n;
        for (scan, &level) in levels[..cat.max_coeffs()].iter().enumerate() {
            rec.luma[raster][ZIGZAG_4X4[scan + first]] = level;
        }
    }

    let cbp_chroma = rec.info.cbp_chroma();
    if cbp_chroma == 0 {
        return Ok(());
    }
    for comp in 0..2 {
        let mut dc = [0i32; 4];
        let n = reader.read_residual_block(pos, &rec.info, BlockCat::ChromaDc { comp }, &mut dc)?;
        rec.chroma_dc[comp] = dc;
        if n > 0 {
            rec.info.coded_dc |= 0x02 << comp;
        }
    }
    if cbp_chroma < 2 {
        return Ok(());
    }
    for comp in 0..2 {
        for blk in 0..4 {
            let (x2, y2) = (blk & 1, blk >> 1);
            levels.fill(0);
            let cat = BlockCat::ChromaAc { comp, x2, y2 };
            let n = reader.read_residual_block(pos, &rec.info, cat, &mut levels[..15])?;
            rec.info.chroma_total_coeff[comp][blk] = n;
            for (scan, &level) in levels[..15].iter().enumerate() {
                rec.chroma_ac[comp][blk][ZIGZAG_4X4[scan + 1]] = level;
            }
        }
    }
    Ok(())
}

// ============================================================
// 邻居推导
// ============================================================

/// Intra4x4 预测模式推导 (8.3.1.1)
pub(super) fn predicted_intra4x4_mode(
    pos: &MbPos,
    cur: &MbInfo,
    x4: usize,
    y4: usize,
    constrained_intra_pred: bool,
) -> u8 {
    let mode_of = |nb: Option<(&MbInfo, usize)>| -> Option<u8> {
        let (info, raster) = nb?;
        if !info.kind.is_intra() && constrained_intra_pred {
            return None;
        }
        Some(if info.kind == MbKind::I4x4 {
            info.intra4x4_modes[raster]
        } else {
            2
        })
    };
    let a = mode_of(pos.locate(cur, x4 as i32 - 1, y4 as i32));
    let b = mode_of(pos.locate(cur, x4 as i32, y4 as i32 - 1));
    match (a, b) {
        (Some(a), Some(b)) => a.min(b),
        _ => 2,
    }
}

/// CAVLC coded_block_pattern 的 me(v) 映射: codeNum → (帧内, 帧间)
pub(super) const CBP_FROM_CODE_NUM: [(u8, u8); 48] = [
    (47, 0),
    (31, 16),
    (15, 1),
    (0, 2),
    (23, 4),
    (27, 8),
    (29, 32),
    (30, 3),
    (7, 5),
    (11, 10),
    (13, 12),
    (14, 15),
    (39, 47),
    (43, 7),
    (45, 11),
    (46, 13),
    (16, 14),
    (3, 6),
    (5, 9),
    (10, 31),
    (12, 35),
    (19, 37),
    (21, 42),
    (26, 44),
    (28, 33),
    (35, 34),
    (37, 36),
    (42, 40),
    (44, 39),
    (1, 43),
    (2, 45),
    (4, 46),
    (8, 17),
    (17, 18),
    (18, 20),
    (20, 24),
    (24, 19),
    (6, 21),
    (9, 26),
    (22, 28),
    (25, 23),
    (32, 27),
    (33, 29),
    (34, 30),
    (36, 22),
    (40, 25),
    (38, 38),
    (41, 41),
];

/// me(v) 的 codeNum → CBP (高 2 位为色度)
pub(super) fn cbp_from_code_num(code_num: u32, intra: bool) -> TaoResult<u8> {
    let (i, p) = CBP_FROM_CODE_NUM.get(code_num as usize).copied().ok_or_else(|| {
        TaoError::InvalidData(format!("H264: coded_block_pattern 非法, code_num={}", code_num))
    })?;
    Ok(if intra { i } else { p })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::h264::macroblock_state::MbGrid;

    #[test]
    fn test_i_mb_type_mapping() {
        assert_eq!(MbType::from_i_raw(0).unwrap(), MbType::I4x4);
        assert_eq!(
            MbType::from_i_raw(1).unwrap(),
            MbType::I16x16 {
                pred_mode: 0,
                cbp_luma: 0,
                cbp_chroma: 0
            }
        );
        assert_eq!(
            MbType::from_i_raw(24).unwrap(),
            MbType::I16x16 {
                pred_mode: 3,
                cbp_luma: 15,
                cbp_chroma: 2
            }
        );
        assert_eq!(MbType::from_i_raw(25).unwrap(), MbType::IPcm);
        assert!(MbType::from_i_raw(26).is_err());
        assert_eq!(MbType::from_p_raw(4).unwrap(), MbType::P8x8Ref0);
        assert_eq!(MbType::from_p_raw(5).unwrap(), MbType::I4x4, "P slice 中 5 为 I4x4");
        assert!(MbType::from_p_raw(31).is_err());
    }

    #[test]
    fn test_cbp_code_num_tables_are_permutations() {
        let mut seen_i = [false; 48];
        let mut seen_p = [false; 48];
        for &(i, p) in CBP_FROM_CODE_NUM.iter() {
            assert!(!seen_i[i as usize], "帧内 CBP 重复, cbp={}", i);
            assert!(!seen_p[p as usize], "帧间 CBP 重复, cbp={}", p);
            seen_i[i as usize] = true;
            seen_p[p as usize] = true;
        }
        assert_eq!(cbp_from_code_num(0, true).unwrap(), 47);
        assert_eq!(cbp_from_code_num(0, false).unwrap(), 0);
        assert!(cbp_from_code_num(48, false).is_err());
    }

    #[test]
    fn test_predicted_intra4x4_mode_defaults_to_dc() {
        let grid = MbGrid::new(1, 1);
        let pos = MbPos::new(&grid, 0, 0);
        let mut cur = MbInfo::default();
        // 图像左上角的块两侧都不可用
        assert_eq!(predicted_intra4x4_mode(&pos, &cur, 0, 0, false), 2);
        cur.intra4x4_modes[0] = 0;
        cur.intra4x4_modes[1] = 1;
        // (1,1): A=(0,1)=8, B=(1,0)=1
        assert_eq!(predicted_intra4x4_mode(&pos, &cur, 1, 1, false), 1);
        // (0,1): 左侧宏块不可用
        assert_eq!(predicted_intra4x4_mode(&pos, &cur, 0, 1, false), 2);
    }

    #[test]
    fn test_sub_partition_layout() {
        let parts = SubMbType::P4x8.partitions();
        assert_eq!(parts, &[(0, 0, 1, 2), (1, 0, 1, 2)]);
        assert!(SubMbType::from_raw(4).is_err());
        assert_eq!(MbType::P8x16.partitions().len(), 2);
    }
}
