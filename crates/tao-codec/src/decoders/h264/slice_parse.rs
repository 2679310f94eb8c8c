//! Slice header 解析与 POC 计算.
//!
//! 解析结果在 slice 生命周期内只读. 引用的 PPS/SPS 不在缓存中时返回
//! `TaoError::MissingParameterSet`, 语法错误返回 `TaoError::InvalidData`.

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use super::parameter_sets::ParamSetCache;
use crate::parsers::h264::{NalUnit, NalUnitType, Sps};

// ============================================================
// 数据结构
// ============================================================

/// Slice 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    pub fn from_raw(raw: u32) -> TaoResult<Self> {
        match raw {
            0 | 5 => Ok(Self::P),
            1 | 6 => Ok(Self::B),
            2 | 7 => Ok(Self::I),
            3 | 8 => Ok(Self::Sp),
            4 | 9 => Ok(Self::Si),
            _ => Err(TaoError::InvalidData(format!(
                "H264: slice_type 非法, value={}",
                raw
            ))),
        }
    }

    pub fn is_intra(self) -> bool {
        matches!(self, Self::I | Self::Si)
    }

    /// 本解码器能重建的类型
    pub fn is_supported(self) -> bool {
        matches!(self, Self::I | Self::P)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPicListMod {
    ShortTermSub { abs_diff_pic_num_minus1: u32 },
    ShortTermAdd { abs_diff_pic_num_minus1: u32 },
    LongTerm { long_term_pic_num: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmcoOp {
    ForgetShort {
        difference_of_pic_nums_minus1: u32,
    },
    ForgetLong {
        long_term_pic_num: u32,
    },
    ConvertShortToLong {
        difference_of_pic_nums_minus1: u32,
        long_term_frame_idx: u32,
    },
    TrimLong {
        max_long_term_frame_idx_plus1: u32,
    },
    ClearAll,
    MarkCurrentLong {
        long_term_frame_idx: u32,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecRefPicMarking {
    pub no_output_of_prior_pics: bool,
    pub long_term_reference_flag: bool,
    pub adaptive: bool,
    pub ops: Vec<MmcoOp>,
}

impl DecRefPicMarking {
    pub fn has_mmco5(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, MmcoOp::ClearAll))
    }
}

/// 单个参考索引的显式加权参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredWeight {
    pub luma_weight: i32,
    pub luma_offset: i32,
    pub chroma_weight: [i32; 2],
    pub chroma_offset: [i32; 2],
    /// 是否显式给出 (未给出时等价于默认权重)
    pub luma_explicit: bool,
    pub chroma_explicit: bool,
}

/// pred_weight_table()
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_denom: u32,
    pub chroma_log2_denom: u32,
    pub l0: Vec<PredWeight>,
    pub l1: Vec<PredWeight>,
}

/// 解析后的 slice header
#[derive(Debug, Clone, PartialEq)]
pub struct SliceHeader {
    pub first_mb: u32,
    pub slice_type: SliceType,
    pub pps_id: u32,
    pub sps_id: u32,
    pub frame_num: u32,
    pub field_pic: bool,
    pub idr_pic_id: Option<u32>,
    pub poc_lsb: u32,
    pub delta_poc_bottom: i32,
    pub delta_poc: [i32; 2],
    pub redundant_pic_cnt: u32,
    pub direct_spatial_mv_pred: bool,
    pub num_ref_idx_l0_active: u32,
    pub num_ref_idx_l1_active: u32,
    pub ref_pic_list_mod_l0: Vec<RefPicListMod>,
    pub ref_pic_list_mod_l1: Vec<RefPicListMod>,
    pub pred_weight: Option<PredWeightTable>,
    pub marking: DecRefPicMarking,
    pub cabac_init_idc: u8,
    pub slice_qp: i32,
    pub disable_deblocking_filter_idc: u32,
    /// FilterOffsetA = slice_alpha_c0_offset_div2 << 1
    pub filter_offset_a: i32,
    /// FilterOffsetB = slice_beta_offset_div2 << 1
    pub filter_offset_b: i32,
    /// 宏块层数据在 RBSP 中的起始位
    pub header_bits: usize,
    pub nal_ref_idc: u8,
    pub nal_type: NalUnitType,
}

impl SliceHeader {
    pub fn is_idr(&self) -> bool {
        self.nal_type == NalUnitType::SliceIdr
    }

    pub fn is_reference(&self) -> bool {
        self.nal_ref_idc != 0
    }
}

const MAX_MMCO_OPS: usize = 64;
const MAX_LIST_MODS: usize = 96;

// ============================================================
// 解析
// ============================================================

/// 解析 slice header
pub fn parse_slice_header(
    rbsp: &[u8],
    nal: &NalUnit,
    cache: &ParamSetCache,
) -> TaoResult<SliceHeader> {
    let mut br = BitReader::new(rbsp);

    let first_mb = br.read_ue()?;
    let slice_type_raw = br.read_ue()?;
    let slice_type = SliceType::from_raw(slice_type_raw)?;
    let pps_id = br.read_ue()?;
    if pps_id > 255 {
        return Err(TaoError::InvalidData(format!(
            "H264: slice pps_id 超出范围, pps_id={}",
            pps_id
        )));
    }
    let pps = cache
        .pps(pps_id)
        .ok_or_else(|| TaoError::MissingParameterSet(format!("PPS id={}", pps_id)))?;
    let sps = cache
        .sps(pps.sps_id)
        .ok_or_else(|| TaoError::MissingParameterSet(format!("SPS id={}", pps.sps_id)))?;

    if first_mb >= sps.mb_count() {
        return Err(TaoError::InvalidData(format!(
            "H264: first_mb_in_slice 超出图像范围, first_mb={}, mb_count={}",
            first_mb,
            sps.mb_count()
        )));
    }
    let is_idr = nal.nal_type == NalUnitType::SliceIdr;
    if is_idr && !slice_type.is_intra() {
        return Err(TaoError::InvalidData(format!(
            "H264: IDR slice 类型非法, slice_type={}",
            slice_type_raw
        )));
    }

    let frame_num = br.read_bits(sps.log2_max_frame_num)?;
    if is_idr && frame_num != 0 {
        return Err(TaoError::InvalidData(format!(
            "H264: IDR frame_num 必须为 0, frame_num={}",
            frame_num
        )));
    }

    let mut field_pic = false;
    if !sps.frame_mbs_only {
        field_pic = br.read_flag()?;
        if field_pic {
            let _bottom_field_flag = br.read_flag()?;
        }
    }

    let idr_pic_id = if is_idr {
        Some(br.read_ue()?)
    } else {
        None
    };

    let mut poc_lsb = 0u32;
    let mut delta_poc_bottom = 0i32;
    let mut delta_poc = [0i32; 2];
    if sps.poc_type == 0 {
        poc_lsb = br.read_bits(sps.log2_max_poc_lsb)?;
        if pps.bottom_field_pic_order_present && !field_pic {
            delta_poc_bottom = br.read_se()?;
        }
    } else if sps.poc_type == 1 && !sps.delta_pic_order_always_zero {
        delta_poc[0] = br.read_se()?;
        if pps.bottom_field_pic_order_present && !field_pic {
            delta_poc[1] = br.read_se()?;
        }
    }

    let mut redundant_pic_cnt = 0u32;
    if pps.redundant_pic_cnt_present {
        redundant_pic_cnt = br.read_ue()?;
        if redundant_pic_cnt > 127 {
            return Err(TaoError::InvalidData(format!(
                "H264: redundant_pic_cnt 超出范围, value={}",
                redundant_pic_cnt
            )));
        }
    }

    let is_b = slice_type == SliceType::B;
    let mut direct_spatial_mv_pred = false;
    if is_b {
        direct_spatial_mv_pred = br.read_flag()?;
    }

    let mut num_ref_idx_l0_active = pps.num_ref_idx_l0_default_active;
    let mut num_ref_idx_l1_active = pps.num_ref_idx_l1_default_active;
    if matches!(slice_type, SliceType::P | SliceType::Sp | SliceType::B) {
        if br.read_flag()? {
            num_ref_idx_l0_active = br.read_ue()?.saturating_add(1);
            if is_b {
                num_ref_idx_l1_active = br.read_ue()?.saturating_add(1);
            }
        }
        if num_ref_idx_l0_active > 32 {
            return Err(TaoError::InvalidData(format!(
                "H264: num_ref_idx_l0_active_minus1 非法, value={}",
                num_ref_idx_l0_active - 1
            )));
        }
        if is_b && num_ref_idx_l1_active > 32 {
            return Err(TaoError::InvalidData(format!(
                "H264: num_ref_idx_l1_active_minus1 非法, value={}",
                num_ref_idx_l1_active - 1
            )));
        }
    }
    if slice_type.is_intra() {
        num_ref_idx_l0_active = 0;
    }
    if !is_b {
        num_ref_idx_l1_active = 0;
    }

    let mut ref_pic_list_mod_l0 = Vec::new();
    let mut ref_pic_list_mod_l1 = Vec::new();
    if !slice_type.is_intra() {
        if br.read_flag()? {
            ref_pic_list_mod_l0 = parse_ref_pic_list_mod(&mut br, sps)?;
        }
        if is_b && br.read_flag()? {
            ref_pic_list_mod_l1 = parse_ref_pic_list_mod(&mut br, sps)?;
        }
    }

    let use_weight = (pps.weighted_pred && matches!(slice_type, SliceType::P | SliceType::Sp))
        || (pps.weighted_bipred_idc == 1 && is_b);
    let pred_weight = if use_weight {
        Some(parse_pred_weight_table(
            &mut br,
            sps,
            num_ref_idx_l0_active,
            if is_b { num_ref_idx_l1_active } else { 0 },
        )?)
    } else {
        None
    };

    let marking = if nal.ref_idc != 0 {
        parse_dec_ref_pic_marking(&mut br, is_idr, sps)?
    } else {
        DecRefPicMarking::default()
    };

    let mut cabac_init_idc = 0u8;
    if pps.cabac && !slice_type.is_intra() {
        let raw = br.read_ue()?;
        if raw > 2 {
            return Err(TaoError::InvalidData(format!(
                "H264: cabac_init_idc 非法, value={}",
                raw
            )));
        }
        cabac_init_idc = raw as u8;
    }

    let slice_qp = pps.pic_init_qp + br.read_se()?;
    if !(0..=51).contains(&slice_qp) {
        return Err(TaoError::InvalidData(format!(
            "H264: slice_qp 超出范围, slice_qp={}",
            slice_qp
        )));
    }

    if matches!(slice_type, SliceType::Sp | SliceType::Si) {
        if slice_type == SliceType::Sp {
            let _sp_for_switch_flag = br.read_flag()?;
        }
        let _slice_qs_delta = br.read_se()?;
    }

    let mut disable_deblocking_filter_idc = 0u32;
    let mut filter_offset_a = 0i32;
    let mut filter_offset_b = 0i32;
    if pps.deblocking_filter_control_present {
        disable_deblocking_filter_idc = br.read_ue()?;
        if disable_deblocking_filter_idc > 2 {
            return Err(TaoError::InvalidData(format!(
                "H264: disable_deblocking_filter_idc 非法, value={}",
                disable_deblocking_filter_idc
            )));
        }
        if disable_deblocking_filter_idc != 1 {
            let alpha = br.read_se()?;
            let beta = br.read_se()?;
            if !(-6..=6).contains(&alpha) || !(-6..=6).contains(&beta) {
                return Err(TaoError::InvalidData(format!(
                    "H264: 去块偏移超出范围, alpha_div2={}, beta_div2={}",
                    alpha, beta
                )));
            }
            filter_offset_a = alpha << 1;
            filter_offset_b = beta << 1;
        }
    }

    if pps.num_slice_groups > 1 {
        // slice_group_change_cycle, 长度取决于图像大小
        let bits = slice_group_change_cycle_bits(sps);
        br.skip_bits(bits as usize)?;
    }

    Ok(SliceHeader {
        first_mb,
        slice_type,
        pps_id,
        sps_id: pps.sps_id,
        frame_num,
        field_pic,
        idr_pic_id,
        poc_lsb,
        delta_poc_bottom,
        delta_poc,
        redundant_pic_cnt,
        direct_spatial_mv_pred,
        num_ref_idx_l0_active,
        num_ref_idx_l1_active,
        ref_pic_list_mod_l0,
        ref_pic_list_mod_l1,
        pred_weight,
        marking,
        cabac_init_idc,
        slice_qp,
        disable_deblocking_filter_idc,
        filter_offset_a,
        filter_offset_b,
        header_bits: br.bits_read(),
        nal_ref_idc: nal.ref_idc,
        nal_type: nal.nal_type,
    })
}

fn slice_group_change_cycle_bits(sps: &Sps) -> u32 {
    // Ceil(Log2(PicSizeInMapUnits ÷ SliceGroupChangeRate + 1)), 变化率未保存时按 1 处理
    let size = sps.pic_width_in_mbs * sps.pic_height_in_map_units;
    u32::BITS - size.leading_zeros()
}

fn max_pic_num_minus1(sps: &Sps) -> u32 {
    sps.max_frame_num().saturating_sub(1)
}

/// 解析参考图像列表修改语法
fn parse_ref_pic_list_mod(br: &mut BitReader, sps: &Sps) -> TaoResult<Vec<RefPicListMod>> {
    let mut mods = Vec::new();
    let max_abs_diff = max_pic_num_minus1(sps);
    let max_long_term_pic_num = sps.max_num_ref_frames.saturating_sub(1);
    loop {
        let op = br.read_ue()?;
        match op {
            0 | 1 => {
                let abs_diff_pic_num_minus1 = br.read_ue()?;
                if abs_diff_pic_num_minus1 > max_abs_diff {
                    return Err(TaoError::InvalidData(format!(
                        "H264: abs_diff_pic_num_minus1 超范围, value={}, max={}",
                        abs_diff_pic_num_minus1, max_abs_diff
                    )));
                }
                mods.push(if op == 0 {
                    RefPicListMod::ShortTermSub {
                        abs_diff_pic_num_minus1,
                    }
                } else {
                    RefPicListMod::ShortTermAdd {
                        abs_diff_pic_num_minus1,
                    }
                });
            }
            2 => {
                let long_term_pic_num = br.read_ue()?;
                if long_term_pic_num > max_long_term_pic_num {
                    return Err(TaoError::InvalidData(format!(
                        "H264: long_term_pic_num 超范围, value={}, max={}",
                        long_term_pic_num, max_long_term_pic_num
                    )));
                }
                mods.push(RefPicListMod::LongTerm { long_term_pic_num });
            }
            3 => break,
            _ => {
                return Err(TaoError::InvalidData(format!(
                    "H264: modification_of_pic_nums_idc 非法, value={}",
                    op
                )));
            }
        }
        if mods.len() > MAX_LIST_MODS {
            return Err(TaoError::InvalidData(
                "H264: ref_pic_list_modification 项数过多".into(),
            ));
        }
    }
    Ok(mods)
}

fn read_weight_pair(br: &mut BitReader, what: &str) -> TaoResult<(i32, i32)> {
    let weight = br.read_se()?;
    let offset = br.read_se()?;
    if !(-128..=127).contains(&weight) || !(-128..=127).contains(&offset) {
        return Err(TaoError::InvalidData(format!(
            "H264: {} 加权参数超出范围, weight={}, offset={}",
            what, weight, offset
        )));
    }
    Ok((weight, offset))
}

fn parse_weight_list(
    br: &mut BitReader,
    count: u32,
    luma_log2_denom: u32,
    chroma_log2_denom: u32,
    chroma_present: bool,
) -> TaoResult<Vec<PredWeight>> {
    let mut list = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut w = PredWeight {
            luma_weight: 1 << luma_log2_denom,
            luma_offset: 0,
            chroma_weight: [1 << chroma_log2_denom; 2],
            chroma_offset: [0, 0],
            luma_explicit: false,
            chroma_explicit: false,
        };
        if br.read_flag()? {
            (w.luma_weight, w.luma_offset) = read_weight_pair(br, "luma")?;
            w.luma_explicit = true;
        }
        if chroma_present && br.read_flag()? {
            for c in 0..2 {
                (w.chroma_weight[c], w.chroma_offset[c]) = read_weight_pair(br, "chroma")?;
            }
            w.chroma_explicit = true;
        }
        list.push(w);
    }
    Ok(list)
}

fn parse_pred_weight_table(
    br: &mut BitReader,
    sps: &Sps,
    num_l0: u32,
    num_l1: u32,
) -> TaoResult<PredWeightTable> {
    let luma_log2_denom = br.read_ue()?;
    if luma_log2_denom > 7 {
        return Err(TaoError::InvalidData(format!(
            "H264: luma_log2_weight_denom 非法, value={}",
            luma_log2_denom
        )));
    }
    let chroma_present = sps.chroma_format_idc != 0;
    let mut chroma_log2_denom = 0;
    if chroma_present {
        chroma_log2_denom = br.read_ue()?;
        if chroma_log2_denom > 7 {
            return Err(TaoError::InvalidData(format!(
                "H264: chroma_log2_weight_denom 非法, value={}",
                chroma_log2_denom
            )));
        }
    }
    let l0 = parse_weight_list(br, num_l0, luma_log2_denom, chroma_log2_denom, chroma_present)?;
    let l1 = parse_weight_list(br, num_l1, luma_log2_denom, chroma_log2_denom, chroma_present)?;
    Ok(PredWeightTable {
        luma_log2_denom,
        chroma_log2_denom,
        l0,
        l1,
    })
}

/// 解析 dec_ref_pic_marking 语法.
fn parse_dec_ref_pic_marking(
    br: &mut BitReader,
    is_idr: bool,
    sps: &Sps,
) -> TaoResult<DecRefPicMarking> {
    let mut marking = DecRefPicMarking::default();
    if is_idr {
        marking.no_output_of_prior_pics = br.read_flag()?;
        marking.long_term_reference_flag = br.read_flag()?;
        return Ok(marking);
    }

    marking.adaptive = br.read_flag()?;
    if !marking.adaptive {
        return Ok(marking);
    }

    let max_refs = sps.max_num_ref_frames.max(1);
    let max_long_term_frame_idx = max_refs - 1;
    let max_difference = max_pic_num_minus1(sps);
    loop {
        let op = br.read_ue()?;
        if op == 0 {
            break;
        }
        if marking.ops.len() >= MAX_MMCO_OPS {
            return Err(TaoError::InvalidData(format!(
                "H264: MMCO 操作数量过多, max={}",
                MAX_MMCO_OPS
            )));
        }
        let parsed = match op {
            1 => MmcoOp::ForgetShort {
                difference_of_pic_nums_minus1: read_bounded(br, max_difference, "MMCO1 difference")?,
            },
            2 => MmcoOp::ForgetLong {
                long_term_pic_num: read_bounded(br, max_long_term_frame_idx, "MMCO2 long_term_pic_num")?,
            },
            3 => MmcoOp::ConvertShortToLong {
                difference_of_pic_nums_minus1: read_bounded(br, max_difference, "MMCO3 difference")?,
                long_term_frame_idx: read_bounded(br, max_long_term_frame_idx, "MMCO3 long_term_frame_idx")?,
            },
            4 => MmcoOp::TrimLong {
                max_long_term_frame_idx_plus1: read_bounded(br, max_refs, "MMCO4 max_long_term_frame_idx_plus1")?,
            },
            5 => MmcoOp::ClearAll,
            6 => MmcoOp::MarkCurrentLong {
                long_term_frame_idx: read_bounded(br, max_long_term_frame_idx, "MMCO6 long_term_frame_idx")?,
            },
            _ => {
                return Err(TaoError::InvalidData(format!(
                    "H264: MMCO op 非法, op={}",
                    op
                )));
            }
        };
        marking.ops.push(parsed);
    }
    Ok(marking)
}

fn read_bounded(br: &mut BitReader, max: u32, what: &str) -> TaoResult<u32> {
    let value = br.read_ue()?;
    if value > max {
        return Err(TaoError::InvalidData(format!(
            "H264: {} 超范围, value={}, max={}",
            what, value, max
        )));
    }
    Ok(value)
}

// ============================================================
// POC 计算
// ============================================================

/// 跨图像保存的 POC 推导状态
#[derive(Debug, Clone, Copy, Default)]
pub struct PocState {
    prev_ref_poc_msb: i32,
    prev_ref_poc_lsb: i32,
    prev_frame_num_offset: i32,
    prev_frame_num: u32,
}

impl PocState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 计算当前图像的帧 POC, 并更新参考状态
    pub fn compute(&mut self, sps: &Sps, header: &SliceHeader) -> i32 {
        let is_idr = header.is_idr();
        if is_idr {
            self.reset();
        }
        let max_frame_num = sps.max_frame_num() as i32;
        let frame_num = header.frame_num as i32;
        let frame_num_offset = if is_idr {
            0
        } else if self.prev_frame_num as i32 > frame_num {
            self.prev_frame_num_offset + max_frame_num
        } else {
            self.prev_frame_num_offset
        };

        let poc = match sps.poc_type {
            0 => {
                let max_poc_lsb = 1i32 << sps.log2_max_poc_lsb.min(16);
                let poc_lsb = header.poc_lsb as i32;
                let mut poc_msb = self.prev_ref_poc_msb;
                if !is_idr {
                    if poc_lsb < self.prev_ref_poc_lsb
                        && (self.prev_ref_poc_lsb - poc_lsb) >= max_poc_lsb / 2
                    {
                        poc_msb += max_poc_lsb;
                    } else if poc_lsb > self.prev_ref_poc_lsb
                        && (poc_lsb - self.prev_ref_poc_lsb) > max_poc_lsb / 2
                    {
                        poc_msb -= max_poc_lsb;
                    }
                }
                if header.is_reference() {
                    self.prev_ref_poc_msb = poc_msb;
                    self.prev_ref_poc_lsb = poc_lsb;
                }
                let top = poc_msb + poc_lsb;
                top.min(top + header.delta_poc_bottom)
            }
            1 => {
                let cycle_len = sps.offset_for_ref_frame.len() as i32;
                let mut abs_frame_num = if cycle_len == 0 {
                    0
                } else {
                    frame_num_offset + frame_num
                };
                if !header.is_reference() && abs_frame_num > 0 {
                    abs_frame_num -= 1;
                }
                let mut expected = 0i32;
                if abs_frame_num > 0 {
                    let delta_per_cycle: i32 = sps.offset_for_ref_frame.iter().sum();
                    let cycle_cnt = (abs_frame_num - 1) / cycle_len;
                    let in_cycle = (abs_frame_num - 1) % cycle_len;
                    expected = cycle_cnt.wrapping_mul(delta_per_cycle);
                    for offset in &sps.offset_for_ref_frame[..=(in_cycle as usize)] {
                        expected = expected.wrapping_add(*offset);
                    }
                }
                if !header.is_reference() {
                    expected += sps.offset_for_non_ref_pic;
                }
                let top = expected + header.delta_poc[0];
                let bottom = top + sps.offset_for_top_to_bottom_field + header.delta_poc[1];
                top.min(bottom)
            }
            _ => {
                if is_idr {
                    0
                } else if header.is_reference() {
                    2 * (frame_num_offset + frame_num)
                } else {
                    2 * (frame_num_offset + frame_num) - 1
                }
            }
        };

        self.prev_frame_num_offset = frame_num_offset;
        self.prev_frame_num = header.frame_num;
        poc
    }

    /// 含 MMCO5 的参考图像解码完成后调用
    pub fn after_mmco5(&mut self, delta_poc_bottom: i32) {
        self.prev_ref_poc_msb = 0;
        // 帧图像: TopFieldOrderCnt 减去 min(top, bottom)
        self.prev_ref_poc_lsb = (-delta_poc_bottom).max(0);
        self.prev_frame_num_offset = 0;
        self.prev_frame_num = 0;
    }
}
