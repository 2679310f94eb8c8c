//! H.264 参数集解析与缓存.
//!
//! PPS 语法解析、合法性校验, 以及按 id 保存多组 SPS/PPS 的缓存.
//! 解析失败的参数集不会覆盖缓存中的旧版本.

use std::collections::HashMap;

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

use crate::parsers::h264::sps::{default_scaling_list_4x4, parse_scaling_list_4x4, skip_scaling_list};
use crate::parsers::h264::{Sps, parse_sps};

/// PPS 中单个 4x4 量化矩阵的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingListEntry {
    /// 未出现, 按回退规则推导
    Absent,
    /// 使用默认矩阵
    Default,
    /// 显式给出 (光栅顺序)
    Explicit([u8; 16]),
}

/// PPS 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Pps {
    pub pps_id: u32,
    pub sps_id: u32,
    /// entropy_coding_mode_flag, true 为 CABAC
    pub cabac: bool,
    pub bottom_field_pic_order_present: bool,
    pub num_slice_groups: u32,
    pub num_ref_idx_l0_default_active: u32,
    pub num_ref_idx_l1_default_active: u32,
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u32,
    pub pic_init_qp: i32,
    pub pic_init_qs: i32,
    pub chroma_qp_index_offset: i32,
    pub second_chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8_mode: bool,
    /// 图像级 4x4 量化矩阵, `None` 表示沿用 SPS
    pub scaling_lists_4x4: Option<[ScalingListEntry; 6]>,
}

impl Pps {
    /// 结合 SPS 推导最终生效的 6 组 4x4 量化矩阵 (光栅顺序)
    pub fn effective_scaling_lists(&self, sps: &Sps) -> [[u8; 16]; 6] {
        let Some(entries) = self.scaling_lists_4x4 else {
            return sps.scaling_list_4x4;
        };
        let mut out = [[16u8; 16]; 6];
        for (idx, entry) in entries.iter().enumerate() {
            out[idx] = match *entry {
                ScalingListEntry::Explicit(list) => list,
                ScalingListEntry::Default => default_scaling_list_4x4(idx),
                ScalingListEntry::Absent if idx == 0 || idx == 3 => {
                    // 回退规则 B: 序列级矩阵存在时沿用序列级
                    if sps.scaling_matrix_present {
                        sps.scaling_list_4x4[idx]
                    } else {
                        default_scaling_list_4x4(idx)
                    }
                }
                ScalingListEntry::Absent => out[idx - 1],
            };
        }
        out
    }
}

/// 解析 PPS 参数.
pub fn parse_pps(rbsp: &[u8]) -> TaoResult<Pps> {
    if rbsp.is_empty() {
        return Err(TaoError::InvalidData("H264: PPS RBSP 为空".into()));
    }

    let mut br = BitReader::new(rbsp);
    let pps_id = br.read_ue()?;
    if pps_id > 255 {
        return Err(TaoError::InvalidData(format!(
            "H264: pps_id 超出范围, pps_id={}",
            pps_id
        )));
    }

    let sps_id = br.read_ue()?;
    if sps_id > 31 {
        return Err(TaoError::InvalidData(format!(
            "H264: sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }

    let cabac = br.read_flag()?;
    let bottom_field_pic_order_present = br.read_flag()?;

    let num_slice_groups_minus1 = br.read_ue()?;
    if num_slice_groups_minus1 > 7 {
        return Err(TaoError::InvalidData(format!(
            "H264: num_slice_groups_minus1 超出范围, value={}",
            num_slice_groups_minus1
        )));
    }
    if num_slice_groups_minus1 > 0 {
        skip_pps_slice_groups(&mut br, num_slice_groups_minus1)?;
    }

    let num_ref_idx_l0_default_active = read_num_ref_idx(&mut br, "l0")?;
    let num_ref_idx_l1_default_active = read_num_ref_idx(&mut br, "l1")?;

    let weighted_pred = br.read_flag()?;
    let weighted_bipred_idc = br.read_bits(2)?;
    if weighted_bipred_idc > 2 {
        return Err(TaoError::InvalidData(format!(
            "H264: weighted_bipred_idc 非法, value={}",
            weighted_bipred_idc
        )));
    }

    let pic_init_qp = 26 + br.read_se()?;
    if !(0..=51).contains(&pic_init_qp) {
        return Err(TaoError::InvalidData(format!(
            "H264: pic_init_qp 超出范围, pic_init_qp={}",
            pic_init_qp
        )));
    }
    let pic_init_qs = 26 + br.read_se()?;
    if !(0..=51).contains(&pic_init_qs) {
        return Err(TaoError::InvalidData(format!(
            "H264: pic_init_qs 超出范围, pic_init_qs={}",
            pic_init_qs
        )));
    }

    let chroma_qp_index_offset = br.read_se()?;
    validate_chroma_offset("chroma_qp_index_offset", chroma_qp_index_offset)?;

    let deblocking_filter_control_present = br.read_flag()?;
    let constrained_intra_pred = br.read_flag()?;
    let redundant_pic_cnt_present = br.read_flag()?;

    let mut transform_8x8_mode = false;
    let mut second_chroma_qp_index_offset = chroma_qp_index_offset;
    let mut scaling_lists_4x4 = None;

    if br.more_rbsp_data() {
        transform_8x8_mode = br.read_flag()?;
        if br.read_flag()? {
            scaling_lists_4x4 = Some(parse_pps_scaling_lists(&mut br, transform_8x8_mode)?);
        }
        second_chroma_qp_index_offset = br.read_se()?;
        validate_chroma_offset(
            "second_chroma_qp_index_offset",
            second_chroma_qp_index_offset,
        )?;
    }

    Ok(Pps {
        pps_id,
        sps_id,
        cabac,
        bottom_field_pic_order_present,
        num_slice_groups: num_slice_groups_minus1 + 1,
        num_ref_idx_l0_default_active,
        num_ref_idx_l1_default_active,
        weighted_pred,
        weighted_bipred_idc,
        pic_init_qp,
        pic_init_qs,
        chroma_qp_index_offset,
        second_chroma_qp_index_offset,
        deblocking_filter_control_present,
        constrained_intra_pred,
        redundant_pic_cnt_present,
        transform_8x8_mode,
        scaling_lists_4x4,
    })
}

fn read_num_ref_idx(br: &mut BitReader, list: &str) -> TaoResult<u32> {
    let minus1 = br.read_ue()?;
    if minus1 > 31 {
        return Err(TaoError::InvalidData(format!(
            "H264: num_ref_idx_{}_default_active_minus1 超出范围, value={}",
            list, minus1
        )));
    }
    Ok(minus1 + 1)
}

fn validate_chroma_offset(field: &str, value: i32) -> TaoResult<()> {
    if !(-12..=12).contains(&value) {
        return Err(TaoError::InvalidData(format!(
            "H264: {} 超出范围, value={}",
            field, value
        )));
    }
    Ok(())
}

/// 跳过 PPS 的 slice group 相关语法.
fn skip_pps_slice_groups(br: &mut BitReader, num_slice_groups_minus1: u32) -> TaoResult<()> {
    let slice_group_map_type = br.read_ue()?;
    match slice_group_map_type {
        0 => {
            for _ in 0..=num_slice_groups_minus1 {
                br.read_ue()?;
            }
        }
        1 => {}
        2 => {
            for _ in 0..num_slice_groups_minus1 {
                br.read_ue()?;
                br.read_ue()?;
            }
        }
        3..=5 => {
            br.read_flag()?;
            br.read_ue()?;
        }
        6 => {
            let pic_size_in_map_units = br.read_ue()? as usize + 1;
            let group_count = num_slice_groups_minus1 + 1;
            let bits_per_id = u32::BITS - (group_count - 1).leading_zeros();
            br.skip_bits(pic_size_in_map_units * bits_per_id as usize)?;
        }
        _ => {
            return Err(TaoError::InvalidData(format!(
                "H264: slice_group_map_type 非法, value={}",
                slice_group_map_type
            )));
        }
    }
    Ok(())
}

fn parse_pps_scaling_lists(
    br: &mut BitReader,
    transform_8x8_mode: bool,
) -> TaoResult<[ScalingListEntry; 6]> {
    let mut entries = [ScalingListEntry::Absent; 6];
    for entry in entries.iter_mut() {
        if br.read_flag()? {
            let (list, use_default) = parse_scaling_list_4x4(br)?;
            *entry = if use_default {
                ScalingListEntry::Default
            } else {
                ScalingListEntry::Explicit(list)
            };
        }
    }
    if transform_8x8_mode {
        // 8x8 矩阵 (仅 4:2:0 的两组), 变换本身不支持, 只消耗比特
        for _ in 0..2 {
            if br.read_flag()? {
                skip_scaling_list(br, 64)?;
            }
        }
    }
    Ok(entries)
}

// ============================================================
// 参数集缓存
// ============================================================

/// 参数集种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSetKind {
    Sps,
    Pps,
}

/// 缓存查找结果
#[derive(Debug, Clone, Copy)]
pub enum ParamSetRef<'a> {
    Sps(&'a Sps),
    Pps(&'a Pps),
}

/// 按 id 缓存的 SPS/PPS
#[derive(Debug, Default, Clone)]
pub struct ParamSetCache {
    sps: HashMap<u32, Sps>,
    pps: HashMap<u32, Pps>,
}

impl ParamSetCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换 SPS, 返回内容是否发生变化
    pub fn upsert_sps(&mut self, id: u32, sps: Sps) -> bool {
        let changed = self.sps.get(&id) != Some(&sps);
        self.sps.insert(id, sps);
        changed
    }

    /// 插入或替换 PPS, 返回内容是否发生变化
    pub fn upsert_pps(&mut self, id: u32, pps: Pps) -> bool {
        let changed = self.pps.get(&id) != Some(&pps);
        self.pps.insert(id, pps);
        changed
    }

    pub fn lookup(&self, kind: ParamSetKind, id: u32) -> Option<ParamSetRef<'_>> {
        match kind {
            ParamSetKind::Sps => self.sps.get(&id).map(ParamSetRef::Sps),
            ParamSetKind::Pps => self.pps.get(&id).map(ParamSetRef::Pps),
        }
    }

    pub fn sps(&self, id: u32) -> Option<&Sps> {
        self.sps.get(&id)
    }

    pub fn pps(&self, id: u32) -> Option<&Pps> {
        self.pps.get(&id)
    }

    /// 解析 SPS RBSP 并写入缓存, 失败时保留旧版本
    pub fn ingest_sps(&mut self, rbsp: &[u8]) -> TaoResult<(u32, bool)> {
        let sps = parse_sps(rbsp)?;
        let id = sps.sps_id;
        let changed = self.upsert_sps(id, sps);
        Ok((id, changed))
    }

    /// 解析 PPS RBSP 并写入缓存, 失败时保留旧版本
    pub fn ingest_pps(&mut self, rbsp: &[u8]) -> TaoResult<(u32, bool)> {
        let pps = parse_pps(rbsp)?;
        let id = pps.pps_id;
        let changed = self.upsert_pps(id, pps);
        Ok((id, changed))
    }

    pub fn clear(&mut self) {
        self.sps.clear();
        self.pps.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.sps.is_empty() && self.pps.is_empty()
    }
}
