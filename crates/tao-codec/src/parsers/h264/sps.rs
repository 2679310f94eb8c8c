//! H.264 SPS (Sequence Parameter Set) 解析器.
//!
//! SPS 包含编码视频序列的全局参数, 包括:
//! - Profile / Level (编码规格)
//! - 图像宽度和高度 (以宏块为单位, 需要 cropping 调整)
//! - 色度格式与位深
//! - POC 计算参数, 参考帧数量
//! - 像素宽高比与帧率 (通过 VUI)
//!
//! 量化矩阵统一保存为光栅顺序, 解析时已做 zigzag 反扫描与默认/回退处理.

use tao_core::bitreader::BitReader;
use tao_core::{TaoError, TaoResult};

/// SPS 解析结果
#[derive(Debug, Clone, PartialEq)]
pub struct Sps {
    /// profile_idc (如 66=Baseline, 77=Main, 100=High)
    pub profile_idc: u8,
    /// constraint_set 标志位
    pub constraint_set_flags: u8,
    /// level_idc (如 30=3.0, 41=4.1)
    pub level_idc: u8,
    /// seq_parameter_set_id
    pub sps_id: u32,
    /// 色度格式 (0=单色, 1=4:2:0, 2=4:2:2, 3=4:4:4)
    pub chroma_format_idc: u32,
    /// separate_colour_plane_flag
    pub separate_colour_plane: bool,
    /// 亮度位深
    pub bit_depth_luma: u32,
    /// 色度位深
    pub bit_depth_chroma: u32,
    /// qpprime_y_zero_transform_bypass_flag
    pub transform_bypass: bool,
    /// 最大参考帧数
    pub max_num_ref_frames: u32,
    /// gaps_in_frame_num_value_allowed_flag
    pub gaps_in_frame_num_allowed: bool,
    /// 图像宽度 (像素, 已应用 cropping)
    pub width: u32,
    /// 图像高度 (像素, 已应用 cropping)
    pub height: u32,
    /// 是否为纯帧编码
    pub frame_mbs_only: bool,
    /// mb_adaptive_frame_field_flag
    pub mb_adaptive_frame_field: bool,
    /// direct_8x8_inference_flag
    pub direct_8x8_inference: bool,
    /// 以宏块为单位的宽度
    pub pic_width_in_mbs: u32,
    /// 以 map unit 为单位的高度
    pub pic_height_in_map_units: u32,
    /// cropping 偏移 (左, 右, 上, 下), 单位为裁剪单元
    pub crop: [u32; 4],
    /// log2(max_frame_num)
    pub log2_max_frame_num: u32,
    /// 图像顺序计数类型 (0, 1, 2)
    pub poc_type: u32,
    /// log2(max_pic_order_cnt_lsb) (仅 poc_type==0)
    pub log2_max_poc_lsb: u32,
    /// `poc_type==1`: delta_pic_order_always_zero_flag
    pub delta_pic_order_always_zero: bool,
    /// `poc_type==1`: offset_for_non_ref_pic
    pub offset_for_non_ref_pic: i32,
    /// `poc_type==1`: offset_for_top_to_bottom_field
    pub offset_for_top_to_bottom_field: i32,
    /// `poc_type==1`: offset_for_ref_frame 列表
    pub offset_for_ref_frame: Vec<i32>,
    /// 4x4 量化矩阵 (6 组, 光栅顺序)
    pub scaling_list_4x4: [[u8; 16]; 6],
    /// 是否携带了序列级量化矩阵
    pub scaling_matrix_present: bool,
    /// 是否存在 VUI 参数
    pub vui_present: bool,
    /// 像素宽高比 (sar_width, sar_height), 未指定时为 (0, 0)
    pub sar: (u32, u32),
    /// aspect_ratio_info_present_flag
    pub aspect_ratio_info_present: bool,
    /// overscan_appropriate_flag
    pub overscan_appropriate: bool,
    /// 帧率 (time_scale, 2 * num_units_in_tick)
    pub fps: Option<(u32, u32)>,
}

impl Sps {
    /// 以宏块为单位的帧高度
    pub fn frame_height_in_mbs(&self) -> u32 {
        self.pic_height_in_map_units * if self.frame_mbs_only { 1 } else { 2 }
    }

    /// 宏块总数
    pub fn mb_count(&self) -> u32 {
        self.pic_width_in_mbs * self.frame_height_in_mbs()
    }

    /// 解码缓冲宽度 (宏块对齐, 未裁剪)
    pub fn coded_width(&self) -> u32 {
        self.pic_width_in_mbs * 16
    }

    /// 解码缓冲高度 (宏块对齐, 未裁剪)
    pub fn coded_height(&self) -> u32 {
        self.frame_height_in_mbs() * 16
    }

    /// 最大 frame_num (2^log2_max_frame_num)
    pub fn max_frame_num(&self) -> u32 {
        1u32 << self.log2_max_frame_num
    }
}

/// 预定义的 SAR 表 (ITU-T H.264 表 E-1)
const SAR_TABLE: [(u32, u32); 17] = [
    (0, 0),    // 0: 未指定
    (1, 1),    // 1: 1:1
    (12, 11),  // 2: 12:11
    (10, 11),  // 3: 10:11
    (16, 11),  // 4: 16:11
    (40, 33),  // 5: 40:33
    (24, 11),  // 6: 24:11
    (20, 11),  // 7: 20:11
    (32, 11),  // 8: 32:11
    (80, 33),  // 9: 80:33
    (18, 11),  // 10: 18:11
    (15, 11),  // 11: 15:11
    (64, 33),  // 12: 64:33
    (160, 99), // 13: 160:99
    (4, 3),    // 14: 4:3
    (3, 2),    // 15: 3:2
    (2, 1),    // 16: 2:1
];

/// 4x4 zigzag 扫描位置 → 光栅索引
const ZIGZAG_4X4_RASTER: [usize; 16] = [0, 1, 4, 8, 5, 2, 3, 6, 9, 12, 13, 10, 7, 11, 14, 15];

/// Default_4x4_Intra (光栅顺序)
pub const DEFAULT_SCALING_4X4_INTRA: [u8; 16] = [
    6, 13, 20, 28, 13, 20, 28, 32, 20, 28, 32, 37, 28, 32, 37, 42,
];

/// Default_4x4_Inter (光栅顺序)
pub const DEFAULT_SCALING_4X4_INTER: [u8; 16] = [
    10, 14, 20, 24, 14, 20, 24, 27, 20, 24, 27, 30, 24, 27, 30, 34,
];

/// Flat_4x4_16
pub const FLAT_SCALING_4X4: [u8; 16] = [16; 16];

/// 从 RBSP 数据解析 SPS
pub fn parse_sps(rbsp: &[u8]) -> TaoResult<Sps> {
    if rbsp.len() < 3 {
        return Err(TaoError::InvalidData("H264: SPS RBSP 太短".into()));
    }

    let mut br = BitReader::new(rbsp);

    let profile_idc = br.read_bits(8)? as u8;
    let constraint_set_flags = br.read_bits(8)? as u8;
    let level_idc = br.read_bits(8)? as u8;
    let sps_id = br.read_ue()?;
    if sps_id > 31 {
        return Err(TaoError::InvalidData(format!(
            "H264: sps_id 超出范围, sps_id={}",
            sps_id
        )));
    }

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    let mut bit_depth_luma = 8;
    let mut bit_depth_chroma = 8;
    let mut transform_bypass = false;
    let mut scaling_matrix_present = false;
    let mut scaling_list_4x4 = [FLAT_SCALING_4X4; 6];

    // High profile 及以上有额外字段
    if is_high_profile(profile_idc) {
        chroma_format_idc = br.read_ue()?;
        if chroma_format_idc > 3 {
            return Err(TaoError::InvalidData(format!(
                "H264: chroma_format_idc 非法, value={}",
                chroma_format_idc
            )));
        }
        if chroma_format_idc == 3 {
            separate_colour_plane = br.read_flag()?;
        }
        bit_depth_luma = br.read_ue()? + 8;
        bit_depth_chroma = br.read_ue()? + 8;
        if !(8..=14).contains(&bit_depth_luma) || !(8..=14).contains(&bit_depth_chroma) {
            return Err(TaoError::InvalidData(format!(
                "H264: 位深非法, luma={}, chroma={}",
                bit_depth_luma, bit_depth_chroma
            )));
        }
        transform_bypass = br.read_flag()?;
        scaling_matrix_present = br.read_flag()?;
        if scaling_matrix_present {
            parse_seq_scaling_lists(&mut br, chroma_format_idc, &mut scaling_list_4x4)?;
        }
    }

    let log2_max_frame_num_minus4 = br.read_ue()?;
    if log2_max_frame_num_minus4 > 12 {
        return Err(TaoError::InvalidData(format!(
            "H264: log2_max_frame_num_minus4 超出范围, value={}",
            log2_max_frame_num_minus4
        )));
    }

    let poc_type = br.read_ue()?;
    if poc_type > 2 {
        return Err(TaoError::InvalidData(format!(
            "H264: pic_order_cnt_type 非法, value={}",
            poc_type
        )));
    }
    let mut log2_max_poc_lsb = 0u32;
    let mut delta_pic_order_always_zero = false;
    let mut offset_for_non_ref_pic = 0i32;
    let mut offset_for_top_to_bottom_field = 0i32;
    let mut offset_for_ref_frame = Vec::new();
    match poc_type {
        0 => {
            let log2_max_poc_lsb_minus4 = br.read_ue()?;
            if log2_max_poc_lsb_minus4 > 12 {
                return Err(TaoError::InvalidData(format!(
                    "H264: log2_max_pic_order_cnt_lsb_minus4 超出范围, value={}",
                    log2_max_poc_lsb_minus4
                )));
            }
            log2_max_poc_lsb = log2_max_poc_lsb_minus4 + 4;
        }
        1 => {
            delta_pic_order_always_zero = br.read_flag()?;
            offset_for_non_ref_pic = br.read_se()?;
            offset_for_top_to_bottom_field = br.read_se()?;
            let num_ref_in_poc = br.read_ue()?;
            if num_ref_in_poc > 255 {
                return Err(TaoError::InvalidData(format!(
                    "H264: num_ref_frames_in_pic_order_cnt_cycle 超出范围, value={}",
                    num_ref_in_poc
                )));
            }
            for _ in 0..num_ref_in_poc {
                offset_for_ref_frame.push(br.read_se()?);
            }
        }
        _ => {}
    }

    let max_num_ref_frames = br.read_ue()?;
    if max_num_ref_frames > 16 {
        return Err(TaoError::InvalidData(format!(
            "H264: max_num_ref_frames 超出范围, value={}",
            max_num_ref_frames
        )));
    }
    let gaps_in_frame_num_allowed = br.read_flag()?;

    let pic_width_in_mbs = br.read_ue()? + 1;
    let pic_height_in_map_units = br.read_ue()? + 1;
    if pic_width_in_mbs > 1024 || pic_height_in_map_units > 1024 {
        return Err(TaoError::InvalidData(format!(
            "H264: 图像尺寸超出范围, mbs={}x{}",
            pic_width_in_mbs, pic_height_in_map_units
        )));
    }

    let frame_mbs_only = br.read_flag()?;
    let mb_adaptive_frame_field = if frame_mbs_only {
        false
    } else {
        br.read_flag()?
    };
    let direct_8x8_inference = br.read_flag()?;

    let mut crop = [0u32; 4];
    if br.read_flag()? {
        for slot in crop.iter_mut() {
            *slot = br.read_ue()?;
        }
    }

    let chroma_array_type = if separate_colour_plane {
        0
    } else {
        chroma_format_idc
    };
    let (crop_unit_x, crop_unit_y) = cropping_unit(chroma_array_type, frame_mbs_only);
    let raw_width = pic_width_in_mbs * 16;
    let raw_height = pic_height_in_map_units * if frame_mbs_only { 16 } else { 32 };
    let crop_x = (u64::from(crop[0]) + u64::from(crop[1])) * u64::from(crop_unit_x);
    let crop_y = (u64::from(crop[2]) + u64::from(crop[3])) * u64::from(crop_unit_y);
    if crop_x >= u64::from(raw_width) || crop_y >= u64::from(raw_height) {
        return Err(TaoError::InvalidData(format!(
            "H264: 裁剪参数非法, raw={}x{}, crop_x={}, crop_y={}",
            raw_width, raw_height, crop_x, crop_y
        )));
    }
    let width = raw_width - crop_x as u32;
    let height = raw_height - crop_y as u32;

    let mut vui = VuiInfo::default();
    let vui_present = br.read_flag()?;
    if vui_present {
        vui = parse_vui(&mut br)?;
    }

    Ok(Sps {
        profile_idc,
        constraint_set_flags,
        level_idc,
        sps_id,
        chroma_format_idc,
        separate_colour_plane,
        bit_depth_luma,
        bit_depth_chroma,
        transform_bypass,
        max_num_ref_frames,
        gaps_in_frame_num_allowed,
        width,
        height,
        frame_mbs_only,
        mb_adaptive_frame_field,
        direct_8x8_inference,
        pic_width_in_mbs,
        pic_height_in_map_units,
        crop,
        log2_max_frame_num: log2_max_frame_num_minus4 + 4,
        poc_type,
        log2_max_poc_lsb,
        delta_pic_order_always_zero,
        offset_for_non_ref_pic,
        offset_for_top_to_bottom_field,
        offset_for_ref_frame,
        scaling_list_4x4,
        scaling_matrix_present,
        vui_present,
        sar: vui.sar,
        aspect_ratio_info_present: vui.aspect_ratio_info_present,
        overscan_appropriate: vui.overscan_appropriate,
        fps: vui.fps,
    })
}

// ============================================================
// 辅助函数
// ============================================================

/// 是否为 High Profile 或更高 (携带 chroma_format_idc 等扩展字段)
fn is_high_profile(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
    )
}

/// 获取 cropping 单位
fn cropping_unit(chroma_array_type: u32, frame_mbs_only: bool) -> (u32, u32) {
    let (sub_width, sub_height) = match chroma_array_type {
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    let height_mult = if frame_mbs_only { 1 } else { 2 };
    (sub_width, sub_height * height_mult)
}

/// 4x4 量化矩阵的默认表 (Intra Y/Cb/Cr, Inter Y/Cb/Cr)
pub fn default_scaling_list_4x4(idx: usize) -> [u8; 16] {
    if idx < 3 {
        DEFAULT_SCALING_4X4_INTRA
    } else {
        DEFAULT_SCALING_4X4_INTER
    }
}

/// 解析序列级量化矩阵, 4x4 部分按回退规则 A 填充, 8x8 部分只消耗比特
fn parse_seq_scaling_lists(
    br: &mut BitReader,
    chroma_format_idc: u32,
    lists: &mut [[u8; 16]; 6],
) -> TaoResult<()> {
    let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
    for list_idx in 0..list_count {
        let present = br.read_flag()?;
        if list_idx >= 6 {
            if present {
                skip_scaling_list(br, 64)?;
            }
            continue;
        }
        if !present {
            lists[list_idx] = if list_idx == 0 || list_idx == 3 {
                default_scaling_list_4x4(list_idx)
            } else {
                lists[list_idx - 1]
            };
            continue;
        }
        let (list, use_default) = parse_scaling_list_4x4(br)?;
        lists[list_idx] = if use_default {
            default_scaling_list_4x4(list_idx)
        } else {
            list
        };
    }
    Ok(())
}

/// 解析单个 4x4 量化矩阵, 返回 (光栅顺序矩阵, 是否使用默认矩阵)
pub fn parse_scaling_list_4x4(br: &mut BitReader) -> TaoResult<([u8; 16], bool)> {
    let mut list = [0u8; 16];
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    let mut use_default = false;
    for (idx, &raster) in ZIGZAG_4X4_RASTER.iter().enumerate() {
        if next_scale != 0 {
            let delta_scale = br.read_se()?;
            if !(-128..=127).contains(&delta_scale) {
                return Err(TaoError::InvalidData(format!(
                    "H264: delta_scale 超出范围, value={}",
                    delta_scale
                )));
            }
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
            if idx == 0 && next_scale == 0 {
                use_default = true;
            }
        }
        let cur_scale = if next_scale == 0 {
            last_scale
        } else {
            next_scale
        };
        list[raster] = cur_scale as u8;
        last_scale = cur_scale;
    }
    Ok((list, use_default))
}

/// 跳过一个量化矩阵
pub fn skip_scaling_list(br: &mut BitReader, size: usize) -> TaoResult<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = br.read_se()?;
            next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

#[derive(Default)]
struct VuiInfo {
    aspect_ratio_info_present: bool,
    sar: (u32, u32),
    overscan_appropriate: bool,
    fps: Option<(u32, u32)>,
}

/// 解析 VUI 参数 (宽高比与 timing_info, 其余字段不关心)
fn parse_vui(br: &mut BitReader) -> TaoResult<VuiInfo> {
    let mut info = VuiInfo::default();

    info.aspect_ratio_info_present = br.read_flag()?;
    if info.aspect_ratio_info_present {
        let ar_idc = br.read_bits(8)? as usize;
        if ar_idc == 255 {
            let sar_w = br.read_bits(16)?;
            let sar_h = br.read_bits(16)?;
            if sar_w == 0 || sar_h == 0 {
                return Err(TaoError::InvalidData(format!(
                    "H264: VUI Extended_SAR 非法, sar_w={}, sar_h={}",
                    sar_w, sar_h
                )));
            }
            info.sar = (sar_w, sar_h);
        } else if let Some(&sar) = SAR_TABLE.get(ar_idc) {
            info.sar = sar;
        } else {
            return Err(TaoError::InvalidData(format!(
                "H264: VUI aspect_ratio_idc 非法, value={}",
                ar_idc
            )));
        }
    }

    // overscan_info_present_flag
    if br.read_flag()? {
        info.overscan_appropriate = br.read_flag()?;
    }

    // video_signal_type_present_flag
    if br.read_flag()? {
        br.skip_bits(4)?;
        if br.read_flag()? {
            br.skip_bits(24)?;
        }
    }

    // chroma_loc_info_present_flag
    if br.read_flag()? {
        br.read_ue()?;
        br.read_ue()?;
    }

    // timing_info_present_flag
    if br.read_flag()? {
        let num_units = br.read_bits(32)?;
        let time_scale = br.read_bits(32)?;
        br.skip_bits(1)?; // fixed_frame_rate_flag
        if num_units == 0 || time_scale == 0 {
            return Err(TaoError::InvalidData(format!(
                "H264: VUI timing_info 非法, num_units_in_tick={}, time_scale={}",
                num_units, time_scale
            )));
        }
        info.fps = Some((time_scale, num_units.saturating_mul(2)));
    }

    Ok(info)
}
