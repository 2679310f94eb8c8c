//! 测试码流构造.
//!
//! 用 `BitWriter` 逐语法元素写出 SPS/PPS/slice, 再加防竞争字节与起始码,
//! 得到可直接送入解码器的 Annex B 码流.

use tao_core::bitwriter::{BitWriter, insert_emulation_prevention};

use super::super::cabac::{CabacCtx, NEXT_STATE_LPS, NEXT_STATE_MPS, RANGE_TAB_LPS, init_contexts};
use super::super::cavlc::{
    CHROMA_DC_COEFF_TOKEN_BITS, CHROMA_DC_COEFF_TOKEN_LENS, CHROMA_DC_TOTAL_ZERO_BITS, CHROMA_DC_TOTAL_ZERO_LENS,
    COEFF_TOKEN_BITS, COEFF_TOKEN_LENS, RUN_BEFORE_BITS, RUN_BEFORE_LENS, TOTAL_ZERO_BITS, TOTAL_ZERO_LENS,
};
use super::super::macroblock::cbp_from_code_num;
use super::super::{BufferInfo, DecodingParam, EcActiveIdc, H264Decoder, YuvPicture};
use super::super::{CmResult, DecodingState};

const START_CODE: [u8; 4] = [0, 0, 0, 1];

pub(super) const NAL_SLICE: u8 = 1;
pub(super) const NAL_IDR: u8 = 5;
pub(super) const NAL_SEI: u8 = 6;
pub(super) const NAL_SPS: u8 = 7;
pub(super) const NAL_PPS: u8 = 8;
pub(super) const NAL_AUD: u8 = 9;

/// 拼接起始码、NAL 头与 EBSP
pub(super) fn nal(ref_idc: u8, nal_type: u8, rbsp: &[u8]) -> Vec<u8> {
    let mut out = START_CODE.to_vec();
    out.push((ref_idc << 5) | nal_type);
    out.extend_from_slice(&insert_emulation_prevention(rbsp));
    out
}

/// 访问单元分隔符
pub(super) fn aud() -> Vec<u8> {
    nal(0, NAL_AUD, &[0xF0])
}

/// 只含一个 user_data_unregistered 的 SEI, 作为访问单元边界
pub(super) fn sei() -> Vec<u8> {
    let mut bw = BitWriter::new();
    bw.write_bits(5, 8);
    bw.write_bits(16, 8);
    bw.write_bytes(&[0x11; 16]);
    bw.write_rbsp_trailing_bits();
    nal(0, NAL_SEI, &bw.finish())
}

pub(super) fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.iter().flat_map(|p| p.iter().copied()).collect()
}

// ============================================================
// 参数集
// ============================================================

#[derive(Debug, Clone)]
pub(super) struct SpsConfig {
    pub profile_idc: u8,
    pub level_idc: u8,
    pub sps_id: u32,
    /// 仅 High profile 写出
    pub chroma_format_idc: u32,
    pub mb_width: u32,
    pub mb_height: u32,
    pub log2_max_frame_num: u32,
    pub max_num_ref_frames: u32,
    pub gaps_allowed: bool,
    /// 裁剪 (左, 右, 上, 下), 以 2 像素为单位
    pub crop: Option<[u32; 4]>,
    /// VUI Extended_SAR
    pub sar: Option<(u32, u32)>,
}

impl Default for SpsConfig {
    fn default() -> Self {
        Self {
            profile_idc: 66,
            level_idc: 30,
            sps_id: 0,
            chroma_format_idc: 1,
            mb_width: 1,
            mb_height: 1,
            log2_max_frame_num: 4,
            max_num_ref_frames: 2,
            gaps_allowed: false,
            crop: None,
            sar: None,
        }
    }
}

impl SpsConfig {
    pub(super) fn with_mbs(mb_width: u32, mb_height: u32) -> Self {
        Self {
            mb_width,
            mb_height,
            ..Default::default()
        }
    }

    pub(super) fn rbsp(&self) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_bits(u32::from(self.profile_idc), 8);
        bw.write_bits(0, 8);
        bw.write_bits(u32::from(self.level_idc), 8);
        bw.write_ue(self.sps_id);
        if self.profile_idc == 100 {
            bw.write_ue(self.chroma_format_idc);
            bw.write_ue(0);
            bw.write_ue(0);
            bw.write_flag(false);
            bw.write_flag(false);
        }
        bw.write_ue(self.log2_max_frame_num - 4);
        // pic_order_cnt_type 2: 输出顺序即解码顺序
        bw.write_ue(2);
        bw.write_ue(self.max_num_ref_frames);
        bw.write_flag(self.gaps_allowed);
        bw.write_ue(self.mb_width - 1);
        bw.write_ue(self.mb_height - 1);
        bw.write_flag(true);
        bw.write_flag(true);
        match self.crop {
            Some(crop) => {
                bw.write_flag(true);
                for v in crop {
                    bw.write_ue(v);
                }
            }
            None => bw.write_flag(false),
        }
        match self.sar {
            Some((w, h)) => {
                bw.write_flag(true);
                bw.write_flag(true);
                bw.write_bits(255, 8);
                bw.write_bits(w, 16);
                bw.write_bits(h, 16);
                // overscan/video_signal/chroma_loc/timing/hrd/pic_struct/restriction
                for _ in 0..8 {
                    bw.write_flag(false);
                }
            }
            None => bw.write_flag(false),
        }
        bw.write_rbsp_trailing_bits();
        bw.finish()
    }

    pub(super) fn nal(&self) -> Vec<u8> {
        nal(3, NAL_SPS, &self.rbsp())
    }
}

#[derive(Debug, Clone)]
pub(super) struct PpsConfig {
    pub pps_id: u32,
    pub sps_id: u32,
    pub num_ref_idx_default: u32,
    pub weighted_pred: bool,
    pub pic_init_qp: i32,
    pub deblocking_control: bool,
    pub redundant_pic_cnt_present: bool,
    pub transform_8x8: bool,
    /// entropy_coding_mode_flag
    pub cabac: bool,
}

impl Default for PpsConfig {
    fn default() -> Self {
        Self {
            pps_id: 0,
            sps_id: 0,
            num_ref_idx_default: 1,
            weighted_pred: false,
            pic_init_qp: 26,
            deblocking_control: true,
            redundant_pic_cnt_present: false,
            transform_8x8: false,
            cabac: false,
        }
    }
}

impl PpsConfig {
    pub(super) fn rbsp(&self) -> Vec<u8> {
        let mut bw = BitWriter::new();
        bw.write_ue(self.pps_id);
        bw.write_ue(self.sps_id);
        bw.write_flag(self.cabac);
        bw.write_flag(false);
        bw.write_ue(0);
        bw.write_ue(self.num_ref_idx_default - 1);
        bw.write_ue(0);
        bw.write_flag(self.weighted_pred);
        bw.write_bits(0, 2);
        bw.write_se(self.pic_init_qp - 26);
        bw.write_se(0);
        bw.write_se(0);
        bw.write_flag(self.deblocking_control);
        bw.write_flag(false);
        bw.write_flag(self.redundant_pic_cnt_present);
        if self.transform_8x8 {
            bw.write_flag(true);
            bw.write_flag(false);
            bw.write_se(0);
        }
        bw.write_rbsp_trailing_bits();
        bw.finish()
    }

    pub(super) fn nal(&self) -> Vec<u8> {
        nal(3, NAL_PPS, &self.rbsp())
    }
}

// ============================================================
// slice
// ============================================================

/// 显式加权预测参数 (只写 L0 第一项)
#[derive(Debug, Clone, Copy)]
pub(super) struct LumaWeight {
    pub log2_denom: u32,
    pub weight: i32,
    pub offset: i32,
}

#[derive(Debug, Clone)]
pub(super) struct SliceConfig {
    pub idr: bool,
    pub ref_idc: u8,
    pub p_slice: bool,
    pub first_mb: u32,
    pub frame_num: u32,
    pub idr_pic_id: u32,
    pub qp: i32,
    pub no_output_of_prior_pics: bool,
    pub disable_deblocking: bool,
    pub redundant_pic_cnt: u32,
    pub num_ref_idx_override: Option<u32>,
    pub weight: Option<LumaWeight>,
}

impl SliceConfig {
    pub(super) fn idr(idr_pic_id: u32) -> Self {
        Self {
            idr: true,
            ref_idc: 3,
            p_slice: false,
            first_mb: 0,
            frame_num: 0,
            idr_pic_id,
            qp: 26,
            no_output_of_prior_pics: false,
            disable_deblocking: false,
            redundant_pic_cnt: 0,
            num_ref_idx_override: None,
            weight: None,
        }
    }

    pub(super) fn p(frame_num: u32) -> Self {
        Self {
            idr: false,
            p_slice: true,
            frame_num,
            ..Self::idr(0)
        }
    }

    /// 非 IDR 的 I slice
    pub(super) fn i(frame_num: u32) -> Self {
        Self {
            idr: false,
            frame_num,
            ..Self::idr(0)
        }
    }

    pub(super) fn at(mut self, first_mb: u32) -> Self {
        self.first_mb = first_mb;
        self
    }

    pub(super) fn nal_type(&self) -> u8 {
        if self.idr { NAL_IDR } else { NAL_SLICE }
    }
}

/// 写出 slice header, 结束时未对齐
fn write_slice_header(bw: &mut BitWriter, sps: &SpsConfig, pps: &PpsConfig, cfg: &SliceConfig) {
    bw.write_ue(cfg.first_mb);
    bw.write_ue(if cfg.p_slice { 5 } else { 7 });
    bw.write_ue(pps.pps_id);
    bw.write_bits(cfg.frame_num, sps.log2_max_frame_num);
    if cfg.idr {
        bw.write_ue(cfg.idr_pic_id);
    }
    if pps.redundant_pic_cnt_present {
        bw.write_ue(cfg.redundant_pic_cnt);
    }
    if cfg.p_slice {
        match cfg.num_ref_idx_override {
            Some(n) => {
                bw.write_flag(true);
                bw.write_ue(n - 1);
            }
            None => bw.write_flag(false),
        }
        // ref_pic_list_modification_flag_l0
        bw.write_flag(false);
        if pps.weighted_pred {
            let count = cfg.num_ref_idx_override.unwrap_or(pps.num_ref_idx_default);
            let w = cfg.weight.unwrap_or(LumaWeight {
                log2_denom: 0,
                weight: 1,
                offset: 0,
            });
            bw.write_ue(w.log2_denom);
            bw.write_ue(0);
            for i in 0..count {
                if i == 0 && cfg.weight.is_some() {
                    bw.write_flag(true);
                    bw.write_se(w.weight);
                    bw.write_se(w.offset);
                } else {
                    bw.write_flag(false);
                }
                bw.write_flag(false);
            }
        }
    }
    if cfg.ref_idc != 0 {
        if cfg.idr {
            bw.write_flag(cfg.no_output_of_prior_pics);
            bw.write_flag(false);
        } else {
            bw.write_flag(false);
        }
    }
    if pps.cabac && cfg.p_slice {
        // cabac_init_idc
        bw.write_ue(0);
    }
    bw.write_se(cfg.qp - pps.pic_init_qp);
    if pps.deblocking_control {
        if cfg.disable_deblocking {
            bw.write_ue(1);
        } else {
            bw.write_ue(0);
            bw.write_se(0);
            bw.write_se(0);
        }
    }
}

/// 写完 slice header 后继续写宏块数据
pub(super) struct SliceWriter {
    bw: BitWriter,
    ref_idc: u8,
    nal_type: u8,
    p_slice: bool,
    /// 已写出 mb_skip_run, 下一个编码宏块前不再重复
    run_written: bool,
}

impl SliceWriter {
    pub(super) fn new(sps: &SpsConfig, pps: &PpsConfig, cfg: &SliceConfig) -> Self {
        let mut bw = BitWriter::new();
        write_slice_header(&mut bw, sps, pps, cfg);
        Self {
            bw,
            ref_idc: cfg.ref_idc,
            nal_type: cfg.nal_type(),
            p_slice: cfg.p_slice,
            run_written: false,
        }
    }

    /// P slice 中编码宏块之前的 mb_skip_run = 0
    fn coded_mb(&mut self) {
        if self.p_slice && !std::mem::take(&mut self.run_written) {
            self.bw.write_ue(0);
        }
    }

    /// I_PCM 宏块: 亮度全部为 `y`, 色度全部为 `c`
    pub(super) fn pcm(&mut self, y: u8, c: u8) -> &mut Self {
        let mut samples = vec![y; 256];
        samples.extend(std::iter::repeat_n(c, 128));
        self.pcm_samples(&samples)
    }

    /// I_PCM 宏块, `samples` 为 256 亮度 + 64 Cb + 64 Cr
    pub(super) fn pcm_samples(&mut self, samples: &[u8]) -> &mut Self {
        self.coded_mb();
        if self.p_slice {
            self.bw.write_ue(5 + 25);
        } else {
            self.bw.write_ue(25);
        }
        self.bw.align_zero();
        self.bw.write_bytes(samples);
        self
    }

    /// Intra16x16 DC 预测, 无 AC 与色度残差, 亮度 DC 系数为 `dc` (-1/0/1)
    pub(super) fn i16x16_dc(&mut self, dc: i32) -> &mut Self {
        self.coded_mb();
        if self.p_slice {
            self.bw.write_ue(5 + 3);
        } else {
            self.bw.write_ue(3);
        }
        // intra_chroma_pred_mode = DC
        self.bw.write_ue(0);
        // mb_qp_delta
        self.bw.write_se(0);
        match dc {
            0 => self.bw.write_bit(1),
            _ => {
                // TrailingOnes=1, TotalCoeff=1; 符号位; total_zeros=0
                self.bw.write_bits(0b01, 2);
                self.bw.write_flag(dc < 0);
                self.bw.write_bit(1);
            }
        }
        self
    }

    /// P_L0_16x16 并显式给出 ref_idx_l0, `num_ref` 为激活的参考数
    pub(super) fn p16x16_ref(&mut self, ref_idx: u32, num_ref: u32, mvd: (i32, i32)) -> &mut Self {
        self.coded_mb();
        self.bw.write_ue(0);
        self.bw.write_te(ref_idx, num_ref - 1);
        self.bw.write_se(mvd.0);
        self.bw.write_se(mvd.1);
        self.bw.write_ue(0);
        self
    }

    /// 直接写出 mb_type 码值, 用于构造非法宏块
    pub(super) fn mb_type_raw(&mut self, raw: u32) -> &mut Self {
        self.coded_mb();
        self.bw.write_ue(raw);
        self
    }

    /// P slice 的 mb_skip_run
    pub(super) fn skip(&mut self, run: u32) -> &mut Self {
        self.bw.write_ue(run);
        self.run_written = true;
        self
    }

    /// I_NxN (Intra4x4), 色度 DC 预测, 无色度残差
    ///
    /// `modes` 按解码顺序给出每个 4x4 块的 rem_intra4x4_pred_mode, `None` 表示沿用预测模式.
    /// `blocks` 按解码顺序给出 `cbp_luma` 覆盖的每个 4x4 块的 (nC, 扫描顺序系数).
    pub(super) fn i4x4(&mut self, modes: &[Option<u8>; 16], cbp_luma: u8, blocks: &[(i32, [i32; 16])]) -> &mut Self {
        self.coded_mb();
        self.bw.write_ue(if self.p_slice { 5 } else { 0 });
        for mode in modes {
            match mode {
                None => self.bw.write_flag(true),
                Some(rem) => {
                    self.bw.write_flag(false);
                    self.bw.write_bits(u32::from(*rem), 3);
                }
            }
        }
        self.bw.write_ue(0);
        self.bw.write_ue(cbp_code_num(cbp_luma, true));
        if cbp_luma != 0 {
            self.bw.write_se(0);
            for (n_c, coeffs) in blocks {
                write_cavlc_block(&mut self.bw, *n_c, coeffs);
            }
        }
        self
    }

    /// P_8x8, 单参考, 无残差; `mvds` 按子分区解码顺序排列
    pub(super) fn p8x8(&mut self, sub_types: [u32; 4], mvds: &[(i32, i32)]) -> &mut Self {
        self.coded_mb();
        self.bw.write_ue(3);
        for sub in sub_types {
            self.bw.write_ue(sub);
        }
        for &(x, y) in mvds {
            self.bw.write_se(x);
            self.bw.write_se(y);
        }
        self.bw.write_ue(cbp_code_num(0, false));
        self
    }

    /// P_L0_16x16, 单参考, 无残差, mvd 以 1/4 像素为单位
    pub(super) fn p16x16(&mut self, mvd: (i32, i32)) -> &mut Self {
        self.coded_mb();
        self.bw.write_ue(0);
        self.bw.write_se(mvd.0);
        self.bw.write_se(mvd.1);
        // coded_block_pattern = 0
        self.bw.write_ue(0);
        self
    }

    pub(super) fn finish(&mut self) -> Vec<u8> {
        let mut bw = std::mem::replace(&mut self.bw, BitWriter::new());
        bw.write_rbsp_trailing_bits();
        nal(self.ref_idc, self.nal_type, &bw.finish())
    }
}

// ============================================================
// CAVLC 残差
// ============================================================

/// coded_block_pattern 的 me(v) 码号
fn cbp_code_num(cbp: u8, intra: bool) -> u32 {
    (0..48)
        .find(|&n| matches!(cbp_from_code_num(n, intra), Ok(v) if v == cbp))
        .expect("cbp 应有对应码号")
}

/// (TrailingOnes, TotalCoeff) → coeff_token 码表索引
fn coeff_token_index(trailing_ones: usize, total_coeff: usize) -> usize {
    match total_coeff {
        0 => 0,
        1 => 1 + trailing_ones,
        2 => 3 + trailing_ones,
        _ => 4 * total_coeff - 6 + trailing_ones,
    }
}

fn write_level_code(bw: &mut BitWriter, code: u32, suffix_length: u32) {
    let (prefix, suffix, size) = if suffix_length == 0 {
        match code {
            0..=13 => (code, 0, 0),
            14..=29 => (14, code - 14, 4),
            _ => (15, code - 30, 12),
        }
    } else if code < (15 << suffix_length) {
        (code >> suffix_length, code & ((1 << suffix_length) - 1), suffix_length)
    } else {
        (15, code - (15 << suffix_length), 12)
    };
    for _ in 0..prefix {
        bw.write_bit(0);
    }
    bw.write_bit(1);
    bw.write_bits(suffix, size);
}

/// 按 CAVLC 写出一个残差块 (7.3.5.3.2)
///
/// `coeffs` 为扫描顺序, 长度即 maxNumCoeff; `n_c < 0` 表示色度 DC.
pub(super) fn write_cavlc_block(bw: &mut BitWriter, n_c: i32, coeffs: &[i32]) {
    // 高频在前
    let nonzero: Vec<(usize, i32)> = coeffs
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, v)| v != 0)
        .rev()
        .collect();
    let total = nonzero.len();
    let trailing = nonzero.iter().take(3).take_while(|&&(_, v)| v.abs() == 1).count();
    let idx = coeff_token_index(trailing, total);
    if n_c < 0 {
        bw.write_bits(
            u32::from(CHROMA_DC_COEFF_TOKEN_BITS[idx]),
            u32::from(CHROMA_DC_COEFF_TOKEN_LENS[idx]),
        );
    } else {
        let table = match n_c {
            0 | 1 => 0,
            2 | 3 => 1,
            4..=7 => 2,
            _ => 3,
        };
        bw.write_bits(
            u32::from(COEFF_TOKEN_BITS[table][idx]),
            u32::from(COEFF_TOKEN_LENS[table][idx]),
        );
    }
    if total == 0 {
        return;
    }

    let mut suffix_length = u32::from(total > 10 && trailing < 3);
    for (i, &(_, level)) in nonzero.iter().enumerate() {
        if i < trailing {
            bw.write_flag(level < 0);
            continue;
        }
        let mut code = if level > 0 { 2 * level - 2 } else { -2 * level - 1 };
        if i == trailing && trailing < 3 {
            code -= 2;
        }
        write_level_code(bw, code as u32, suffix_length);
        if suffix_length == 0 {
            suffix_length = 1;
        }
        if level.abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
            suffix_length += 1;
        }
    }

    let max = coeffs.len();
    let mut zeros_left = nonzero[0].0 + 1 - total;
    if total < max {
        let (code, len) = if max == 4 {
            (
                CHROMA_DC_TOTAL_ZERO_BITS[total - 1][zeros_left],
                CHROMA_DC_TOTAL_ZERO_LENS[total - 1][zeros_left],
            )
        } else {
            (TOTAL_ZERO_BITS[total - 1][zeros_left], TOTAL_ZERO_LENS[total - 1][zeros_left])
        };
        bw.write_bits(u32::from(code), u32::from(len));
    }
    for pair in nonzero.windows(2) {
        if zeros_left == 0 {
            break;
        }
        let run = pair[0].0 - pair[1].0 - 1;
        let table = zeros_left.min(7) - 1;
        bw.write_bits(u32::from(RUN_BEFORE_BITS[table][run]), u32::from(RUN_BEFORE_LENS[table][run]));
        zeros_left -= run;
    }
}

// ============================================================
// CABAC 编码
// ============================================================

/// 9.3.4.2 的算术编码器, 由测试按 bin 逐个写出宏块数据
pub(super) struct CabacWriter {
    bw: BitWriter,
    ctxs: Vec<CabacCtx>,
    low: u32,
    range: u32,
    outstanding: u32,
    first_bit: bool,
    ref_idc: u8,
    nal_type: u8,
}

impl CabacWriter {
    /// 写出 slice header 与 cabac_alignment_one_bit, P slice 使用 cabac_init_idc = 0
    pub(super) fn new(sps: &SpsConfig, pps: &PpsConfig, cfg: &SliceConfig) -> Self {
        assert!(pps.cabac, "PPS 应开启 CABAC");
        let mut bw = BitWriter::new();
        write_slice_header(&mut bw, sps, pps, cfg);
        while !bw.is_byte_aligned() {
            bw.write_bit(1);
        }
        let ctxs = init_contexts(cfg.p_slice.then_some(0), cfg.qp).expect("上下文初始化应成功");
        Self {
            bw,
            ctxs,
            low: 0,
            range: 510,
            outstanding: 0,
            first_bit: true,
            ref_idc: cfg.ref_idc,
            nal_type: cfg.nal_type(),
        }
    }

    fn reset_engine(&mut self) {
        self.low = 0;
        self.range = 510;
        self.outstanding = 0;
        self.first_bit = true;
    }

    fn put_bit(&mut self, bit: u32) {
        // 首个输出位不写出
        if !std::mem::take(&mut self.first_bit) {
            self.bw.write_bit(bit);
        }
        while self.outstanding > 0 {
            self.bw.write_bit(1 - bit);
            self.outstanding -= 1;
        }
    }

    fn renorm(&mut self) {
        while self.range < 256 {
            if self.low < 256 {
                self.put_bit(0);
            } else if self.low >= 512 {
                self.low -= 512;
                self.put_bit(1);
            } else {
                self.low -= 256;
                self.outstanding += 1;
            }
            self.range <<= 1;
            self.low <<= 1;
        }
    }

    /// 常规 bin
    pub(super) fn decision(&mut self, ctx_idx: usize, bin: u32) -> &mut Self {
        let mut ctx = self.ctxs[ctx_idx];
        let q = ((self.range >> 6) & 3) as usize;
        let lps = u32::from(RANGE_TAB_LPS[ctx.state as usize][q]);
        self.range -= lps;
        if bin != u32::from(ctx.mps) {
            self.low += self.range;
            self.range = lps;
            if ctx.state == 0 {
                ctx.mps = 1 - ctx.mps;
            }
            ctx.state = NEXT_STATE_LPS[ctx.state as usize];
        } else {
            ctx.state = NEXT_STATE_MPS[ctx.state as usize];
        }
        self.ctxs[ctx_idx] = ctx;
        self.renorm();
        self
    }

    /// 旁路 bin
    pub(super) fn bypass(&mut self, bin: u32) -> &mut Self {
        self.low <<= 1;
        if bin != 0 {
            self.low += self.range;
        }
        if self.low >= 1024 {
            self.put_bit(1);
            self.low -= 1024;
        } else if self.low < 512 {
            self.put_bit(0);
        } else {
            self.low -= 512;
            self.outstanding += 1;
        }
        self
    }

    /// 终止 bin, 为 1 时冲刷编码器, 最后写出的位即 rbsp_stop_one_bit
    pub(super) fn terminate(&mut self, bin: u32) -> &mut Self {
        self.range -= 2;
        if bin == 0 {
            self.renorm();
            return self;
        }
        self.low += self.range;
        self.range = 2;
        self.renorm();
        self.put_bit((self.low >> 9) & 1);
        self.bw.write_bits(((self.low >> 7) & 3) | 1, 2);
        self
    }

    /// I_PCM: 终止 bin 为 1, 对齐后写样本并重新初始化编码器; mb_type 的首个 bin 由调用方写出
    pub(super) fn pcm(&mut self, y: u8, c: u8) -> &mut Self {
        self.terminate(1);
        self.bw.align_zero();
        let mut samples = vec![y; 256];
        samples.extend(std::iter::repeat_n(c, 128));
        self.bw.write_bytes(&samples);
        self.reset_engine();
        self
    }

    /// mvd 分量: uCoff=9 的截断一元前缀, 3 阶指数哥伦布旁路后缀, 旁路符号
    pub(super) fn mvd(&mut self, base: usize, first_inc: usize, value: i32) -> &mut Self {
        const PREFIX_INC: [usize; 8] = [3, 4, 5, 6, 6, 6, 6, 6];
        let abs = value.unsigned_abs();
        if abs == 0 {
            return self.decision(base + first_inc, 0);
        }
        self.decision(base + first_inc, 1);
        for prefix in 1..abs.min(9) {
            self.decision(base + PREFIX_INC[prefix as usize - 1], 1);
        }
        if abs < 9 {
            self.decision(base + PREFIX_INC[abs as usize - 1], 0);
        } else {
            self.exp_golomb_bypass(abs - 9, 3);
        }
        self.bypass(u32::from(value < 0))
    }

    fn exp_golomb_bypass(&mut self, mut value: u32, mut k: u32) {
        while value >= (1 << k) {
            self.bypass(1);
            value -= 1 << k;
            k += 1;
        }
        self.bypass(0);
        while k > 0 {
            k -= 1;
            self.bypass((value >> k) & 1);
        }
    }

    /// end_of_slice_flag = 1 并封装为 NAL
    pub(super) fn finish(&mut self) -> Vec<u8> {
        self.terminate(1);
        let mut bw = std::mem::replace(&mut self.bw, BitWriter::new());
        bw.align_zero();
        nal(self.ref_idc, self.nal_type, &bw.finish())
    }
}

// ============================================================
// 常用码流
// ============================================================

/// 默认参数集 + 单 slice 的 I_PCM IDR 帧, 所有宏块填充 `y`/`c`
pub(super) fn pcm_idr_stream(sps: &SpsConfig, y: u8, c: u8) -> Vec<u8> {
    let pps = PpsConfig::default();
    concat(&[&sps.nal(), &pps.nal(), &pcm_idr(sps, &pps, 0, y, c)])
}

/// 单 slice 的 I_PCM IDR 帧
pub(super) fn pcm_idr(sps: &SpsConfig, pps: &PpsConfig, idr_pic_id: u32, y: u8, c: u8) -> Vec<u8> {
    let mut w = SliceWriter::new(sps, pps, &SliceConfig::idr(idr_pic_id));
    for _ in 0..sps.mb_width * sps.mb_height {
        w.pcm(y, c);
    }
    w.finish()
}

/// 全部跳过的 P 帧
pub(super) fn skip_p(sps: &SpsConfig, pps: &PpsConfig, frame_num: u32) -> Vec<u8> {
    let mut w = SliceWriter::new(sps, pps, &SliceConfig::p(frame_num));
    w.skip(sps.mb_width * sps.mb_height);
    w.finish()
}

// ============================================================
// 解码器
// ============================================================

pub(super) fn test_params(ec: EcActiveIdc) -> DecodingParam {
    DecodingParam {
        ec_active_idc: ec,
        max_width: 64,
        max_height: 64,
        max_frame_buffers: 6,
        ..Default::default()
    }
}

pub(super) fn open_decoder(ec: EcActiveIdc) -> H264Decoder {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut dec = H264Decoder::new();
    assert_eq!(dec.initialize(&test_params(ec)), CmResult::Success, "初始化应成功");
    dec
}

/// 送入一段码流, 返回状态与可能的输出图像
pub(super) fn feed(dec: &mut H264Decoder, data: &[u8], ts: u64) -> (DecodingState, Option<YuvPicture>, u64) {
    let mut info = BufferInfo {
        in_bs_timestamp: ts,
        ..Default::default()
    };
    let state = dec.decode_frame2(data, &mut info);
    if info.picture.is_some() {
        assert_eq!(info.buffer_status, 1, "有输出时 buffer_status 应为 1");
    }
    (state, info.picture, info.out_yuv_timestamp)
}

/// 冲刷出全部剩余图像
pub(super) fn drain(dec: &mut H264Decoder) -> Vec<YuvPicture> {
    let mut out = Vec::new();
    loop {
        let (_, pic, _) = feed(dec, &[], 0);
        match pic {
            Some(pic) => out.push(pic),
            None => return out,
        }
    }
}

/// 送入整段码流并冲刷, 返回合并的状态与全部输出
pub(super) fn decode_all(dec: &mut H264Decoder, data: &[u8]) -> (DecodingState, Vec<YuvPicture>) {
    let (state, first, _) = feed(dec, data, 0);
    let mut pics: Vec<YuvPicture> = first.into_iter().collect();
    pics.extend(drain(dec));
    (state, pics)
}

pub(super) fn luma_at(pic: &YuvPicture, x: usize, y: usize) -> u8 {
    pic.planes[0][y * pic.strides[0] + x]
}

pub(super) fn assert_luma_uniform(pic: &YuvPicture, value: u8) {
    for y in 0..pic.height as usize {
        for x in 0..pic.width as usize {
            assert_eq!(luma_at(pic, x, y), value, "亮度应一致, x={}, y={}", x, y);
        }
    }
}
