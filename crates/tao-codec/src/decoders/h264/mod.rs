//! H.264/AVC 视频解码器.
//!
//! 支持 Baseline/Main profile 的 I/P slice: CAVLC 与 CABAC 熵解码,
//! 帧内/帧间预测, 显式加权预测, 去块滤波, 参考帧管理 (滑动窗口与 MMCO)
//! 以及多种错误隐藏模式. 输出按解码顺序, 每次调用至多一幅图像.
//!
//! 入口为 [`H264Decoder`]: `initialize` → `decode_frame2` (循环) →
//! `uninitialize`. 同一解码器也实现了 [`Decoder`] trait.

mod cabac;
mod cabac_init_pb;
mod cabac_syntax;
mod cavlc;
mod common;
mod concealment;
mod config;
mod context;
mod deblock;
mod dispatch;
mod dpb;
mod inter;
mod intra;
mod macroblock;
mod macroblock_state;
mod mv_pred;
mod output;
mod parameter_sets;
mod picture;
mod recon;
mod residual;
mod slice_decode;
mod slice_parse;
mod state;
mod statistics;

use std::collections::VecDeque;

use log::{debug, info, warn};
use tao_core::{TaoError, TaoResult};

use crate::decoder::Decoder;
use crate::frame::{Frame, VideoFrame};
use crate::packet::{NOPTS_VALUE, Packet};

pub use config::{
    BufferInfo, DecoderOption, DecodingParam, EcActiveIdc, MAX_FRAME_BUFFERS, MAX_SUPPORTED_DIMENSION,
    MIN_FRAME_BUFFERS, OptionId, OptionValue, ParserBsInfo, SarInfo, TraceLevel, VideoBitstreamType, YuvPicture,
};
pub use parameter_sets::{ParamSetCache, ParamSetKind, ParamSetRef, Pps, parse_pps};
pub use slice_parse::{SliceHeader, SliceType, parse_slice_header};
pub use state::{CmResult, DecodingState};
pub use statistics::DecoderStatistics;

use context::DecoderContext;
use output::OutputPicture;

/// H.264 解码器
///
/// 未初始化时所有解码调用返回 `INITIAL_OPT_EXPECTED`.
pub struct H264Decoder {
    ctx: Option<DecoderContext>,
    /// `Decoder` trait 适配: 已解码待取出的帧
    frames: VecDeque<VideoFrame>,
    flushing: bool,
}

impl Default for H264Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl H264Decoder {
    /// 创建未初始化的解码器
    pub fn new() -> Self {
        Self {
            ctx: None,
            frames: VecDeque::new(),
            flushing: false,
        }
    }

    /// 校验参数并分配缓冲池, 已初始化时先释放旧状态
    pub fn initialize(&mut self, params: &DecodingParam) -> CmResult {
        if let Err(reason) = params.validate() {
            warn!("H264: 初始化参数非法, {}", reason);
            return CmResult::InitParaError;
        }
        if self.ctx.is_some() {
            self.uninitialize();
        }
        let mut params = params.clone();
        if params.parse_only && params.ec_active_idc.is_enabled() {
            debug!("H264: 仅解析模式关闭错误隐藏");
            params.ec_active_idc = EcActiveIdc::Disable;
        }
        info!(
            "H264: 解码器初始化, max={}x{}, buffers={}, ec={:?}, parse_only={}",
            params.max_width, params.max_height, params.max_frame_buffers, params.ec_active_idc, params.parse_only
        );
        self.ctx = Some(DecoderContext::new(params));
        self.frames.clear();
        self.flushing = false;
        CmResult::Success
    }

    /// 释放全部缓冲, 之后需要重新初始化
    pub fn uninitialize(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            ctx.release();
            info!("H264: 解码器已释放");
        }
        self.frames.clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.ctx.is_some()
    }

    /// 错误隐藏关闭时, 是否因错误丢失了参考帧 (干净的 IDR 后清除)
    pub fn reference_lost(&self) -> bool {
        self.ctx.as_ref().is_some_and(DecoderContext::reference_lost)
    }

    /// 出错且未产出图像的调用次数
    pub fn ignored_error_packets(&self) -> i32 {
        self.ctx.as_ref().map_or(0, DecoderContext::ignored_error_packets)
    }

    /// 是否有已开始但尚未完成的图像
    pub fn has_pending_picture(&self) -> bool {
        self.ctx
            .as_ref()
            .is_some_and(|ctx| ctx.slice_state().has_open_picture())
    }

    // ============================================================
    // 选项
    // ============================================================

    pub fn set_option(&mut self, option: DecoderOption) -> CmResult {
        let Some(ctx) = self.ctx.as_mut() else {
            return CmResult::InitExpected;
        };
        match option {
            DecoderOption::EndOfStream(flag) => ctx.end_of_stream = flag,
            DecoderOption::ErrorConIdc(value) => {
                let idc = EcActiveIdc::from_clipped(value);
                if ctx.params().parse_only && idc.is_enabled() {
                    warn!("H264: 仅解析模式不支持错误隐藏, idc={}", value);
                    return CmResult::InitParaError;
                }
                debug!("H264: 设置错误隐藏模式, value={}, idc={:?}", value, idc);
                ctx.ec_idc = idc;
            }
            DecoderOption::TraceLevel(level) => ctx.set_trace_filter(level.to_level_filter()),
            DecoderOption::StatisticsLogInterval(interval) => ctx.set_statistics_interval(interval),
            DecoderOption::ReadOnly(id) => {
                warn!("H264: 选项只读, id={:?}", id);
                return CmResult::InitParaError;
            }
        }
        CmResult::Success
    }

    pub fn get_option(&self, id: OptionId) -> Result<OptionValue, CmResult> {
        let ctx = self.ctx.as_ref().ok_or(CmResult::InitExpected)?;
        let value = match id {
            OptionId::EndOfStream => OptionValue::Bool(ctx.end_of_stream),
            OptionId::ErrorConIdc => OptionValue::Int(ctx.ec_idc.as_i32()),
            OptionId::TraceLevel => return Err(CmResult::InitParaError),
            OptionId::StatisticsLogInterval => OptionValue::UInt(ctx.stats.statistics_log_interval),
            OptionId::GetStatistics => OptionValue::Statistics(Box::new(ctx.statistics_snapshot())),
            OptionId::GetSarInfo => OptionValue::Sar(ctx.sar_info().ok_or(CmResult::InitExpected)?),
            OptionId::Profile => {
                let sps = ctx.current_sps().ok_or(CmResult::InitExpected)?;
                OptionValue::UInt(u32::from(sps.profile_idc))
            }
            OptionId::Level => {
                let sps = ctx.current_sps().ok_or(CmResult::InitExpected)?;
                OptionValue::UInt(u32::from(sps.level_idc))
            }
            OptionId::VclNal => OptionValue::Bool(ctx.vcl.au_has_vcl),
            OptionId::TemporalId => OptionValue::Int(ctx.vcl.temporal_id.map_or(-1, i32::from)),
            OptionId::IsRefPic => OptionValue::Int(ctx.vcl.is_ref.map_or(-1, i32::from)),
        };
        Ok(value)
    }

    // ============================================================
    // 解码
    // ============================================================

    /// 解码一段 Annex B 码流, 至多输出一幅图像
    ///
    /// 空输入表示码流结束: 完成在途图像并输出. `info.in_bs_timestamp`
    /// 随访问单元保存, 输出时填入 `out_yuv_timestamp`.
    pub fn decode_frame2(&mut self, src: &[u8], info: &mut BufferInfo) -> DecodingState {
        info.buffer_status = 0;
        info.picture = None;
        let (state, out) = self.decode_inner(src, info.in_bs_timestamp);
        if let Some(out) = out {
            info.buffer_status = 1;
            info.out_yuv_timestamp = out.timestamp;
            info.picture = Some(out.picture);
        }
        state
    }

    /// `decode_frame2(src)` 后立即冲刷, 状态位合并
    ///
    /// 第一次调用已输出图像时不再冲刷, 避免覆盖输出.
    pub fn decode_frame_no_delay(&mut self, src: &[u8], info: &mut BufferInfo) -> DecodingState {
        let mut state = self.decode_frame2(src, info);
        if info.buffer_status == 0 && !state.contains(DecodingState::OUT_OF_MEMORY) {
            state |= self.decode_frame2(&[], info);
        }
        state
    }

    /// 旧接口: 仅在无错误时返回图像
    pub fn decode_frame(&mut self, src: &[u8], picture: &mut Option<YuvPicture>) -> DecodingState {
        let mut info = BufferInfo::default();
        let state = self.decode_frame2(src, &mut info);
        *picture = if state.is_error_free() { info.picture } else { None };
        state
    }

    /// 仅解析模式: 按访问单元报告 NAL 长度
    pub fn decode_parser(&mut self, src: &[u8], info: &mut ParserBsInfo) -> DecodingState {
        let Some(ctx) = self.ctx.as_mut() else {
            return DecodingState::INITIAL_OPT_EXPECTED;
        };
        if !ctx.params().parse_only {
            return DecodingState::INVALID_ARGUMENT;
        }
        let in_ts = info.in_bs_timestamp;
        let (state, parsed) = ctx.parse(src, in_ts);
        if state.contains(DecodingState::OUT_OF_MEMORY) {
            ctx.reset();
            return DecodingState::OUT_OF_MEMORY;
        }
        match parsed {
            Some(parsed) => *info = parsed,
            None => {
                info.nal_num = 0;
                info.nal_len_in_byte.clear();
            }
        }
        state
    }

    fn decode_inner(&mut self, src: &[u8], timestamp: u64) -> (DecodingState, Option<OutputPicture>) {
        let Some(ctx) = self.ctx.as_mut() else {
            return (DecodingState::INITIAL_OPT_EXPECTED, None);
        };
        if ctx.params().parse_only {
            return (DecodingState::INVALID_ARGUMENT, None);
        }
        let (state, out) = ctx.decode(src, timestamp);
        if state.contains(DecodingState::OUT_OF_MEMORY) {
            ctx.reset();
            return (DecodingState::OUT_OF_MEMORY, None);
        }
        (state, out)
    }

    fn to_video_frame(&self, out: OutputPicture) -> VideoFrame {
        let sar = self
            .ctx
            .as_ref()
            .and_then(DecoderContext::sar_info)
            .filter(|sar| sar.sar_width > 0 && sar.sar_height > 0)
            .map_or((1, 1), |sar| (sar.sar_width, sar.sar_height));
        let YuvPicture {
            planes,
            strides,
            width,
            height,
        } = out.picture;
        VideoFrame {
            data: planes,
            linesize: strides,
            width,
            height,
            pts: out.timestamp as i64,
            is_keyframe: out.is_idr,
            picture_type: out.picture_type,
            sample_aspect_ratio: sar,
        }
    }
}

// ============================================================
// Decoder trait 适配
// ============================================================

impl Decoder for H264Decoder {
    fn name(&self) -> &str {
        "h264"
    }

    fn open(&mut self, params: &DecodingParam) -> TaoResult<()> {
        match self.initialize(params) {
            CmResult::Success => Ok(()),
            other => Err(TaoError::InvalidArgument(format!("H264: 初始化失败, result={}", other))),
        }
    }

    fn send_packet(&mut self, packet: &Packet) -> TaoResult<()> {
        if self.ctx.is_none() {
            return Err(TaoError::NeedMoreData);
        }
        if packet.is_empty() {
            self.flushing = true;
            loop {
                let (_, out) = self.decode_inner(&[], 0);
                let Some(out) = out else {
                    break;
                };
                let frame = self.to_video_frame(out);
                self.frames.push_back(frame);
            }
            return Ok(());
        }

        self.flushing = false;
        // NOPTS_VALUE 按位保存, 输出时还原
        let timestamp = packet.pts as u64;
        let (state, out) = self.decode_inner(&packet.data, timestamp);
        if let Some(out) = out {
            let frame = self.to_video_frame(out);
            self.frames.push_back(frame);
        }
        if state.contains(DecodingState::OUT_OF_MEMORY) {
            return Err(TaoError::OutOfMemory(format!(
                "H264: 解码器已复位, size={}, pts={}",
                packet.size(),
                if packet.pts == NOPTS_VALUE { -1 } else { packet.pts }
            )));
        }
        if !state.is_error_free() {
            debug!("H264: 数据包解码有错误, state={:#x}, pts={}", state.code(), packet.pts);
        }
        Ok(())
    }

    fn receive_frame(&mut self) -> TaoResult<Frame> {
        match self.frames.pop_front() {
            Some(frame) => Ok(Frame::Video(frame)),
            None if self.flushing => Err(TaoError::Eof),
            None => Err(TaoError::NeedMoreData),
        }
    }

    fn flush(&mut self) {
        let params = self.ctx.as_ref().map(|ctx| ctx.params().clone());
        self.frames.clear();
        self.flushing = false;
        if let Some(params) = params {
            self.initialize(&params);
        }
    }
}
