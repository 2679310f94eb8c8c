//! 解码上下文.
//!
//! `DecoderContext` 独占解码器的全部可变状态: 参数集缓存、帧缓冲池、
//! 参考图像集合、输出队列与统计. 一次解码调用按 NAL 顺序推进,
//! 访问单元边界到来时完成上一幅图像 (错误隐藏 → 去块 → 参考标记 → 输出).

use std::collections::VecDeque;
use std::fmt::Display;
use std::time::{Duration, Instant};

use log::{Level, LevelFilter, debug, info, warn};
use tao_core::{TaoError, TaoResult};

use crate::frame::PictureType;
use crate::parsers::h264::{NalCursor, NalUnit, NalUnitType, Sps};

use super::concealment::{EcStrategy, conceal_picture};
use super::config::{DecodingParam, EcActiveIdc, ParserBsInfo, SarInfo};
use super::deblock::{DeblockParams, SliceFilterParams, deblock_picture};
use super::dpb::Dpb;
use super::inter::PartWeights;
use super::macroblock_state::MbGrid;
use super::output::{OutputPicture, OutputQueue};
use super::parameter_sets::{ParamSetCache, Pps};
use super::picture::{CropWindow, FramePool, PicHandle, Picture};
use super::recon::InterRefs;
use super::residual::Dequantizer;
use super::slice_decode::{SliceJob, SliceOutcome, SliceState, decode_slice};
use super::slice_parse::{PocState, PredWeightTable, SliceHeader, SliceType, parse_slice_header};
use super::state::DecodingState;
use super::statistics::DecoderStatistics;

/// 当前激活的序列
#[derive(Debug, Clone)]
struct ActiveSequence {
    sps: Sps,
    mb_width: usize,
    mb_height: usize,
}

/// 正在解码的图像
struct CurrentPicture {
    handle: PicHandle,
    picture: Picture,
    grid: MbGrid,
    /// 图像第一个 slice 的 header
    header: SliceHeader,
    last_first_mb: u32,
    filters: Vec<SliceFilterParams>,
    chroma_qp_offset: [i32; 2],
    all_intra: bool,
    /// 参考帧缺失 (frame_num 间隙或参考列表空项)
    refs_missing: bool,
    propagated_mbs: u32,
    qp_sum: i64,
    decoded_mbs: u32,
}

/// 最近一个 VCL NAL 的描述
#[derive(Debug, Clone, Copy, Default)]
pub(super) struct VclInfo {
    /// 最近一次调用的输入是否包含 VCL NAL
    pub au_has_vcl: bool,
    pub temporal_id: Option<u8>,
    pub is_ref: Option<bool>,
    /// 前缀 NAL 携带的 temporal_id, 由随后的 slice 使用
    pending_temporal_id: Option<u8>,
}

impl VclInfo {
    fn record(&mut self, nal: &NalUnit) {
        self.au_has_vcl = true;
        self.is_ref = Some(nal.ref_idc != 0);
        self.temporal_id = match nal.nal_type {
            NalUnitType::SliceExtension => extension_temporal_id(nal),
            _ => self.pending_temporal_id.take(),
        };
    }
}

/// 仅解析模式下正在累积的访问单元
#[derive(Debug)]
struct ParsedAccessUnit {
    nal_lens: Vec<usize>,
    header: Option<SliceHeader>,
    last_first_mb: u32,
    timestamp: u64,
    errored: bool,
}

impl ParsedAccessUnit {
    fn new(timestamp: u64) -> Self {
        Self {
            nal_lens: Vec::new(),
            header: None,
            last_first_mb: 0,
            timestamp,
            errored: false,
        }
    }
}

#[derive(Debug, Default)]
struct ParserState {
    pending: Option<ParsedAccessUnit>,
    completed: VecDeque<ParserBsInfo>,
}

/// 解码器的全部运行状态
pub(super) struct DecoderContext {
    params: DecodingParam,
    pub(super) ec_idc: EcActiveIdc,
    trace_filter: LevelFilter,
    param_sets: ParamSetCache,
    pool: FramePool,
    dpb: Dpb,
    output: OutputQueue,
    poc: PocState,
    active: Option<ActiveSequence>,
    /// 最近一次成功解析的 SPS, 尚未激活时用于查询 profile/SAR
    last_sps_id: Option<u32>,
    current: Option<CurrentPicture>,
    slice_state: SliceState,
    /// 上一幅完成的图像, 作为错误隐藏的来源
    last_decoded: Option<PicHandle>,
    pub(super) stats: DecoderStatistics,
    decode_time: Duration,
    pub(super) end_of_stream: bool,
    ref_lost: bool,
    /// 冻结输出直到干净的 IDR
    frozen: bool,
    /// 复位后静默丢弃非 IDR slice 直到下一个 IDR
    awaiting_idr: bool,
    pub(super) vcl: VclInfo,
    ignored_error_packets: i32,
    error_trace_armed: bool,
    parser: ParserState,
}

impl DecoderContext {
    pub(super) fn new(params: DecodingParam) -> Self {
        Self {
            ec_idc: params.ec_active_idc,
            trace_filter: params.trace_level.to_level_filter(),
            param_sets: ParamSetCache::new(),
            pool: FramePool::new(params.max_frame_buffers),
            dpb: Dpb::default(),
            output: OutputQueue::default(),
            poc: PocState::default(),
            active: None,
            last_sps_id: None,
            current: None,
            slice_state: SliceState::default(),
            last_decoded: None,
            stats: DecoderStatistics::new(params.statistics_log_interval),
            decode_time: Duration::ZERO,
            end_of_stream: false,
            ref_lost: false,
            frozen: false,
            awaiting_idr: false,
            vcl: VclInfo::default(),
            ignored_error_packets: 0,
            error_trace_armed: true,
            parser: ParserState::default(),
            params,
        }
    }

    pub(super) fn params(&self) -> &DecodingParam {
        &self.params
    }

    /// 丢弃全部在途状态并按原参数重建缓冲
    ///
    /// 参数集、统计与选项保留.
    pub(super) fn reset(&mut self) {
        warn!(
            "H264: 解码器复位, pool_capacity={}, pending_output={}",
            self.pool.capacity(),
            self.output.len()
        );
        self.current = None;
        self.output = OutputQueue::default();
        self.dpb = Dpb::default();
        self.pool = FramePool::new(self.params.max_frame_buffers);
        self.poc.reset();
        self.active = None;
        self.last_decoded = None;
        self.slice_state = SliceState::default();
        self.parser = ParserState::default();
        self.frozen = false;
        self.ref_lost = false;
        self.awaiting_idr = true;
    }

    /// 释放全部缓冲
    pub(super) fn release(&mut self) {
        self.current = None;
        self.output.clear(&mut self.pool);
        self.dpb.clear(&mut self.pool);
        self.pool.clear();
        self.last_decoded = None;
    }

    pub(super) fn set_trace_filter(&mut self, filter: LevelFilter) {
        self.trace_filter = filter;
    }

    pub(super) fn set_statistics_interval(&mut self, interval: u32) {
        self.params.statistics_log_interval = interval;
        self.stats.statistics_log_interval = interval;
    }

    pub(super) fn reference_lost(&self) -> bool {
        self.ref_lost
    }

    pub(super) fn ignored_error_packets(&self) -> i32 {
        self.ignored_error_packets
    }

    pub(super) fn slice_state(&self) -> SliceState {
        self.slice_state
    }

    /// 附带累计耗时的统计快照
    pub(super) fn statistics_snapshot(&self) -> DecoderStatistics {
        self.stats.snapshot(self.decode_time.as_secs_f64() * 1000.0)
    }

    /// 激活中的 SPS, 未激活时取最近收到的 SPS
    pub(super) fn current_sps(&self) -> Option<&Sps> {
        match &self.active {
            Some(active) => Some(&active.sps),
            None => self.last_sps_id.and_then(|id| self.param_sets.sps(id)),
        }
    }

    pub(super) fn sar_info(&self) -> Option<SarInfo> {
        self.current_sps().map(|sps| SarInfo {
            sar_width: sps.sar.0,
            sar_height: sps.sar.1,
            overscan_appropriate: sps.overscan_appropriate,
        })
    }

    fn log_enabled(&self, level: Level) -> bool {
        level <= self.trace_filter
    }

    // ============================================================
    // 解码入口
    // ============================================================

    /// 解码一段输入, 返回状态位与至多一幅输出图像
    ///
    /// 空输入或已置位的码流结束标志表示冲刷: 完成在途图像后输出.
    pub(super) fn decode(&mut self, src: &[u8], timestamp: u64) -> (DecodingState, Option<OutputPicture>) {
        let started = Instant::now();
        let mut state = DecodingState::empty();
        if src.is_empty() || self.end_of_stream {
            state |= self.finish_picture();
        } else if src.len() > self.params.max_bitstream_bytes() {
            warn!(
                "H264: 输入超过码流缓冲上限, len={}, limit={}",
                src.len(),
                self.params.max_bitstream_bytes()
            );
            return (DecodingState::OUT_OF_MEMORY, None);
        } else {
            self.vcl.au_has_vcl = false;
            for item in NalCursor::new(src) {
                state |= match item {
                    Ok(nal) => self.handle_nal(&nal, timestamp),
                    Err(err) => self.note_error(DecodingState::BITSTREAM_ERROR, &err),
                };
                if state.contains(DecodingState::OUT_OF_MEMORY) {
                    return (state, None);
                }
            }
            if self.current.is_some() {
                self.slice_state = SliceState::AwaitingMoreData;
            }
        }

        let out = self.output.pop(&mut self.pool);
        if out.as_ref().is_some_and(|o| o.concealed) {
            state |= DecodingState::DATA_ERROR_CONCEALED;
        }
        self.decode_time += started.elapsed();
        self.account_call(state, out.is_some());
        (state, out)
    }

    /// 仅解析: 统计每个访问单元的 NAL 长度, 不做重建
    pub(super) fn parse(&mut self, src: &[u8], timestamp: u64) -> (DecodingState, Option<ParserBsInfo>) {
        let started = Instant::now();
        let mut state = DecodingState::empty();
        if src.is_empty() || self.end_of_stream {
            self.complete_parsed_au();
        } else if src.len() > self.params.max_bitstream_bytes() {
            warn!(
                "H264: 输入超过码流缓冲上限, len={}, limit={}",
                src.len(),
                self.params.max_bitstream_bytes()
            );
            return (DecodingState::OUT_OF_MEMORY, None);
        } else {
            self.vcl.au_has_vcl = false;
            for item in NalCursor::new(src) {
                state |= match item {
                    Ok(nal) => self.parse_nal(&nal, timestamp),
                    Err(err) => self.note_error(DecodingState::BITSTREAM_ERROR, &err),
                };
            }
        }
        let info = self.parser.completed.pop_front().map(|mut info| {
            info.in_bs_timestamp = timestamp;
            info
        });
        self.decode_time += started.elapsed();
        self.account_call(state, info.is_some());
        (state, info)
    }

    /// 更新错误包计数与一次性错误日志开关
    fn account_call(&mut self, state: DecodingState, produced: bool) {
        if state.is_error_free() {
            if produced {
                self.error_trace_armed = true;
            }
            return;
        }
        if !produced {
            self.ignored_error_packets = if self.ignored_error_packets == i32::MAX {
                0
            } else {
                self.ignored_error_packets + 1
            };
        }
        if self.error_trace_armed && self.log_enabled(Level::Warn) {
            warn!(
                "H264: 解码出错, state={:#x}, ignored_packets={}",
                state.code(),
                self.ignored_error_packets
            );
            self.error_trace_armed = false;
        }
    }

    /// 记录一次错误, 错误隐藏关闭时置参考丢失
    fn note_error(&mut self, bits: DecodingState, detail: &dyn Display) -> DecodingState {
        if self.log_enabled(Level::Debug) {
            debug!("H264: NAL 处理失败, state={:#x}, err={}", bits.code(), detail);
        }
        if !self.ec_idc.is_enabled() {
            self.ref_lost = true;
        }
        bits
    }

    // ============================================================
    // NAL 分派
    // ============================================================

    fn handle_nal(&mut self, nal: &NalUnit, timestamp: u64) -> DecodingState {
        match nal.nal_type {
            NalUnitType::Slice | NalUnitType::SliceIdr => self.handle_slice(nal, timestamp),
            NalUnitType::Sps | NalUnitType::Pps => {
                let state = self.finish_picture();
                state | self.handle_param_set(nal)
            }
            NalUnitType::Aud
            | NalUnitType::Sei
            | NalUnitType::EndOfSequence
            | NalUnitType::EndOfStream
            | NalUnitType::SubsetSps => self.finish_picture(),
            NalUnitType::Prefix => {
                self.vcl.pending_temporal_id = extension_temporal_id(nal);
                DecodingState::empty()
            }
            NalUnitType::SliceExtension => {
                // 只解码基本层
                self.vcl.record(nal);
                DecodingState::empty()
            }
            NalUnitType::SliceDpa | NalUnitType::SliceDpb | NalUnitType::SliceDpc => {
                self.vcl.record(nal);
                let err = TaoError::Unsupported(format!("H264: 不支持数据分区, nal_type={}", nal.nal_type));
                self.note_error(DecodingState::BITSTREAM_ERROR, &err)
            }
            _ => DecodingState::empty(),
        }
    }

    fn handle_param_set(&mut self, nal: &NalUnit) -> DecodingState {
        let rbsp = nal.rbsp();
        let is_sps = nal.nal_type == NalUnitType::Sps;
        let result = if is_sps {
            self.param_sets.ingest_sps(&rbsp)
        } else {
            self.param_sets.ingest_pps(&rbsp)
        };
        match result {
            Ok((id, changed)) => {
                debug!("H264: 参数集已更新, kind={}, id={}, changed={}", nal.nal_type, id, changed);
                if is_sps {
                    self.last_sps_id = Some(id);
                }
                DecodingState::empty()
            }
            Err(err) => {
                if is_sps {
                    self.stats.sps_report_error_num += 1;
                } else {
                    self.stats.pps_report_error_num += 1;
                }
                warn!("H264: 参数集解析失败, kind={}, err={}", nal.nal_type, err);
                self.note_error(DecodingState::BITSTREAM_ERROR, &err)
            }
        }
    }

    fn slice_header_error(&mut self, err: &TaoError) -> DecodingState {
        match err {
            TaoError::MissingParameterSet(what) => {
                if what.starts_with("PPS") {
                    self.stats.pps_no_exist_nal_num += 1;
                } else {
                    self.stats.sps_no_exist_nal_num += 1;
                }
                self.note_error(DecodingState::NO_PARAM_SETS, err)
            }
            _ => self.note_error(DecodingState::BITSTREAM_ERROR, err),
        }
    }

    fn handle_slice(&mut self, nal: &NalUnit, timestamp: u64) -> DecodingState {
        self.vcl.record(nal);
        let rbsp = nal.rbsp();
        let header = match parse_slice_header(&rbsp, nal, &self.param_sets) {
            Ok(header) => header,
            Err(err) => return self.slice_header_error(&err),
        };
        if header.redundant_pic_cnt > 0 {
            debug!(
                "H264: 跳过冗余 slice, frame_num={}, redundant_pic_cnt={}",
                header.frame_num, header.redundant_pic_cnt
            );
            return DecodingState::empty();
        }

        let mut state = DecodingState::empty();
        let boundary = self
            .current
            .as_ref()
            .is_some_and(|cur| starts_new_picture(&cur.header, cur.last_first_mb, &header));
        if boundary {
            state |= self.finish_picture();
        }
        if self.current.is_none() {
            if self.awaiting_idr {
                if !header.is_idr() {
                    debug!("H264: 复位后等待 IDR, 丢弃 slice, frame_num={}", header.frame_num);
                    return state;
                }
                self.awaiting_idr = false;
            }
            if self.ref_lost && !self.ec_idc.is_enabled() && !header.is_idr() {
                debug!("H264: 参考丢失, 丢弃非 IDR slice, frame_num={}", header.frame_num);
                return state | DecodingState::REF_LOST;
            }
            match self.start_picture(&header, timestamp) {
                Ok(bits) => state |= bits,
                Err(bits) => return state | bits,
            }
        }
        state | self.decode_slice_data(&rbsp, &header)
    }

    // ============================================================
    // 图像生命周期
    // ============================================================

    /// 为访问单元的第一个 slice 激活参数集并分配图像
    ///
    /// `Err` 表示该 slice 被丢弃, `Ok` 中的状态位随图像继续解码.
    fn start_picture(&mut self, header: &SliceHeader, timestamp: u64) -> Result<DecodingState, DecodingState> {
        let (sps, pps) = match self.lookup_sets(header.pps_id) {
            Ok(sets) => sets,
            Err(err) => return Err(self.slice_header_error(&err)),
        };
        if let Err(reason) = check_supported(&sps, &pps, &self.params) {
            warn!("H264: 码流特性不受支持, sps_id={}, {}", sps.sps_id, reason);
            return Err(self.note_error(DecodingState::BITSTREAM_ERROR, &reason));
        }
        self.activate(&sps, pps.pps_id);

        let mut refs_missing = false;
        let mut state = DecodingState::empty();
        if self.dpb.has_gap(header.frame_num, header.is_idr()) {
            if sps.gaps_in_frame_num_allowed {
                self.dpb.fill_frame_num_gap(&mut self.pool, header.frame_num);
            } else {
                refs_missing = true;
                let detail = format!("frame_num 不连续, frame_num={}", header.frame_num);
                state |= self.note_error(DecodingState::REF_LOST, &detail);
            }
        }

        let mb_width = sps.pic_width_in_mbs as usize;
        let mb_height = sps.frame_height_in_mbs() as usize;
        let (handle, mut picture) = match self.pool.acquire(mb_width, mb_height) {
            Ok(acquired) => acquired,
            Err(err) => {
                warn!("H264: 图像缓冲分配失败, err={}", err);
                return Err(state | DecodingState::OUT_OF_MEMORY);
            }
        };
        picture.crop = CropWindow {
            left: sps.crop[0] as usize * 2,
            top: sps.crop[2] as usize * 2,
            width: sps.width as usize,
            height: sps.height as usize,
        };
        picture.frame_num = header.frame_num;
        picture.poc = self.poc.compute(&sps, header);
        picture.is_idr = header.is_idr();
        picture.timestamp = timestamp;

        debug!(
            "H264: 图像开始, frame_num={}, poc={}, idr={}, ref={}, ts={}",
            picture.frame_num,
            picture.poc,
            picture.is_idr,
            header.is_reference(),
            timestamp
        );
        self.current = Some(CurrentPicture {
            handle,
            picture,
            grid: MbGrid::new(mb_width, mb_height),
            header: header.clone(),
            last_first_mb: header.first_mb,
            filters: Vec::new(),
            chroma_qp_offset: [pps.chroma_qp_index_offset, pps.second_chroma_qp_index_offset],
            all_intra: true,
            refs_missing,
            propagated_mbs: 0,
            qp_sum: 0,
            decoded_mbs: 0,
        });
        Ok(state)
    }

    fn lookup_sets(&self, pps_id: u32) -> TaoResult<(Sps, Pps)> {
        let pps = self
            .param_sets
            .pps(pps_id)
            .ok_or_else(|| TaoError::MissingParameterSet(format!("PPS id={}", pps_id)))?;
        let sps = self
            .param_sets
            .sps(pps.sps_id)
            .ok_or_else(|| TaoError::MissingParameterSet(format!("SPS id={}", pps.sps_id)))?;
        Ok((sps.clone(), pps.clone()))
    }

    /// 激活 SPS; 内容变化时清空参考集, 尺寸变化计入分辨率变化
    fn activate(&mut self, sps: &Sps, pps_id: u32) {
        self.stats.current_active_pps_id = pps_id as i32;
        if self.active.as_ref().is_some_and(|active| active.sps == *sps) {
            return;
        }
        let mb_width = sps.pic_width_in_mbs as usize;
        let mb_height = sps.frame_height_in_mbs() as usize;
        let resized = self
            .active
            .as_ref()
            .is_some_and(|active| active.mb_width != mb_width || active.mb_height != mb_height);
        if resized {
            self.stats.resolution_change_times += 1;
            info!(
                "H264: 分辨率变化, width={}, height={}, freeze={}",
                sps.width,
                sps.height,
                self.ec_idc.freezes_on_res_change()
            );
            if self.ec_idc.freezes_on_res_change() {
                self.frozen = true;
            }
            if let Some(prev) = self.last_decoded.take() {
                self.pool.release(prev);
            }
        }

        self.dpb.clear(&mut self.pool);
        self.dpb.configure(sps.max_num_ref_frames, sps.max_frame_num());
        self.stats.width = sps.width;
        self.stats.height = sps.height;
        self.stats.profile = u32::from(sps.profile_idc);
        self.stats.level = u32::from(sps.level_idc);
        self.stats.current_active_sps_id = sps.sps_id as i32;
        debug!(
            "H264: 激活 SPS, sps_id={}, mbs={}x{}, max_refs={}, poc_type={}",
            sps.sps_id, mb_width, mb_height, sps.max_num_ref_frames, sps.poc_type
        );
        self.active = Some(ActiveSequence {
            sps: sps.clone(),
            mb_width,
            mb_height,
        });
    }

    fn decode_slice_data(&mut self, rbsp: &[u8], header: &SliceHeader) -> DecodingState {
        let Some(cur) = self.current.as_mut() else {
            return DecodingState::empty();
        };
        let slice_id = cur.filters.len() as i32;
        cur.filters.push(SliceFilterParams {
            disable_idc: header.disable_deblocking_filter_idc,
            offset_a: header.filter_offset_a,
            offset_b: header.filter_offset_b,
        });
        cur.last_first_mb = header.first_mb;
        if !header.slice_type.is_intra() {
            cur.all_intra = false;
        }
        self.slice_state = SliceState::InSlice;

        let result = run_slice(&self.param_sets, &self.dpb, &self.pool, cur, rbsp, header, slice_id);
        self.slice_state = SliceState::SliceComplete;
        match result {
            Ok((outcome, list_has_holes)) => {
                cur.decoded_mbs += outcome.decoded_mbs;
                cur.qp_sum += outcome.qp_sum;
                cur.propagated_mbs += outcome.propagated_mbs;
                let Some(err) = outcome.error else {
                    return DecodingState::empty();
                };
                let bits = if list_has_holes {
                    cur.refs_missing = true;
                    DecodingState::REF_LOST | DecodingState::BITSTREAM_ERROR
                } else {
                    DecodingState::BITSTREAM_ERROR
                };
                self.note_error(bits, &err)
            }
            Err(err) => {
                let bits = match err {
                    TaoError::MissingParameterSet(_) => DecodingState::NO_PARAM_SETS,
                    _ => DecodingState::BITSTREAM_ERROR,
                };
                self.note_error(bits, &err)
            }
        }
    }

    /// 完成当前图像: 错误隐藏、去块、参考标记与输出排队
    fn finish_picture(&mut self) -> DecodingState {
        let Some(mut cur) = self.current.take() else {
            return DecodingState::empty();
        };
        self.slice_state = SliceState::AwaitingFirstSlice;

        let mut state = DecodingState::empty();
        let mb_num = cur.grid.mb_count() as u32;
        let undecoded = cur.grid.undecoded_count();
        let damaged = undecoded > 0 || cur.refs_missing;
        let is_idr = cur.header.is_idr();
        let strategy = EcStrategy::from_idc(self.ec_idc);
        let mut deliver = true;
        let mut concealed_mbs = 0u32;

        if damaged {
            if !strategy.is_enabled() {
                deliver = false;
                self.ref_lost = true;
                if undecoded > 0 {
                    state |= DecodingState::BITSTREAM_ERROR;
                }
                if cur.refs_missing {
                    state |= DecodingState::REF_LOST;
                }
                if is_idr {
                    self.stats.idr_lost_num += 1;
                }
            } else if is_idr && !self.ec_idc.crosses_idr() {
                deliver = false;
                self.frozen = true;
                self.stats.freezing_idr_num += 1;
            } else {
                let prev = self.last_decoded.and_then(|h| self.pool.get(h));
                concealed_mbs = conceal_picture(strategy, &mut cur.picture, &mut cur.grid, prev);
                cur.picture.concealed = true;
                state |= DecodingState::DATA_ERROR_CONCEALED;
                if is_idr {
                    self.stats.ec_idr_num += 1;
                }
            }
        } else if is_idr {
            self.frozen = false;
            self.ref_lost = false;
            self.stats.idr_correct_num += 1;
        }
        if deliver && self.frozen {
            deliver = false;
            if is_idr {
                self.stats.freezing_idr_num += 1;
            } else {
                self.stats.freezing_non_idr_num += 1;
            }
        }

        let params = DeblockParams {
            slices: &cur.filters,
            chroma_qp_offset: cur.chroma_qp_offset,
        };
        deblock_picture(&mut cur.picture, &cur.grid, &params);

        cur.picture.picture_type = if cur.all_intra { PictureType::I } else { PictureType::P };
        let handle = cur.handle;
        let concealed = cur.picture.concealed;
        let timestamp = cur.picture.timestamp;
        let frame_qp = if cur.decoded_mbs > 0 {
            (cur.qp_sum / i64::from(cur.decoded_mbs)) as i32
        } else {
            cur.header.slice_qp
        };
        self.pool.restore(handle, cur.picture);

        if cur.header.is_reference() {
            let outcome = self.dpb.mark_current(
                &mut self.pool,
                handle,
                cur.header.frame_num,
                is_idr,
                &cur.header.marking,
            );
            if outcome.no_output_of_prior_pics {
                debug!("H264: no_output_of_prior_pics, 丢弃待输出图像, count={}", self.output.len());
                self.output.clear(&mut self.pool);
            }
            if outcome.mmco5 {
                self.poc.after_mmco5(cur.header.delta_poc_bottom);
            }
        }

        self.pool.retain(handle);
        if let Some(prev) = self.last_decoded.replace(handle) {
            self.pool.release(prev);
        }

        if deliver {
            self.output.push(&mut self.pool, handle, timestamp, concealed);
            self.stats.update_avg_luma_qp(frame_qp);
            self.stats.count_decoded_frame();
            self.stats
                .record_concealment(concealed_mbs + cur.propagated_mbs, cur.propagated_mbs, mb_num);
            if self.stats.should_log() {
                self.statistics_snapshot().log_summary();
            }
        }
        debug!(
            "H264: 图像完成, frame_num={}, decoded_mbs={}, concealed_mbs={}, deliver={}, state={:#x}",
            cur.header.frame_num,
            cur.decoded_mbs,
            concealed_mbs,
            deliver,
            state.code()
        );
        // 解码期间持有的引用
        self.pool.release(handle);
        state
    }

    // ============================================================
    // 仅解析模式
    // ============================================================

    fn parse_nal(&mut self, nal: &NalUnit, timestamp: u64) -> DecodingState {
        let mut state = DecodingState::empty();
        match nal.nal_type {
            NalUnitType::Sps | NalUnitType::Pps => {
                self.complete_parsed_au_after_vcl();
                state |= self.handle_param_set(nal);
            }
            NalUnitType::Aud
            | NalUnitType::Sei
            | NalUnitType::EndOfSequence
            | NalUnitType::EndOfStream
            | NalUnitType::SubsetSps => self.complete_parsed_au_after_vcl(),
            NalUnitType::Prefix => self.vcl.pending_temporal_id = extension_temporal_id(nal),
            NalUnitType::Slice | NalUnitType::SliceIdr => {
                self.vcl.record(nal);
                match parse_slice_header(&nal.rbsp(), nal, &self.param_sets) {
                    Ok(header) => {
                        let boundary = self.parser.pending.as_ref().is_some_and(|au| {
                            au.header
                                .as_ref()
                                .is_some_and(|prev| starts_new_picture(prev, au.last_first_mb, &header))
                        });
                        if boundary {
                            self.complete_parsed_au();
                        }
                        let au = self
                            .parser
                            .pending
                            .get_or_insert_with(|| ParsedAccessUnit::new(timestamp));
                        au.last_first_mb = header.first_mb;
                        if au.header.is_none() {
                            au.header = Some(header);
                        }
                    }
                    Err(err) => {
                        state |= self.slice_header_error(&err);
                        self.parser
                            .pending
                            .get_or_insert_with(|| ParsedAccessUnit::new(timestamp))
                            .errored = true;
                    }
                }
            }
            NalUnitType::SliceExtension | NalUnitType::SliceDpa | NalUnitType::SliceDpb | NalUnitType::SliceDpc => {
                self.vcl.record(nal);
            }
            _ => {}
        }
        self.parser
            .pending
            .get_or_insert_with(|| ParsedAccessUnit::new(timestamp))
            .nal_lens
            .push(nal.coded_len());
        state
    }

    fn complete_parsed_au_after_vcl(&mut self) {
        if self.parser.pending.as_ref().is_some_and(|au| au.header.is_some()) {
            self.complete_parsed_au();
        }
    }

    /// 结束正在累积的访问单元并生成 `ParserBsInfo`
    fn complete_parsed_au(&mut self) {
        let Some(au) = self.parser.pending.take() else {
            return;
        };
        if au.nal_lens.is_empty() {
            return;
        }
        let (width, height) = au
            .header
            .as_ref()
            .and_then(|h| self.param_sets.sps(h.sps_id))
            .map_or((0, 0), |sps| (sps.width, sps.height));
        if au.header.is_some() && !au.errored {
            self.stats.count_decoded_frame();
            self.stats.width = width;
            self.stats.height = height;
        }
        self.parser.completed.push_back(ParserBsInfo {
            nal_num: au.nal_lens.len(),
            nal_len_in_byte: au.nal_lens,
            sps_width_in_pixel: width,
            sps_height_in_pixel: height,
            in_bs_timestamp: au.timestamp,
            out_bs_timestamp: au.timestamp,
        });
    }
}

// ============================================================
// 辅助函数
// ============================================================

/// 在当前图像上解码一个 slice, 同时返回参考列表是否含空项
fn run_slice(
    param_sets: &ParamSetCache,
    dpb: &Dpb,
    pool: &FramePool,
    cur: &mut CurrentPicture,
    rbsp: &[u8],
    header: &SliceHeader,
    slice_id: i32,
) -> TaoResult<(SliceOutcome, bool)> {
    let pps = param_sets
        .pps(header.pps_id)
        .ok_or_else(|| TaoError::MissingParameterSet(format!("PPS id={}", header.pps_id)))?;
    let sps = param_sets
        .sps(pps.sps_id)
        .ok_or_else(|| TaoError::MissingParameterSet(format!("SPS id={}", pps.sps_id)))?;
    if sps.pic_width_in_mbs as usize != cur.grid.mb_width || sps.frame_height_in_mbs() as usize != cur.grid.mb_height {
        return Err(TaoError::InvalidData(format!(
            "H264: slice 与当前图像尺寸不一致, sps_id={}, mbs={}x{}",
            sps.sps_id,
            sps.pic_width_in_mbs,
            sps.frame_height_in_mbs()
        )));
    }
    if !header.slice_type.is_supported() {
        return Err(TaoError::Unsupported(format!(
            "H264: 不支持的 slice 类型, slice_type={:?}",
            header.slice_type
        )));
    }

    let dequant = Dequantizer::new(&pps.effective_scaling_lists(sps));
    let mut job = SliceJob {
        header,
        pps,
        cabac: pps.cabac,
        slice_id,
        dequant: &dequant,
        refs: None,
        ref_ids: Vec::new(),
        ref_concealed: Vec::new(),
    };
    let mut list_has_holes = false;
    if header.slice_type == SliceType::P {
        let list = dpb.build_list_p(
            header.frame_num,
            header.num_ref_idx_l0_active as usize,
            &header.ref_pic_list_mod_l0,
        );
        let pictures: Vec<Option<&Picture>> = list
            .iter()
            .map(|entry| entry.as_ref().and_then(|e| e.handle).and_then(|h| pool.get(h)))
            .collect();
        list_has_holes = pictures.iter().any(Option::is_none);
        job.ref_ids = pictures
            .iter()
            .enumerate()
            .map(|(i, pic)| pic.map_or(-2 - i as i64, |p| p.id))
            .collect();
        job.ref_concealed = pictures.iter().map(|pic| pic.is_some_and(|p| p.concealed)).collect();
        let weights = if pps.weighted_pred {
            header
                .pred_weight
                .as_ref()
                .map(|table| explicit_weights(table, pictures.len()))
        } else {
            None
        };
        job.refs = Some(InterRefs { pictures, weights });
    }
    let outcome = decode_slice(rbsp, &job, &mut cur.picture, &mut cur.grid);
    Ok((outcome, list_has_holes))
}

/// 按 7.4.1.2.4 判断 `next` 是否属于新的主编码图像
fn starts_new_picture(prev: &SliceHeader, last_first_mb: u32, next: &SliceHeader) -> bool {
    next.first_mb <= last_first_mb
        || next.frame_num != prev.frame_num
        || next.pps_id != prev.pps_id
        || next.is_idr() != prev.is_idr()
        || next.is_reference() != prev.is_reference()
        || (next.is_idr() && next.idr_pic_id != prev.idr_pic_id)
        || next.poc_lsb != prev.poc_lsb
        || next.delta_poc_bottom != prev.delta_poc_bottom
        || next.delta_poc != prev.delta_poc
}

/// 激活前的能力检查: 8 位 4:2:0 帧编码, 无 8x8 变换与 FMO, 不超过最大分辨率
fn check_supported(sps: &Sps, pps: &Pps, params: &DecodingParam) -> Result<(), String> {
    if sps.chroma_format_idc != 1 || sps.separate_colour_plane {
        return Err(format!("仅支持 4:2:0, chroma_format_idc={}", sps.chroma_format_idc));
    }
    if sps.bit_depth_luma != 8 || sps.bit_depth_chroma != 8 {
        return Err(format!(
            "仅支持 8 位采样, bit_depth_luma={}, bit_depth_chroma={}",
            sps.bit_depth_luma, sps.bit_depth_chroma
        ));
    }
    if !sps.frame_mbs_only {
        return Err("不支持场编码".into());
    }
    if pps.transform_8x8_mode {
        return Err(format!("不支持 8x8 变换, pps_id={}", pps.pps_id));
    }
    if pps.num_slice_groups > 1 {
        return Err(format!("不支持 slice group, num_slice_groups={}", pps.num_slice_groups));
    }
    if sps.width > params.max_width || sps.height > params.max_height {
        return Err(format!(
            "分辨率超过上限, size={}x{}, max={}x{}",
            sps.width, sps.height, params.max_width, params.max_height
        ));
    }
    Ok(())
}

/// 把 pred_weight_table 展开为每个 ref_idx 的加权参数, 未显式给出的分量用默认权重
fn explicit_weights(table: &PredWeightTable, count: usize) -> Vec<PartWeights> {
    let luma_denom = table.luma_log2_denom;
    let chroma_denom = table.chroma_log2_denom;
    (0..count)
        .map(|i| {
            let entry = table.l0.get(i);
            let (luma_w, luma_o) = match entry {
                Some(w) if w.luma_explicit => (w.luma_weight, w.luma_offset),
                _ => (1 << luma_denom, 0),
            };
            let chroma = |c: usize| match entry {
                Some(w) if w.chroma_explicit => (w.chroma_weight[c], w.chroma_offset[c]),
                _ => (1 << chroma_denom, 0),
            };
            let (cb_w, cb_o) = chroma(0);
            let (cr_w, cr_o) = chroma(1);
            PartWeights {
                weight: [luma_w, cb_w, cr_w],
                offset: [luma_o, cb_o, cr_o],
                log2_denom: [luma_denom, chroma_denom, chroma_denom],
            }
        })
        .collect()
}

/// SVC/MVC NAL 头扩展中的 temporal_id
fn extension_temporal_id(nal: &NalUnit) -> Option<u8> {
    nal.data.get(3).map(|b| b >> 5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoders::h264::slice_parse::PredWeight;

    #[test]
    fn test_explicit_weights_fill_defaults() {
        let table = PredWeightTable {
            luma_log2_denom: 5,
            chroma_log2_denom: 3,
            l0: vec![PredWeight {
                luma_weight: 40,
                luma_offset: -3,
                chroma_weight: [8, 8],
                chroma_offset: [0, 0],
                luma_explicit: true,
                chroma_explicit: false,
            }],
            l1: Vec::new(),
        };
        let weights = explicit_weights(&table, 2);
        assert_eq!(weights.len(), 2);
        assert_eq!(weights[0].weight, [40, 8, 8]);
        assert_eq!(weights[0].offset, [-3, 0, 0]);
        assert_eq!(weights[1].weight, [32, 8, 8], "缺省项使用 1 << denom");
        assert_eq!(weights[1].log2_denom, [5, 3, 3]);
    }

    #[test]
    fn test_extension_temporal_id() {
        let data = [0x6E, 0x80, 0x00, 0x60];
        let nal = NalUnit::parse(&data).expect("NAL 头应合法");
        assert_eq!(nal.nal_type, NalUnitType::Prefix);
        assert_eq!(extension_temporal_id(&nal), Some(3));
    }

    #[test]
    fn test_new_context_is_idle() {
        let ctx = DecoderContext::new(DecodingParam::default());
        assert_eq!(ctx.slice_state(), SliceState::AwaitingFirstSlice);
        assert!(!ctx.reference_lost());
        assert_eq!(ctx.ignored_error_packets(), 0);
        assert!(ctx.current_sps().is_none());
    }
}
