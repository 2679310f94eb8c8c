//! 解码参数、选项与输出缓冲描述.

use log::LevelFilter;

use super::statistics::DecoderStatistics;

// ============================================================
// 错误隐藏模式
// ============================================================

/// 错误隐藏模式 (取值 0..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EcActiveIdc {
    /// 关闭错误隐藏
    Disable = 0,
    /// 整帧复制
    FrameCopy = 1,
    /// slice 复制
    SliceCopy = 2,
    /// 整帧复制, 跨 IDR
    FrameCopyCrossIdr = 3,
    /// slice 复制, 跨 IDR
    SliceCopyCrossIdr = 4,
    /// slice 复制, 跨 IDR, 分辨率变化时冻结
    SliceCopyCrossIdrFreezeResChange = 5,
    /// slice + 运动矢量复制, 跨 IDR
    SliceMvCopyCrossIdr = 6,
    /// slice + 运动矢量复制, 跨 IDR, 分辨率变化时冻结
    #[default]
    SliceMvCopyCrossIdrFreezeResChange = 7,
}

impl EcActiveIdc {
    /// 从整数构造, 超出范围时截断到 `[Disable, SliceMvCopyCrossIdrFreezeResChange]`
    pub fn from_clipped(value: i32) -> Self {
        match value.clamp(0, 7) {
            0 => Self::Disable,
            1 => Self::FrameCopy,
            2 => Self::SliceCopy,
            3 => Self::FrameCopyCrossIdr,
            4 => Self::SliceCopyCrossIdr,
            5 => Self::SliceCopyCrossIdrFreezeResChange,
            6 => Self::SliceMvCopyCrossIdr,
            _ => Self::SliceMvCopyCrossIdrFreezeResChange,
        }
    }

    /// 整数值
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// 是否启用了错误隐藏
    pub fn is_enabled(self) -> bool {
        self != Self::Disable
    }

    /// 是否整帧隐藏
    pub fn is_frame_copy(self) -> bool {
        matches!(self, Self::FrameCopy | Self::FrameCopyCrossIdr)
    }

    /// 是否允许隐藏 IDR 图像
    pub fn crosses_idr(self) -> bool {
        !matches!(self, Self::Disable | Self::FrameCopy | Self::SliceCopy)
    }

    /// 是否使用邻居运动矢量做运动补偿隐藏
    pub fn copies_motion(self) -> bool {
        matches!(
            self,
            Self::SliceMvCopyCrossIdr | Self::SliceMvCopyCrossIdrFreezeResChange
        )
    }

    /// 分辨率变化后是否冻结输出直到干净的 IDR
    pub fn freezes_on_res_change(self) -> bool {
        matches!(
            self,
            Self::SliceCopyCrossIdrFreezeResChange | Self::SliceMvCopyCrossIdrFreezeResChange
        )
    }
}

// ============================================================
// 码流类型与日志级别
// ============================================================

/// 码流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VideoBitstreamType {
    /// 纯 AVC 码流
    #[default]
    Avc,
    /// 可伸缩码流 (仅解析基本层)
    Svc,
}

/// 解码器日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TraceLevel {
    /// 不输出
    Quiet,
    /// 仅错误
    #[default]
    Error,
    /// 警告
    Warning,
    /// 信息
    Info,
    /// 调试
    Debug,
    /// 逐语法元素细节
    Detail,
}

impl TraceLevel {
    /// 转换为 `log` 的级别过滤器
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::Off,
            Self::Error => LevelFilter::Error,
            Self::Warning => LevelFilter::Warn,
            Self::Info => LevelFilter::Info,
            Self::Debug => LevelFilter::Debug,
            Self::Detail => LevelFilter::Trace,
        }
    }

    /// 从名称解析 (大小写不敏感)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "quiet" | "off" => Some(Self::Quiet),
            "error" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "detail" | "trace" => Some(Self::Detail),
            _ => None,
        }
    }
}

// ============================================================
// 初始化参数
// ============================================================

/// 单帧最大宽高 (像素) 的上限
pub const MAX_SUPPORTED_DIMENSION: u32 = 4096;
/// 帧缓冲池容量上限
pub const MAX_FRAME_BUFFERS: usize = 32;
/// 帧缓冲池容量下限: 当前帧 + 参考帧 + 输出帧
pub const MIN_FRAME_BUFFERS: usize = 3;

/// 解码初始化参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodingParam {
    /// 仅解析模式 (只统计 NAL 长度, 不重建)
    pub parse_only: bool,
    /// 错误隐藏模式
    pub ec_active_idc: EcActiveIdc,
    /// 允许的最大图像宽度 (像素)
    pub max_width: u32,
    /// 允许的最大图像高度 (像素)
    pub max_height: u32,
    /// 帧缓冲池容量
    pub max_frame_buffers: usize,
    /// 码流类型
    pub video_bitstream_type: VideoBitstreamType,
    /// 日志级别
    pub trace_level: TraceLevel,
    /// 每解码多少帧输出一次统计日志, 0 表示不输出
    pub statistics_log_interval: u32,
}

impl Default for DecodingParam {
    fn default() -> Self {
        Self {
            parse_only: false,
            ec_active_idc: EcActiveIdc::default(),
            max_width: 1920,
            max_height: 1088,
            max_frame_buffers: 18,
            video_bitstream_type: VideoBitstreamType::default(),
            trace_level: TraceLevel::default(),
            statistics_log_interval: 0,
        }
    }
}

impl DecodingParam {
    /// 校验参数, 返回错误描述
    pub fn validate(&self) -> Result<(), String> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(format!(
                "最大分辨率非法, max_width={}, max_height={}",
                self.max_width, self.max_height
            ));
        }
        if self.max_width > MAX_SUPPORTED_DIMENSION || self.max_height > MAX_SUPPORTED_DIMENSION {
            return Err(format!(
                "最大分辨率超过上限, max_width={}, max_height={}, limit={}",
                self.max_width, self.max_height, MAX_SUPPORTED_DIMENSION
            ));
        }
        if !(MIN_FRAME_BUFFERS..=MAX_FRAME_BUFFERS).contains(&self.max_frame_buffers) {
            return Err(format!(
                "帧缓冲数量非法, max_frame_buffers={}, range={}..={}",
                self.max_frame_buffers, MIN_FRAME_BUFFERS, MAX_FRAME_BUFFERS
            ));
        }
        Ok(())
    }

    /// 单次输入允许的最大字节数
    pub fn max_bitstream_bytes(&self) -> usize {
        let frame = self.max_width as usize * self.max_height as usize * 3 / 2;
        frame * 2 + 64 * 1024
    }
}

// ============================================================
// 选项
// ============================================================

/// 选项标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionId {
    /// 码流结束标志
    EndOfStream,
    /// 错误隐藏模式
    ErrorConIdc,
    /// 日志级别
    TraceLevel,
    /// 统计日志间隔
    StatisticsLogInterval,
    /// 统计快照 (只读)
    GetStatistics,
    /// 像素宽高比 (只读)
    GetSarInfo,
    /// profile_idc (只读)
    Profile,
    /// level_idc (只读)
    Level,
    /// 上一访问单元是否包含 VCL NAL (只读)
    VclNal,
    /// 上一 VCL NAL 的 temporal id (只读)
    TemporalId,
    /// 上一 VCL NAL 是否为参考图像 (只读)
    IsRefPic,
}

/// VUI 宽高比信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SarInfo {
    /// sar_width
    pub sar_width: u32,
    /// sar_height
    pub sar_height: u32,
    /// overscan_appropriate_flag
    pub overscan_appropriate: bool,
}

/// 设置选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderOption {
    /// 设置码流结束标志
    EndOfStream(bool),
    /// 设置错误隐藏模式 (超出范围时截断)
    ErrorConIdc(i32),
    /// 设置日志级别
    TraceLevel(TraceLevel),
    /// 设置统计日志间隔
    StatisticsLogInterval(u32),
    /// 只读选项, 设置时返回 `InitParaError`
    ReadOnly(OptionId),
}

/// 选项取值
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// 布尔值
    Bool(bool),
    /// 整数值
    Int(i32),
    /// 无符号整数值
    UInt(u32),
    /// 统计快照
    Statistics(Box<DecoderStatistics>),
    /// 宽高比
    Sar(SarInfo),
}

impl OptionValue {
    /// 按整数读取
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            Self::UInt(v) => i32::try_from(*v).ok(),
            Self::Bool(v) => Some(i32::from(*v)),
            _ => None,
        }
    }
}

// ============================================================
// 输出描述
// ============================================================

/// 输出图像 (已裁剪到显示尺寸)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct YuvPicture {
    /// Y/U/V 平面
    pub planes: [Vec<u8>; 3],
    /// Y/U/V 平面跨度
    pub strides: [usize; 3],
    /// 显示宽度
    pub width: u32,
    /// 显示高度
    pub height: u32,
}

/// 解码调用的输出信息
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BufferInfo {
    /// 1 表示本次调用输出了一幅图像
    pub buffer_status: i32,
    /// 输入码流的时间戳, 由调用方填写
    pub in_bs_timestamp: u64,
    /// 输出图像的时间戳
    pub out_yuv_timestamp: u64,
    /// 输出图像
    pub picture: Option<YuvPicture>,
}

/// 仅解析模式的输出信息
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParserBsInfo {
    /// 访问单元内的 NAL 数量
    pub nal_num: usize,
    /// 每个 NAL 的字节长度 (含起始码)
    pub nal_len_in_byte: Vec<usize>,
    /// SPS 宽度 (像素)
    pub sps_width_in_pixel: u32,
    /// SPS 高度 (像素)
    pub sps_height_in_pixel: u32,
    /// 输入码流的时间戳, 由调用方填写
    pub in_bs_timestamp: u64,
    /// 输出的时间戳
    pub out_bs_timestamp: u64,
}
