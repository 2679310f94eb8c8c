//! 应用配置.
//!
//! JSON 文件包含 `logging` 与 `decoder` 两节, 缺省字段取默认值.
//! `decoder` 节转换为 `DecodingParam` 后交给解码器初始化.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tao_codec::decoders::h264::{DecodingParam, EcActiveIdc, TraceLevel, VideoBitstreamType};

use crate::logging::LoggingConfig;

/// 顶层配置
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
}

impl AppConfig {
    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("读取配置文件失败, path={}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("解析配置文件失败, path={}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("配置 JSON 格式错误")?;
        config.decoder.to_param()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("序列化配置失败")
    }
}

/// 解码器配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecoderConfig {
    #[serde(default)]
    pub parse_only: bool,
    /// 错误隐藏模式, 超出 0..=7 时截断
    #[serde(default = "default_ec_active_idc")]
    pub ec_active_idc: i32,
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
    #[serde(default = "default_max_frame_buffers")]
    pub max_frame_buffers: usize,
    /// "avc" 或 "svc"
    #[serde(default = "default_bitstream_type")]
    pub bitstream_type: String,
    /// quiet/error/warning/info/debug/detail
    #[serde(default = "default_trace_level")]
    pub trace_level: String,
    #[serde(default)]
    pub statistics_log_interval: u32,
}

fn default_ec_active_idc() -> i32 {
    EcActiveIdc::default().as_i32()
}

fn default_max_width() -> u32 {
    DecodingParam::default().max_width
}

fn default_max_height() -> u32 {
    DecodingParam::default().max_height
}

fn default_max_frame_buffers() -> usize {
    DecodingParam::default().max_frame_buffers
}

fn default_bitstream_type() -> String {
    "avc".to_string()
}

fn default_trace_level() -> String {
    "error".to_string()
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            parse_only: false,
            ec_active_idc: default_ec_active_idc(),
            max_width: default_max_width(),
            max_height: default_max_height(),
            max_frame_buffers: default_max_frame_buffers(),
            bitstream_type: default_bitstream_type(),
            trace_level: default_trace_level(),
            statistics_log_interval: 0,
        }
    }
}

impl DecoderConfig {
    /// 转换为解码初始化参数并校验
    pub fn to_param(&self) -> Result<DecodingParam> {
        let video_bitstream_type = match self.bitstream_type.to_ascii_lowercase().as_str() {
            "avc" => VideoBitstreamType::Avc,
            "svc" => VideoBitstreamType::Svc,
            other => bail!("未知的码流类型, bitstream_type={}", other),
        };
        let Some(trace_level) = TraceLevel::from_name(&self.trace_level) else {
            bail!("未知的日志级别, trace_level={}", self.trace_level);
        };
        // 仅解析模式不做错误隐藏
        let ec_active_idc = if self.parse_only {
            EcActiveIdc::Disable
        } else {
            EcActiveIdc::from_clipped(self.ec_active_idc)
        };
        let param = DecodingParam {
            parse_only: self.parse_only,
            ec_active_idc,
            max_width: self.max_width,
            max_height: self.max_height,
            max_frame_buffers: self.max_frame_buffers,
            video_bitstream_type,
            trace_level,
            statistics_log_interval: self.statistics_log_interval,
        };
        if let Err(reason) = param.validate() {
            bail!("解码参数非法: {}", reason);
        }
        Ok(param)
    }
}
