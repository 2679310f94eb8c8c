//! # tao-avc
//!
//! 纯 Rust 实现的 H.264/AVC 解码器.
//!
//! - **码流解析**: Annex B 起始码切分, SPS/PPS/slice 头解析
//! - **熵解码**: CAVLC 与 CABAC
//! - **重建**: 帧内/帧间预测, 反变换, 去块滤波
//! - **容错**: 参考丢失反馈与多种错误隐藏模式
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use tao_avc::codec::decoders::h264::{BufferInfo, DecodingParam, H264Decoder};
//!
//! let mut dec = H264Decoder::new();
//! assert!(dec.initialize(&DecodingParam::default()).is_success());
//! let stream: Vec<u8> = std::fs::read("input.264").unwrap_or_default();
//! let mut info = BufferInfo::default();
//! let state = dec.decode_frame_no_delay(&stream, &mut info);
//! println!("state={:?}, output={}", state, info.buffer_status);
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `tao-core` | 错误类型与 RBSP 位流读写 |
//! | `tao-codec` | NAL/参数集解析与 H.264 解码器 |

/// 错误类型与位流工具
pub use tao_core as core;

/// H.264 解析器与解码器
pub use tao_codec as codec;

pub mod config;
pub mod logging;

/// 获取版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 按应用配置创建并初始化解码器
pub fn open_decoder(config: &config::DecoderConfig) -> anyhow::Result<tao_codec::H264Decoder> {
    let params = config.to_param()?;
    let mut decoder = tao_codec::H264Decoder::new();
    let result = decoder.initialize(&params);
    if !result.is_success() {
        anyhow::bail!("H264 解码器初始化失败, result={}", result);
    }
    Ok(decoder)
}
