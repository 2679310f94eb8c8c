//! 码流解析器.
//!
//! 与解码器解耦的语法层解析, 目前仅包含 H.264 的 NAL 与 SPS.

pub mod h264;
