//! # tao-codec
//!
//! H.264/AVC 解码核心: NAL 与参数集解析、slice 状态机、CAVLC/CABAC 熵解码、
//! 重建流水线与错误隐藏.
//!
//! ## 使用示例
//!
//! ```rust
//! use tao_codec::decoders::h264::{BufferInfo, DecodingParam, H264Decoder};
//!
//! let mut dec = H264Decoder::new();
//! assert!(dec.initialize(&DecodingParam::default()).is_success());
//! let mut info = BufferInfo::default();
//! let state = dec.decode_frame2(&[], &mut info);
//! assert!(state.is_error_free());
//! assert_eq!(info.buffer_status, 0);
//! ```

pub mod decoder;
pub mod decoders;
pub mod frame;
pub mod packet;
pub mod parsers;

// 重导出常用类型
pub use decoder::Decoder;
pub use decoders::h264::H264Decoder;
pub use frame::{Frame, PictureType, VideoFrame};
pub use packet::Packet;
