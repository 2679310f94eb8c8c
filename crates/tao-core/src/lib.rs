//! # tao-core
//!
//! AVC 解码核心基础库, 提供统一错误类型与 RBSP 位流读写工具.
//!
//! 上层 `tao-codec` 的 NAL/参数集/slice 解析全部建立在这里的 `BitReader` 之上,
//! `BitWriter` 则用于测试中合成码流.

pub mod bitreader;
pub mod bitwriter;
pub mod error;

// 重导出常用类型
pub use error::{TaoError, TaoResult};
