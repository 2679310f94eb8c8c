//! H.264/AVC 码流解析器.
//!
//! 提供对 H.264 Annex B 码流的基础解析能力:
//! - NAL 单元分割与类型识别, 防竞争字节移除
//! - SPS (Sequence Parameter Set) 解析

pub mod nal;
pub mod sps;

pub use nal::{NalCursor, NalUnit, NalUnitType, remove_emulation_prevention, split_annex_b};
pub use sps::{Sps, parse_sps};
