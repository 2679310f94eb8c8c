//! H.264 NAL (Network Abstraction Layer) 单元解析.
//!
//! # Annex B 格式
//!
//! Annex B 使用起始码 (start code) 分隔 NAL 单元:
//! - 3 字节起始码: `00 00 01`
//! - 4 字节起始码: `00 00 00 01`
//!
//! # NAL 头部 (1 字节)
//! ```text
//! ┌─────────────────────────────────────┐
//! │ forbidden(1) | ref_idc(2) | type(5) │
//! └─────────────────────────────────────┘
//! ```
//!
//! `NalCursor` 按需逐个切出 NAL, 每次解码调用重新构造, 不跨调用保存状态.
//! 缺少后续起始码的 NAL 视为延伸到缓冲区末尾.

use tao_core::{TaoError, TaoResult};

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum NalUnitType {
    /// 非 IDR 图像切片
    Slice,
    /// 数据分区 A (DPA)
    SliceDpa,
    /// 数据分区 B (DPB)
    SliceDpb,
    /// 数据分区 C (DPC)
    SliceDpc,
    /// IDR 图像切片
    SliceIdr,
    /// 增补增强信息 (SEI)
    Sei,
    /// 序列参数集 (SPS)
    Sps,
    /// 图像参数集 (PPS)
    Pps,
    /// 访问单元分隔符 (AUD)
    Aud,
    /// 序列结束
    EndOfSequence,
    /// 流结束
    EndOfStream,
    /// 填充数据
    FillerData,
    /// SPS 扩展
    SpsExtension,
    /// SVC/MVC 前缀 NAL
    Prefix,
    /// 子集 SPS (SVC/MVC)
    SubsetSps,
    /// 扩展切片 (SVC/MVC)
    SliceExtension,
    /// 未知类型
    Unknown(u8),
}

impl NalUnitType {
    /// 从 NAL 类型编号创建
    pub fn from_type_id(type_id: u8) -> Self {
        match type_id {
            1 => Self::Slice,
            2 => Self::SliceDpa,
            3 => Self::SliceDpb,
            4 => Self::SliceDpc,
            5 => Self::SliceIdr,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            10 => Self::EndOfSequence,
            11 => Self::EndOfStream,
            12 => Self::FillerData,
            13 => Self::SpsExtension,
            14 => Self::Prefix,
            15 => Self::SubsetSps,
            20 => Self::SliceExtension,
            _ => Self::Unknown(type_id),
        }
    }

    /// 获取类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::SliceDpa => 2,
            Self::SliceDpb => 3,
            Self::SliceDpc => 4,
            Self::SliceIdr => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::Aud => 9,
            Self::EndOfSequence => 10,
            Self::EndOfStream => 11,
            Self::FillerData => 12,
            Self::SpsExtension => 13,
            Self::Prefix => 14,
            Self::SubsetSps => 15,
            Self::SliceExtension => 20,
            Self::Unknown(id) => *id,
        }
    }

    /// 是否为 VCL (Video Coding Layer) NAL
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::Slice
                | Self::SliceDpa
                | Self::SliceDpb
                | Self::SliceDpc
                | Self::SliceIdr
                | Self::SliceExtension
        )
    }

    /// 是否为参数集 NAL
    pub fn is_parameter_set(&self) -> bool {
        matches!(self, Self::Sps | Self::Pps | Self::SubsetSps)
    }

    /// 是否为关键帧 (IDR)
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::SliceIdr)
    }
}

impl std::fmt::Display for NalUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Slice => write!(f, "Slice"),
            Self::SliceDpa => write!(f, "SliceDPA"),
            Self::SliceDpb => write!(f, "SliceDPB"),
            Self::SliceDpc => write!(f, "SliceDPC"),
            Self::SliceIdr => write!(f, "IDR"),
            Self::Sei => write!(f, "SEI"),
            Self::Sps => write!(f, "SPS"),
            Self::Pps => write!(f, "PPS"),
            Self::Aud => write!(f, "AUD"),
            Self::EndOfSequence => write!(f, "EndOfSeq"),
            Self::EndOfStream => write!(f, "EndOfStream"),
            Self::FillerData => write!(f, "Filler"),
            Self::SpsExtension => write!(f, "SPSExt"),
            Self::Prefix => write!(f, "Prefix"),
            Self::SubsetSps => write!(f, "SubsetSPS"),
            Self::SliceExtension => write!(f, "SliceExt"),
            Self::Unknown(id) => write!(f, "Unknown({id})"),
        }
    }
}

/// 从输入缓冲区切出的 NAL 单元 (借用输入数据)
#[derive(Debug, Clone, Copy)]
pub struct NalUnit<'a> {
    /// NAL 单元类型
    pub nal_type: NalUnitType,
    /// nal_ref_idc (参考重要性, 0-3)
    pub ref_idc: u8,
    /// NAL 数据 (不含起始码, 含头部字节, 已去除尾随 0 字节)
    pub data: &'a [u8],
    /// 前导起始码长度 (3 或 4, 无起始码时为 0)
    pub start_code_len: usize,
}

impl<'a> NalUnit<'a> {
    /// 从 NAL 数据 (含头部字节) 解析
    pub fn parse(data: &'a [u8]) -> TaoResult<Self> {
        let Some(&header) = data.first() else {
            return Err(TaoError::InvalidData("H264: NAL 单元数据为空".into()));
        };

        let forbidden = (header >> 7) & 1;
        if forbidden != 0 {
            return Err(TaoError::InvalidData(format!(
                "H264: forbidden_zero_bit 非法, value={}",
                forbidden
            )));
        }

        Ok(Self {
            nal_type: NalUnitType::from_type_id(header & 0x1F),
            ref_idc: (header >> 5) & 0x03,
            data,
            start_code_len: 0,
        })
    }

    /// 获取 RBSP: 去掉头部字节与防竞争字节
    pub fn rbsp(&self) -> Vec<u8> {
        remove_emulation_prevention(&self.data[1..])
    }

    /// 在输入码流中占用的字节数 (含起始码)
    pub fn coded_len(&self) -> usize {
        self.start_code_len + self.data.len()
    }
}

/// Annex B 码流上的惰性 NAL 迭代器
///
/// 头部非法的 NAL 以 `Err` 形式产出, 由调用方决定跳过还是上报.
pub struct NalCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> NalCursor<'a> {
    /// 在缓冲区上创建游标, 起始码之前的前导字节会被跳过
    pub fn new(data: &'a [u8]) -> Self {
        let pos = find_start_code(data, 0).unwrap_or(data.len());
        Self { data, pos }
    }
}

impl<'a> Iterator for NalCursor<'a> {
    type Item = TaoResult<NalUnit<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pos >= self.data.len() {
                return None;
            }
            let start = self.pos;
            let nal_start = skip_start_code(self.data, start);
            let end = find_start_code(self.data, nal_start).unwrap_or(self.data.len());
            self.pos = end;

            // 去除尾部的 0 字节 (trailing_zero_8bits)
            let mut nal_end = end;
            while nal_end > nal_start && self.data[nal_end - 1] == 0x00 {
                nal_end -= 1;
            }
            if nal_end <= nal_start {
                continue;
            }

            // 4 字节起始码的首个 0 字节计入 zero_byte
            let mut leading = start;
            if leading > 0 && self.data[leading - 1] == 0 && nal_start - leading == 3 {
                leading -= 1;
            }
            return Some(NalUnit::parse(&self.data[nal_start..nal_end]).map(|mut nal| {
                nal.start_code_len = nal_start - leading;
                nal
            }));
        }
    }
}

/// 从 Annex B 字节流中分割出所有合法的 NAL 单元
pub fn split_annex_b(data: &[u8]) -> Vec<NalUnit<'_>> {
    NalCursor::new(data).filter_map(Result::ok).collect()
}

/// 查找 `from` 之后第一个 `00 00 01` 的起点
fn find_start_code(data: &[u8], from: usize) -> Option<usize> {
    if data.len() < 3 {
        return None;
    }
    (from..data.len() - 2).find(|&i| data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1)
}

/// 跳过起始码, 返回 NAL 头部字节的位置
fn skip_start_code(data: &[u8], pos: usize) -> usize {
    if pos + 3 <= data.len() && data[pos..pos + 3] == [0, 0, 1] {
        pos + 3
    } else {
        pos
    }
}

/// 移除防竞争字节 `00 00 03` 中的 `03`
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    for &b in data {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        out.push(b);
        if b == 0 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_splits_three_and_four_byte_start_codes() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, // SPS
            0x00, 0x00, 0x01, 0x68, 0xCE, // PPS
            0x00, 0x00, 0x01, 0x65, 0x88, 0x80, // IDR
        ];
        let nals: Vec<_> = NalCursor::new(&data).map(|r| r.unwrap()).collect();
        assert_eq!(nals.len(), 3);
        assert_eq!(nals[0].nal_type, NalUnitType::Sps);
        assert_eq!(nals[0].start_code_len, 4);
        assert_eq!(nals[0].coded_len(), 6);
        assert_eq!(nals[1].nal_type, NalUnitType::Pps);
        assert_eq!(nals[1].start_code_len, 3);
        assert_eq!(nals[2].nal_type, NalUnitType::SliceIdr);
        assert_eq!(nals[2].ref_idc, 3);
        assert_eq!(nals[2].data, &[0x65, 0x88, 0x80]);
    }

    #[test]
    fn test_cursor_last_nal_runs_to_buffer_end() {
        let data = [0x00, 0x00, 0x01, 0x41, 0x9A, 0x12, 0x34];
        let nals = split_annex_b(&data);
        assert_eq!(nals.len(), 1);
        assert_eq!(nals[0].data, &[0x41, 0x9A, 0x12, 0x34]);
    }

    #[test]
    fn test_cursor_skips_leading_garbage_and_trailing_zeros() {
        let data = [0xAB, 0xCD, 0x00, 0x00, 0x01, 0x09, 0xF0, 0x00, 0x00];
        let nals = split_annex_b(&data);
        assert_eq!(nals.len(), 1);
        assert_eq!(nals[0].nal_type, NalUnitType::Aud);
        assert_eq!(nals[0].data, &[0x09, 0xF0]);
    }

    #[test]
    fn test_cursor_reports_forbidden_bit() {
        let data = [0x00, 0x00, 0x01, 0x85, 0x00, 0x00, 0x01, 0x68, 0xCE];
        let items: Vec<_> = NalCursor::new(&data).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_err(), "forbidden_zero_bit=1 应报错");
        assert!(items[1].is_ok());
    }

    #[test]
    fn test_rbsp_removes_emulation_prevention() {
        let data = [0x00, 0x00, 0x01, 0x06, 0x00, 0x00, 0x03, 0x01, 0x80];
        let nals = split_annex_b(&data);
        assert_eq!(nals[0].rbsp(), vec![0x00, 0x00, 0x01, 0x80]);
    }

    #[test]
    fn test_no_start_code_yields_nothing() {
        let data = [0x67, 0x42, 0x00, 0x1E];
        assert!(split_annex_b(&data).is_empty());
    }
}
