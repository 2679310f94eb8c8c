//! 宏块解码策略分派.
//!
//! 每个 slice 根据熵编码方式与 slice 类型选定一次策略, 之后该 slice 的
//! 全部宏块都走同一个语法读取器.

use tao_core::{TaoError, TaoResult};

use super::cabac_syntax::CabacReader;
use super::cavlc::CavlcReader;
use super::macroblock::MbSyntaxReader;
use super::slice_parse::{SliceHeader, SliceType};

/// 宏块解码策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(super) enum MbStrategy {
    CavlcI,
    CavlcP,
    CabacI,
    CabacP,
}

impl MbStrategy {
    /// 按 entropy_coding_mode_flag 与 slice 类型选择
    pub(super) fn select(cabac: bool, slice_type: SliceType) -> TaoResult<Self> {
        let p = match slice_type {
            SliceType::I => false,
            SliceType::P => true,
            other => {
                return Err(TaoError::Unsupported(format!(
                    "H264: 不支持的 slice 类型, slice_type={:?}",
                    other
                )));
            }
        };
        Ok(match (cabac, p) {
            (false, false) => Self::CavlcI,
            (false, true) => Self::CavlcP,
            (true, false) => Self::CabacI,
            (true, true) => Self::CabacP,
        })
    }

    pub(super) fn is_p(self) -> bool {
        matches!(self, Self::CavlcP | Self::CabacP)
    }

    /// 为 slice 数据创建语法读取器并执行 `body`
    ///
    /// CABAC 的 P slice 按 cabac_init_idc 选择上下文初始化表, I slice 使用 I 表.
    pub(super) fn run<T>(
        self,
        rbsp: &[u8],
        header: &SliceHeader,
        body: &mut dyn FnMut(&mut dyn MbSyntaxReader) -> T,
    ) -> TaoResult<T> {
        match self {
            Self::CavlcI | Self::CavlcP => {
                let mut reader = CavlcReader::new(rbsp, header.header_bits)?;
                Ok(body(&mut reader))
            }
            Self::CabacI | Self::CabacP => {
                let init_idc = self.is_p().then_some(u32::from(header.cabac_init_idc));
                let mut reader = CabacReader::new(rbsp, header.header_bits, init_idc, header.slice_qp)?;
                Ok(body(&mut reader))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_strategy() {
        assert_eq!(MbStrategy::select(false, SliceType::I).unwrap(), MbStrategy::CavlcI);
        assert_eq!(MbStrategy::select(true, SliceType::P).unwrap(), MbStrategy::CabacP);
        assert!(MbStrategy::select(false, SliceType::B).is_err(), "B slice 不在支持范围内");
        assert!(MbStrategy::CabacP.is_p());
        assert!(!MbStrategy::CabacI.is_p());
    }
}
