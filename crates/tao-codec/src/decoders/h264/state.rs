//! 解码状态位掩码与初始化/选项返回码.

use bitflags::bitflags;

bitflags! {
    /// 解码调用返回的状态位掩码, 空集表示无错误
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DecodingState: u32 {
        /// 当前帧尚未完整, 等待更多数据
        const FRAME_PENDING = 0x01;
        /// 参考帧丢失
        const REF_LOST = 0x02;
        /// 码流语法错误
        const BITSTREAM_ERROR = 0x04;
        /// 依赖层丢失
        const DEP_LAYER_LOST = 0x08;
        /// 缺少参数集
        const NO_PARAM_SETS = 0x10;
        /// 数据错误已被隐藏
        const DATA_ERROR_CONCEALED = 0x20;
        /// 参考列表存在空项
        const REF_LIST_NULL_PTRS = 0x40;
        /// 无效参数
        const INVALID_ARGUMENT = 0x1000;
        /// 未初始化即调用
        const INITIAL_OPT_EXPECTED = 0x2000;
        /// 内存不足
        const OUT_OF_MEMORY = 0x4000;
        /// 输出缓冲区需要扩展
        const DST_BUF_NEED_EXPAN = 0x8000;
    }
}

impl DecodingState {
    /// 无错误
    pub const ERROR_FREE: Self = Self::empty();

    /// 是否为无错误状态
    pub fn is_error_free(self) -> bool {
        self.is_empty()
    }

    /// 以原始整数形式返回
    pub fn code(self) -> u32 {
        self.bits()
    }
}

/// 初始化与选项接口的返回码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmResult {
    /// 成功
    Success,
    /// 参数错误
    InitParaError,
    /// 需要先完成初始化 (或对应数据尚不可用)
    InitExpected,
    /// 内存分配失败
    MallocMemeError,
}

impl CmResult {
    /// 是否成功
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl std::fmt::Display for CmResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "Success"),
            Self::InitParaError => write!(f, "InitParaError"),
            Self::InitExpected => write!(f, "InitExpected"),
            Self::MallocMemeError => write!(f, "MallocMemeError"),
        }
    }
}
