//! 统一错误类型定义.
//!
//! 所有 crate 共用的错误类型, 支持跨模块传播.
//! 解码 API 边界处会把它折算为 `DecodingState` 位掩码, 不会直接暴露给调用方.

use thiserror::Error;

/// 统一错误类型
#[derive(Debug, Error)]
pub enum TaoError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的码流特性 (profile/色度格式/场编码等)
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 数据不足, 需要更多输入
    #[error("数据不足, 需要更多输入")]
    NeedMoreData,

    /// 读取越过 RBSP 末尾
    #[error("已到达流末尾")]
    Eof,

    /// 内存分配失败或超出配置的缓冲上限
    #[error("内存分配失败: {0}")]
    OutOfMemory(String),

    /// slice 引用了尚未收到的参数集
    #[error("缺少参数集: {0}")]
    MissingParameterSet(String),

    /// 无效数据 (损坏的码流等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 内部错误 (不应发生)
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一 Result 类型
pub type TaoResult<T> = Result<T, TaoError>;

impl TaoError {
    /// 是否属于资源类错误 (需要整体复位解码器)
    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::OutOfMemory(_))
    }
}
