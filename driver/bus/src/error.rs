//! 传输层统一错误类型
//!
//! 下游 SDIO/PCIe 主机接口沿用 errno 风格的 `Result<_, i32>`，在传输层边界经 `From<i32>` 转为 [`Error`]。

use thiserror::Error;

/// 传输层结果类型
pub type Result<T> = core::result::Result<T, Error>;

/// 传输层错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// 参数非法或必需回调缺失
    #[error("invalid argument")]
    InvalidArgument,

    /// 分配失败，不重试
    #[error("out of memory")]
    NoMemory,

    /// 下游主机访问失败
    #[error("I/O error (host code {code})")]
    Io {
        /// 主机返回的 errno 风格错误码
        code: i32,
    },

    /// 未发现必需的核心（如 CPU 核）
    #[error("required core not present")]
    IoNotPresent,

    /// 不支持的背板类型或芯片
    #[error("unsupported backplane or chip")]
    WrongType,

    /// 有界等待超时
    #[error("timed out waiting for {what}")]
    TimedOut {
        /// 等待对象
        what: &'static str,
    },

    /// 介质已消失，终态
    #[error("no medium")]
    NoMedium,

    /// 帧格式错误（长度/偏移越界）
    #[error("malformed frame")]
    BadFrame,

    /// SDPCM 硬件头校验失败
    #[error("frame checksum mismatch")]
    ChecksumMismatch,

    /// 总线未处于 DATA 状态
    #[error("bus not ready")]
    NotReady,

    /// 资源被占用（如邮箱命令未被取走）
    #[error("resource busy")]
    Busy,

    /// 本传输不支持的操作
    #[error("operation not supported")]
    Unsupported,

    /// 设备已移除
    #[error("device removed")]
    Removed,

    /// 固件启动失败
    #[error("firmware failed to initialize")]
    FirmwareInit,
}

impl Error {
    /// 是否为终态错误（此后所有调用快速失败）
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::NoMedium | Error::Removed)
    }

    /// 转回 errno 风格错误码，供仍使用 `i32` 的上层接口
    pub fn to_errno(&self) -> i32 {
        match self {
            Error::InvalidArgument => -22,
            Error::NoMemory => -12,
            Error::Io { code } => *code,
            Error::IoNotPresent => -19,
            Error::WrongType => -124,
            Error::TimedOut { .. } => -110,
            Error::NoMedium => -123,
            Error::BadFrame => -74,
            Error::ChecksumMismatch => -74,
            Error::NotReady => -11,
            Error::Busy => -16,
            Error::Unsupported => -95,
            Error::Removed => -108,
            Error::FirmwareInit => -5,
        }
    }
}

impl From<i32> for Error {
    fn from(code: i32) -> Self {
        match code {
            -123 => Error::NoMedium,
            -19 => Error::IoNotPresent,
            -110 => Error::TimedOut { what: "host transfer" },
            -12 => Error::NoMemory,
            -22 => Error::InvalidArgument,
            _ => Error::Io { code },
        }
    }
}
