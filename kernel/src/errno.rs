//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 标准错误代码定义
//!
//! 和 include/uapi/asm-generic/errno.h 保持一致，只保留内存子系统会返回的错误。
//!
//! 资源耗尽、用户指针错误等可恢复的失败都通过 `Result<T, Errno>` 返回；
//! 不变量被破坏（重复映射、释放非叶子等）直接 panic，不会出现在这里。

use core::fmt;

/// 标准错误代码
///
/// 使用方法：
/// ```rust
/// use sv39_mm::errno::Errno;
///
/// fn sys_sbrk() -> Result<usize, Errno> {
///     Err(Errno::OutOfMemory)
/// }
///
/// assert_eq!(sys_sbrk().unwrap_err().as_neg_i32(), -12);
/// ```
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Errno {
    /// I/O error (EIO, 5)
    IOError = 5,

    /// Out of memory (ENOMEM, 12)
    OutOfMemory = 12,

    /// Bad address (EFAULT, 14)
    BadAddress = 14,

    /// Invalid argument (EINVAL, 22)
    InvalidArgument = 22,

    /// File name too long (ENAMETOOLONG, 36)
    NameTooLong = 36,
}

impl Errno {
    /// 转换为正数错误码
    #[inline]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// 转换为系统调用返回值（负数）
    #[inline]
    pub fn as_neg_i32(self) -> i32 {
        -(self as i32)
    }

    /// 错误名称
    pub fn name(self) -> &'static str {
        match self {
            Errno::IOError => "EIO",
            Errno::OutOfMemory => "ENOMEM",
            Errno::BadAddress => "EFAULT",
            Errno::InvalidArgument => "EINVAL",
            Errno::NameTooLong => "ENAMETOOLONG",
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.as_i32())
    }
}

/// 常用的错误代码常量
pub mod constants {
    pub const EIO: i32 = 5;
    pub const ENOMEM: i32 = 12;
    pub const EFAULT: i32 = 14;
    pub const EINVAL: i32 = 22;
    pub const ENAMETOOLONG: i32 = 36;
}
