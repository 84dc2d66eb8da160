//! 缺页处理的错误分类。
//!
//! 可恢复的情形（时钟扫描第二轮、等待他人写回完成）在内部以
//! 重试消化，不会出现在这里；内核自身不变量被破坏属于 bug，
//! 直接 panic。剩下的都是"无法满足这次缺页"，调用方应当终止
//! 对应的进程。

use core::fmt;

use crate::{addr::VirtAddr, fault::FaultFlags, space::MapError};

/// 交换区没有空闲槽位。
///
/// 对交换区本身这是正常工况，如何处置（终止谁、是否重试）由
/// 调用方决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapFull;

impl fmt::Display for SwapFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("swap store has no free slot")
    }
}

/// 进程级致命错误：缺页无法被满足，进程应当被终止
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fatal {
    /// 地址不属于任何已登记的页，也不符合栈增长条件
    AccessViolation { addr: VirtAddr, flags: FaultFlags },
    /// 可执行文件里读出的字节数不足
    ExecShortRead { expected: usize, actual: usize },
    /// 腾挪页面时交换区已满，无处可写
    SwapExhausted,
    /// 地址空间拒绝建立映射
    MapFailed,
}

impl fmt::Display for Fatal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fatal::AccessViolation { addr, flags } => {
                write!(f, "access violation at {addr:?} ({flags:?})")
            }
            Fatal::ExecShortRead { expected, actual } => {
                write!(f, "short read from executable: want {expected} bytes, got {actual}")
            }
            Fatal::SwapExhausted => f.write_str("swap store exhausted"),
            Fatal::MapFailed => f.write_str("address space refused the mapping"),
        }
    }
}

impl From<SwapFull> for Fatal {
    fn from(_: SwapFull) -> Self {
        Fatal::SwapExhausted
    }
}

impl From<MapError> for Fatal {
    fn from(_: MapError) -> Self {
        Fatal::MapFailed
    }
}
