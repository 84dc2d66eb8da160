//! 按需调页的虚拟内存管理器。
//!
//! 物理页帧是稀缺资源。本 crate 维护一张有界的帧表（时钟置换，
//! 见 `frame_table`），把暂时装不下的页溢出到块设备上的交换区
//! （见 [`SwapStore`]），并为每个虚拟页保存一份内容重建配方
//! （见 [`PageDescriptor`]）。缺页异常走 [`VmManager::resolve_fault`]：
//! 查配方、取帧、填充、映射，必要时先置换别人的帧。
//!
//! 页表、可执行文件和块设备都不在这里实现，宿主内核通过
//! [`AddressSpace`]、[`BackingFile`]、[`BlockDevice`] 三个接口注入。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
extern crate kernel_tracer;

mod addr;
mod error;
mod fault;
mod frame_allocator;
mod frame_table;
mod page;
mod space;
mod swap;
#[cfg(test)]
mod testing;

pub use self::{
    addr::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum},
    error::{Fatal, SwapFull},
    fault::{FaultFlags, VmManager, VmStats},
    page::{BackingFile, PageDescriptor, PageSource},
    space::{AddressSpace, MapError, Pid, ProcessSpace},
    swap::{BlockDevice, SwapSlot, SwapStore},
};
