//! 页描述符：一个虚拟页的内容从哪里来。
//!
//! 页不必驻留在物理帧里，只要有一份能按需重建内容的配方即可。
//! 配方随换入换出演化：被换出的页记住槽位和先前的来源，换入
//! 之后回退到先前的来源。

use alloc::{boxed::Box, sync::Arc};
use core::mem;

use common::config::PAGE_SIZE;

use crate::{addr::PhysPageNum, swap::SwapSlot};

/// 可执行文件内容的来源，由宿主内核注入
pub trait BackingFile: Send + Sync {
    /// 从 `offset` 起读取至多 `buf.len()` 字节，返回实际读到的
    /// 字节数。读不满说明文件被截断或区域越界，由调用方处置
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize;
}

/// 页内容的重建配方
pub enum PageSource {
    /// 首次访问时整页清零
    Zero,
    /// 从可执行文件某区间读入，不足一页的尾部清零
    Executable {
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_len: usize,
        zero_len: usize,
    },
    /// 内容此刻躺在交换区里；`prior` 记着换出前的来源
    Swapped {
        slot: SwapSlot,
        prior: Box<PageSource>,
    },
    /// 文件映射页。协议上预留，缺页处理暂不支持
    MappedFile,
}

/// 补充页表项：硬件页表装不下的调页元数据
pub struct PageDescriptor {
    source: PageSource,
    read_only: bool,
    resident: Option<PhysPageNum>,
}

impl PageDescriptor {
    pub fn new_executable(
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_len: usize,
        zero_len: usize,
        read_only: bool,
    ) -> Self {
        assert_eq!(
            read_len + zero_len,
            PAGE_SIZE,
            "executable page must cover a full page"
        );
        Self {
            source: PageSource::Executable {
                file,
                offset,
                read_len,
                zero_len,
            },
            read_only,
            resident: None,
        }
    }

    pub fn new_zero() -> Self {
        Self {
            source: PageSource::Zero,
            read_only: false,
            resident: None,
        }
    }

    /// 匿名页被换出后的形态：换入一次之后退化为零页
    pub fn new_swapped(slot: SwapSlot) -> Self {
        Self {
            source: PageSource::Swapped {
                slot,
                prior: Box::new(PageSource::Zero),
            },
            read_only: false,
            resident: None,
        }
    }

    /// 预留文件映射页的位置。登记之后对它的缺页会被拒绝，
    /// 直到文件映射真正接进来
    pub fn new_mapped_file() -> Self {
        Self {
            source: PageSource::MappedFile,
            read_only: false,
            resident: None,
        }
    }

    pub fn source(&self) -> &PageSource {
        &self.source
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// 驻留于哪个物理帧（如果驻留）
    pub fn resident(&self) -> Option<PhysPageNum> {
        self.resident
    }

    pub(crate) fn set_resident(&mut self, resident: Option<PhysPageNum>) {
        self.resident = resident;
    }

    /// 驻留页被换出：当前来源整体挪进 `prior`
    pub(crate) fn swap_out(&mut self, slot: SwapSlot) {
        // 驻留页的来源不可能还是交换区，换入时槽位已被取走
        debug_assert!(!matches!(self.source, PageSource::Swapped { .. }));
        let prior = mem::replace(&mut self.source, PageSource::Zero);
        self.source = PageSource::Swapped {
            slot,
            prior: Box::new(prior),
        };
        self.resident = None;
    }

    /// 来源若是交换区，取走槽位所有权并回退到先前的来源
    pub(crate) fn take_swap_slot(&mut self) -> Option<SwapSlot> {
        match mem::replace(&mut self.source, PageSource::Zero) {
            PageSource::Swapped { slot, prior } => {
                self.source = *prior;
                Some(slot)
            }
            other => {
                self.source = other;
                None
            }
        }
    }
}
