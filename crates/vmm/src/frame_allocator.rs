//! 物理页帧的来源。
//!
//! 在一块页对齐的连续内存上做帧分配，帧在池内的下标与
//! 物理页号一一对应。分配器只管有或没有，池满之后腾谁的
//! 地方完全由帧表的置换策略决定。

use alloc::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};

use buddy_system_allocator::FrameAllocator;
use common::config::PAGE_SIZE;
use klocks::SpinMutex;

use crate::addr::{PhysAddr, PhysPageNum};

const BUDDY_ORDER: usize = 32;

/// 固定容量的帧池
pub(crate) struct FramePool {
    base: usize,
    base_ppn: PhysPageNum,
    capacity: usize,
    allocator: SpinMutex<FrameAllocator<BUDDY_ORDER>>,
}

/// 一个已分配出去的物理页帧。
///
/// 不实现 `Drop`：帧的生命周期由帧表显式管理，归还必须走
/// [`FramePool::dealloc`]
pub(crate) struct RawFrame {
    index: usize,
    ppn: PhysPageNum,
}

impl FramePool {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "frame pool must hold at least one frame");
        let layout = Layout::from_size_align(capacity * PAGE_SIZE, PAGE_SIZE).unwrap();
        let base = unsafe { alloc_zeroed(layout) };
        if base.is_null() {
            handle_alloc_error(layout);
        }
        let base = base as usize;
        debug_assert_eq!(base % PAGE_SIZE, 0);
        let mut allocator = FrameAllocator::new();
        allocator.add_frame(0, capacity);
        Self {
            base,
            base_ppn: PhysAddr(base).ppn_floor(),
            capacity,
            allocator: SpinMutex::new(allocator),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 尝试取出一帧。池满时返回 `None`，调用方自行决定置换谁
    pub fn alloc(&self, zero: bool) -> Option<RawFrame> {
        let index = self.allocator.lock().alloc(1)?;
        let mut frame = RawFrame {
            index,
            ppn: PhysPageNum(self.base_ppn.0 + index),
        };
        if zero {
            frame.as_page_bytes_mut().fill(0);
        }
        Some(frame)
    }

    pub fn dealloc(&self, frame: RawFrame) {
        debug_assert!(frame.index < self.capacity);
        self.allocator.lock().dealloc(frame.index, 1);
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.capacity * PAGE_SIZE, PAGE_SIZE).unwrap();
        // SAFETY: `base` 来自 `new` 中同样布局的分配
        unsafe { dealloc(self.base as *mut u8, layout) };
    }
}

impl RawFrame {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn ppn(&self) -> PhysPageNum {
        self.ppn
    }

    pub fn as_page_bytes(&self) -> &[u8; PAGE_SIZE] {
        // SAFETY: 帧在池中唯一，共享借用随 `self` 受借用检查约束
        unsafe { self.ppn.as_page_bytes() }
    }

    pub fn as_page_bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        // SAFETY: 同上，且此处独占 `self`
        unsafe { self.ppn.as_page_bytes_mut() }
    }
}
