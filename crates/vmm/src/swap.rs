//! 块设备上的交换区。
//!
//! 设备被切成槽位，每个槽位恰好装得下一页（[`SECTORS_PER_PAGE`]
//! 个连续扇区）。占用情况记在位图里；位图修改和槽位 I/O 由同
//! 一把锁串行化，因此写回完成之前槽位内容不可能被读到。

use alloc::{boxed::Box, vec, vec::Vec};

use common::config::{PAGE_SIZE, SECTORS_PER_PAGE, SECTOR_SIZE};
use klocks::SpinMutex;

use crate::error::SwapFull;

/// 扇区粒度的块设备，由宿主内核注入。
///
/// 读写失败视为不可恢复，因此接口不返回错误
pub trait BlockDevice: Send {
    /// 设备的扇区总数
    fn num_blocks(&self) -> u64;
    fn read_block(&mut self, block_id: u64, buf: &mut [u8; SECTOR_SIZE]);
    fn write_block(&mut self, block_id: u64, buf: &[u8; SECTOR_SIZE]);
}

/// 一个已分配的交换槽位。
///
/// 刻意不做 `Copy`：谁持有它谁对槽位内容负责，归还必须走
/// [`SwapStore::free`]
#[derive(Debug, PartialEq, Eq)]
pub struct SwapSlot(usize);

impl SwapSlot {
    pub fn id(&self) -> usize {
        self.0
    }

    fn first_block(&self) -> u64 {
        (self.0 * SECTORS_PER_PAGE) as u64
    }
}

/// 交换区
pub struct SwapStore {
    inner: SpinMutex<SwapInner>,
}

struct SwapInner {
    device: Box<dyn BlockDevice>,
    /// 每槽位一位，置位表示占用
    bitmap: Vec<u64>,
    n_slots: usize,
    reads: usize,
    writes: usize,
}

impl SwapStore {
    /// 把整个设备用作交换区，尾部凑不满一页的扇区弃用
    pub fn new(device: Box<dyn BlockDevice>) -> Self {
        let n_slots = device.num_blocks() as usize / SECTORS_PER_PAGE;
        info!("swap store ready, {n_slots} slots");
        Self {
            inner: SpinMutex::new(SwapInner {
                device,
                bitmap: vec![0; n_slots.div_ceil(u64::BITS as usize)],
                n_slots,
                reads: 0,
                writes: 0,
            }),
        }
    }

    /// 槽位总数
    pub fn capacity(&self) -> usize {
        self.inner.lock().n_slots
    }

    /// 当前被占用的槽位数
    pub fn slots_in_use(&self) -> usize {
        let inner = self.inner.lock();
        inner.bitmap.iter().map(|word| word.count_ones() as usize).sum()
    }

    /// 取一个空闲槽位。
    ///
    /// 交换区满是正常工况而非内核 bug，如何处置交给调用方
    pub fn allocate_slot(&self) -> Result<SwapSlot, SwapFull> {
        let inner = &mut *self.inner.lock();
        for (word_index, word) in inner.bitmap.iter_mut().enumerate() {
            if *word == u64::MAX {
                continue;
            }
            let bit = word.trailing_ones() as usize;
            let id = word_index * u64::BITS as usize + bit;
            if id >= inner.n_slots {
                break;
            }
            *word |= 1 << bit;
            trace!("swap slot {id} allocated");
            return Ok(SwapSlot(id));
        }
        warn!("swap store exhausted ({} slots)", inner.n_slots);
        Err(SwapFull)
    }

    /// 把一页写进槽位
    pub fn write(&self, slot: &SwapSlot, page: &[u8; PAGE_SIZE]) {
        let inner = &mut *self.inner.lock();
        debug_assert!(inner.is_allocated(slot.0), "write to free swap slot");
        for (i, sector) in page.chunks_exact(SECTOR_SIZE).enumerate() {
            inner
                .device
                .write_block(slot.first_block() + i as u64, sector.try_into().unwrap());
        }
        inner.writes += 1;
    }

    /// 从槽位读出一页
    pub fn read(&self, slot: &SwapSlot, page: &mut [u8; PAGE_SIZE]) {
        let inner = &mut *self.inner.lock();
        debug_assert!(inner.is_allocated(slot.0), "read from free swap slot");
        for (i, sector) in page.chunks_exact_mut(SECTOR_SIZE).enumerate() {
            inner
                .device
                .read_block(slot.first_block() + i as u64, sector.try_into().unwrap());
        }
        inner.reads += 1;
    }

    /// 归还槽位。重复归还说明所有权记账坏掉了，直接 panic
    pub fn free(&self, slot: SwapSlot) {
        let inner = &mut *self.inner.lock();
        let (word_index, bit) = (slot.0 / u64::BITS as usize, slot.0 % u64::BITS as usize);
        assert!(
            inner.bitmap[word_index] & (1 << bit) != 0,
            "double free of swap slot {}",
            slot.0
        );
        inner.bitmap[word_index] &= !(1 << bit);
        trace!("swap slot {} freed", slot.0);
    }

    pub(crate) fn io_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.reads, inner.writes)
    }
}

impl SwapInner {
    fn is_allocated(&self, id: usize) -> bool {
        self.bitmap[id / u64::BITS as usize] & (1 << (id % u64::BITS as usize)) != 0
    }
}
