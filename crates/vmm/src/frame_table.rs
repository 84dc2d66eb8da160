//! 有界帧表与时钟置换。
//!
//! 用户页可用的物理帧全部登记在此。帧用尽时沿时钟指针扫描：
//! 访问位为真的页清位后豁免一轮，否则成为牺牲帧。脏的牺牲帧
//! 先写进交换区（写回期间不持表锁，其余帧的取还照常进行），
//! 干净的直接丢弃。钉住的帧从不参与扫描。
//!
//! 帧从池中取出到映射完成之间始终处于钉住状态，因此填充中的
//! 帧不可能反被置换出去。

use alloc::{boxed::Box, vec::Vec};

use common::config::PAGE_SIZE;
use klocks::SpinMutex;
use triomphe::Arc;

use crate::{
    addr::{PhysPageNum, VirtPageNum},
    error::SwapFull,
    frame_allocator::{FramePool, RawFrame},
    page::PageDescriptor,
    space::{MapError, PageState, ProcessSpace},
    swap::{SwapSlot, SwapStore},
};

pub(crate) struct FrameTable {
    pool: FramePool,
    inner: SpinMutex<TableInner>,
}

struct TableInner {
    /// 下标即帧池内的帧号
    slots: Box<[Option<FrameEntry>]>,
    /// 时钟指针，下一轮扫描从这里开始
    hand: usize,
    evicted_clean: usize,
    evicted_dirty: usize,
}

struct FrameEntry {
    frame: RawFrame,
    owner: Arc<ProcessSpace>,
    vpn: VirtPageNum,
    /// 钉住的帧不参与置换
    pinned: bool,
}

/// 已从池中取出、尚待填充的帧。
///
/// 对应表项处于钉住状态，完成映射前帧的字节由持有者独占。
/// 必须以 [`FrameTable::install`] 或 [`FrameTable::abort`] 收尾
pub(crate) struct AcquiredFrame {
    index: usize,
    ppn: PhysPageNum,
}

impl AcquiredFrame {
    pub fn ppn(&self) -> PhysPageNum {
        self.ppn
    }

    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        // SAFETY: 表项钉住期间填充线程独占该帧
        unsafe { self.ppn.as_page_bytes_mut() }
    }
}

/// 脏牺牲帧的写回任务，表锁释放后执行
struct WriteBack {
    index: usize,
    ppn: PhysPageNum,
    owner: Arc<ProcessSpace>,
    vpn: VirtPageNum,
    slot: SwapSlot,
    prior: Option<PageDescriptor>,
}

enum EvictStep {
    /// 干净页，已经就地回收
    Freed,
    /// 脏页，还需要写回
    WriteBack(WriteBack),
}

impl FrameTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            pool: FramePool::new(capacity),
            inner: SpinMutex::new(TableInner {
                slots: slots.into_boxed_slice(),
                hand: 0,
                evicted_clean: 0,
                evicted_dirty: 0,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.pool.capacity()
    }

    /// 为 `(owner, vpn)` 取得一帧，池满时就地置换。返回的帧处
    /// 于钉住状态。只会在交换区也满时失败
    pub fn acquire(
        &self,
        swap: &SwapStore,
        owner: &Arc<ProcessSpace>,
        vpn: VirtPageNum,
        zero: bool,
    ) -> Result<AcquiredFrame, SwapFull> {
        loop {
            let step = {
                let inner = &mut *self.inner.lock();
                if let Some(frame) = self.pool.alloc(zero) {
                    let index = frame.index();
                    let ppn = frame.ppn();
                    debug_assert!(inner.slots[index].is_none());
                    inner.slots[index] = Some(FrameEntry {
                        frame,
                        owner: owner.clone(),
                        vpn,
                        pinned: true,
                    });
                    return Ok(AcquiredFrame { index, ppn });
                }
                let victim = Self::select_victim(inner);
                self.evict_begin(inner, victim, swap)?
            };
            if let EvictStep::WriteBack(job) = step {
                self.write_back(job, swap);
            }
        }
    }

    /// 时钟扫描选出牺牲帧。两整轮后仍一无所获，说明帧全被钉住，
    /// 内核已经没法自救
    fn select_victim(inner: &mut TableInner) -> usize {
        let capacity = inner.slots.len();
        for _ in 0..2 * capacity {
            let index = inner.hand;
            inner.hand = (inner.hand + 1) % capacity;
            let Some(entry) = &inner.slots[index] else {
                continue;
            };
            if entry.pinned {
                continue;
            }
            if entry.owner.aspace().is_accessed(entry.vpn) {
                // 最近用过，给一轮豁免
                entry.owner.aspace().clear_accessed(entry.vpn);
                continue;
            }
            return index;
        }
        panic!("frame table: no evictable frame after two clock passes");
    }

    /// 腾出 `index` 处的帧。干净页在表锁内一步完成；脏页预定
    /// 槽位、登记占位并解除映射，写回留给调用方在锁外做
    fn evict_begin(
        &self,
        inner: &mut TableInner,
        index: usize,
        swap: &SwapStore,
    ) -> Result<EvictStep, SwapFull> {
        let entry = inner.slots[index].as_ref().unwrap();
        debug_assert!(!entry.pinned, "evicting a pinned frame");
        let owner = entry.owner.clone();
        let vpn = entry.vpn;
        let ppn = entry.frame.ppn();

        if !owner.aspace().is_dirty(vpn) {
            // 内容可按原配方重建，直接丢弃。先改补充页表再解除
            // 映射，确保属主看到的驻留信息不会领先于页表
            {
                let mut pages = owner.pages();
                match pages.get_mut(&vpn) {
                    Some(PageState::Ready(desc)) => desc.set_resident(None),
                    // 从没写过的匿名页（如增长出的栈页）退化成零页
                    None => {
                        pages.insert(vpn, PageState::Ready(PageDescriptor::new_zero()));
                    }
                    Some(PageState::Evicting) => unreachable!("resident page marked evicting"),
                }
            }
            owner.aspace().unmap(vpn);
            let entry = inner.slots[index].take().unwrap();
            self.pool.dealloc(entry.frame);
            inner.evicted_clean += 1;
            trace!("pid {} page {vpn:?} dropped clean", owner.pid());
            return Ok(EvictStep::Freed);
        }

        // 脏页：先抢槽位再动页面，拿不到槽位时帧原样留下
        let slot = swap.allocate_slot()?;
        inner.slots[index].as_mut().unwrap().pinned = true;
        let prior = {
            let mut pages = owner.pages();
            let prior = match pages.remove(&vpn) {
                Some(PageState::Ready(desc)) => Some(desc),
                Some(PageState::Evicting) => unreachable!("page already evicting"),
                None => None,
            };
            pages.insert(vpn, PageState::Evicting);
            prior
        };
        owner.aspace().unmap(vpn);
        inner.evicted_dirty += 1;
        debug!(
            "pid {} page {vpn:?} swapping out to slot {}",
            owner.pid(),
            slot.id()
        );
        Ok(EvictStep::WriteBack(WriteBack {
            index,
            ppn,
            owner,
            vpn,
            slot,
            prior,
        }))
    }

    /// 写回脏牺牲帧并发布它的新描述符。进入时表项钉住、表锁已
    /// 释放；该页的缺页都会停在占位标记上等这里收尾
    fn write_back(&self, job: WriteBack, swap: &SwapStore) {
        // SAFETY: 表项钉住期间本线程独占该帧
        let bytes = unsafe { job.ppn.as_page_bytes() };
        swap.write(&job.slot, bytes);

        let desc = match job.prior {
            Some(mut desc) => {
                desc.swap_out(job.slot);
                desc
            }
            None => PageDescriptor::new_swapped(job.slot),
        };
        let inner = &mut *self.inner.lock();
        let prev = job.owner.pages().insert(job.vpn, PageState::Ready(desc));
        debug_assert!(matches!(prev, Some(PageState::Evicting)));
        let entry = inner.slots[job.index].take().unwrap();
        debug_assert!(entry.pinned);
        self.pool.dealloc(entry.frame);
        trace!("pid {} page {:?} swapped out", job.owner.pid(), job.vpn);
    }

    /// 把已填充的帧映射进属主地址空间、刷新描述符并解除钉住。
    ///
    /// 访问位预置为真，让新页在时钟扫描里有一轮豁免；脏位由调
    /// 用方给定（换入的页交换区副本已销毁，必须按脏页对待）。
    /// 描述符的驻留信息在表锁内更新，解除钉住后立刻被置换也不
    /// 会读到滞后的值。映射失败时帧被回收，表项消失
    pub fn install(
        &self,
        acquired: AcquiredFrame,
        writable: bool,
        dirty: bool,
    ) -> Result<(), MapError> {
        let inner = &mut *self.inner.lock();
        let entry = inner.slots[acquired.index].as_ref().unwrap();
        debug_assert!(entry.pinned);
        let owner = entry.owner.clone();
        let vpn = entry.vpn;
        if let Err(e) = owner.aspace().map(vpn, acquired.ppn, writable) {
            error!("pid {} map {vpn:?} -> {:?} failed", owner.pid(), acquired.ppn);
            let entry = inner.slots[acquired.index].take().unwrap();
            self.pool.dealloc(entry.frame);
            return Err(e);
        }
        owner.aspace().set_accessed(vpn);
        owner.aspace().set_dirty(vpn, dirty);
        // 增长出的栈页没有描述符，跳过即可
        if let Some(PageState::Ready(desc)) = owner.pages().get_mut(&vpn) {
            desc.set_resident(Some(acquired.ppn));
        }
        inner.slots[acquired.index].as_mut().unwrap().pinned = false;
        Ok(())
    }

    /// 放弃一次填充：移除表项并归还帧
    pub fn abort(&self, acquired: AcquiredFrame) {
        let inner = &mut *self.inner.lock();
        let entry = inner.slots[acquired.index].take().unwrap();
        debug_assert!(entry.pinned);
        self.pool.dealloc(entry.frame);
    }

    /// 调整 `(space, vpn)` 驻留帧的钉住标记，返回是否成功。
    ///
    /// 帧不驻留时钉不上；帧已被别处钉住（填充或写回进行中）时
    /// 同样失败，调用方该当它不驻留处理。解除钉住只由钉住它的
    /// 一方来做
    pub fn set_pinned(&self, space: &Arc<ProcessSpace>, vpn: VirtPageNum, pinned: bool) -> bool {
        let inner = &mut *self.inner.lock();
        for entry in inner.slots.iter_mut().flatten() {
            if Arc::ptr_eq(&entry.owner, space) && entry.vpn == vpn {
                if pinned && entry.pinned {
                    return false;
                }
                entry.pinned = pinned;
                return true;
            }
        }
        false
    }

    /// 立即回收 `(space, vpn)` 的驻留帧，脏页照常写回交换区。
    /// 帧被钉住时等它解除。返回页面此前是否驻留
    pub fn reclaim(
        &self,
        swap: &SwapStore,
        space: &Arc<ProcessSpace>,
        vpn: VirtPageNum,
    ) -> Result<bool, SwapFull> {
        loop {
            let step = {
                let inner = &mut *self.inner.lock();
                let mut found = None;
                for (index, entry) in inner.slots.iter().enumerate() {
                    if let Some(entry) = entry {
                        if Arc::ptr_eq(&entry.owner, space) && entry.vpn == vpn {
                            found = Some((index, entry.pinned));
                            break;
                        }
                    }
                }
                match found {
                    None => return Ok(false),
                    Some((_, true)) => None,
                    Some((index, false)) => Some(self.evict_begin(inner, index, swap)?),
                }
            };
            match step {
                Some(EvictStep::Freed) => return Ok(true),
                Some(EvictStep::WriteBack(job)) => {
                    self.write_back(job, swap);
                    return Ok(true);
                }
                // 正被填充或写回，等待解除钉住后重试
                None => core::hint::spin_loop(),
            }
        }
    }

    /// 回收 `space` 的全部驻留帧，不做写回。正在写回的页等它
    /// 落定，返回后帧表中保证不再有该进程的痕迹
    pub fn release_space(&self, space: &Arc<ProcessSpace>) {
        loop {
            let any_pinned = {
                let inner = &mut *self.inner.lock();
                let mut any_pinned = false;
                for index in 0..inner.slots.len() {
                    let Some(entry) = &inner.slots[index] else {
                        continue;
                    };
                    if !Arc::ptr_eq(&entry.owner, space) {
                        continue;
                    }
                    if entry.pinned {
                        any_pinned = true;
                        continue;
                    }
                    let entry = inner.slots[index].take().unwrap();
                    entry.owner.aspace().unmap(entry.vpn);
                    self.pool.dealloc(entry.frame);
                }
                any_pinned
            };
            if !any_pinned {
                return;
            }
            core::hint::spin_loop();
        }
    }

    /// 驻留帧数（含钉住的）
    pub fn resident_count(&self) -> usize {
        self.inner.lock().slots.iter().flatten().count()
    }

    /// `(干净丢弃, 写回交换区)` 的累计次数
    pub fn eviction_counts(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.evicted_clean, inner.evicted_dirty)
    }
}

#[cfg(test)]
mod tests {
    use common::config::SECTORS_PER_PAGE;

    use super::*;
    use crate::{page::PageSource, testing};

    fn swap_store(slots: usize) -> SwapStore {
        SwapStore::new(Box::new(testing::MemDisk::new(
            (slots * SECTORS_PER_PAGE) as u64,
        )))
    }

    fn install_zero(table: &FrameTable, swap: &SwapStore, space: &Arc<ProcessSpace>, vpn: VirtPageNum) {
        let acquired = table.acquire(swap, space, vpn, true).unwrap();
        table.install(acquired, true, false).unwrap();
    }

    #[test]
    fn clock_grants_second_chance() {
        let swap = swap_store(8);
        let table = FrameTable::new(3);
        let space = testing::new_space(1);
        let pages: Vec<VirtPageNum> = (0..4).map(|i| VirtPageNum(0x100 + i)).collect();

        for &vpn in &pages[..3] {
            install_zero(&table, &swap, &space, vpn);
        }
        // 映射时三页的访问位都被置上了，单独清掉中间那页的
        space.aspace().clear_accessed(pages[1]);

        install_zero(&table, &swap, &space, pages[3]);

        assert!(space.aspace().translate(pages[0]).is_some());
        assert!(space.aspace().translate(pages[1]).is_none());
        assert!(space.aspace().translate(pages[2]).is_some());
        assert!(space.aspace().translate(pages[3]).is_some());
        assert_eq!(table.eviction_counts(), (1, 0));
        assert_eq!(swap.slots_in_use(), 0);
    }

    #[test]
    fn pinned_frames_are_skipped() {
        let swap = swap_store(8);
        let table = FrameTable::new(2);
        let space = testing::new_space(1);
        let (a, b, c) = (VirtPageNum(0x10), VirtPageNum(0x11), VirtPageNum(0x12));

        install_zero(&table, &swap, &space, a);
        install_zero(&table, &swap, &space, b);
        space.aspace().clear_accessed(a);
        space.aspace().clear_accessed(b);
        assert!(table.set_pinned(&space, a, true));

        install_zero(&table, &swap, &space, c);

        assert!(space.aspace().translate(a).is_some());
        assert!(space.aspace().translate(b).is_none());
        assert!(table.set_pinned(&space, a, false));
        // b 已不驻留，钉不住
        assert!(!table.set_pinned(&space, b, true));
    }

    #[test]
    #[should_panic = "two clock passes"]
    fn all_pinned_is_fatal() {
        let swap = swap_store(8);
        let table = FrameTable::new(1);
        let space = testing::new_space(1);
        let vpn = VirtPageNum(0x10);

        install_zero(&table, &swap, &space, vpn);
        assert!(table.set_pinned(&space, vpn, true));
        let _ = table.acquire(&swap, &space, VirtPageNum(0x11), true);
    }

    #[test]
    fn dirty_victim_is_written_back() {
        let swap = swap_store(4);
        let table = FrameTable::new(1);
        let space = testing::new_space(1);
        let a = VirtPageNum(0x10);

        install_zero(&table, &swap, &space, a);
        testing::user_write(&space, a, &[0xcd; 16]);

        install_zero(&table, &swap, &space, VirtPageNum(0x11));

        assert!(space.aspace().translate(a).is_none());
        assert_eq!(swap.slots_in_use(), 1);
        assert_eq!(table.eviction_counts(), (0, 1));
        assert_eq!(swap.io_counts(), (0, 1));
        let pages = space.pages();
        let Some(PageState::Ready(desc)) = pages.get(&a) else {
            panic!("descriptor missing");
        };
        assert!(matches!(desc.source(), PageSource::Swapped { .. }));
        assert_eq!(desc.resident(), None);
    }

    #[test]
    fn clean_anonymous_page_leaves_zero_recipe() {
        let swap = swap_store(4);
        let table = FrameTable::new(1);
        let space = testing::new_space(1);
        let a = VirtPageNum(0x10);

        install_zero(&table, &swap, &space, a);
        install_zero(&table, &swap, &space, VirtPageNum(0x11));

        assert_eq!(swap.slots_in_use(), 0);
        assert_eq!(swap.io_counts(), (0, 0));
        let pages = space.pages();
        let Some(PageState::Ready(desc)) = pages.get(&a) else {
            panic!("descriptor missing");
        };
        assert!(matches!(desc.source(), PageSource::Zero));
    }

    #[test]
    fn reclaim_writes_back_dirty_pages() {
        let swap = swap_store(4);
        let table = FrameTable::new(2);
        let space = testing::new_space(1);
        let (a, b) = (VirtPageNum(0x10), VirtPageNum(0x11));

        install_zero(&table, &swap, &space, a);
        install_zero(&table, &swap, &space, b);
        testing::user_write(&space, a, b"dirty");

        assert_eq!(table.reclaim(&swap, &space, a), Ok(true));
        assert!(space.aspace().translate(a).is_none());
        assert_eq!(swap.slots_in_use(), 1);
        assert_eq!(table.reclaim(&swap, &space, a), Ok(false));

        // 干净页的回收不碰交换区
        assert_eq!(table.reclaim(&swap, &space, b), Ok(true));
        assert_eq!(swap.slots_in_use(), 1);
    }

    #[test]
    fn release_space_only_touches_its_owner() {
        let swap = swap_store(4);
        let table = FrameTable::new(2);
        let alpha = testing::new_space(1);
        let beta = testing::new_space(2);
        let (a, b) = (VirtPageNum(0x10), VirtPageNum(0x20));

        install_zero(&table, &swap, &alpha, a);
        install_zero(&table, &swap, &beta, b);
        testing::user_write(&alpha, a, b"gone");

        table.release_space(&alpha);

        assert!(alpha.aspace().translate(a).is_none());
        assert!(beta.aspace().translate(b).is_some());
        assert_eq!(table.resident_count(), 1);
        // 终止路径不写回
        assert_eq!(swap.io_counts(), (0, 0));
    }
}
