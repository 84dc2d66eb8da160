//! 测试用的宿主替身：内存盘、软件页表、一段字节冒充的文件。
//!
//! 软件页表把访问位、脏位的硬件行为如实模拟出来，时钟置换和
//! 写回判定在测试里走的路径与真机一致。

use std::{collections::BTreeMap, thread, time::Duration};

use common::config::{SECTORS_PER_PAGE, SECTOR_SIZE};
use klocks::SpinMutex;
use triomphe::Arc;

use crate::{
    addr::{PhysPageNum, VirtPageNum},
    fault::VmManager,
    page::BackingFile,
    space::{AddressSpace, MapError, Pid, ProcessSpace},
    swap::BlockDevice,
};

pub(crate) struct MemDisk {
    sectors: Vec<[u8; SECTOR_SIZE]>,
    write_delay: Option<Duration>,
}

impl MemDisk {
    pub fn new(num_sectors: u64) -> Self {
        Self {
            sectors: vec![[0; SECTOR_SIZE]; num_sectors as usize],
            write_delay: None,
        }
    }

    /// 写得很慢的盘，用来拉开写回的时间窗口
    pub fn with_write_delay(num_sectors: u64, delay: Duration) -> Self {
        Self {
            write_delay: Some(delay),
            ..Self::new(num_sectors)
        }
    }
}

impl BlockDevice for MemDisk {
    fn num_blocks(&self) -> u64 {
        self.sectors.len() as u64
    }

    fn read_block(&mut self, block_id: u64, buf: &mut [u8; SECTOR_SIZE]) {
        buf.copy_from_slice(&self.sectors[block_id as usize]);
    }

    fn write_block(&mut self, block_id: u64, buf: &[u8; SECTOR_SIZE]) {
        if let Some(delay) = self.write_delay {
            thread::sleep(delay);
        }
        self.sectors[block_id as usize].copy_from_slice(buf);
    }
}

#[derive(Clone, Copy)]
struct SoftPte {
    ppn: PhysPageNum,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// 软件模拟的页表
pub(crate) struct SoftAspace {
    entries: SpinMutex<BTreeMap<VirtPageNum, SoftPte>>,
}

impl SoftAspace {
    pub fn new() -> Self {
        Self {
            entries: SpinMutex::new(BTreeMap::new()),
        }
    }
}

impl AddressSpace for SoftAspace {
    fn map(&self, vpn: VirtPageNum, ppn: PhysPageNum, writable: bool) -> Result<(), MapError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&vpn) {
            return Err(MapError);
        }
        entries.insert(
            vpn,
            SoftPte {
                ppn,
                writable,
                accessed: false,
                dirty: false,
            },
        );
        Ok(())
    }

    fn unmap(&self, vpn: VirtPageNum) {
        self.entries.lock().remove(&vpn);
    }

    fn translate(&self, vpn: VirtPageNum) -> Option<PhysPageNum> {
        self.entries.lock().get(&vpn).map(|pte| pte.ppn)
    }

    fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.entries.lock().get(&vpn).is_some_and(|pte| pte.accessed)
    }

    fn clear_accessed(&self, vpn: VirtPageNum) {
        if let Some(pte) = self.entries.lock().get_mut(&vpn) {
            pte.accessed = false;
        }
    }

    fn set_accessed(&self, vpn: VirtPageNum) {
        if let Some(pte) = self.entries.lock().get_mut(&vpn) {
            pte.accessed = true;
        }
    }

    fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.entries.lock().get(&vpn).is_some_and(|pte| pte.dirty)
    }

    fn set_dirty(&self, vpn: VirtPageNum, dirty: bool) {
        if let Some(pte) = self.entries.lock().get_mut(&vpn) {
            if dirty {
                debug_assert!(pte.writable, "dirty bit on a read-only page");
            }
            pte.dirty = dirty;
        }
    }
}

/// 一段内存字节冒充的可执行文件
pub(crate) struct BytesFile(Vec<u8>);

impl BytesFile {
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }
}

impl BackingFile for BytesFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let Some(rest) = self.0.get(offset..) else {
            return 0;
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        n
    }
}

pub(crate) fn new_space(pid: usize) -> Arc<ProcessSpace> {
    Arc::new(ProcessSpace::new(Pid(pid), Box::new(SoftAspace::new())))
}

pub(crate) fn manager(frames: usize, swap_slots: usize) -> VmManager {
    VmManager::new(
        frames,
        Box::new(MemDisk::new((swap_slots * SECTORS_PER_PAGE) as u64)),
    )
}

/// 模拟用户态写页首若干字节。页必须驻留，多线程场景下调用方
/// 先把它钉住
pub(crate) fn user_write(space: &ProcessSpace, vpn: VirtPageNum, data: &[u8]) {
    let ppn = space.aspace().translate(vpn).expect("page not resident");
    // SAFETY: 页驻留且被调用方独占（钉住或单线程）
    let bytes = unsafe { ppn.as_page_bytes_mut() };
    bytes[..data.len()].copy_from_slice(data);
    space.aspace().set_accessed(vpn);
    space.aspace().set_dirty(vpn, true);
}

/// 模拟用户态读出整页
pub(crate) fn user_read(space: &ProcessSpace, vpn: VirtPageNum) -> Vec<u8> {
    let ppn = space.aspace().translate(vpn).expect("page not resident");
    // SAFETY: 同 [`user_write`]
    let bytes = unsafe { ppn.as_page_bytes() };
    space.aspace().set_accessed(vpn);
    bytes.to_vec()
}
