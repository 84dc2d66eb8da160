//! 进程地址空间与补充页表。
//!
//! 硬件页表由宿主内核实现（[`AddressSpace`]），这里只保管调页
//! 自己需要的补充信息：每个虚拟页一份 [`PageDescriptor`]，外加
//! 换出进行中的占位标记。

use alloc::{boxed::Box, collections::BTreeMap, sync::Arc};
use core::fmt;

use klocks::{SpinMutex, SpinMutexGuard};

use crate::{
    addr::{PhysPageNum, VirtPageNum},
    page::{BackingFile, PageDescriptor},
};

/// 进程标识，只用于日志
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Pid(pub usize);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 映射失败（页表自身资源不足等），对当前进程不可恢复
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapError;

/// 硬件页表的抽象。
///
/// 实现方负责映射、翻译与访问位/脏位的维护。方法内部不得回调
/// 虚存管理器，否则会形成锁环
pub trait AddressSpace: Send + Sync {
    fn map(&self, vpn: VirtPageNum, ppn: PhysPageNum, writable: bool) -> Result<(), MapError>;
    /// 解除映射。页本就未映射时无事发生
    fn unmap(&self, vpn: VirtPageNum);
    fn translate(&self, vpn: VirtPageNum) -> Option<PhysPageNum>;
    fn is_accessed(&self, vpn: VirtPageNum) -> bool;
    fn clear_accessed(&self, vpn: VirtPageNum);
    /// 把访问位置位。新映射的页靠它在时钟扫描里豁免一轮
    fn set_accessed(&self, vpn: VirtPageNum);
    fn is_dirty(&self, vpn: VirtPageNum) -> bool;
    fn set_dirty(&self, vpn: VirtPageNum, dirty: bool);
}

/// 补充页表里的一格
pub(crate) enum PageState {
    /// 换出写回进行中。此刻谁都不准动这一页，缺页也得等
    Evicting,
    Ready(PageDescriptor),
}

/// 一个参与调页的进程地址空间
pub struct ProcessSpace {
    pid: Pid,
    aspace: Box<dyn AddressSpace>,
    pages: SpinMutex<BTreeMap<VirtPageNum, PageState>>,
}

impl ProcessSpace {
    pub fn new(pid: Pid, aspace: Box<dyn AddressSpace>) -> Self {
        Self {
            pid,
            aspace,
            pages: SpinMutex::new(BTreeMap::new()),
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub(crate) fn aspace(&self) -> &dyn AddressSpace {
        &*self.aspace
    }

    pub(crate) fn pages(&self) -> SpinMutexGuard<'_, BTreeMap<VirtPageNum, PageState>> {
        self.pages.lock()
    }

    /// 登记一页可执行内容：缺页时从 `file` 的 `offset` 处读
    /// `read_len` 字节，末尾 `zero_len` 字节清零
    pub fn describe_executable_region(
        &self,
        vpn: VirtPageNum,
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_len: usize,
        zero_len: usize,
        read_only: bool,
    ) {
        trace!(
            "pid {} describe exec page {vpn:?}, offset {offset:#x}, read {read_len}",
            self.pid
        );
        let prev = self.pages.lock().insert(
            vpn,
            PageState::Ready(PageDescriptor::new_executable(
                file, offset, read_len, zero_len, read_only,
            )),
        );
        debug_assert!(prev.is_none(), "page described twice");
    }

    /// 登记一页匿名零页
    pub fn describe_zero_page(&self, vpn: VirtPageNum) {
        trace!("pid {} describe zero page {vpn:?}", self.pid);
        let prev = self
            .pages
            .lock()
            .insert(vpn, PageState::Ready(PageDescriptor::new_zero()));
        debug_assert!(prev.is_none(), "page described twice");
    }

    /// 为文件映射预留一页位置。在映射缺页接通之前，对它的访问
    /// 会被当作违例拒绝
    pub fn describe_mapped_file_page(&self, vpn: VirtPageNum) {
        trace!("pid {} describe mapped-file page {vpn:?}", self.pid);
        let prev = self
            .pages
            .lock()
            .insert(vpn, PageState::Ready(PageDescriptor::new_mapped_file()));
        debug_assert!(prev.is_none(), "page described twice");
    }
}
