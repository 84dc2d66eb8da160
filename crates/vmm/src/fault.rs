//! 缺页处理协议。
//!
//! 入口是 [`VmManager::resolve_fault`]：查补充页表拿配方，取帧、
//! 按配方填充、映射，一气呵成。查无此页时按栈增长启发式判断
//! 是合法扩栈还是野指针。
//!
//! 同一进程同一时刻只有一个线程会陷入缺页（由宿主内核的线程
//! 模型保证），因此单个页上不存在并发的缺页处理；跨进程的并
//! 发由帧表与交换区各自的锁承担。

use alloc::boxed::Box;

use bitflags::bitflags;
use common::config::{LOW_ADDRESS_END, STACK_GROW_SLACK, USER_STACK_SIZE};
use klocks::SpinMutex;
use scopeguard::ScopeGuard;
use triomphe::Arc;

use crate::{
    addr::{VirtAddr, VirtPageNum},
    error::{Fatal, SwapFull},
    frame_table::FrameTable,
    page::PageSource,
    space::{PageState, ProcessSpace},
    swap::{BlockDevice, SwapSlot, SwapStore},
};

bitflags! {
    /// 缺页异常的硬件侧信息
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FaultFlags: u8 {
        /// 页表项存在但访问被拒（权限错），而非页缺失
        const PRESENT = 1 << 0;
        /// 写访问（否则是读或取指）
        const WRITE = 1 << 1;
        /// 来自用户态
        const USER = 1 << 2;
    }
}

/// 调页统计的一份快照
#[derive(Clone, Copy, Debug, Default)]
pub struct VmStats {
    pub faults: usize,
    pub zero_fills: usize,
    pub exec_loads: usize,
    pub swap_restores: usize,
    pub stack_growths: usize,
    pub violations: usize,
    pub evicted_clean: usize,
    pub evicted_dirty: usize,
    pub swap_reads: usize,
    pub swap_writes: usize,
    pub slots_in_use: usize,
}

#[derive(Default)]
struct FaultCounters {
    faults: usize,
    zero_fills: usize,
    exec_loads: usize,
    swap_restores: usize,
    stack_growths: usize,
    violations: usize,
}

/// 缺页配方的执行计划。从补充页表里摘出来之后就自给自足，
/// 填充期间不需要持有任何锁
enum Plan {
    Zero,
    Exec {
        file: alloc::sync::Arc<dyn crate::page::BackingFile>,
        offset: usize,
        read_len: usize,
    },
    Swap {
        slot: SwapSlot,
    },
}

/// 补充页表查询的结论
enum Lookup {
    /// 没有这页的记录，走栈增长判定
    Absent,
    /// 换出写回进行中，等它落定后重查
    Busy,
    /// 这次访问不该被满足
    Refuse(&'static str),
    /// 按计划填充，第二个分量是页的只读属性
    Run(Plan, bool),
}

/// 虚存管理器：帧表＋交换区＋缺页协议
pub struct VmManager {
    frames: FrameTable,
    swap: SwapStore,
    counters: SpinMutex<FaultCounters>,
}

impl VmManager {
    /// `frame_capacity` 限定用户页可用的物理帧数，`device` 整个
    /// 交给交换区
    pub fn new(frame_capacity: usize, device: Box<dyn BlockDevice>) -> Self {
        info!("vm manager ready, {frame_capacity} frames");
        Self {
            frames: FrameTable::new(frame_capacity),
            swap: SwapStore::new(device),
            counters: SpinMutex::new(FaultCounters::default()),
        }
    }

    pub fn frame_capacity(&self) -> usize {
        self.frames.capacity()
    }

    /// 处理一次缺页。返回 `Err` 时调用方应终止该进程并随后调用
    /// [`Self::release_all`]
    pub fn resolve_fault(
        &self,
        space: &Arc<ProcessSpace>,
        addr: VirtAddr,
        flags: FaultFlags,
        stack_ptr: VirtAddr,
    ) -> Result<(), Fatal> {
        self.counters.lock().faults += 1;
        trace!("pid {} fault at {addr:?} ({flags:?})", space.pid());

        if flags.contains(FaultFlags::PRESENT) {
            // 页在而权限不符，比如写只读页。没有写时复制，一律违例
            return Err(self.violation(space, addr, flags, "protection fault"));
        }
        if addr.0 >= LOW_ADDRESS_END {
            return Err(self.violation(space, addr, flags, "outside the user range"));
        }

        let vpn = addr.vpn_floor();
        let (plan, read_only) = loop {
            let lookup = {
                let mut pages = space.pages();
                match pages.get_mut(&vpn) {
                    None => Lookup::Absent,
                    Some(PageState::Evicting) => Lookup::Busy,
                    Some(PageState::Ready(desc)) => {
                        if flags.contains(FaultFlags::WRITE) && desc.read_only() {
                            Lookup::Refuse("write to read-only page")
                        } else if matches!(desc.source(), PageSource::MappedFile) {
                            Lookup::Refuse("mapped-file paging is not wired up")
                        } else {
                            debug_assert!(desc.resident().is_none(), "fault on a resident page");
                            let read_only = desc.read_only();
                            match desc.take_swap_slot() {
                                Some(slot) => Lookup::Run(Plan::Swap { slot }, read_only),
                                None => {
                                    let plan = match desc.source() {
                                        PageSource::Zero => Plan::Zero,
                                        PageSource::Executable {
                                            file,
                                            offset,
                                            read_len,
                                            ..
                                        } => Plan::Exec {
                                            file: file.clone(),
                                            offset: *offset,
                                            read_len: *read_len,
                                        },
                                        _ => unreachable!(),
                                    };
                                    Lookup::Run(plan, read_only)
                                }
                            }
                        }
                    }
                }
            };
            match lookup {
                Lookup::Absent => return self.grow_stack(space, addr, flags, stack_ptr),
                Lookup::Busy => core::hint::spin_loop(),
                Lookup::Refuse(reason) => {
                    return Err(self.violation(space, addr, flags, reason));
                }
                Lookup::Run(plan, read_only) => break (plan, read_only),
            }
        };

        let zero = matches!(plan, Plan::Zero);
        let acquired = match self.frames.acquire(&self.swap, space, vpn, zero) {
            Ok(acquired) => acquired,
            Err(SwapFull) => {
                // 槽位已从描述符里取出，进程终止前先还给交换区
                if let Plan::Swap { slot } = plan {
                    self.swap.free(slot);
                }
                error!("pid {} fault at {addr:?}: swap exhausted", space.pid());
                return Err(Fatal::SwapExhausted);
            }
        };
        let ppn = acquired.ppn();
        // 此后任何失败路径都得把帧退回去
        let mut acquired = scopeguard::guard(acquired, |acquired| self.frames.abort(acquired));

        let mut dirty = false;
        match plan {
            Plan::Zero => {
                self.counters.lock().zero_fills += 1;
            }
            Plan::Exec {
                file,
                offset,
                read_len,
            } => {
                let bytes = acquired.bytes_mut();
                let actual = file.read_at(offset, &mut bytes[..read_len]);
                if actual != read_len {
                    error!(
                        "pid {} exec read at {offset:#x}: want {read_len} bytes, got {actual}",
                        space.pid()
                    );
                    return Err(Fatal::ExecShortRead {
                        expected: read_len,
                        actual,
                    });
                }
                bytes[read_len..].fill(0);
                self.counters.lock().exec_loads += 1;
            }
            Plan::Swap { slot } => {
                self.swap.read(&slot, acquired.bytes_mut());
                self.swap.free(slot);
                // 交换区副本已销毁，换入的页必须按脏页对待
                dirty = true;
                self.counters.lock().swap_restores += 1;
            }
        }

        let acquired = ScopeGuard::into_inner(acquired);
        self.frames.install(acquired, !read_only, dirty)?;
        trace!("pid {} fault at {addr:?} resolved -> {ppn:?}", space.pid());
        Ok(())
    }

    /// 不在补充页表里的地址：要么是合法的栈增长，要么是野指针
    fn grow_stack(
        &self,
        space: &Arc<ProcessSpace>,
        addr: VirtAddr,
        flags: FaultFlags,
        stack_ptr: VirtAddr,
    ) -> Result<(), Fatal> {
        let stack_floor = LOW_ADDRESS_END - USER_STACK_SIZE;
        // 压栈指令先减 sp 再访存，光标略低于 sp 也算数
        let plausible = addr.0 + STACK_GROW_SLACK >= stack_ptr.0 && addr.0 >= stack_floor;
        if !plausible {
            return Err(self.violation(space, addr, flags, "not a stack growth"));
        }
        let vpn = addr.vpn_floor();
        let acquired = match self.frames.acquire(&self.swap, space, vpn, true) {
            Ok(acquired) => acquired,
            Err(SwapFull) => {
                error!("pid {} stack growth at {addr:?}: swap exhausted", space.pid());
                return Err(Fatal::SwapExhausted);
            }
        };
        // 栈页不登记描述符；被干净置换时帧表会补一个零页配方
        self.frames.install(acquired, true, false)?;
        self.counters.lock().stack_growths += 1;
        debug!("pid {} stack grows to {vpn:?}", space.pid());
        Ok(())
    }

    fn violation(
        &self,
        space: &Arc<ProcessSpace>,
        addr: VirtAddr,
        flags: FaultFlags,
        reason: &str,
    ) -> Fatal {
        self.counters.lock().violations += 1;
        error!(
            "pid {} access violation at {addr:?} ({flags:?}): {reason}",
            space.pid()
        );
        Fatal::AccessViolation { addr, flags }
    }

    /// 进程退出后的清算：回收全部驻留帧（不写回）并归还其交换
    /// 槽位。调用时该进程必须已不再运行
    pub fn release_all(&self, space: &Arc<ProcessSpace>) {
        self.frames.release_space(space);
        let drained = core::mem::take(&mut *space.pages());
        let mut freed = 0usize;
        for (_, state) in drained {
            match state {
                PageState::Ready(mut desc) => {
                    if let Some(slot) = desc.take_swap_slot() {
                        self.swap.free(slot);
                        freed += 1;
                    }
                }
                PageState::Evicting => unreachable!("eviction still in flight at teardown"),
            }
        }
        debug!("pid {} released, {freed} swap slots reclaimed", space.pid());
    }

    /// 钉住（或解除钉住）一个驻留页，如系统调用手伸进用户缓冲
    /// 区期间。页不驻留、或正被写回/填充时返回 `false`。
    ///
    /// 解除钉住只该由钉住它的一方来做
    pub fn pin_page(&self, space: &Arc<ProcessSpace>, vpn: VirtPageNum, pinned: bool) -> bool {
        self.frames.set_pinned(space, vpn, pinned)
    }

    /// 立即回收一个驻留页，脏页照常写回交换区。返回页面此前是
    /// 否驻留
    pub fn free_page(
        &self,
        space: &Arc<ProcessSpace>,
        vpn: VirtPageNum,
    ) -> Result<bool, SwapFull> {
        self.frames.reclaim(&self.swap, space, vpn)
    }

    pub fn stats(&self) -> VmStats {
        let counters = self.counters.lock();
        let (evicted_clean, evicted_dirty) = self.frames.eviction_counts();
        let (swap_reads, swap_writes) = self.swap.io_counts();
        VmStats {
            faults: counters.faults,
            zero_fills: counters.zero_fills,
            exec_loads: counters.exec_loads,
            swap_restores: counters.swap_restores,
            stack_growths: counters.stack_growths,
            violations: counters.violations,
            evicted_clean,
            evicted_dirty,
            swap_reads,
            swap_writes,
            slots_in_use: self.swap.slots_in_use(),
        }
    }

    /// 把调页统计打一行日志
    pub fn log_stats(&self) {
        let stats = self.stats();
        info!(
            "vm stats: {} faults ({} zero, {} exec, {} swap-in, {} stack, {} violation), {} evictions ({} dirty), {} slots in use",
            stats.faults,
            stats.zero_fills,
            stats.exec_loads,
            stats.swap_restores,
            stats.stack_growths,
            stats.violations,
            stats.evicted_clean + stats.evicted_dirty,
            stats.evicted_dirty,
            stats.slots_in_use,
        );
    }
}
