//! 地址与页号的新类型。
//!
//! 物理侧和虚拟侧各自一对，页号与字节地址之间只做显式转换，
//! 避免页粒度的量和页内偏移混在一起。

use core::{
    fmt,
    ops::{Add, AddAssign},
};

use common::config::{PAGE_OFFSET_MASK, PAGE_SIZE, PAGE_SIZE_BITS};

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysAddr(pub usize);

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysPageNum(pub usize);

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtAddr(pub usize);

#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VirtPageNum(pub usize);

impl PhysAddr {
    /// 所在物理页的页号（向下取整）
    pub const fn ppn_floor(self) -> PhysPageNum {
        PhysPageNum(self.0 >> PAGE_SIZE_BITS)
    }
}

impl PhysPageNum {
    /// 页首的物理地址
    pub const fn page_start(self) -> PhysAddr {
        PhysAddr(self.0 << PAGE_SIZE_BITS)
    }

    /// 以字节数组的形式访问该物理页
    ///
    /// # Safety
    ///
    /// 需保证该页号对应一个有效的物理页，且借用期间无人写它
    pub unsafe fn as_page_bytes<'a>(self) -> &'a [u8; PAGE_SIZE] {
        unsafe { &*(self.page_start().0 as *const [u8; PAGE_SIZE]) }
    }

    /// 以可变字节数组的形式访问该物理页
    ///
    /// # Safety
    ///
    /// 需保证该页号对应一个有效的物理页，且借用期间被调用者独占
    pub unsafe fn as_page_bytes_mut<'a>(self) -> &'a mut [u8; PAGE_SIZE] {
        unsafe { &mut *(self.page_start().0 as *mut [u8; PAGE_SIZE]) }
    }
}

impl VirtAddr {
    /// 所在虚拟页的页号（向下取整）
    pub const fn vpn_floor(self) -> VirtPageNum {
        VirtPageNum(self.0 >> PAGE_SIZE_BITS)
    }

    /// 向上取整的页号
    pub const fn vpn_ceil(self) -> VirtPageNum {
        VirtPageNum(self.0.div_ceil(PAGE_SIZE))
    }

    /// 页内偏移
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_OFFSET_MASK
    }
}

impl VirtPageNum {
    /// 页首的虚拟地址
    pub const fn page_start(self) -> VirtAddr {
        VirtAddr(self.0 << PAGE_SIZE_BITS)
    }
}

impl Add<usize> for VirtPageNum {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

impl AddAssign<usize> for VirtPageNum {
    fn add_assign(&mut self, rhs: usize) {
        self.0 += rhs;
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA:{:#x}", self.0)
    }
}

impl fmt::Debug for PhysPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PPN:{:#x}", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA:{:#x}", self.0)
    }
}

impl fmt::Debug for VirtPageNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VPN:{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        let addr = VirtAddr(PAGE_SIZE * 3 + 17);
        assert_eq!(addr.vpn_floor(), VirtPageNum(3));
        assert_eq!(addr.vpn_ceil(), VirtPageNum(4));
        assert_eq!(addr.page_offset(), 17);
        assert_eq!(VirtAddr(PAGE_SIZE * 3).vpn_ceil(), VirtPageNum(3));
        assert_eq!(VirtPageNum(3).page_start(), VirtAddr(PAGE_SIZE * 3));
    }

    #[test]
    fn phys_rounding() {
        assert_eq!(PhysAddr(PAGE_SIZE + 1).ppn_floor(), PhysPageNum(1));
        assert_eq!(PhysPageNum(2).page_start(), PhysAddr(PAGE_SIZE * 2));
    }
}
