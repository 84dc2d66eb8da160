use crate::constant::MiB;

/// 一个页大小的 bit 数
pub const PAGE_SIZE_BITS: usize = 12;
/// 页大小
pub const PAGE_SIZE: usize = 1 << PAGE_SIZE_BITS;
/// 页内偏移的掩码
pub const PAGE_OFFSET_MASK: usize = PAGE_SIZE - 1;

/// 块设备一个扇区的大小
pub const SECTOR_SIZE: usize = 512;
/// 一个页占据的扇区数，交换区以此为单位组织槽位
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

/// 低地址（用户地址空间）的末端，即 256GiB 处
pub const LOW_ADDRESS_END: usize = 0x40_0000_0000;

/// 用户栈的大小上限，栈顶固定在低地址末端、向下增长
pub const USER_STACK_SIZE: usize = 8 * MiB;

/// 判定栈增长时允许越过栈指针的字节数
///
/// 某些压栈指令会先访问再移动栈指针，因此缺页地址略低于 sp 也视为合法
pub const STACK_GROW_SLACK: usize = 32;
