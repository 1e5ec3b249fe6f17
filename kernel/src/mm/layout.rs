//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 物理/虚拟内存布局 (memlayout)
//!
//! QEMU virt 平台：
//!
//! ```text
//! 0x02000000  CLINT
//! 0x0C000000  PLIC
//! 0x10000000  UART0
//! 0x10001000  VIRTIO0
//! KERNBASE    内核代码 (KERNBASE .. etext)
//! etext       内核数据 (etext .. end)
//! end         可分配的物理页帧 (end .. PHYSTOP)
//! TRAMPOLINE  最高虚拟页，映射 trap 跳板
//! ```
//!
//! 用户空间从虚拟地址 0 开始，必须低于 PLIC，
//! 否则会和内核影子页表里的设备映射重叠。

use crate::arch::mm::MAXVA;
use crate::config;

use super::page::{PhysAddr, VirtAddr, PAGE_SIZE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// 内核加载地址，也是 RAM 起始地址
    pub kernbase: PhysAddr,
    /// 内核代码段结束
    pub etext: PhysAddr,
    /// 内核镜像结束，之后的页帧交给分配器
    pub end: PhysAddr,
    /// RAM 结束
    pub phystop: PhysAddr,
    /// trap 跳板代码所在的物理页（位于内核代码段）
    pub trampoline: PhysAddr,
    pub uart0: PhysAddr,
    pub virtio0: PhysAddr,
    pub clint: PhysAddr,
    pub clint_size: usize,
    pub plic: PhysAddr,
    pub plic_size: usize,
}

impl MemoryLayout {
    /// trap 跳板的虚拟地址：最高的一个虚拟页
    pub const TRAMPOLINE: VirtAddr = VirtAddr::new(MAXVA - PAGE_SIZE);

    /// 按配置文件生成的布局
    pub const fn from_config() -> Self {
        let kernbase = config::PHYS_MEMORY_BASE;
        let etext = kernbase + config::KERNEL_TEXT_SIZE;
        Self {
            kernbase: PhysAddr::new(kernbase),
            etext: PhysAddr::new(etext),
            end: PhysAddr::new(etext + config::KERNEL_DATA_SIZE),
            phystop: PhysAddr::new(kernbase + config::PHYS_MEMORY_SIZE),
            trampoline: PhysAddr::new(etext - PAGE_SIZE),
            uart0: PhysAddr::new(config::UART0),
            virtio0: PhysAddr::new(config::VIRTIO0),
            clint: PhysAddr::new(config::CLINT),
            clint_size: config::CLINT_SIZE,
            plic: PhysAddr::new(config::PLIC),
            plic_size: config::PLIC_SIZE,
        }
    }

    /// 同样的设备地址，但只有 `bytes` 大小的 RAM
    ///
    /// 内核镜像缩成一页代码（即 trap 跳板）加一页数据，
    /// 其余全部交给分配器。用于模拟小内存的机器。
    pub const fn with_memory_size(bytes: usize) -> Self {
        let base = Self::from_config();
        let kernbase = base.kernbase.as_usize();
        let etext = kernbase + PAGE_SIZE;
        assert!(bytes % PAGE_SIZE == 0 && bytes > 2 * PAGE_SIZE, "layout: bad memory size");
        Self {
            etext: PhysAddr::new(etext),
            end: PhysAddr::new(etext + PAGE_SIZE),
            phystop: PhysAddr::new(kernbase + bytes),
            trampoline: PhysAddr::new(kernbase),
            ..base
        }
    }

    /// RAM 页帧数
    pub const fn ram_frames(&self) -> usize {
        (self.phystop.as_usize() - self.kernbase.as_usize()) / PAGE_SIZE
    }

    /// 用户地址空间上限（不含）
    pub const fn user_top(&self) -> usize {
        self.plic.as_usize()
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::from_config()
    }
}
