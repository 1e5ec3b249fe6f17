//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 内存管理模块
//!
//! - [`frame_allocator`]：物理页帧分配
//! - [`page_table`]：Sv39 页表遍历与映射原语
//! - [`uvm`] / [`kvm`]：用户页表与内核影子页表的生命周期
//! - [`address_space`]：两张页表组成的进程地址空间
//! - [`uaccess`] / [`loader`]：跨越用户/内核边界的数据传输
//!
//! 全局状态（空闲链表、内核页表）集中在 [`KernelMemory`] 中，
//! 启动时构造一次，之后以共享引用传给需要它的操作。

pub mod address_space;
pub mod frame_allocator;
pub mod kvm;
pub mod layout;
pub mod loader;
pub mod page;
pub mod page_table;
pub mod phys;
pub mod uaccess;
pub mod uvm;

pub use address_space::AddressSpace;
pub use frame_allocator::FrameAllocator;
pub use layout::MemoryLayout;
pub use page::{PhysAddr, PhysFrame, VirtAddr, VirtPage, PAGE_SIZE};
pub use page_table::{PageTable, TableDump};
pub use phys::PhysMemory;

use crate::arch::mm::activate;
use crate::errno::Errno;

/// 内核内存管理的全局上下文
pub struct KernelMemory {
    layout: MemoryLayout,
    frames: FrameAllocator,
    kernel_table: PageTable,
}

impl KernelMemory {
    /// 接管 `[end, PHYSTOP)` 的页帧并建立全局内核页表 (kinit + kvminit)
    pub fn init(layout: MemoryLayout) -> Result<Self, Errno> {
        let mem = PhysMemory::new(layout.kernbase, layout.ram_frames());
        let frames = FrameAllocator::init(mem, layout.end, layout.phystop);
        let kernel_table = kvm::kernel_table(&frames, &layout)?;
        Ok(Self {
            layout,
            frames,
            kernel_table,
        })
    }

    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    pub fn kernel_table(&self) -> &PageTable {
        &self.kernel_table
    }

    /// 切换到全局内核页表 (kvminithart)
    pub fn activate(&self) {
        activate(self.kernel_table.satp());
    }

    /// 内核虚拟地址转物理地址 (kvmpa)
    pub fn translate(&self, va: VirtAddr) -> PhysAddr {
        self.kernel_table.translate_kernel(&self.frames, va)
    }

    /// 为新进程创建空的地址空间
    pub fn new_address_space(&self) -> Result<AddressSpace, Errno> {
        AddressSpace::new(&self.frames, &self.layout)
    }
}
