//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 场景测试与性质测试
//!
//! 每个文件对应一个子系统，在宿主机上以模拟的物理内存运行：
//! ```bash
//! cargo test -p sv39-mm
//! ```

mod page_table;
mod properties;

use crate::mm::{FrameAllocator, KernelMemory, MemoryLayout, PhysAddr, PhysMemory, PAGE_SIZE};

/// RAM 起始地址
pub(crate) const RAM_BASE: PhysAddr = PhysAddr::new(0x8000_0000);

/// `nframes` 个页帧全部交给分配器
pub(crate) fn frames(nframes: usize) -> FrameAllocator {
    let mem = PhysMemory::new(RAM_BASE, nframes);
    let end = mem.end();
    FrameAllocator::init(mem, RAM_BASE, end)
}

/// 一台只有 `pages` 页 RAM 的机器
pub(crate) fn machine(pages: usize) -> KernelMemory {
    KernelMemory::init(MemoryLayout::with_memory_size(pages * PAGE_SIZE)).expect("kernel memory init")
}
