//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! Sv39 内存管理核心
//!
//! 物理页帧分配器、三级页表、进程地址空间（用户页表 + 内核影子页表）
//! 以及用户/内核之间的数据拷贝。
//!
//! 在裸机 RISC-V 上作为 `no_std` 库链接进内核；
//! 在宿主机上测试时，物理内存由一组页帧模拟。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod errno;
pub mod mm;

#[cfg(test)]
mod tests;

pub use errno::Errno;
pub use mm::{AddressSpace, FrameAllocator, KernelMemory, MemoryLayout, PageTable};
