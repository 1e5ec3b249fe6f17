//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! RISC-V 64位架构支持
//!
//! 只包含内存子系统需要的硬件格式：页表项、satp 与 TLB 刷新

pub mod mm;
