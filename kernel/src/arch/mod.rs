//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 架构相关代码
//!
//! 当前支持的架构：
//! - **RISC-V (riscv64)** - Sv39 三级页表

pub mod riscv64;

// 导出 mm 模块
pub use riscv64::mm;
