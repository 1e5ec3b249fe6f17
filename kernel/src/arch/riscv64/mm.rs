//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! RISC-V Sv39 页表硬件格式
//!
//! RISC-V Sv39 分页规范：
//! - 3 级页表（512 PTE/级）
//! - 39 位虚拟地址（512GB），为避免符号扩展只使用低 38 位
//! - 4KB 页大小
//! - 页表项：44 位 PPN + 10 位标志
//!
//! 虚拟地址划分：
//! - 39..63 必须为 0
//! - 30..38 第 2 级索引
//! - 21..29 第 1 级索引
//! - 12..20 第 0 级索引
//! - 0..11  页内偏移
//!
//! 参考：
//! - RISC-V 特权架构规范 v20211203
//! - Linux arch/riscv/include/asm/pgtable.h

use core::fmt;

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::mm::page::{PhysAddr, PhysFrame, VirtAddr, PAGE_SHIFT, PAGE_SIZE};

// ==================== 常量定义 ====================

/// 每级页表的索引位数
pub const PX_BITS: usize = 9;

/// 每级页表的页表项个数
pub const PT_ENTRIES: usize = 1 << PX_BITS;

/// 页表级数
pub const PT_LEVELS: usize = 3;

/// 最大虚拟地址（不含）
///
/// 比 Sv39 允许的少一位，避免对高位做符号扩展
pub const MAXVA: usize = 1 << (PX_BITS * PT_LEVELS + PAGE_SHIFT - 1);

const PX_MASK: usize = PT_ENTRIES - 1;

/// 提取第 `level` 级页表索引 (PX)
#[inline]
pub fn px(level: usize, va: VirtAddr) -> usize {
    (va.as_usize() >> (PAGE_SHIFT + PX_BITS * level)) & PX_MASK
}

// ==================== 页表项 ====================

bitflags! {
    /// Sv39 页表项标志位
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PteFlags: u64 {
        /// V (Valid) - 位 0
        const V = 1 << 0;
        /// R (Read) - 位 1
        const R = 1 << 1;
        /// W (Write) - 位 2
        const W = 1 << 2;
        /// X (Execute) - 位 3
        const X = 1 << 3;
        /// U (User) - 位 4
        const U = 1 << 4;
        /// G (Global) - 位 5
        const G = 1 << 5;
        /// A (Accessed) - 位 6
        const A = 1 << 6;
        /// D (Dirty) - 位 7
        const D = 1 << 7;
    }
}

impl PteFlags {
    /// 叶子项的访问权限位
    pub const RWX: PteFlags = PteFlags::R.union(PteFlags::W).union(PteFlags::X);

    /// 用户可读写执行
    pub const URWX: PteFlags = PteFlags::RWX.union(PteFlags::U);
}

/// 页表项的三种状态
///
/// 所有遍历代码只通过 [`PageTableEntry::kind`] 判断状态，
/// 不直接检查标志位
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PteKind {
    /// 无效：不指向任何页帧
    Invalid,
    /// 中间项：V 置位，R/W/X 全部清零，指向下一级页表
    Table(PhysFrame),
    /// 叶子项：V 置位且 R/W/X 至少一位置位，指向数据页帧
    Leaf(PhysFrame, PteFlags),
}

/// RISC-V Sv39 页表项（PTE）
///
/// 格式：[63:54] 保留, [53:10] PPN, [9:8] RSW, [7:0] 标志
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

const_assert_eq!(core::mem::size_of::<PageTableEntry>(), 8);
const_assert_eq!(PT_ENTRIES * core::mem::size_of::<PageTableEntry>(), PAGE_SIZE);

const PPN_SHIFT: u64 = 10;
const PPN_MASK: u64 = (1 << 44) - 1;
const FLAGS_MASK: u64 = 0x3ff;

impl PageTableEntry {
    /// 空页表项
    pub const INVALID: PageTableEntry = PageTableEntry(0);

    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// 创建指向下一级页表的 PTE（只有 V）
    #[inline]
    pub fn new_table(child: PhysFrame) -> Self {
        Self(((child.number as u64) << PPN_SHIFT) | PteFlags::V.bits())
    }

    /// 创建叶子 PTE
    ///
    /// `perm` 至少包含 R/W/X 之一，否则会被解释成中间项
    #[inline]
    pub fn new_leaf(frame: PhysFrame, perm: PteFlags) -> Self {
        assert!(perm.intersects(PteFlags::RWX), "pte: leaf without R/W/X");
        Self(((frame.number as u64) << PPN_SHIFT) | (perm | PteFlags::V).bits())
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.0 & PteFlags::V.bits() != 0
    }

    /// 物理页帧 (PTE2PA)
    #[inline]
    pub fn frame(&self) -> PhysFrame {
        PhysFrame::new(((self.0 >> PPN_SHIFT) & PPN_MASK) as usize)
    }

    /// 物理地址 (PTE2PA)
    #[inline]
    pub fn phys_addr(&self) -> PhysAddr {
        self.frame().start_address()
    }

    /// 标志位 (PTE_FLAGS)
    #[inline]
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    /// 解码页表项状态
    #[inline]
    pub fn kind(&self) -> PteKind {
        let flags = self.flags();
        if !flags.contains(PteFlags::V) {
            PteKind::Invalid
        } else if flags.intersects(PteFlags::RWX) {
            PteKind::Leaf(self.frame(), flags)
        } else {
            PteKind::Table(self.frame())
        }
    }
}

impl Default for PageTableEntry {
    fn default() -> Self {
        Self::INVALID
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageTableEntry({:#x}, {:?})", self.0, self.kind())
    }
}

// ==================== satp CSR ====================

/// satp CSR (Supervisor Address Translation and Protection)
///
/// 格式：[63:60] MODE, [59:44] ASID, [43:0] PPN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Satp(pub u64);

impl Satp {
    /// Bare (无地址翻译)
    pub const MODE_BARE: u64 = 0;

    /// Sv39 (39 位虚拟地址)
    pub const MODE_SV39: u64 = 8;

    #[inline]
    pub const fn new(mode: u64, asid: u16, ppn: u64) -> Self {
        Self((mode << 60) | ((asid as u64) << 44) | (ppn & PPN_MASK))
    }

    /// 创建 Sv39 satp (MAKE_SATP)
    #[inline]
    pub const fn sv39(ppn: u64) -> Self {
        Self::new(Self::MODE_SV39, 0, ppn)
    }

    #[inline]
    pub fn bits(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn mode(&self) -> u64 {
        self.0 >> 60
    }

    #[inline]
    pub fn ppn(&self) -> u64 {
        self.0 & PPN_MASK
    }
}

/// 切换到 `satp` 描述的页表并刷新整个 TLB
///
/// 每次切换根页表都无条件执行 `sfence.vma`，不做按 ASID 的精细刷新
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn activate(satp: Satp) {
    use riscv::register::satp as csr;

    log::debug!("mm: activate satp = {:#x} (PPN={:#x})", satp.bits(), satp.ppn());
    // SAFETY: 调用者保证页表映射了当前正在执行的内核代码和栈
    unsafe {
        csr::set(csr::Mode::Sv39, 0, satp.ppn() as usize);
        riscv::asm::sfence_vma_all();
    }
}

/// 宿主机上没有 MMU，只记录切换动作
#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn activate(satp: Satp) {
    log::trace!("mm: activate satp = {:#x} (hosted, no-op)", satp.bits());
}
