//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 页与页帧的地址类型

use core::fmt;
use core::ops::Add;

pub const PAGE_SIZE: usize = 4096;

pub const PAGE_SHIFT: usize = 12;

pub const PAGE_MASK: usize = PAGE_SIZE - 1;

pub type PhysFrameNr = usize;

pub type VirtPageNr = usize;

/// 向上取整到页边界 (PGROUNDUP)
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_MASK) & !PAGE_MASK
}

/// 向下取整到页边界 (PGROUNDDOWN)
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !PAGE_MASK
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(pub usize);

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(pub usize);

impl PhysAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_usize(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    #[inline]
    pub fn floor(&self) -> Self {
        Self(page_round_down(self.0))
    }

    #[inline]
    pub fn ceil(&self) -> Self {
        Self(page_round_up(self.0))
    }

    #[inline]
    pub fn page_offset(&self) -> usize {
        self.0 & PAGE_MASK
    }

    /// 获取物理页号 (PPN)
    #[inline]
    pub fn ppn(&self) -> PhysFrameNr {
        self.0 >> PAGE_SHIFT
    }
}

impl VirtAddr {
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn as_usize(&self) -> usize {
        self.0
    }

    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    #[inline]
    pub fn floor(&self) -> Self {
        Self(page_round_down(self.0))
    }

    #[inline]
    pub fn ceil(&self) -> Self {
        Self(page_round_up(self.0))
    }

    #[inline]
    pub fn page_offset(&self) -> usize {
        self.0 & PAGE_MASK
    }

    #[inline]
    pub fn page_number(&self) -> VirtPageNr {
        self.0 >> PAGE_SHIFT
    }
}

/// 物理页帧，以物理页号标识
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysFrame {
    pub number: PhysFrameNr,
}

impl PhysFrame {
    pub const fn new(number: PhysFrameNr) -> Self {
        Self { number }
    }

    pub fn containing_address(addr: PhysAddr) -> Self {
        Self::new(addr.ppn())
    }

    pub fn start_address(&self) -> PhysAddr {
        PhysAddr(self.number << PAGE_SHIFT)
    }
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtPage {
    pub number: VirtPageNr,
}

impl VirtPage {
    pub const fn new(number: VirtPageNr) -> Self {
        Self { number }
    }

    pub fn containing_address(addr: VirtAddr) -> Self {
        Self::new(addr.page_number())
    }

    pub fn start_address(&self) -> VirtAddr {
        VirtAddr(self.number << PAGE_SHIFT)
    }
}

impl Add<usize> for PhysAddr {
    type Output = Self;

    #[inline]
    fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }
}

impl Add<usize> for VirtAddr {
    type Output = Self;

    #[inline]
    fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }
}

// --- Debug 实现（日志里以十六进制显示） ---

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl fmt::Debug for PhysFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysFrame({:#x})", self.start_address().0)
    }
}

impl fmt::Debug for VirtPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtPage({:#x})", self.start_address().0)
    }
}
