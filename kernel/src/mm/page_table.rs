//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! Sv39 页表：遍历器与映射原语
//!
//! `PageTable` 只是根页表页帧的句柄，页表页本身放在物理内存里，
//! 按硬件格式存放 PTE。所有修改都要求调用者独占这张页表，
//! 这里不做任何加锁。

use core::fmt;

use crate::arch::mm::{px, PageTableEntry, PteFlags, PteKind, Satp, MAXVA, PT_ENTRIES, PT_LEVELS, PX_BITS};
use crate::errno::Errno;

use super::frame_allocator::FrameAllocator;
use super::page::{PhysAddr, PhysFrame, VirtAddr, PAGE_SHIFT, PAGE_SIZE};
use super::phys::PhysMemory;

/// 页表项在物理内存中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PteSlot(PhysAddr);

impl PteSlot {
    fn new(table: PhysAddr, index: usize) -> Self {
        Self(table + index * core::mem::size_of::<PageTableEntry>())
    }

    /// 页表项的物理地址
    pub fn addr(&self) -> PhysAddr {
        self.0
    }

    pub fn load(&self, mem: &PhysMemory) -> PageTableEntry {
        PageTableEntry::from_bits(mem.read_u64(self.0))
    }

    pub fn store(&self, mem: &PhysMemory, pte: PageTableEntry) {
        mem.write_u64(self.0, pte.bits());
    }
}

/// 三级 Sv39 页表
#[must_use = "page tables own frames and must be destroyed explicitly"]
#[derive(Debug, PartialEq, Eq)]
pub struct PageTable {
    root: PhysAddr,
}

impl PageTable {
    /// 分配一个清零的根页表 (uvmcreate)
    ///
    /// 内存耗尽时返回 `None`
    pub fn create(frames: &FrameAllocator) -> Option<Self> {
        let root = frames.allocate_zeroed()?;
        log::trace!("mm: page table created, root={:#x}", root.as_usize());
        Some(Self { root })
    }

    /// 根页表的物理地址
    #[inline]
    pub fn root(&self) -> PhysAddr {
        self.root
    }

    /// 用于 satp 的值
    pub fn satp(&self) -> Satp {
        Satp::sv39(self.root.ppn() as u64)
    }

    /// 查找 `va` 对应的第 0 级页表项 (walk)
    ///
    /// 中间页表不存在时：`alloc` 为 false 返回 `None`；
    /// 为 true 则分配清零的页帧作为新的中间页表，分配失败返回 `None`。
    /// `va` 超出 MAXVA 是调用者的错误。
    pub fn walk(&self, frames: &FrameAllocator, va: VirtAddr, alloc: bool) -> Option<PteSlot> {
        if va.as_usize() >= MAXVA {
            panic!("walk: va out of range {:#x}", va.as_usize());
        }

        let mem = frames.memory();
        let mut table = self.root;
        for level in (1..PT_LEVELS).rev() {
            let slot = PteSlot::new(table, px(level, va));
            table = match slot.load(mem).kind() {
                PteKind::Table(child) => child.start_address(),
                PteKind::Leaf(..) => panic!("walk: leaf at level {}", level),
                PteKind::Invalid => {
                    if !alloc {
                        return None;
                    }
                    let child = frames.allocate_zeroed()?;
                    slot.store(mem, PageTableEntry::new_table(PhysFrame::containing_address(child)));
                    child
                }
            };
        }
        Some(PteSlot::new(table, px(0, va)))
    }

    /// 只读查找，不分配中间页表
    pub fn lookup(&self, frames: &FrameAllocator, va: VirtAddr) -> Option<PageTableEntry> {
        self.walk(frames, va, false).map(|slot| slot.load(frames.memory()))
    }

    /// 用户虚拟地址转物理地址 (walkaddr)
    ///
    /// 未映射、超出范围或没有 U 位都返回 `None`：
    /// 用户传入的地址无效是正常情况，不是内核错误
    pub fn walk_addr(&self, frames: &FrameAllocator, va: VirtAddr) -> Option<PhysAddr> {
        if va.as_usize() >= MAXVA {
            return None;
        }
        match self.lookup(frames, va)?.kind() {
            PteKind::Leaf(frame, flags) if flags.contains(PteFlags::U) => Some(frame.start_address()),
            _ => None,
        }
    }

    /// 内核虚拟地址转物理地址 (kvmpa)
    ///
    /// 只用于已知映射存在的地址（例如内核栈），不存在即致命错误
    pub fn translate_kernel(&self, frames: &FrameAllocator, va: VirtAddr) -> PhysAddr {
        match self.lookup(frames, va.floor()).map(|pte| pte.kind()) {
            Some(PteKind::Leaf(frame, _)) => frame.start_address() + va.page_offset(),
            _ => panic!("translate_kernel: {:#x} not mapped", va.as_usize()),
        }
    }

    /// 为 `[va, va + size)` 覆盖到的每一页建立映射 (mappages)
    ///
    /// 物理地址从 `pa` 开始按页递增。`size` 为 0 或目标页已映射都是致命错误。
    /// 中间页表分配失败时撤销本次已经建立的叶子映射，返回 `OutOfMemory`。
    pub fn map_range(
        &mut self,
        frames: &FrameAllocator,
        va: VirtAddr,
        size: usize,
        pa: PhysAddr,
        perm: PteFlags,
    ) -> Result<(), Errno> {
        if size == 0 {
            panic!("map_range: size");
        }

        let mem = frames.memory();
        let first = va.floor();
        let last = VirtAddr::new(va.as_usize() + size - 1).floor();
        let mut a = first;
        let mut pa = pa.floor();
        loop {
            let slot = match self.walk(frames, a, true) {
                Some(slot) => slot,
                None => {
                    let installed = (a.as_usize() - first.as_usize()) / PAGE_SIZE;
                    if installed > 0 {
                        self.unmap_range(frames, first, installed, false);
                    }
                    return Err(Errno::OutOfMemory);
                }
            };
            if slot.load(mem).is_valid() {
                panic!("map_range: remap {:#x}", a.as_usize());
            }
            slot.store(mem, PageTableEntry::new_leaf(PhysFrame::containing_address(pa), perm));
            #[cfg(feature = "debug_log")]
            log::trace!("mm: map {:#x} -> {:#x} {:?}", a.as_usize(), pa.as_usize(), perm);

            if a == last {
                break;
            }
            a = a + PAGE_SIZE;
            pa = pa + PAGE_SIZE;
        }
        Ok(())
    }

    /// 移除从 `va` 开始的 `npages` 个叶子映射 (uvmunmap)
    ///
    /// `va` 必须页对齐，每一页都必须已经映射为叶子；
    /// `free` 为 true 时把数据页帧还给分配器
    pub fn unmap_range(&mut self, frames: &FrameAllocator, va: VirtAddr, npages: usize, free: bool) {
        if !va.is_aligned() {
            panic!("unmap_range: not aligned {:#x}", va.as_usize());
        }

        let mem = frames.memory();
        for i in 0..npages {
            let a = va + i * PAGE_SIZE;
            let slot = match self.walk(frames, a, false) {
                Some(slot) => slot,
                None => panic!("unmap_range: walk {:#x}", a.as_usize()),
            };
            match slot.load(mem).kind() {
                PteKind::Invalid => panic!("unmap_range: not mapped {:#x}", a.as_usize()),
                PteKind::Table(_) => panic!("unmap_range: not a leaf {:#x}", a.as_usize()),
                PteKind::Leaf(frame, _) => {
                    if free {
                        frames.deallocate(frame.start_address());
                    }
                    slot.store(mem, PageTableEntry::INVALID);
                    #[cfg(feature = "debug_log")]
                    log::trace!("mm: unmap {:#x} (free={})", a.as_usize(), free);
                }
            }
        }
    }

    /// 去掉一个叶子的 U 位 (uvmclear)
    ///
    /// 用于用户栈下方的保护页
    pub fn clear_user(&mut self, frames: &FrameAllocator, va: VirtAddr) {
        let mem = frames.memory();
        let slot = match self.walk(frames, va, false) {
            Some(slot) => slot,
            None => panic!("clear_user: {:#x} has no page table", va.as_usize()),
        };
        let pte = slot.load(mem);
        slot.store(mem, PageTableEntry::from_bits(pte.bits() & !PteFlags::U.bits()));
    }

    /// 递归释放所有页表页 (freewalk)
    ///
    /// 所有叶子映射必须已经移除，遇到叶子即致命错误
    pub fn free_tables(self, frames: &FrameAllocator) {
        free_level(frames, self.root, true);
    }

    /// 递归释放所有页表页，但不触碰叶子指向的页帧
    ///
    /// 叶子映射的页帧归别人所有（内核影子页表）
    pub fn free_tables_keep_leaves(self, frames: &FrameAllocator) {
        free_level(frames, self.root, false);
    }

    /// 以缩进形式打印所有有效页表项 (vmprint)
    pub fn dump<'a>(&'a self, frames: &'a FrameAllocator) -> TableDump<'a> {
        TableDump { table: self, frames }
    }

    /// 遍历所有叶子，回调参数为 (虚拟地址, 页表项)
    pub fn for_each_leaf(&self, frames: &FrameAllocator, mut f: impl FnMut(VirtAddr, PageTableEntry)) {
        visit_leaves(frames.memory(), self.root, PT_LEVELS - 1, 0, &mut f);
    }
}

fn free_level(frames: &FrameAllocator, table: PhysAddr, strict: bool) {
    let mem = frames.memory();
    for i in 0..PT_ENTRIES {
        let slot = PteSlot::new(table, i);
        match slot.load(mem).kind() {
            PteKind::Invalid => {}
            PteKind::Table(child) => {
                free_level(frames, child.start_address(), strict);
                slot.store(mem, PageTableEntry::INVALID);
            }
            PteKind::Leaf(..) if strict => panic!("free_tables: leaf at index {}", i),
            PteKind::Leaf(..) => {}
        }
    }
    frames.deallocate(table);
}

fn visit_leaves(
    mem: &PhysMemory,
    table: PhysAddr,
    level: usize,
    va_base: usize,
    f: &mut impl FnMut(VirtAddr, PageTableEntry),
) {
    for i in 0..PT_ENTRIES {
        let pte = PteSlot::new(table, i).load(mem);
        let va = va_base | (i << (PAGE_SHIFT + PX_BITS * level));
        match pte.kind() {
            PteKind::Invalid => {}
            PteKind::Table(child) if level > 0 => visit_leaves(mem, child.start_address(), level - 1, va, f),
            PteKind::Table(_) => panic!("for_each_leaf: table entry at level 0"),
            PteKind::Leaf(..) => f(VirtAddr::new(va), pte),
        }
    }
}

/// 页表的诊断输出
///
/// ```text
/// page table 0x80005000
/// ..0: pte 0x20001401 pa 0x80005000
/// .. ..0: pte 0x20001801 pa 0x80006000
/// .. .. ..0: pte 0x2000201f pa 0x80008000
/// ```
pub struct TableDump<'a> {
    table: &'a PageTable,
    frames: &'a FrameAllocator,
}

impl TableDump<'_> {
    fn dump_level(&self, f: &mut fmt::Formatter<'_>, table: PhysAddr, depth: usize) -> fmt::Result {
        let mem = self.frames.memory();
        for i in 0..PT_ENTRIES {
            let pte = PteSlot::new(table, i).load(mem);
            if !pte.is_valid() {
                continue;
            }
            f.write_str("..")?;
            for _ in 0..depth {
                f.write_str(" ..")?;
            }
            writeln!(f, "{}: pte {:#x} pa {:#x}", i, pte.bits(), pte.phys_addr().as_usize())?;
            if let PteKind::Table(child) = pte.kind() {
                self.dump_level(f, child.start_address(), depth + 1)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for TableDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "page table {:#x}", self.table.root.as_usize())?;
        self.dump_level(f, self.table.root, 0)
    }
}
