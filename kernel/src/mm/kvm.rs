//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 内核页表与进程的内核影子页表
//!
//! 全局内核页表直接映射设备寄存器、内核镜像和全部 RAM。
//! 每个进程另有一张影子页表：内核部分与全局页表相同（不含 CLINT），
//! 低地址部分镜像该进程的用户映射，但去掉 U 位。
//! 这样内核不切换页表就能直接解引用用户指针。
//!
//! 影子页表中的用户叶子只是引用，数据页帧始终归用户页表所有。

use crate::arch::mm::{PteFlags, PteKind};
use crate::errno::Errno;

use super::frame_allocator::FrameAllocator;
use super::layout::MemoryLayout;
use super::page::{page_round_up, PhysAddr, VirtAddr, PAGE_SIZE};
use super::page_table::PageTable;

const DEVICE_RW: PteFlags = PteFlags::R.union(PteFlags::W);
const KERNEL_RX: PteFlags = PteFlags::R.union(PteFlags::X);
const KERNEL_RW: PteFlags = PteFlags::R.union(PteFlags::W);

/// 直接映射 (kvmmap)
fn direct_map(
    table: &mut PageTable,
    frames: &FrameAllocator,
    pa: PhysAddr,
    size: usize,
    perm: PteFlags,
) -> Result<(), Errno> {
    table.map_range(frames, VirtAddr::new(pa.as_usize()), size, pa, perm)
}

/// 全局页表和影子页表共有的映射
fn map_kernel(table: &mut PageTable, frames: &FrameAllocator, layout: &MemoryLayout) -> Result<(), Errno> {
    direct_map(table, frames, layout.uart0, PAGE_SIZE, DEVICE_RW)?;
    direct_map(table, frames, layout.virtio0, PAGE_SIZE, DEVICE_RW)?;
    direct_map(table, frames, layout.plic, layout.plic_size, DEVICE_RW)?;

    let text = layout.etext.as_usize() - layout.kernbase.as_usize();
    direct_map(table, frames, layout.kernbase, text, KERNEL_RX)?;
    let data = layout.phystop.as_usize() - layout.etext.as_usize();
    direct_map(table, frames, layout.etext, data, KERNEL_RW)?;

    table.map_range(frames, MemoryLayout::TRAMPOLINE, PAGE_SIZE, layout.trampoline, KERNEL_RX)
}

/// 建立全局内核页表 (kvminit)
pub fn kernel_table(frames: &FrameAllocator, layout: &MemoryLayout) -> Result<PageTable, Errno> {
    let mut table = PageTable::create(frames).ok_or(Errno::OutOfMemory)?;
    let built = direct_map(&mut table, frames, layout.clint, layout.clint_size, DEVICE_RW)
        .and_then(|()| map_kernel(&mut table, frames, layout));
    if let Err(e) = built {
        table.free_tables_keep_leaves(frames);
        return Err(e);
    }
    log::info!("mm: kernel page table at {:#x}", table.root().as_usize());
    Ok(table)
}

/// 为进程创建内核影子页表 (kvm_init_pgtbl)
///
/// CLINT 位于用户地址范围内，只映射在全局页表里
pub fn new_shadow(frames: &FrameAllocator, layout: &MemoryLayout) -> Result<PageTable, Errno> {
    let mut table = PageTable::create(frames).ok_or(Errno::OutOfMemory)?;
    if let Err(e) = map_kernel(&mut table, frames, layout) {
        table.free_tables_keep_leaves(frames);
        return Err(e);
    }
    Ok(table)
}

/// 把用户页表 `[round_up(start), start + size)` 的叶子复制到影子页表 (kvmcopymappings)
///
/// 只复制页表项（同一个页帧，权限去掉 U），不复制数据。
/// 源页表缺页说明两张表已经失步，是致命错误。
/// 失败时撤销本次在影子页表中建立的全部映射。
pub fn sync_grow(
    shadow: &mut PageTable,
    user: &PageTable,
    frames: &FrameAllocator,
    start: usize,
    size: usize,
) -> Result<(), Errno> {
    let first = page_round_up(start);
    let mut a = first;
    while a < start + size {
        let va = VirtAddr::new(a);
        let (frame, flags) = match user.lookup(frames, va).map(|pte| pte.kind()) {
            Some(PteKind::Leaf(frame, flags)) => (frame, flags),
            _ => panic!("sync_grow: page not present {:#x}", a),
        };
        let perm = flags - PteFlags::U - PteFlags::V;
        if let Err(e) = shadow.map_range(frames, va, PAGE_SIZE, frame.start_address(), perm) {
            if a > first {
                shadow.unmap_range(frames, VirtAddr::new(first), (a - first) / PAGE_SIZE, false);
            }
            return Err(e);
        }
        a += PAGE_SIZE;
    }
    Ok(())
}

/// 撤销影子页表中 `new_size` 之上的用户镜像，不释放页帧 (kvmdealloc)
///
/// 与 [`super::uvm::shrink`] 的返回值约定相同
pub fn sync_shrink(shadow: &mut PageTable, frames: &FrameAllocator, old_size: usize, new_size: usize) -> usize {
    if new_size >= old_size {
        return new_size;
    }

    let (lo, hi) = (page_round_up(new_size), page_round_up(old_size));
    if lo < hi {
        shadow.unmap_range(frames, VirtAddr::new(lo), (hi - lo) / PAGE_SIZE, false);
    }
    new_size
}

/// 释放影子页表的全部页表页，不释放任何叶子页帧 (kvm_free_kernelpgtbl)
pub fn destroy_shadow(shadow: PageTable, frames: &FrameAllocator) {
    shadow.free_tables_keep_leaves(frames);
}
