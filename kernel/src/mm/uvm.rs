//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 用户地址空间的生命周期原语
//!
//! 用户区域是从虚拟地址 0 开始的一段连续内存，`[0, size)` 内每一页都有映射，
//! 没有空洞。这里的每个操作都保持这个性质，失败时完整回滚。

use crate::arch::mm::{PteFlags, PteKind};
use crate::errno::Errno;

use super::frame_allocator::FrameAllocator;
use super::page::{page_round_up, VirtAddr, PAGE_SIZE};
use super::page_table::PageTable;

/// 用户数据页的默认权限
pub const USER_RWX: PteFlags = PteFlags::URWX;

/// 创建空的用户页表 (uvmcreate)
pub fn create(frames: &FrameAllocator) -> Result<PageTable, Errno> {
    PageTable::create(frames).ok_or(Errno::OutOfMemory)
}

/// 把第一个进程的代码放到虚拟地址 0 (uvminit)
///
/// `image` 必须小于一页
pub fn seed(table: &mut PageTable, frames: &FrameAllocator, image: &[u8]) -> Result<(), Errno> {
    if image.len() >= PAGE_SIZE {
        panic!("seed: more than a page");
    }

    let mem = frames.allocate_zeroed().ok_or(Errno::OutOfMemory)?;
    frames.memory().write(mem, image);
    if let Err(e) = table.map_range(frames, VirtAddr::new(0), PAGE_SIZE, mem, USER_RWX) {
        frames.deallocate(mem);
        return Err(e);
    }
    log::debug!("mm: seeded {} bytes at va 0", image.len());
    Ok(())
}

/// 把用户区域从 `old_size` 扩展到 `new_size` (uvmalloc)
///
/// 新页面清零并以用户 R/W/X 映射。`new_size <= old_size` 时什么都不做，
/// 返回 `old_size`。中途内存不足则释放本次分配的全部页面，
/// 页表恢复到调用前的叶子集合，返回 `OutOfMemory`。
pub fn grow(
    table: &mut PageTable,
    frames: &FrameAllocator,
    old_size: usize,
    new_size: usize,
) -> Result<usize, Errno> {
    if new_size <= old_size {
        return Ok(old_size);
    }

    let mut a = page_round_up(old_size);
    while a < new_size {
        let mapped = frames.allocate_zeroed().and_then(|mem| {
            match table.map_range(frames, VirtAddr::new(a), PAGE_SIZE, mem, USER_RWX) {
                Ok(()) => Some(()),
                Err(_) => {
                    frames.deallocate(mem);
                    None
                }
            }
        });
        if mapped.is_none() {
            shrink(table, frames, a, old_size);
            log::debug!("mm: grow {:#x} -> {:#x} failed, rolled back", old_size, new_size);
            return Err(Errno::OutOfMemory);
        }
        a += PAGE_SIZE;
    }

    log::debug!("mm: grow {:#x} -> {:#x}", old_size, new_size);
    Ok(new_size)
}

/// 把用户区域从 `old_size` 收缩到 `new_size` (uvmdealloc)
///
/// 释放两个页边界之间的页面。总是返回 `new_size`，
/// 包括 `new_size >= old_size` 的空操作，因此可以无条件地用于回滚。
pub fn shrink(table: &mut PageTable, frames: &FrameAllocator, old_size: usize, new_size: usize) -> usize {
    if new_size >= old_size {
        return new_size;
    }

    let (lo, hi) = (page_round_up(new_size), page_round_up(old_size));
    if lo < hi {
        table.unmap_range(frames, VirtAddr::new(lo), (hi - lo) / PAGE_SIZE, true);
        log::debug!("mm: shrink {:#x} -> {:#x}", old_size, new_size);
    }
    new_size
}

/// 把 `src` 中 `[0, size)` 的内容复制到 `dst` (uvmcopy)
///
/// 每一页分配新的页帧、复制内容、以相同权限映射。
/// 失败时 `dst` 中本次建立的映射全部撤销并释放。
pub fn duplicate(src: &PageTable, dst: &mut PageTable, frames: &FrameAllocator, size: usize) -> Result<(), Errno> {
    let mem = frames.memory();
    let mut a = 0;
    while a < size {
        let va = VirtAddr::new(a);
        let (frame, flags) = match src.lookup(frames, va).map(|pte| pte.kind()) {
            Some(PteKind::Leaf(frame, flags)) => (frame, flags),
            _ => panic!("duplicate: page not present {:#x}", a),
        };

        let copied = frames.allocate().and_then(|new| {
            mem.copy_frame(frame.start_address(), new);
            match dst.map_range(frames, va, PAGE_SIZE, new, flags - PteFlags::V) {
                Ok(()) => Some(()),
                Err(_) => {
                    frames.deallocate(new);
                    None
                }
            }
        });
        if copied.is_none() {
            dst.unmap_range(frames, VirtAddr::new(0), a / PAGE_SIZE, true);
            log::debug!("mm: duplicate of {:#x} bytes failed at {:#x}", size, a);
            return Err(Errno::OutOfMemory);
        }
        a += PAGE_SIZE;
    }

    log::debug!("mm: duplicated {:#x} bytes", size);
    Ok(())
}

/// 释放用户页面，再释放页表本身 (uvmfree)
pub fn destroy(mut table: PageTable, frames: &FrameAllocator, size: usize) {
    if size > 0 {
        table.unmap_range(frames, VirtAddr::new(0), page_round_up(size) / PAGE_SIZE, true);
    }
    let root = table.root();
    table.free_tables(frames);
    log::debug!("mm: destroyed table {:#x} ({:#x} bytes)", root.as_usize(), size);
}
