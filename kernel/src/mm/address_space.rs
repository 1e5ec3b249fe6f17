//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 进程地址空间：用户页表 + 内核影子页表
//!
//! 两张页表的用户部分必须始终同步：`[0, size)` 内每一页在两张表中
//! 指向同一个页帧，影子页表中的权限去掉 U 位。
//! 所有修改用户映射的入口都在这里，保证这一点不依赖调用者。
//!
//! 扩展时先扩用户页表再同步影子页表；收缩时先撤销影子页表再释放页帧，
//! 影子页表里永远不会出现已经还给分配器的页帧。

use core::mem;

use alloc::vec::Vec;

use crate::arch::mm::{PteFlags, PteKind, Satp};
use crate::errno::Errno;

use super::frame_allocator::FrameAllocator;
use super::kvm;
use super::layout::MemoryLayout;
use super::page::{page_round_up, VirtAddr, PAGE_SIZE};
use super::page_table::PageTable;
use super::uaccess::{self, Translate};
use super::uvm;

#[must_use = "address spaces own frames and must be destroyed explicitly"]
#[derive(Debug)]
pub struct AddressSpace {
    user: PageTable,
    kernel: PageTable,
    /// 用户区域之上第一个未映射的字节
    size: usize,
}

impl AddressSpace {
    /// 创建空的地址空间，影子页表带好内核映射
    pub fn new(frames: &FrameAllocator, layout: &MemoryLayout) -> Result<Self, Errno> {
        let user = uvm::create(frames)?;
        let kernel = match kvm::new_shadow(frames, layout) {
            Ok(kernel) => kernel,
            Err(e) => {
                uvm::destroy(user, frames, 0);
                return Err(e);
            }
        };
        Ok(Self { user, kernel, size: 0 })
    }

    /// 第一个进程：把 `image` 放在虚拟地址 0，大小为一页 (userinit)
    pub fn init_first(&mut self, frames: &FrameAllocator, image: &[u8]) -> Result<(), Errno> {
        assert_eq!(self.size, 0, "init_first: address space not empty");
        uvm::seed(&mut self.user, frames, image)?;
        if let Err(e) = kvm::sync_grow(&mut self.kernel, &self.user, frames, 0, PAGE_SIZE) {
            self.user.unmap_range(frames, VirtAddr::new(0), 1, true);
            return Err(e);
        }
        self.size = PAGE_SIZE;
        Ok(())
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn user_table(&self) -> &PageTable {
        &self.user
    }

    pub fn kernel_table(&self) -> &PageTable {
        &self.kernel
    }

    /// 进程在内核态运行时使用的 satp（影子页表）
    pub fn kernel_satp(&self) -> Satp {
        self.kernel.satp()
    }

    /// 扩展到 `new_size`，返回新的大小
    ///
    /// 用户区域不能到达 PLIC，否则会与影子页表中的设备映射重叠。
    /// 失败时两张页表都恢复原状。
    pub fn grow(&mut self, frames: &FrameAllocator, layout: &MemoryLayout, new_size: usize) -> Result<usize, Errno> {
        if new_size <= self.size {
            return Ok(self.size);
        }
        if new_size >= layout.user_top() {
            log::warn!("mm: grow to {:#x} reaches the device window", new_size);
            return Err(Errno::OutOfMemory);
        }

        let old_size = self.size;
        uvm::grow(&mut self.user, frames, old_size, new_size)?;
        if let Err(e) = kvm::sync_grow(&mut self.kernel, &self.user, frames, old_size, new_size - old_size) {
            uvm::shrink(&mut self.user, frames, new_size, old_size);
            return Err(e);
        }
        self.size = new_size;
        Ok(new_size)
    }

    /// 收缩到 `new_size`，返回新的大小
    pub fn shrink(&mut self, frames: &FrameAllocator, new_size: usize) -> usize {
        if new_size >= self.size {
            return self.size;
        }

        kvm::sync_shrink(&mut self.kernel, frames, self.size, new_size);
        self.size = uvm::shrink(&mut self.user, frames, self.size, new_size);
        self.size
    }

    /// 按有符号增量调整大小，返回调整前的大小 (sbrk)
    pub fn resize(&mut self, frames: &FrameAllocator, layout: &MemoryLayout, delta: isize) -> Result<usize, Errno> {
        let old_size = self.size;
        if delta > 0 {
            let new_size = old_size.checked_add(delta as usize).ok_or(Errno::OutOfMemory)?;
            self.grow(frames, layout, new_size)?;
        } else if delta < 0 {
            let new_size = old_size.checked_sub(delta.unsigned_abs()).ok_or(Errno::InvalidArgument)?;
            self.shrink(frames, new_size);
        }
        Ok(old_size)
    }

    /// 为子进程复制一份完整的地址空间 (fork)
    ///
    /// 失败时子进程的两张页表全部释放
    pub fn duplicate(&self, frames: &FrameAllocator, layout: &MemoryLayout) -> Result<AddressSpace, Errno> {
        let mut child = AddressSpace::new(frames, layout)?;
        if let Err(e) = uvm::duplicate(&self.user, &mut child.user, frames, self.size) {
            child.destroy(frames);
            return Err(e);
        }
        child.size = self.size;
        if let Err(e) = kvm::sync_grow(&mut child.kernel, &child.user, frames, 0, self.size) {
            child.destroy(frames);
            return Err(e);
        }
        Ok(child)
    }

    /// 释放全部用户页面和两张页表 (proc_freepagetable)
    pub fn destroy(self, frames: &FrameAllocator) {
        kvm::destroy_shadow(self.kernel, frames);
        uvm::destroy(self.user, frames, self.size);
    }

    /// 在当前大小之上建立用户栈，返回栈顶 (exec)
    ///
    /// 分配两页，下面一页去掉 U 位作为保护页
    pub fn build_stack(&mut self, frames: &FrameAllocator, layout: &MemoryLayout) -> Result<usize, Errno> {
        let base = page_round_up(self.size);
        let top = self.grow(frames, layout, base + 2 * PAGE_SIZE)?;
        self.user.clear_user(frames, VirtAddr::new(base));
        Ok(top)
    }

    /// 用新建好的地址空间替换当前的，并释放旧的 (exec 提交)
    pub fn replace(&mut self, new: AddressSpace, frames: &FrameAllocator) {
        let old = mem::replace(self, new);
        log::debug!("mm: replace address space ({:#x} -> {:#x} bytes)", old.size, self.size);
        old.destroy(frames);
    }

    /// 检查两张页表是否同步，返回第一个不一致的页
    pub fn check_mirror(&self, frames: &FrameAllocator, layout: &MemoryLayout) -> Option<VirtAddr> {
        let top = page_round_up(self.size);
        let mut bad: Vec<usize> = Vec::new();

        let mut a = 0;
        while a < top {
            let va = VirtAddr::new(a);
            let user = self.user.lookup(frames, va).map(|pte| pte.kind());
            let kernel = self.kernel.lookup(frames, va).map(|pte| pte.kind());
            let agree = match (user, kernel) {
                (Some(PteKind::Leaf(uf, uflags)), Some(PteKind::Leaf(kf, kflags))) => {
                    uf == kf && uflags - PteFlags::U == kflags && !kflags.contains(PteFlags::U)
                }
                _ => false,
            };
            if !agree {
                bad.push(a);
                break;
            }
            a += PAGE_SIZE;
        }

        self.user.for_each_leaf(frames, |va, _| {
            if va.as_usize() >= top {
                bad.push(va.as_usize());
            }
        });
        self.kernel.for_each_leaf(frames, |va, _| {
            if va.as_usize() >= top && va.as_usize() < layout.user_top() {
                bad.push(va.as_usize());
            }
        });

        bad.into_iter().min().map(VirtAddr::new)
    }

    /// 复制到用户地址 `dst_va`
    pub fn copy_out(&self, frames: &FrameAllocator, dst_va: usize, src: &[u8]) -> Result<(), Errno> {
        uaccess::copy_out(&self.user, frames, dst_va, src)
    }

    /// 从用户地址 `src_va` 读取 `dst.len()` 字节 (copyin_new)
    ///
    /// 范围必须落在 `[0, size)` 内，经影子页表翻译
    pub fn copy_in(&self, frames: &FrameAllocator, dst: &mut [u8], src_va: usize) -> Result<(), Errno> {
        match src_va.checked_add(dst.len()) {
            Some(end) if src_va < self.size && end <= self.size => {}
            _ => return Err(Errno::BadAddress),
        }
        uaccess::copy_in(&self.kernel, frames, Translate::Shadow, dst, src_va)
    }

    /// 从用户地址 `src_va` 读取字符串，至多 `max` 字节 (copyinstr_new)
    pub fn copy_in_string(&self, frames: &FrameAllocator, src_va: usize, max: usize) -> Result<Vec<u8>, Errno> {
        if src_va >= self.size {
            return Err(Errno::BadAddress);
        }
        uaccess::copy_in_string(&self.kernel, frames, Translate::Shadow, src_va, max, Some(self.size))
    }
}
