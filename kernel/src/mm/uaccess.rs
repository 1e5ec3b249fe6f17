//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 用户空间与内核之间的数据传输
//!
//! 所有拷贝都按页进行：先把虚拟页翻译成物理页帧，再直接读写物理内存。
//! 途中任何一页无法翻译就以 `BadAddress` 失败；此前已经写入的部分不回退。

use alloc::vec::Vec;

use crate::arch::mm::{PteKind, MAXVA};
use crate::errno::Errno;

use super::frame_allocator::FrameAllocator;
use super::page::{PhysAddr, VirtAddr, PAGE_SIZE};
use super::page_table::PageTable;

/// 用户虚拟地址的翻译方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translate {
    /// 经由用户页表，叶子必须带 U 位
    User,
    /// 经由进程的内核影子页表，叶子不带 U 位；
    /// 调用者负责把地址限制在用户区域内，RAM 之外的叶子（设备）视为无效
    Shadow,
}

impl Translate {
    fn page(self, table: &PageTable, frames: &FrameAllocator, va0: VirtAddr) -> Option<PhysAddr> {
        match self {
            Translate::User => table.walk_addr(frames, va0),
            Translate::Shadow => {
                if va0.as_usize() >= MAXVA {
                    return None;
                }
                match table.lookup(frames, va0)?.kind() {
                    PteKind::Leaf(frame, _) if frames.memory().contains(frame.start_address()) => {
                        Some(frame.start_address())
                    }
                    _ => None,
                }
            }
        }
    }
}

/// 按页切分 `[va, va + len)`，对每一段调用 `f(物理地址, 段内起点, 段长度)`
fn for_each_chunk(
    table: &PageTable,
    frames: &FrameAllocator,
    mode: Translate,
    va: usize,
    len: usize,
    mut f: impl FnMut(PhysAddr, usize, usize),
) -> Result<(), Errno> {
    let mut va = va;
    let mut done = 0;
    while done < len {
        let va0 = VirtAddr::new(va).floor();
        let pa0 = mode.page(table, frames, va0).ok_or(Errno::BadAddress)?;
        let off = va - va0.as_usize();
        let n = (PAGE_SIZE - off).min(len - done);
        f(pa0 + off, done, n);
        done += n;
        va = va0.as_usize() + PAGE_SIZE;
    }
    Ok(())
}

/// 从内核复制到用户地址 `dst_va` (copyout)
pub fn copy_out(table: &PageTable, frames: &FrameAllocator, dst_va: usize, src: &[u8]) -> Result<(), Errno> {
    let mem = frames.memory();
    for_each_chunk(table, frames, Translate::User, dst_va, src.len(), |pa, at, n| {
        mem.write(pa, &src[at..at + n]);
    })
}

/// 从用户地址 `src_va` 复制到内核缓冲区 (copyin)
pub fn copy_in(
    table: &PageTable,
    frames: &FrameAllocator,
    mode: Translate,
    dst: &mut [u8],
    src_va: usize,
) -> Result<(), Errno> {
    let mem = frames.memory();
    let len = dst.len();
    for_each_chunk(table, frames, mode, src_va, len, |pa, at, n| {
        mem.read(pa, &mut dst[at..at + n]);
    })
}

/// 从用户地址 `src_va` 读取以 NUL 结尾的字符串 (copyinstr)
///
/// 返回的字节不含结尾的 NUL。读满 `max` 字节仍未遇到 NUL 返回 `NameTooLong`，
/// `limit` 给出时，读到 `limit` 仍未结束返回 `BadAddress`
pub fn copy_in_string(
    table: &PageTable,
    frames: &FrameAllocator,
    mode: Translate,
    src_va: usize,
    max: usize,
    limit: Option<usize>,
) -> Result<Vec<u8>, Errno> {
    let mem = frames.memory();
    let mut out = Vec::new();
    let mut va = src_va;
    while out.len() < max {
        if limit.is_some_and(|top| va >= top) {
            return Err(Errno::BadAddress);
        }
        let va0 = VirtAddr::new(va).floor();
        let pa0 = mode.page(table, frames, va0).ok_or(Errno::BadAddress)?;
        let off = va - va0.as_usize();
        let mut n = (PAGE_SIZE - off).min(max - out.len());
        if let Some(top) = limit {
            n = n.min(top - va);
        }

        let found = mem.with_frame(pa0, |bytes| {
            let chunk = &bytes[off..off + n];
            match chunk.iter().position(|&b| b == 0) {
                Some(end) => {
                    out.extend_from_slice(&chunk[..end]);
                    true
                }
                None => {
                    out.extend_from_slice(chunk);
                    false
                }
            }
        });
        if found {
            return Ok(out);
        }
        va += n;
    }
    Err(Errno::NameTooLong)
}
