//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 把程序段读入已经映射好的用户页面 (loadseg)
//!
//! 数据来源抽象为 [`SegmentSource`]：内存中的镜像可以直接作为来源，
//! 磁盘上的镜像通过 [`BlockSource`] 经块缓存读取。

use crate::errno::Errno;

use super::frame_allocator::FrameAllocator;
use super::page::{VirtAddr, PAGE_SIZE};
use super::page_table::PageTable;

/// 磁盘块大小
pub const BSIZE: usize = 1024;

/// 块缓存中一个已上锁的缓冲区
pub struct Buf {
    pub dev: u32,
    pub blockno: u32,
    pub data: [u8; BSIZE],
}

/// 块缓存 (bread/bwrite/brelse)
///
/// `read_block` 返回的缓冲区归调用者独占，用完必须 `release`
pub trait BlockCache {
    fn read_block(&self, dev: u32, blockno: u32) -> Result<Buf, Errno>;
    fn write_block(&self, buf: &mut Buf) -> Result<(), Errno>;
    fn release(&self, buf: Buf);
}

/// 程序段的数据来源
pub trait SegmentSource {
    /// 从 `offset` 读取至多 `buf.len()` 字节，返回实际读到的字节数
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize, Errno>;
}

impl SegmentSource for [u8] {
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize, Errno> {
        let Some(rest) = self.get(offset..) else {
            return Ok(0);
        };
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        Ok(n)
    }
}

/// 从设备 `dev` 的第 `first_block` 块开始的一段连续磁盘块
pub struct BlockSource<'a, C: BlockCache + ?Sized> {
    cache: &'a C,
    dev: u32,
    first_block: u32,
    nblocks: u32,
}

impl<'a, C: BlockCache + ?Sized> BlockSource<'a, C> {
    pub fn new(cache: &'a C, dev: u32, first_block: u32, nblocks: u32) -> Self {
        Self {
            cache,
            dev,
            first_block,
            nblocks,
        }
    }
}

impl<C: BlockCache + ?Sized> SegmentSource for BlockSource<'_, C> {
    fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize, Errno> {
        let total = self.nblocks as usize * BSIZE;
        let mut done = 0;
        let mut off = offset;
        while done < buf.len() && off < total {
            let b = self.cache.read_block(self.dev, self.first_block + (off / BSIZE) as u32)?;
            let start = off % BSIZE;
            let n = (BSIZE - start).min(buf.len() - done).min(total - off);
            buf[done..done + n].copy_from_slice(&b.data[start..start + n]);
            self.cache.release(b);
            done += n;
            off += n;
        }
        Ok(done)
    }
}

/// 把 `source` 中 `[offset, offset + len)` 读到用户地址 `va` (loadseg)
///
/// `va` 必须页对齐，目标页面必须已经映射。读不满 `len` 返回 `IOError`
pub fn load_segment<S: SegmentSource + ?Sized>(
    table: &PageTable,
    frames: &FrameAllocator,
    va: usize,
    source: &mut S,
    offset: usize,
    len: usize,
) -> Result<(), Errno> {
    if va % PAGE_SIZE != 0 {
        log::warn!("mm: load_segment: va {:#x} not page aligned", va);
        return Err(Errno::InvalidArgument);
    }

    let mem = frames.memory();
    let mut chunk = [0u8; PAGE_SIZE];
    let mut i = 0;
    while i < len {
        let pa = match table.walk_addr(frames, VirtAddr::new(va + i)) {
            Some(pa) => pa,
            None => panic!("load_segment: address should exist {:#x}", va + i),
        };
        let n = (len - i).min(PAGE_SIZE);
        // 来源可能也要访问物理内存，读取时不持有页帧
        let got = source.read_at(offset + i, &mut chunk[..n])?;
        if got != n {
            return Err(Errno::IOError);
        }
        mem.write(pa, &chunk[..n]);
        i += PAGE_SIZE;
    }
    Ok(())
}
