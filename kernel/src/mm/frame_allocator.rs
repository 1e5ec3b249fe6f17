//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 物理页帧分配器
//!
//! 空闲页帧串成单链表，"下一帧"的物理地址就存放在空闲页帧自己的前 8 字节里。
//! 分配和释放都在链表头进行（后进先出），由一把自旋锁保护。
//!
//! - 分配出去的页帧填满 `ALLOC_JUNK`，不清零，需要干净页面的调用者自己清零
//! - 释放的页帧先填满 `FREE_JUNK`，让悬空引用尽快读到明显的垃圾数据

use core::ops::Range;

use spin::Mutex;

use super::page::{page_round_up, PhysAddr, PAGE_SIZE};
use super::phys::PhysMemory;

/// 分配时的填充字节
pub const ALLOC_JUNK: u8 = 5;

/// 释放时的填充字节
pub const FREE_JUNK: u8 = 1;

// 使用 usize::MAX 表示空闲链表的空指针
const FREE_LIST_NULL: usize = usize::MAX;

struct FreeList {
    /// 链表头页帧的物理地址
    head: usize,
    /// 链表长度
    len: usize,
}

pub struct FrameAllocator {
    mem: PhysMemory,
    /// 由分配器管理的物理地址范围
    managed: Range<usize>,
    free_list: Mutex<FreeList>,
}

impl FrameAllocator {
    /// 接管 `[start, end)` 内的所有完整页帧 (kinit/freerange)
    ///
    /// `start` 向上取整到页边界；最后不足一页的部分被忽略
    pub fn init(mem: PhysMemory, start: PhysAddr, end: PhysAddr) -> Self {
        let start = page_round_up(start.as_usize());
        let end = end.as_usize();
        assert!(
            start >= mem.base().as_usize() && end <= mem.end().as_usize(),
            "frame_allocator: range outside RAM"
        );

        let allocator = Self {
            mem,
            managed: start..end,
            free_list: Mutex::new(FreeList {
                head: FREE_LIST_NULL,
                len: 0,
            }),
        };

        let mut pa = start;
        while pa + PAGE_SIZE <= end {
            allocator.deallocate(PhysAddr::new(pa));
            pa += PAGE_SIZE;
        }

        log::info!(
            "mm: frame allocator {:#x} - {:#x}, {} free frames",
            start,
            end,
            allocator.free_frames()
        );
        allocator
    }

    /// 底层物理内存
    #[inline]
    pub fn memory(&self) -> &PhysMemory {
        &self.mem
    }

    /// 分配一个页帧 (kalloc)
    ///
    /// 内容为 `ALLOC_JUNK`；没有空闲页帧时返回 `None`
    pub fn allocate(&self) -> Option<PhysAddr> {
        let frame = {
            let mut list = self.free_list.lock();
            if list.head == FREE_LIST_NULL {
                None
            } else {
                let head = PhysAddr::new(list.head);
                // 读取下一帧的指针（存储在空闲页面的前 8 字节）
                list.head = self.mem.read_u64(head) as usize;
                list.len -= 1;
                Some(head)
            }
        };

        match frame {
            Some(pa) => {
                self.mem.fill(pa, ALLOC_JUNK);
                Some(pa)
            }
            None => {
                log::warn!("mm: out of physical frames");
                None
            }
        }
    }

    /// 分配一个清零的页帧
    pub fn allocate_zeroed(&self) -> Option<PhysAddr> {
        let pa = self.allocate()?;
        self.mem.zero(pa);
        Some(pa)
    }

    /// 释放一个页帧 (kfree)
    ///
    /// `pa` 必须页对齐且位于管理范围内，否则属于调用者的编程错误
    pub fn deallocate(&self, pa: PhysAddr) {
        let addr = pa.as_usize();
        if !pa.is_aligned() || !self.managed.contains(&addr) || addr + PAGE_SIZE > self.managed.end {
            panic!("deallocate: bad frame {:#x}", addr);
        }

        // 填充垃圾数据，尽早暴露悬空引用
        self.mem.fill(pa, FREE_JUNK);

        // 头插法，将页帧放回空闲链表
        let mut list = self.free_list.lock();
        self.mem.write_u64(pa, list.head as u64);
        list.head = addr;
        list.len += 1;
    }

    /// 空闲页帧个数
    pub fn free_frames(&self) -> usize {
        self.free_list.lock().len
    }

    /// 管理的物理地址范围
    pub fn managed_range(&self) -> Range<PhysAddr> {
        PhysAddr::new(self.managed.start)..PhysAddr::new(self.managed.end)
    }
}
