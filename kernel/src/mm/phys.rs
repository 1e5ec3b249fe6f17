//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

//! 物理内存
//!
//! 一段从 `base` 开始、按页帧组织的内存，以物理地址寻址。
//! 内核以恒等映射访问 RAM，因此这里的物理地址也就是内核直接使用的地址。
//!
//! 两种后备存储：
//! - 直接访问：物理地址即指针，裸机 RISC-V 上 RAM 就是这样访问的
//! - 页帧数组：宿主机上模拟 RAM，每个页帧有自己的自旋锁
//!
//! 页帧归属（空闲链表/页表节点/叶子映射）由上层保证互斥。

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
use alloc::{boxed::Box, vec::Vec};

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
use spin::Mutex;

use super::page::{PhysAddr, PAGE_SIZE};

/// 一个页帧的内容
pub type FrameBytes = [u8; PAGE_SIZE];

enum Backing {
    /// 物理地址直接作为指针
    Direct,
    /// 模拟的 RAM
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    Arena(Box<[Mutex<FrameBytes>]>),
}

pub struct PhysMemory {
    base: PhysAddr,
    nframes: usize,
    backing: Backing,
}

impl PhysMemory {
    /// 裸机上的 RAM `[base, base + nframes * PAGE_SIZE)`，直接访问
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    pub fn new(base: PhysAddr, nframes: usize) -> Self {
        // SAFETY: 内核启动时 RAM 以恒等方式映射（或尚未开启分页）
        unsafe { Self::direct(base, nframes) }
    }

    /// 创建从 `base` 开始、共 `nframes` 个页帧的模拟物理内存
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    pub fn new(base: PhysAddr, nframes: usize) -> Self {
        assert!(base.is_aligned(), "phys: base not page aligned");
        let frames: Vec<Mutex<FrameBytes>> =
            (0..nframes).map(|_| Mutex::new([0u8; PAGE_SIZE])).collect();
        log::debug!(
            "mm: simulated physical memory {:#x} - {:#x} ({} frames)",
            base.as_usize(),
            base.as_usize() + nframes * PAGE_SIZE,
            nframes
        );
        Self {
            base,
            nframes,
            backing: Backing::Arena(frames.into_boxed_slice()),
        }
    }

    /// 以物理地址为指针直接访问 `[base, base + nframes * PAGE_SIZE)`
    ///
    /// # Safety
    ///
    /// 这段地址必须是可读写的内存，在 `PhysMemory` 存活期间不被其他代码使用，
    /// 并且按当前地址翻译可以直接访问
    pub unsafe fn direct(base: PhysAddr, nframes: usize) -> Self {
        assert!(base.is_aligned(), "phys: base not page aligned");
        log::debug!(
            "mm: physical memory {:#x} - {:#x} ({} frames)",
            base.as_usize(),
            base.as_usize() + nframes * PAGE_SIZE,
            nframes
        );
        Self {
            base,
            nframes,
            backing: Backing::Direct,
        }
    }

    /// 起始物理地址
    pub fn base(&self) -> PhysAddr {
        self.base
    }

    /// 结束物理地址（不含）
    pub fn end(&self) -> PhysAddr {
        PhysAddr::new(self.base.as_usize() + self.nframes * PAGE_SIZE)
    }

    pub fn nframes(&self) -> usize {
        self.nframes
    }

    /// 地址是否落在 RAM 内
    pub fn contains(&self, pa: PhysAddr) -> bool {
        pa >= self.base && pa < self.end()
    }

    fn check(&self, pa: PhysAddr) {
        if !self.contains(pa) {
            panic!("phys: address {:#x} outside RAM", pa.as_usize());
        }
    }

    /// 对 `pa` 所在页帧做只读访问
    pub fn with_frame<R>(&self, pa: PhysAddr, f: impl FnOnce(&FrameBytes) -> R) -> R {
        self.check(pa);
        match &self.backing {
            Backing::Direct => {
                // SAFETY: 地址在 RAM 内且页对齐，见 `direct` 的约定
                let bytes = unsafe { &*(pa.floor().as_usize() as *const FrameBytes) };
                f(bytes)
            }
            #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
            Backing::Arena(frames) => {
                let guard = frames[(pa.as_usize() - self.base.as_usize()) / PAGE_SIZE].lock();
                f(&guard)
            }
        }
    }

    /// 对 `pa` 所在页帧做读写访问
    pub fn with_frame_mut<R>(&self, pa: PhysAddr, f: impl FnOnce(&mut FrameBytes) -> R) -> R {
        self.check(pa);
        match &self.backing {
            Backing::Direct => {
                // SAFETY: 同上；页帧的独占由上层的归属规则保证
                let bytes = unsafe { &mut *(pa.floor().as_usize() as *mut FrameBytes) };
                f(bytes)
            }
            #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
            Backing::Arena(frames) => {
                let mut guard = frames[(pa.as_usize() - self.base.as_usize()) / PAGE_SIZE].lock();
                f(&mut guard)
            }
        }
    }

    /// 用 `byte` 填满整个页帧
    pub fn fill(&self, frame: PhysAddr, byte: u8) {
        self.with_frame_mut(frame, |bytes| bytes.fill(byte));
    }

    /// 清零整个页帧
    pub fn zero(&self, frame: PhysAddr) {
        self.fill(frame, 0);
    }

    /// 整页复制 `src` 到 `dst`
    pub fn copy_frame(&self, src: PhysAddr, dst: PhysAddr) {
        assert_ne!(src.floor(), dst.floor(), "phys: copy_frame onto itself");
        self.with_frame(src, |from| self.with_frame_mut(dst, |to| to.copy_from_slice(from)));
    }

    /// 从 `pa` 开始读取，不允许跨越页帧
    pub fn read(&self, pa: PhysAddr, buf: &mut [u8]) {
        let off = pa.page_offset();
        assert!(off + buf.len() <= PAGE_SIZE, "phys: read crosses frame");
        self.with_frame(pa, |bytes| buf.copy_from_slice(&bytes[off..off + buf.len()]));
    }

    /// 从 `pa` 开始写入，不允许跨越页帧
    pub fn write(&self, pa: PhysAddr, data: &[u8]) {
        let off = pa.page_offset();
        assert!(off + data.len() <= PAGE_SIZE, "phys: write crosses frame");
        self.with_frame_mut(pa, |bytes| bytes[off..off + data.len()].copy_from_slice(data));
    }

    /// 读取对齐的 64 位字
    pub fn read_u64(&self, pa: PhysAddr) -> u64 {
        assert_eq!(pa.as_usize() % 8, 0, "phys: unaligned u64 read");
        let mut word = [0u8; 8];
        self.read(pa, &mut word);
        u64::from_le_bytes(word)
    }

    /// 写入对齐的 64 位字
    pub fn write_u64(&self, pa: PhysAddr, value: u64) {
        assert_eq!(pa.as_usize() % 8, 0, "phys: unaligned u64 write");
        self.write(pa, &value.to_le_bytes());
    }
}
