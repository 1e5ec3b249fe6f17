//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

// 测试：页表遍历器与映射原语

use alloc::{format, vec::Vec};

use super::frames;
use crate::arch::mm::{px, PageTableEntry, PteFlags, PteKind, MAXVA};
use crate::errno::Errno;
use crate::mm::{FrameAllocator, PageTable, PhysAddr, PhysFrame, PhysMemory, VirtAddr, PAGE_SIZE};

const RW: PteFlags = PteFlags::R.union(PteFlags::W);

#[test]
fn test_walk_without_alloc_is_deterministic() {
    let frames = frames(16);
    let mut table = PageTable::create(&frames).unwrap();
    let va = VirtAddr::new(0x1234_5000);

    // 1. 空表：查不到，也不分配
    let before = frames.free_frames();
    assert_eq!(table.walk(&frames, va, false), None);
    assert_eq!(table.walk(&frames, va, false), None);
    assert_eq!(frames.free_frames(), before, "lookup must not allocate");

    // 2. 建立映射后，重复查找得到同一个槽位
    table.map_range(&frames, va, PAGE_SIZE, PhysAddr::new(0x8000_0000), RW).unwrap();
    let first = table.walk(&frames, va, false);
    assert!(first.is_some());
    assert_eq!(table.walk(&frames, va, false), first);
    assert_eq!(table.walk(&frames, va + 0x123, false), first, "offset does not change the slot");

    table.unmap_range(&frames, va, 1, false);
    table.free_tables(&frames);
}

#[test]
fn test_walk_allocates_two_tables() {
    let frames = frames(8);
    let table = PageTable::create(&frames).unwrap();
    let before = frames.free_frames();

    let slot = table.walk(&frames, VirtAddr::new(0), true).unwrap();
    assert_eq!(frames.free_frames(), before - 2, "level 1 and level 0 tables");
    assert_eq!(slot.load(frames.memory()), PageTableEntry::INVALID, "new tables are zeroed");

    // 同一个 2MB 区域内不再分配
    table.walk(&frames, VirtAddr::new(0x1f_f000), true).unwrap();
    assert_eq!(frames.free_frames(), before - 2);

    table.free_tables(&frames);
    assert_eq!(frames.free_frames(), before + 1);
}

#[test]
#[should_panic(expected = "walk: va out of range")]
fn test_walk_past_maxva() {
    let frames = frames(4);
    let table = PageTable::create(&frames).unwrap();
    let _ = table.walk(&frames, VirtAddr::new(MAXVA), false);
}

#[test]
fn test_walk_addr_is_user_only() {
    let frames = frames(16);
    let mut table = PageTable::create(&frames).unwrap();
    let pa = PhysAddr::new(0x8000_1000);
    table.map_range(&frames, VirtAddr::new(0), PAGE_SIZE, pa, PteFlags::URWX).unwrap();
    table.map_range(&frames, VirtAddr::new(PAGE_SIZE), PAGE_SIZE, pa, RW).unwrap();

    assert_eq!(table.walk_addr(&frames, VirtAddr::new(0)), Some(pa));
    assert_eq!(table.walk_addr(&frames, VirtAddr::new(PAGE_SIZE)), None, "kernel-only leaf");
    assert_eq!(table.walk_addr(&frames, VirtAddr::new(2 * PAGE_SIZE)), None, "unmapped");
    assert_eq!(table.walk_addr(&frames, VirtAddr::new(MAXVA)), None, "out of range is not fatal here");

    table.unmap_range(&frames, VirtAddr::new(0), 2, false);
    table.free_tables(&frames);
}

#[test]
fn test_map_range_covers_every_touched_page() {
    let frames = frames(16);
    let mut table = PageTable::create(&frames).unwrap();

    // [0x1800, 0x2800) 碰到 0x1000 和 0x2000 两页
    table
        .map_range(&frames, VirtAddr::new(0x1800), PAGE_SIZE, PhysAddr::new(0x8000_4000), RW)
        .unwrap();
    for (va, pa) in [(0x1000, 0x8000_4000), (0x2000, 0x8000_5000)] {
        match table.lookup(&frames, VirtAddr::new(va)).map(|pte| pte.kind()) {
            Some(PteKind::Leaf(frame, flags)) => {
                assert_eq!(frame.start_address(), PhysAddr::new(pa));
                assert_eq!(flags, RW | PteFlags::V);
            }
            other => panic!("{:#x} should be a leaf, got {:?}", va, other),
        }
    }
    assert!(!table.lookup(&frames, VirtAddr::new(0x3000)).unwrap().is_valid());

    table.unmap_range(&frames, VirtAddr::new(0x1000), 2, false);
    table.free_tables(&frames);
}

#[test]
#[should_panic(expected = "map_range: remap")]
fn test_remap_is_fatal() {
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    let va = VirtAddr::new(0x4000);
    table.map_range(&frames, va, PAGE_SIZE, PhysAddr::new(0x8000_0000), RW).unwrap();
    let _ = table.map_range(&frames, va, PAGE_SIZE, PhysAddr::new(0x8000_1000), RW);
}

#[test]
#[should_panic(expected = "map_range: size")]
fn test_map_empty_range_is_fatal() {
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    let _ = table.map_range(&frames, VirtAddr::new(0), 0, PhysAddr::new(0x8000_0000), RW);
}

#[test]
fn test_map_range_rolls_back_on_oom() {
    // 根页表之外只剩两帧：第一页用掉，第二页跨入新的 1GB 区域时失败
    let frames = frames(3);
    let mut table = PageTable::create(&frames).unwrap();
    let va = VirtAddr::new((1 << 30) - PAGE_SIZE);

    let res = table.map_range(&frames, va, 2 * PAGE_SIZE, PhysAddr::new(0x8000_0000), RW);
    assert_eq!(res, Err(Errno::OutOfMemory));
    assert!(
        !table.lookup(&frames, va).unwrap().is_valid(),
        "installed prefix must be removed"
    );
    assert_eq!(table.lookup(&frames, va + PAGE_SIZE), None);

    table.free_tables(&frames);
    assert_eq!(frames.free_frames(), 3);
}

#[test]
#[should_panic(expected = "unmap_range: not mapped")]
fn test_double_unmap_is_fatal() {
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    let va = VirtAddr::new(0);
    table.map_range(&frames, va, 2 * PAGE_SIZE, PhysAddr::new(0x8000_0000), RW).unwrap();
    table.unmap_range(&frames, va, 2, false);
    table.unmap_range(&frames, va, 2, false);
}

#[test]
#[should_panic(expected = "unmap_range: not a leaf")]
fn test_unmap_internal_entry_is_fatal() {
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    let va = VirtAddr::new(0);
    let slot = table.walk(&frames, va, true).unwrap();
    slot.store(frames.memory(), PageTableEntry::new_table(PhysFrame::new(0x80000)));
    table.unmap_range(&frames, va, 1, false);
}

#[test]
#[should_panic(expected = "free_tables: leaf")]
fn test_free_tables_with_leaf_is_fatal() {
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    table
        .map_range(&frames, VirtAddr::new(0), PAGE_SIZE, PhysAddr::new(0x8000_0000), RW)
        .unwrap();
    table.free_tables(&frames);
}

#[test]
fn test_free_tables_keep_leaves() {
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    let data = frames.allocate().unwrap();
    table.map_range(&frames, VirtAddr::new(0), PAGE_SIZE, data, RW).unwrap();
    let before = frames.free_frames();

    table.free_tables_keep_leaves(&frames);
    assert_eq!(frames.free_frames(), before + 3, "root and two tables, not the data frame");
    frames.deallocate(data);
}

#[test]
fn test_clear_user_and_translate_kernel() {
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    let pa = PhysAddr::new(0x8000_2000);
    table.map_range(&frames, VirtAddr::new(0x5000), PAGE_SIZE, pa, PteFlags::URWX).unwrap();

    assert_eq!(table.translate_kernel(&frames, VirtAddr::new(0x5abc)), pa + 0xabc);
    table.clear_user(&frames, VirtAddr::new(0x5000));
    assert_eq!(table.walk_addr(&frames, VirtAddr::new(0x5000)), None);
    assert_eq!(table.translate_kernel(&frames, VirtAddr::new(0x5000)), pa, "still mapped for the kernel");

    table.unmap_range(&frames, VirtAddr::new(0x5000), 1, false);
    table.free_tables(&frames);
}

#[test]
#[should_panic(expected = "translate_kernel")]
fn test_translate_unmapped_kernel_address() {
    let frames = frames(4);
    let table = PageTable::create(&frames).unwrap();
    let _ = table.translate_kernel(&frames, VirtAddr::new(0x8000_0000));
}

#[test]
fn test_dump_format() {
    // 初始化后空闲链表从高地址开始分配：根 0x80007000，中间页表 0x80006000、0x80005000
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    table
        .map_range(&frames, VirtAddr::new(0), PAGE_SIZE, PhysAddr::new(0x8000_1000), PteFlags::URWX)
        .unwrap();

    let out = format!("{}", table.dump(&frames));
    let expected = "page table 0x80007000\n\
                    ..0: pte 0x20001801 pa 0x80006000\n\
                    .. ..0: pte 0x20001401 pa 0x80005000\n\
                    .. .. ..0: pte 0x2000041f pa 0x80001000\n";
    assert_eq!(out, expected);

    table.unmap_range(&frames, VirtAddr::new(0), 1, false);
    table.free_tables(&frames);
}

#[test]
fn test_dump_visits_each_entry_once() {
    let frames = frames(16);
    let mut table = PageTable::create(&frames).unwrap();
    let pa = PhysAddr::new(0x8000_0000);
    table.map_range(&frames, VirtAddr::new(0), 3 * PAGE_SIZE, pa, RW).unwrap();
    table.map_range(&frames, VirtAddr::new(1 << 30), PAGE_SIZE, pa, RW).unwrap();

    // 2 个根项 + 2 个一级项 + 4 个叶子
    let out = format!("{}", table.dump(&frames));
    assert_eq!(out.lines().count(), 1 + 2 + 2 + 4);
    assert_eq!(out.lines().filter(|l| l.starts_with(".. .. ..")).count(), 4);

    table.unmap_range(&frames, VirtAddr::new(0), 3, false);
    table.unmap_range(&frames, VirtAddr::new(1 << 30), 1, false);
    table.free_tables(&frames);
}

#[test]
fn test_for_each_leaf_reports_virtual_addresses() {
    let frames = frames(16);
    let mut table = PageTable::create(&frames).unwrap();
    let pa = PhysAddr::new(0x8000_0000);
    let vas = [0x1000, 0x20_0000, 0x4000_0000, 0x1_4020_3000];
    for &va in &vas {
        table.map_range(&frames, VirtAddr::new(va), PAGE_SIZE, pa, RW).unwrap();
    }

    // 叶子按虚拟地址升序给出，每一级的索引都还原到正确的位上
    let mut seen = Vec::new();
    table.for_each_leaf(&frames, |va, _| seen.push(va.as_usize()));
    assert_eq!(seen, vas);

    for &va in &vas {
        table.unmap_range(&frames, VirtAddr::new(va), 1, false);
    }
    table.free_tables(&frames);
}

#[test]
#[should_panic(expected = "walk: leaf at level 2")]
fn test_walk_through_root_leaf() {
    let frames = frames(8);
    let table = PageTable::create(&frames).unwrap();
    let va = VirtAddr::new(0x4000_0000);

    // 根页表里直接放一个 1GiB 叶子，遍历器不认识大页
    let slot = table.root() + px(2, va) * 8;
    let leaf = PageTableEntry::new_leaf(PhysFrame::containing_address(PhysAddr::new(0x8000_0000)), RW);
    frames.memory().write_u64(slot, leaf.bits());
    let _ = table.walk(&frames, va, false);
}

#[test]
#[should_panic(expected = "walk: leaf at level 1")]
fn test_walk_through_middle_leaf() {
    let frames = frames(8);
    let mut table = PageTable::create(&frames).unwrap();
    let va = VirtAddr::new(0x20_0000);
    table.map_range(&frames, va, PAGE_SIZE, PhysAddr::new(0x8000_0000), RW).unwrap();
    table.unmap_range(&frames, va, 1, false);

    // 把第 1 级页表项改成 2MiB 叶子
    let mid = PageTableEntry::from_bits(frames.memory().read_u64(table.root() + px(2, va) * 8)).phys_addr();
    let leaf = PageTableEntry::new_leaf(PhysFrame::containing_address(PhysAddr::new(0x8000_0000)), RW);
    frames.memory().write_u64(mid + px(1, va) * 8, leaf.bits());
    let _ = table.walk(&frames, va, false);
}

/// 页对齐的宿主机内存
#[repr(C, align(4096))]
struct Page([u8; PAGE_SIZE]);

#[test]
fn test_tables_in_directly_accessed_memory() {
    let mut ram: Vec<Page> = (0..8).map(|_| Page([0u8; PAGE_SIZE])).collect();
    let base = PhysAddr::new(ram.as_mut_ptr() as usize);
    // SAFETY: `ram` 比分配器活得久，期间只经由分配器访问
    let mem = unsafe { PhysMemory::direct(base, 8) };
    let end = mem.end();
    let frames = FrameAllocator::init(mem, base, end);

    // 1. 分配器和页表完全工作在这块内存上
    let mut table = PageTable::create(&frames).unwrap();
    let data = frames.allocate_zeroed().unwrap();
    let va = VirtAddr::new(0x1000);
    table.map_range(&frames, va, PAGE_SIZE, data, PteFlags::URWX).unwrap();
    assert_eq!(table.walk_addr(&frames, va), Some(data));
    frames.memory().write(data + 3, b"sv39");

    // 2. 根页表项就写在对应地址的内存里
    let root_index = (table.root().as_usize() - base.as_usize()) / PAGE_SIZE;
    let root_pte = u64::from_le_bytes(ram_bytes(&ram, root_index, 0));
    assert!(matches!(PageTableEntry::from_bits(root_pte).kind(), PteKind::Table(_)));
    let data_index = (data.as_usize() - base.as_usize()) / PAGE_SIZE;
    assert_eq!(&ram[data_index].0[3..7], b"sv39");

    table.unmap_range(&frames, va, 1, true);
    table.free_tables(&frames);
    assert_eq!(frames.free_frames(), 8);
    drop(frames);
}

fn ram_bytes(ram: &[Page], index: usize, offset: usize) -> [u8; 8] {
    let mut word = [0u8; 8];
    word.copy_from_slice(&ram[index].0[offset..offset + 8]);
    word
}
