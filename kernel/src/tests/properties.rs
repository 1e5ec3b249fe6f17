//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!

// 性质测试：稠密性、扩展/收缩往返、复制保真

use alloc::collections::BTreeSet;
use alloc::vec;
use alloc::vec::Vec;

use proptest::prelude::*;

use super::machine;
use crate::arch::mm::PteKind;
use crate::mm::{AddressSpace, KernelMemory, PageTable, VirtAddr, PAGE_SIZE};

const MAX_PAGES: usize = 48;

/// 用户页表中所有叶子的 (虚拟地址, 页帧号, 标志)
fn leaves(km: &KernelMemory, table: &PageTable) -> Vec<(usize, usize, u64)> {
    let mut out = Vec::new();
    table.for_each_leaf(km.frames(), |va, pte| {
        out.push((va.as_usize(), pte.frame().number, pte.flags().bits()));
    });
    out
}

fn assert_dense(km: &KernelMemory, space: &AddressSpace) -> Result<(), TestCaseError> {
    let pages = space.size().div_ceil(PAGE_SIZE);
    for i in 0..MAX_PAGES + 1 {
        let mapped = matches!(
            space.user_table().lookup(km.frames(), VirtAddr::new(i * PAGE_SIZE)).map(|p| p.kind()),
            Some(PteKind::Leaf(..))
        );
        prop_assert_eq!(mapped, i < pages, "page {} with size {:#x}", i, space.size());
    }
    prop_assert_eq!(space.check_mirror(km.frames(), km.layout()), None);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn density_holds_across_resizes(sizes in prop::collection::vec(0usize..MAX_PAGES * PAGE_SIZE, 1..12)) {
        let km = machine(128);
        let free = km.frames().free_frames();
        let mut space = km.new_address_space().unwrap();

        for size in sizes {
            if size >= space.size() {
                prop_assert_eq!(space.grow(km.frames(), km.layout(), size), Ok(size));
            } else {
                prop_assert_eq!(space.shrink(km.frames(), size), size);
            }
            assert_dense(&km, &space)?;
        }

        // 任何时刻都不会有两个叶子指向同一页帧
        let frames: BTreeSet<usize> = leaves(&km, space.user_table()).iter().map(|l| l.1).collect();
        prop_assert_eq!(frames.len(), space.size().div_ceil(PAGE_SIZE));

        space.destroy(km.frames());
        prop_assert_eq!(km.frames().free_frames(), free);
    }

    #[test]
    fn grow_then_shrink_round_trips(start in 1usize..24 * PAGE_SIZE, extra in 0usize..24 * PAGE_SIZE) {
        let km = machine(128);
        let mut space = km.new_address_space().unwrap();
        space.grow(km.frames(), km.layout(), start).unwrap();

        let user_before = leaves(&km, space.user_table());
        let shadow_before = leaves(&km, space.kernel_table());
        let free = km.frames().free_frames();

        space.grow(km.frames(), km.layout(), start + extra).unwrap();
        prop_assert_eq!(space.shrink(km.frames(), start), start);

        prop_assert_eq!(space.size(), start);
        prop_assert_eq!(km.frames().free_frames(), free);
        prop_assert_eq!(leaves(&km, space.user_table()), user_before);
        prop_assert_eq!(leaves(&km, space.kernel_table()), shadow_before);
        space.destroy(km.frames());
    }

    #[test]
    fn duplicate_is_faithful(
        pages in 1usize..12,
        writes in prop::collection::vec((0usize..12 * PAGE_SIZE, any::<u8>()), 0..32),
    ) {
        let km = machine(128);
        let size = pages * PAGE_SIZE;
        let mut parent = km.new_address_space().unwrap();
        parent.grow(km.frames(), km.layout(), size).unwrap();
        for (va, byte) in writes {
            if va < size {
                parent.copy_out(km.frames(), va, &[byte; 3][..(size - va).min(3)]).unwrap();
            }
        }

        let child = parent.duplicate(km.frames(), km.layout()).unwrap();
        let mut a = vec![0u8; size];
        let mut b = vec![0u8; size];
        parent.copy_in(km.frames(), &mut a, 0).unwrap();
        child.copy_in(km.frames(), &mut b, 0).unwrap();
        prop_assert_eq!(a, b);

        let theirs: BTreeSet<usize> = leaves(&km, parent.user_table()).iter().map(|l| l.1).collect();
        let ours: BTreeSet<usize> = leaves(&km, child.user_table()).iter().map(|l| l.1).collect();
        prop_assert!(theirs.is_disjoint(&ours), "parent and child share a frame");

        child.destroy(km.frames());
        parent.destroy(km.frames());
    }
}
