//! The translation cache: compiled-block descriptors keyed by location
//! hash, plus the registry of patchable sites aimed at each location.

use std::collections::HashMap;

use vela_jit_ir::{AddressRange, LocationDescriptor};

use crate::patch::PatchKind;

/// A compiled block. Immutable once inserted; removed only by invalidation.
#[derive(Clone, Copy, Debug)]
pub struct BlockDescriptor {
    /// Host address of the block's first instruction.
    pub entrypoint: u64,
    /// Bytes of host code emitted for the block.
    pub size: usize,
    pub start_location: LocationDescriptor,
    /// One past the last guest byte the block was translated from.
    pub end_pc: u32,
}

impl BlockDescriptor {
    fn overlaps(&self, range: AddressRange) -> bool {
        range.overlaps(self.start_location.pc(), self.end_pc)
    }
}

/// One patchable site in emitted code.
#[derive(Clone, Copy, Debug)]
pub struct PatchSite {
    pub kind: PatchKind,
    pub addr: u64,
}

#[derive(Default)]
pub(crate) struct TranslationCache {
    blocks: HashMap<u64, BlockDescriptor>,
    /// Patch sites grouped by the location hash they target. Entries
    /// outlive the target block: a site keeps its registration across
    /// invalidation so a recompile can re-aim it.
    patches: HashMap<u64, Vec<PatchSite>>,
}

impl TranslationCache {
    pub fn block(&self, hash: u64) -> Option<&BlockDescriptor> {
        self.blocks.get(&hash)
    }

    pub fn insert_block(&mut self, hash: u64, descriptor: BlockDescriptor) {
        let previous = self.blocks.insert(hash, descriptor);
        assert!(
            previous.is_none(),
            "location {hash:#x} compiled twice without invalidation"
        );
    }

    pub fn register_patch(&mut self, target_hash: u64, site: PatchSite) {
        self.patches.entry(target_hash).or_default().push(site);
    }

    pub fn patches(&self, target_hash: u64) -> &[PatchSite] {
        self.patches.get(&target_hash).map_or(&[], Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Removes every block overlapping `range`, returning the hashes of
    /// the removed blocks so their patch sites can be diverted.
    pub fn take_overlapping(&mut self, range: AddressRange) -> Vec<u64> {
        let removed: Vec<u64> = self
            .blocks
            .iter()
            .filter(|(_, desc)| desc.overlaps(range))
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &removed {
            self.blocks.remove(hash);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.patches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_types::Fpscr;

    fn desc(pc: u32, end_pc: u32) -> BlockDescriptor {
        BlockDescriptor {
            entrypoint: 0x1000,
            size: 16,
            start_location: LocationDescriptor::new(pc, 0, Fpscr::from_bits(0)),
            end_pc,
        }
    }

    fn insert(cache: &mut TranslationCache, pc: u32, end_pc: u32) -> u64 {
        let d = desc(pc, end_pc);
        let hash = d.start_location.unique_hash();
        cache.insert_block(hash, d);
        hash
    }

    #[test]
    fn lookup_and_invalidate_interval() {
        let mut cache = TranslationCache::default();
        let a = insert(&mut cache, 0x1000, 0x1010);
        let b = insert(&mut cache, 0x2000, 0x2008);

        assert!(cache.block(a).is_some());
        let removed = cache.take_overlapping(AddressRange::Interval {
            start: 0x100C,
            length: 4,
        });
        assert_eq!(removed, vec![a]);
        assert!(cache.block(a).is_none());
        assert!(cache.block(b).is_some());
    }

    #[test]
    fn full_range_removes_everything() {
        let mut cache = TranslationCache::default();
        insert(&mut cache, 0x1000, 0x1010);
        insert(&mut cache, 0x2000, 0x2008);
        let removed = cache.take_overlapping(AddressRange::Full);
        assert_eq!(removed.len(), 2);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn patches_survive_block_removal() {
        let mut cache = TranslationCache::default();
        let a = insert(&mut cache, 0x1000, 0x1010);
        cache.register_patch(
            a,
            PatchSite {
                kind: PatchKind::Jg,
                addr: 0x5000,
            },
        );
        cache.take_overlapping(AddressRange::Full);
        assert_eq!(cache.patches(a).len(), 1);
        cache.clear();
        assert!(cache.patches(a).is_empty());
    }

    #[test]
    fn invalidation_matches_a_naive_model() {
        // xorshift64*; keeps the test reproducible without extra deps.
        fn next(state: &mut u64) -> u64 {
            let mut x = *state;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            *state = x;
            x.wrapping_mul(0x2545_F491_4F6C_DD1D)
        }

        let mut rng = 0x1234_5678_9ABC_DEF0u64;
        let mut cache = TranslationCache::default();
        let mut model: Vec<(u64, u32, u32)> = Vec::new();

        for i in 0..512u32 {
            let pc = (next(&mut rng) as u32) & 0x000F_FFFC;
            let len = 4 + ((next(&mut rng) as u32) & 0x3C);
            let d = desc(pc.wrapping_add(i << 20), pc.wrapping_add(i << 20) + len);
            let hash = d.start_location.unique_hash();
            cache.insert_block(hash, d);
            model.push((hash, d.start_location.pc(), d.end_pc));
        }

        for _ in 0..64 {
            let start = (next(&mut rng) as u32) & 0x0FFF_FFFF;
            let length = (next(&mut rng) as u32) & 0xFFFF;
            let range = AddressRange::Interval { start, length };

            let mut expected: Vec<u64> = model
                .iter()
                .filter(|(_, s, e)| range.overlaps(*s, *e))
                .map(|(h, _, _)| *h)
                .collect();
            model.retain(|(_, s, e)| !range.overlaps(*s, *e));

            let mut removed = cache.take_overlapping(range);
            removed.sort_unstable();
            expected.sort_unstable();
            assert_eq!(removed, expected);
        }
        assert_eq!(cache.len(), model.len());
    }
}
