//! Block allocator.
//!
//! Free blocks are grouped into maximal contiguous runs, each described by
//! a [`FreeRegion`] record in its first block. The runs form a singly
//! linked list sorted by ascending block offset with no two adjacent runs
//! left unmerged, so allocation peels from the low end and release is a
//! single merge pass.

use crate::{
    region::Filesystem,
    repr::{BlockNo, FreeRegion},
};

/// Allocates up to `count` blocks, low offsets first.
///
/// Every returned block is zeroed. The result is in ascending order and
/// may be shorter than `count` when the pool runs dry; callers that need
/// all-or-nothing hand a short batch straight back to [`release`].
pub(crate) fn allocate(fs: &mut Filesystem, count: u64) -> Vec<BlockNo> {
    let mut header = fs.header();
    let mut out: Vec<BlockNo> = Vec::with_capacity(count as usize);
    let mut prev: Option<BlockNo> = None;
    let mut cur = header.freelist();

    while (out.len() as u64) < count {
        let Some(head) = cur else { break };
        let reg = fs.free_region(head);

        let mut peeled = 0;
        while peeled < reg.size && (out.len() as u64) < count {
            let bn = BlockNo::new(head.value() + peeled);
            fs.zero_block(bn);
            out.push(bn);
            peeled += 1;
        }

        if peeled == reg.size {
            // Run fully consumed; splice it out.
            let next = reg.next();
            match prev {
                Some(p) => {
                    let mut pr = fs.free_region(p);
                    pr.set_next(next);
                    fs.put_free_region(p, &pr);
                }
                None => header.set_freelist(next),
            }
            cur = next;
        } else {
            // Advance the run past the peeled prefix.
            let new_head = BlockNo::new(head.value() + peeled);
            fs.put_free_region(new_head, &FreeRegion::new(reg.size - peeled, reg.next()));
            match prev {
                Some(p) => {
                    let mut pr = fs.free_region(p);
                    pr.set_next(Some(new_head));
                    fs.put_free_region(p, &pr);
                }
                None => header.set_freelist(Some(new_head)),
            }
            cur = Some(new_head);
        }
    }

    header.free -= out.len() as u64;
    fs.put_header(&header);
    if (out.len() as u64) < count {
        log::debug!("out of blocks: wanted {count}, allocated {}", out.len());
    }
    out
}

/// Returns blocks to the pool, keeping the free list sorted and merged.
///
/// Offsets outside the data area and blocks that are already free are
/// silently dropped. Returns the number of blocks actually freed.
pub(crate) fn release(fs: &mut Filesystem, mut offs: Vec<BlockNo>) -> u64 {
    let mut header = fs.header();
    offs.sort_unstable();
    offs.dedup();

    let mut freed = 0;
    // `prev` is the last run starting at or before the insertion point;
    // `cur` is the run after it (or the list head).
    let mut prev: Option<BlockNo> = None;
    let mut cur = header.freelist();

    for bn in offs {
        if bn.value() < header.ntsize || bn.value() >= header.size {
            continue;
        }

        while let Some(c) = cur {
            if c.value() > bn.value() {
                break;
            }
            prev = Some(c);
            cur = fs.free_region(c).next();
        }

        if let Some(p) = prev {
            let mut pr = fs.free_region(p);
            let end = p.value() + pr.size;
            if bn.value() < end {
                // Already inside a free run: double free, drop it.
                continue;
            }
            if bn.value() == end {
                // Extend the previous run backward-merging the block, then
                // try to close the gap to the next run.
                pr.size += 1;
                if cur == Some(BlockNo::new(end + 1)) {
                    let nr = fs.free_region(cur.unwrap());
                    pr.size += nr.size;
                    pr.set_next(nr.next());
                    cur = nr.next();
                }
                fs.put_free_region(p, &pr);
                freed += 1;
                continue;
            }
        }

        // New single-block run between `prev` and `cur`.
        let mut reg = FreeRegion::new(1, cur);
        if cur == Some(BlockNo::new(bn.value() + 1)) {
            let nr = fs.free_region(cur.unwrap());
            reg.size += nr.size;
            reg.set_next(nr.next());
            cur = nr.next();
        }
        fs.put_free_region(bn, &reg);
        match prev {
            Some(p) => {
                let mut pr = fs.free_region(p);
                pr.set_next(Some(bn));
                fs.put_free_region(p, &pr);
            }
            None => header.set_freelist(Some(bn)),
        }
        prev = Some(bn);
        freed += 1;
    }

    header.free += freed;
    fs.put_header(&header);
    freed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repr::BLOCK_SIZE;

    fn region(blocks: usize) -> Vec<u8> {
        vec![0; blocks * BLOCK_SIZE]
    }

    /// Walks the free list, checking order and coalescing as it goes.
    fn free_runs(fs: &Filesystem) -> Vec<(u64, u64)> {
        let header = fs.header();
        let mut runs = Vec::new();
        let mut cur = header.freelist();
        let mut last_end = 0;
        while let Some(bn) = cur {
            let reg = fs.free_region(bn);
            assert!(reg.size > 0);
            assert!(bn.value() >= header.ntsize);
            assert!(
                bn.value() > last_end || runs.is_empty(),
                "unsorted or unmerged free list"
            );
            runs.push((bn.value(), reg.size));
            last_end = bn.value() + reg.size;
            assert!(last_end <= header.size);
            cur = reg.next();
        }
        assert_eq!(header.free, runs.iter().map(|(_, s)| s).sum::<u64>());
        runs
    }

    #[test]
    fn allocate_ascending_and_zeroed() {
        let mut mem = region(64);
        let mut fs = Filesystem::mount(&mut mem).unwrap();
        let free_before = fs.header().free;

        let got = allocate(&mut fs, 10);
        assert_eq!(got.len(), 10);
        assert!(got.windows(2).all(|w| w[0] < w[1]));
        for bn in &got {
            assert!(fs.block(*bn).iter().all(|&b| b == 0));
        }
        assert_eq!(fs.header().free, free_before - 10);
        free_runs(&fs);
    }

    #[test]
    fn allocate_short_when_exhausted() {
        let mut mem = region(8);
        let mut fs = Filesystem::mount(&mut mem).unwrap();
        let avail = fs.header().free;

        let got = allocate(&mut fs, avail + 16);
        assert_eq!(got.len() as u64, avail);
        assert_eq!(fs.header().free, 0);
        assert!(free_runs(&fs).is_empty());
    }

    #[test]
    fn release_merges_adjacent_runs() {
        let mut mem = region(64);
        let mut fs = Filesystem::mount(&mut mem).unwrap();
        let got = allocate(&mut fs, 12);
        let total = fs.header().free + 12;

        // Free the middle, then the ends; everything must coalesce back
        // into a single run.
        release(&mut fs, got[4..8].to_vec());
        assert!(free_runs(&fs).len() >= 2);
        release(&mut fs, got[0..4].to_vec());
        release(&mut fs, got[8..12].to_vec());
        assert_eq!(free_runs(&fs).len(), 1);
        assert_eq!(fs.header().free, total);
    }

    #[test]
    fn release_ignores_double_free_and_out_of_range() {
        let mut mem = region(64);
        let mut fs = Filesystem::mount(&mut mem).unwrap();
        let got = allocate(&mut fs, 4);
        let free_before = fs.header().free;

        assert_eq!(release(&mut fs, got.clone()), 4);
        // Freeing the same blocks again must not double-count.
        assert_eq!(release(&mut fs, got), 0);
        // Neither must the header block or offsets past the region.
        let bogus = vec![BlockNo::new(0), BlockNo::new(1 << 40)];
        assert_eq!(release(&mut fs, bogus), 0);
        assert_eq!(fs.header().free, free_before + 4);
        free_runs(&fs);
    }

    #[test]
    fn interleaved_churn_keeps_invariants() {
        let mut mem = region(128);
        let mut fs = Filesystem::mount(&mut mem).unwrap();
        let total = fs.header().free;

        let mut held: Vec<BlockNo> = Vec::new();
        for round in 0..50u64 {
            let got = allocate(&mut fs, (round % 7) + 1);
            held.extend(got);
            if round % 3 == 0 && !held.is_empty() {
                let drop_n = held.len() / 2;
                let dropped: Vec<_> = held.drain(..drop_n).collect();
                release(&mut fs, dropped);
            }
            free_runs(&fs);
            assert_eq!(fs.header().free + held.len() as u64, total);
        }
        release(&mut fs, held);
        assert_eq!(fs.header().free, total);
        assert_eq!(free_runs(&fs).len(), 1);
    }
}
