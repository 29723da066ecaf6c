//! Groups chapters into size bounded partitions.
//!
//! Partitioning is a single greedy pass over the chapters in spine order:
//! chapters are added to the current partition until the next one would go
//! over budget, then a new partition is started with that chapter. A
//! chapter is never split, so a chapter bigger than the budget gets a
//! partition of its own.

use crate::chapter::Chapter;
use crate::resources::ResourceSet;

/// One output epub: a contiguous run of chapters and the resources they
/// need.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    /// 1-based position among the partitions
    pub number: usize,
    pub chapters: Vec<Chapter>,
    pub resources: ResourceSet,
    /// chapter bytes plus the shared resource overhead
    pub size: u64,
}

impl Partition {
    pub fn chapter_bytes(&self) -> u64 {
        self.chapters.iter().map(|c| c.size).sum()
    }

    /// Spine indexes of the first and last chapter.
    pub fn chapter_range(&self) -> (usize, usize) {
        let first = self.chapters.first().map_or(0, |c| c.index);
        let last = self.chapters.last().map_or(0, |c| c.index);
        (first, last)
    }

    /// A partition made of a single chapter that alone exceeds `target`.
    pub fn is_oversized(&self, target: u64) -> bool {
        self.chapters.len() == 1 && self.size > target
    }
}

/// Budget left for chapter content once the shared resources are paid
/// for. Never less than half the target.
pub fn effective_budget(target: u64, shared: u64) -> u64 {
    target.saturating_sub(shared).max(target / 2)
}

/// Splits `chapters` into partitions of at most `target` bytes, counting
/// `shared` bytes of resources that every partition carries.
pub fn partition_chapters(chapters: Vec<Chapter>, target: u64, shared: u64) -> Vec<Partition> {
    let budget = effective_budget(target, shared);

    let (groups, _) = chapters.into_iter().fold(
        (Vec::<Vec<Chapter>>::new(), 0u64),
        |(mut groups, current), chapter| {
            let size = chapter.size;
            match groups.last_mut() {
                Some(group) if current + size <= budget => {
                    group.push(chapter);
                    (groups, current + size)
                }
                _ => {
                    groups.push(vec![chapter]);
                    (groups, size)
                }
            }
        },
    );

    let partitions: Vec<Partition> = groups
        .into_iter()
        .enumerate()
        .map(|(i, chapters)| {
            let bytes: u64 = chapters.iter().map(|c| c.size).sum();
            Partition {
                number: i + 1,
                chapters,
                resources: ResourceSet::default(),
                size: bytes + shared,
            }
        })
        .collect();

    for p in &partitions {
        let (first, last) = p.chapter_range();
        log::debug!(
            "partition {}: chapters {first}..={last}, {} bytes",
            p.number,
            p.size
        );
    }
    partitions
}
