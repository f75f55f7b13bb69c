//! Aggregates that expose the minimum of several sequences.
//!
//! [`FixedSequenceGroup`] is built once and never changes; a sequence barrier
//! uses it to wait on several upstream stages at the same time.
//!
//! [`SequenceGroup`] can grow and shrink while other threads read it. The set
//! of members is an immutable snapshot behind an [`ArcSwap`]: writers copy the
//! current snapshot, edit the copy and compare-and-swap it back in, retrying
//! when another writer got there first. Readers always see a complete
//! snapshot, never a half-applied edit. A sequencer keeps its gating
//! sequences in one of these.

use crate::sequence::{Sequence, SequenceView};
use crate::util::minimum_sequence;
use arc_swap::ArcSwap;
use std::fmt;
use std::sync::Arc;

/// A read-only group that reports the minimum of a fixed set of sequences.
#[derive(Debug, Clone)]
pub struct FixedSequenceGroup {
    sequences: Box<[Arc<Sequence>]>,
}

impl FixedSequenceGroup {
    pub fn new(sequences: &[Arc<Sequence>]) -> Self {
        Self {
            sequences: sequences.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}

impl SequenceView for FixedSequenceGroup {
    /// Minimum of the members, or `i64::MAX` for an empty group.
    #[inline]
    fn get(&self) -> i64 {
        minimum_sequence(&self.sequences, i64::MAX)
    }
}

/// A group of sequences that can be changed concurrently with readers.
pub struct SequenceGroup {
    sequences: ArcSwap<Vec<Arc<Sequence>>>,
}

impl SequenceGroup {
    pub fn new() -> Self {
        Self {
            sequences: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Minimum of the members, or `i64::MAX` for an empty group.
    #[inline]
    pub fn get(&self) -> i64 {
        minimum_sequence(&self.sequences.load(), i64::MAX)
    }

    /// Minimum of the members, never greater than `default`.
    #[inline]
    pub fn minimum(&self, default: i64) -> i64 {
        minimum_sequence(&self.sequences.load(), default)
    }

    /// Sets every member to `value`.
    pub fn set(&self, value: i64) {
        for sequence in self.sequences.load().iter() {
            sequence.set(value);
        }
    }

    /// Adds one member.
    pub fn add(&self, sequence: Arc<Sequence>) {
        self.add_all(std::slice::from_ref(&sequence), || None);
    }

    /// Adds `sequences` as members.
    ///
    /// When `position` yields a value, each new member is moved to that value
    /// before it becomes visible, and again after the swap succeeds. This is
    /// how a sequencer keeps a freshly registered consumer from holding
    /// producers back on slots the consumer will never read.
    pub(crate) fn add_all(&self, sequences: &[Arc<Sequence>], position: impl Fn() -> Option<i64>) {
        self.sequences.rcu(|current| {
            if let Some(value) = position() {
                for sequence in sequences {
                    sequence.set(value);
                }
            }
            let mut updated = Vec::with_capacity(current.len() + sequences.len());
            updated.extend(current.iter().cloned());
            updated.extend(sequences.iter().cloned());
            updated
        });

        if let Some(value) = position() {
            for sequence in sequences {
                sequence.set(value);
            }
        }
    }

    /// Removes every occurrence of `sequence`. Returns whether anything was
    /// removed.
    pub fn remove(&self, sequence: &Arc<Sequence>) -> bool {
        let mut removed = false;
        self.sequences.rcu(|current| {
            let updated: Vec<_> = current
                .iter()
                .filter(|s| !Arc::ptr_eq(s, sequence))
                .cloned()
                .collect();
            removed = updated.len() != current.len();
            updated
        });
        removed
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.sequences.load().len()
    }

    /// A point-in-time copy of the members.
    pub fn snapshot(&self) -> Vec<Arc<Sequence>> {
        self.sequences.load().to_vec()
    }
}

impl Default for SequenceGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SequenceGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceGroup")
            .field("sequences", &**self.sequences.load())
            .finish()
    }
}

impl SequenceView for SequenceGroup {
    #[inline]
    fn get(&self) -> i64 {
        SequenceGroup::get(self)
    }
}
