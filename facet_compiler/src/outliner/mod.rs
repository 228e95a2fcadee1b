//! Generic outlining engine.
//!
//! Given a stream of integers (the linearized module) and a target that
//! understands what the integers mean, the engine finds repeated substrings
//! with a suffix tree, asks the target to refine each set of matches into
//! [`OutlinedFunction`]s, and prunes overlapping candidates in descending
//! benefit order. What survives is handed back for the target's pass to
//! materialize.

pub mod suffix_tree;

pub use suffix_tree::{RepeatedSubstring, SuffixTree, EMPTY_KEY, TOMBSTONE_KEY};

// =============================================================================
// Candidates
// =============================================================================

/// One occurrence of an outlinable sequence in the stream.
#[derive(Debug, Clone)]
pub struct Candidate {
    start_idx: usize,
    len: usize,
    call_overhead: u32,
    deleted: bool,
}

impl Candidate {
    /// Create a candidate covering `stream[start_idx..start_idx + len]`.
    pub fn new(start_idx: usize, len: usize, call_overhead: u32) -> Self {
        debug_assert!(len > 0);
        Self {
            start_idx,
            len,
            call_overhead,
            deleted: false,
        }
    }

    /// First stream index covered.
    #[inline]
    pub fn start_idx(&self) -> usize {
        self.start_idx
    }

    /// Number of stream entries covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the candidate covers nothing. Never true by construction.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Last stream index covered (inclusive).
    #[inline]
    pub fn end_idx(&self) -> usize {
        self.start_idx + self.len - 1
    }

    /// Cost of calling the outlined function from this site.
    #[inline]
    pub fn call_overhead(&self) -> u32 {
        self.call_overhead
    }

    /// Whether the candidate has been pruned.
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Prune the candidate.
    #[inline]
    pub fn delete(&mut self) {
        self.deleted = true;
    }
}

/// A group of candidates that can share one outlined function.
#[derive(Debug, Clone)]
pub struct OutlinedFunction {
    /// The occurrences; pruned entries stay in place with `deleted` set.
    pub candidates: Vec<Candidate>,
    /// Instructions in the outlined sequence.
    pub sequence_size: usize,
    /// Cost of the outlined function's frame (prologue, return).
    pub frame_overhead: u32,
}

impl OutlinedFunction {
    /// Instructions saved by outlining, net of call and frame overhead.
    /// Zero when outlining would not pay for itself.
    pub fn benefit(&self) -> u32 {
        let live: Vec<&Candidate> = self.candidates.iter().filter(|c| !c.is_deleted()).collect();
        let not_outlined = (self.sequence_size as u64) * live.len() as u64;
        let outlined = self.frame_overhead as u64
            + live.iter().map(|c| c.call_overhead() as u64).sum::<u64>();
        not_outlined.saturating_sub(outlined).min(u32::MAX as u64) as u32
    }
}

// =============================================================================
// Target Interface
// =============================================================================

/// What the engine needs to know about the IR behind the stream.
pub trait OutlinerTarget {
    /// Minimum length of a repeated substring worth considering.
    fn min_candidate_length(&self) -> usize;

    /// Refine a set of equal-length stream matches (already equivalent
    /// entry-by-entry) into zero or more outlined functions.
    fn create_outlined_functions(
        &mut self,
        functions: &mut Vec<OutlinedFunction>,
        start_indices: &[usize],
        candidate_length: usize,
    );
}

// =============================================================================
// Engine
// =============================================================================

/// Find outlining opportunities in `stream` and append them to `functions`.
///
/// Candidates that overlap a higher-benefit function's candidates are
/// pruned, as are occurrences overlapping an earlier occurrence of the same
/// substring; callers should still skip functions whose final benefit is
/// below one.
pub fn get_functions_to_outline(
    functions: &mut Vec<OutlinedFunction>,
    stream: &[u32],
    target: &mut dyn OutlinerTarget,
) {
    if stream.is_empty() {
        return;
    }
    let min_length = target.min_candidate_length().max(1);
    let tree = SuffixTree::new(stream);
    for repeat in tree.repeated_substrings(min_length) {
        let starts = prune_overlapping_starts(&repeat.starts, repeat.length);
        if starts.len() >= 2 {
            target.create_outlined_functions(functions, &starts, repeat.length);
        }
    }
    prune_overlapping_candidates(functions, stream.len());
}

/// Drop occurrences that overlap an earlier kept occurrence. `starts` must
/// be sorted.
fn prune_overlapping_starts(starts: &[usize], length: usize) -> Vec<usize> {
    let mut kept = Vec::with_capacity(starts.len());
    let mut next_free = 0usize;
    for &start in starts {
        if start >= next_free {
            kept.push(start);
            next_free = start + length;
        }
    }
    kept
}

/// Prune candidates overlapping regions claimed by higher-benefit
/// functions. Functions whose benefit drops below one claim nothing.
fn prune_overlapping_candidates(functions: &mut [OutlinedFunction], stream_len: usize) {
    let mut order: Vec<usize> = (0..functions.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(functions[i].benefit()));

    let mut used = vec![false; stream_len];
    for &index in &order {
        let function = &mut functions[index];
        for candidate in function.candidates.iter_mut() {
            if candidate.is_deleted() {
                continue;
            }
            let overlaps = (candidate.start_idx()..=candidate.end_idx()).any(|k| used[k]);
            if overlaps {
                candidate.delete();
            }
        }
        if function.benefit() >= 1 {
            for candidate in function.candidates.iter().filter(|c| !c.is_deleted()) {
                for k in candidate.start_idx()..=candidate.end_idx() {
                    used[k] = true;
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
