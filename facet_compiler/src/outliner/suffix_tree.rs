//! Suffix tree over the linearized instruction stream.
//!
//! Ukkonen's construction over a `u32` alphabet, used to find repeated
//! substrings: every internal node spells a substring that occurs once per
//! leaf below it.
//!
//! # Reserved keys
//!
//! Stream values double as hash-table keys inside the engine, so two values
//! at the top of the range are reserved and must never appear in the input:
//! [`EMPTY_KEY`] (also used as the end-of-stream terminator) and
//! [`TOMBSTONE_KEY`]. The linearizer starts its illegal-instruction counter
//! just below them.

use rustc_hash::FxHashMap;

/// Reserved vacant-slot key; also the unique end-of-stream terminator.
pub const EMPTY_KEY: u32 = u32::MAX;

/// Reserved deleted-slot key.
pub const TOMBSTONE_KEY: u32 = u32::MAX - 1;

const _: () = assert!(TOMBSTONE_KEY < EMPTY_KEY);

/// Marks a leaf edge: the edge runs to the (growing) end of the text.
const OPEN_END: usize = usize::MAX;

// =============================================================================
// Tree
// =============================================================================

struct Node {
    /// Label of the edge into this node: `text[start..end)`.
    start: usize,
    end: usize,
    /// Suffix link; only meaningful for internal nodes.
    link: usize,
    /// Children keyed by the first symbol of each outgoing edge.
    children: FxHashMap<u32, usize>,
}

/// A repeated substring of the input: its length and every occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedSubstring {
    /// Length of the substring.
    pub length: usize,
    /// Sorted start indices of every occurrence.
    pub starts: Vec<usize>,
}

/// A suffix tree over a `u32` stream.
pub struct SuffixTree {
    text: Vec<u32>,
    nodes: Vec<Node>,
}

impl SuffixTree {
    /// Build the tree. The input must not contain the reserved keys.
    pub fn new(stream: &[u32]) -> Self {
        debug_assert!(
            stream.iter().all(|&v| v < TOMBSTONE_KEY),
            "stream contains a reserved key"
        );
        let mut text = Vec::with_capacity(stream.len() + 1);
        text.extend_from_slice(stream);
        text.push(EMPTY_KEY);

        let root = Node {
            start: 0,
            end: 0,
            link: 0,
            children: FxHashMap::default(),
        };
        let mut tree = Self {
            text,
            nodes: vec![root],
        };
        tree.build();
        tree
    }

    fn new_node(&mut self, start: usize, end: usize) -> usize {
        self.nodes.push(Node {
            start,
            end,
            link: 0,
            children: FxHashMap::default(),
        });
        self.nodes.len() - 1
    }

    /// Symbols on the edge into `node`, as of position `pos`.
    fn edge_length(&self, node: usize, pos: usize) -> usize {
        let n = &self.nodes[node];
        n.end.min(pos + 1) - n.start
    }

    fn build(&mut self) {
        let root = 0usize;
        let mut active_node = root;
        let mut active_edge = 0usize;
        let mut active_length = 0usize;
        let mut remaining = 0usize;

        for pos in 0..self.text.len() {
            let mut last_new_node: Option<usize> = None;
            remaining += 1;

            while remaining > 0 {
                if active_length == 0 {
                    active_edge = pos;
                }
                let edge_symbol = self.text[active_edge];
                match self.nodes[active_node].children.get(&edge_symbol).copied() {
                    None => {
                        let leaf = self.new_node(pos, OPEN_END);
                        self.nodes[active_node].children.insert(edge_symbol, leaf);
                        if let Some(internal) = last_new_node.take() {
                            self.nodes[internal].link = active_node;
                        }
                    }
                    Some(next) => {
                        let edge_len = self.edge_length(next, pos);
                        if active_length >= edge_len {
                            // Walk down the edge.
                            active_node = next;
                            active_edge += edge_len;
                            active_length -= edge_len;
                            continue;
                        }
                        if self.text[self.nodes[next].start + active_length] == self.text[pos] {
                            // Already present; extend the active point.
                            if let Some(internal) = last_new_node.take() {
                                self.nodes[internal].link = active_node;
                            }
                            active_length += 1;
                            break;
                        }
                        // Split the edge.
                        let split_start = self.nodes[next].start;
                        let split = self.new_node(split_start, split_start + active_length);
                        self.nodes[active_node].children.insert(edge_symbol, split);
                        let leaf = self.new_node(pos, OPEN_END);
                        self.nodes[split].children.insert(self.text[pos], leaf);
                        self.nodes[next].start += active_length;
                        let next_symbol = self.text[self.nodes[next].start];
                        self.nodes[split].children.insert(next_symbol, next);
                        if let Some(internal) = last_new_node.take() {
                            self.nodes[internal].link = split;
                        }
                        last_new_node = Some(split);
                    }
                }

                remaining -= 1;
                if active_node == root && active_length > 0 {
                    active_length -= 1;
                    active_edge = pos - remaining + 1;
                } else if active_node != root {
                    active_node = self.nodes[active_node].link;
                }
            }
        }
    }

    /// Every substring of length ≥ `min_length` occurring at least twice,
    /// with sorted occurrence lists.
    pub fn repeated_substrings(&self, min_length: usize) -> Vec<RepeatedSubstring> {
        let mut result = Vec::new();
        self.collect_repeats(0, 0, min_length.max(1), &mut result);
        result
    }

    /// DFS returning the suffix starts of all leaves below `node`.
    fn collect_repeats(
        &self,
        node: usize,
        depth: usize,
        min_length: usize,
        out: &mut Vec<RepeatedSubstring>,
    ) -> Vec<usize> {
        if self.nodes[node].children.is_empty() {
            // The leaf's suffix starts `depth` symbols before the text end.
            return vec![self.text.len() - depth];
        }

        let mut starts = Vec::new();
        let mut children: Vec<(u32, usize)> = self.nodes[node]
            .children
            .iter()
            .map(|(&symbol, &child)| (symbol, child))
            .collect();
        children.sort_unstable();
        for (_, child) in children {
            let child_edge = self.nodes[child].end.min(self.text.len()) - self.nodes[child].start;
            starts.extend(self.collect_repeats(child, depth + child_edge, min_length, out));
        }

        if node != 0 && depth >= min_length && starts.len() >= 2 {
            let mut occurrences = starts.clone();
            occurrences.sort_unstable();
            out.push(RepeatedSubstring {
                length: depth,
                starts: occurrences,
            });
        }
        starts
    }
}

// =============================================================================
// Tests
// =============================================================================
