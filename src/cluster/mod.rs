//! Chunk adjacency clustering.
//!
//! Source tools store admin zones as loose chunk lists. The target store
//! wants discrete zone entities, so every maximal 4-connected group of
//! chunks becomes one zone.
//!
//! Cluster membership is fully determined by the input set. Enumeration
//! order is not (it follows hash iteration order), so callers must not rely
//! on which cluster comes first or which sequence number it gets.

use crate::model::{ChunkCoordinate, ZoneKind};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// A maximal 4-adjacency connected set of chunks within one world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkCluster {
    pub world: String,
    pub chunks: BTreeSet<ChunkCoordinate>,
}

impl ChunkCluster {
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Clusters produced by `cluster_chunks` are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn contains(&self, chunk: &ChunkCoordinate) -> bool {
        self.chunks.contains(chunk)
    }
}

/// Partition chunks into connected components under 4-directional adjacency.
///
/// Duplicates in the input are collapsed. Chunks in different worlds are
/// never adjacent, so a mixed-world input yields per-world clusters.
pub fn cluster_chunks<I>(chunks: I) -> Vec<ChunkCluster>
where
    I: IntoIterator<Item = ChunkCoordinate>,
{
    let mut remaining: HashSet<ChunkCoordinate> = chunks.into_iter().collect();
    let mut clusters = Vec::new();

    while let Some(seed) = remaining.iter().next().cloned() {
        remaining.remove(&seed);
        let world = seed.world.clone();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::from([seed]);

        while let Some(current) = queue.pop_front() {
            for neighbor in current.neighbors() {
                if remaining.remove(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
            visited.insert(current);
        }

        clusters.push(ChunkCluster {
            world,
            chunks: visited,
        });
    }

    tracing::trace!(clusters = clusters.len(), "Clustered chunk set");
    clusters
}

/// Hands out zone names of the form `{prefix}-{n}`.
///
/// Numbering starts at 1 and runs per kind across every world in one run.
#[derive(Debug, Clone)]
pub struct ZoneNamer {
    prefixes: HashMap<ZoneKind, String>,
    counters: HashMap<ZoneKind, u32>,
    taken: HashSet<String>,
}

impl Default for ZoneNamer {
    fn default() -> Self {
        Self::new("SafeZone", "WarZone")
    }
}

impl ZoneNamer {
    #[must_use]
    pub fn new(safe_prefix: impl Into<String>, war_prefix: impl Into<String>) -> Self {
        let mut prefixes = HashMap::new();
        prefixes.insert(ZoneKind::Safe, safe_prefix.into());
        prefixes.insert(ZoneKind::War, war_prefix.into());
        Self {
            prefixes,
            counters: HashMap::new(),
            taken: HashSet::new(),
        }
    }

    #[must_use]
    pub fn prefix(&self, kind: ZoneKind) -> &str {
        self.prefixes.get(&kind).map_or("Zone", String::as_str)
    }

    /// Names already in use (matched case-insensitively) are skipped.
    #[must_use]
    pub fn with_taken<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        self.taken
            .extend(names.into_iter().map(|n| n.to_lowercase()));
        self
    }

    /// Next name for `kind`; each call advances that kind's counter.
    pub fn next_name(&mut self, kind: ZoneKind) -> String {
        loop {
            let counter = self.counters.entry(kind).or_insert(0);
            *counter += 1;
            let seq = *counter;
            let name = format!("{}-{seq}", self.prefix(kind));
            if self.taken.insert(name.to_lowercase()) {
                return name;
            }
        }
    }
}
