//! Multi-keyed triple index.
//!
//! The index keeps the flat triple list plus:
//!
//! - subject, object and relation → triples
//! - (subject, relation) → objects and (object, relation) → subjects, used for
//!   O(1) truth checks
//! - capped sampling lists over the same keys, used only for random draws
//!
//! Everything is built once before mining starts and then shared read-only
//! across workers behind an `Arc`.

use std::collections::{HashMap, HashSet};
use std::hash::{BuildHasher, Hash, Hasher};
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

use crate::error::GraphError;
use crate::symbol::{SymbolId, SymbolTable};

use super::{LineOutcome, RawTriple, ReadOptions, Triple, parse_line};

/// Result type for graph operations.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Sets with more members than this get a sampling list.
const SAMPLING_THRESHOLD: usize = 10;
/// Sampling lists are truncated to this length after shuffling.
const SAMPLING_CAP: usize = 5_000;
/// Progress is logged every this many input lines.
const PROGRESS_EVERY: u64 = 1_000_000;

type Key = (SymbolId, SymbolId);

/// Summary counters of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub triples: usize,
    pub subjects: usize,
    pub objects: usize,
    pub relations: usize,
    pub sampling_lists: usize,
}

/// Read-only triple index shared by all workers.
pub struct GraphIndex {
    symbols: Arc<SymbolTable>,
    triples: Vec<Triple>,
    by_head: HashMap<SymbolId, Vec<Triple>>,
    by_tail: HashMap<SymbolId, Vec<Triple>>,
    by_relation: HashMap<SymbolId, Vec<Triple>>,
    /// (subject, relation) → objects.
    tails: HashMap<Key, HashSet<SymbolId>>,
    /// (object, relation) → subjects.
    heads: HashMap<Key, HashSet<SymbolId>>,
    tail_samples: HashMap<Key, Vec<SymbolId>>,
    head_samples: HashMap<Key, Vec<SymbolId>>,
    empty: HashSet<SymbolId>,
    seed: u64,
}

impl GraphIndex {
    /// Create an empty index over a symbol table.
    pub fn new(symbols: Arc<SymbolTable>) -> Self {
        Self {
            symbols,
            triples: Vec::new(),
            by_head: HashMap::new(),
            by_tail: HashMap::new(),
            by_relation: HashMap::new(),
            tails: HashMap::new(),
            heads: HashMap::new(),
            tail_samples: HashMap::new(),
            head_samples: HashMap::new(),
            empty: HashSet::new(),
            seed: 0,
        }
    }

    /// Read and index a triple file with a fresh symbol table.
    pub fn load(path: &Path, opts: &ReadOptions) -> GraphResult<Self> {
        let mut index = Self::new(Arc::new(SymbolTable::new()));
        index.read_file(path, opts)?;
        index.build_sampling_lists();
        if index.triples.is_empty() {
            return Err(GraphError::Empty);
        }
        Ok(index)
    }

    /// Index triples from any buffered reader, then build sampling lists.
    pub fn from_reader<R: BufRead>(
        reader: R,
        opts: &ReadOptions,
        symbols: Arc<SymbolTable>,
    ) -> GraphResult<Self> {
        let mut index = Self::new(symbols);
        index.read_lines(reader, opts, "<reader>")?;
        index.build_sampling_lists();
        Ok(index)
    }

    /// Index label triples directly. Mostly useful for tests and tooling.
    pub fn from_labels<'a>(triples: impl IntoIterator<Item = (&'a str, &'a str, &'a str)>) -> Self {
        let mut index = Self::new(Arc::new(SymbolTable::new()));
        for (s, r, o) in triples {
            index.insert_raw(&RawTriple {
                subject: s.into(),
                relation: r.into(),
                object: o.into(),
            });
        }
        index.build_sampling_lists();
        index
    }

    fn read_file(&mut self, path: &Path, opts: &ReadOptions) -> GraphResult<()> {
        let file = std::fs::File::open(path).map_err(|e| GraphError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let source = path.display().to_string();
        self.read_lines(std::io::BufReader::new(file), opts, &source)
    }

    fn read_lines<R: BufRead>(
        &mut self,
        reader: R,
        opts: &ReadOptions,
        source: &str,
    ) -> GraphResult<()> {
        let mut lines = 0u64;
        let mut added = 0usize;
        let mut skipped = 0usize;
        for line in reader.lines() {
            let line = line.map_err(|e| GraphError::Io {
                path: source.to_string(),
                source: e,
            })?;
            lines += 1;
            if lines % PROGRESS_EVERY == 0 {
                tracing::info!(lines, triples = self.triples.len(), "parsing triples");
            }
            match parse_line(&line, opts) {
                LineOutcome::Blank => {}
                LineOutcome::Facts(facts) => {
                    for fact in &facts {
                        if self.insert_raw(fact) {
                            added += 1;
                        }
                    }
                }
                LineOutcome::Malformed(reason) => {
                    skipped += 1;
                    tracing::debug!(line = lines, reason, "could not parse line");
                }
                LineOutcome::Invalid => {
                    skipped += 1;
                    tracing::debug!(
                        line = lines,
                        "ignoring triple with a constant shorter than two characters"
                    );
                }
            }
        }
        tracing::info!(source, lines, triples = added, skipped, "read triples");
        Ok(())
    }

    fn insert_raw(&mut self, raw: &RawTriple) -> bool {
        let triple = Triple::new(
            self.symbols.intern(&raw.subject),
            self.symbols.intern(&raw.relation),
            self.symbols.intern(&raw.object),
        );
        self.insert(triple)
    }

    /// Index one triple, skipping it if it is already true.
    ///
    /// Returns whether the triple was added. Sampling lists are not touched;
    /// call [`build_sampling_lists`](Self::build_sampling_lists) afterwards.
    pub fn insert(&mut self, t: Triple) -> bool {
        if self.is_true(t.subject, t.relation, t.object) {
            return false;
        }
        self.triples.push(t);
        self.by_head.entry(t.subject).or_default().push(t);
        self.by_tail.entry(t.object).or_default().push(t);
        self.by_relation.entry(t.relation).or_default().push(t);
        self.tails
            .entry((t.subject, t.relation))
            .or_default()
            .insert(t.object);
        self.heads
            .entry((t.object, t.relation))
            .or_default()
            .insert(t.subject);
        true
    }

    /// Fold another index's triples into this one.
    ///
    /// Each triple goes through [`insert`](Self::insert), so facts already
    /// present are skipped. Labels are translated when the two indices use
    /// different symbol tables. Returns the number of triples added.
    pub fn merge(&mut self, other: &GraphIndex) -> usize {
        let shared = Arc::ptr_eq(&self.symbols, &other.symbols);
        let mut added = 0;
        for t in &other.triples {
            let t = if shared {
                *t
            } else {
                Triple::new(
                    self.symbols.intern(&other.symbols.label(t.subject)),
                    self.symbols.intern(&other.symbols.label(t.relation)),
                    self.symbols.intern(&other.symbols.label(t.object)),
                )
            };
            if self.insert(t) {
                added += 1;
            }
        }
        self.build_sampling_lists();
        tracing::info!(added, total = self.triples.len(), "merged triples");
        added
    }

    /// Read a second triple file into this index.
    pub fn merge_file(&mut self, path: &Path, opts: &ReadOptions) -> GraphResult<usize> {
        let before = self.triples.len();
        self.read_file(path, opts)?;
        self.build_sampling_lists();
        Ok(self.triples.len() - before)
    }

    /// Seed used for shuffling sampling lists.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.build_sampling_lists();
        self
    }

    /// Rebuild the capped sampling lists from the set maps.
    ///
    /// Only sets with more than ten members get a list; smaller ones are drawn
    /// from directly.
    pub fn build_sampling_lists(&mut self) {
        let seed = self.seed;
        self.tail_samples = sampling_lists(&self.tails, seed);
        self.head_samples = sampling_lists(&self.heads, seed.wrapping_add(1));
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Triples whose subject is `e`.
    pub fn by_head(&self, e: SymbolId) -> &[Triple] {
        self.by_head.get(&e).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Triples whose object is `e`.
    pub fn by_tail(&self, e: SymbolId) -> &[Triple] {
        self.by_tail.get(&e).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Triples with relation `r`.
    pub fn by_relation(&self, r: SymbolId) -> &[Triple] {
        self.by_relation.get(&r).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Whether `(s, r, o)` is a known fact.
    pub fn is_true(&self, s: SymbolId, r: SymbolId, o: SymbolId) -> bool {
        self.heads
            .get(&(o, r))
            .is_some_and(|subjects| subjects.contains(&s))
    }

    /// Objects of `(value, r)` if `value_is_head`, else subjects of `(r, value)`.
    pub fn entities(&self, r: SymbolId, value: SymbolId, value_is_head: bool) -> &HashSet<SymbolId> {
        let map = if value_is_head { &self.tails } else { &self.heads };
        map.get(&(value, r)).unwrap_or(&self.empty)
    }

    /// One random neighbour of `value` over `r`.
    ///
    /// Draws from the capped sampling list when one exists, otherwise from
    /// the full set.
    pub fn random_entity<R: Rng + ?Sized>(
        &self,
        r: SymbolId,
        value: SymbolId,
        value_is_head: bool,
        rng: &mut R,
    ) -> Option<SymbolId> {
        let key = (value, r);
        let samples = if value_is_head {
            &self.tail_samples
        } else {
            &self.head_samples
        };
        if let Some(list) = samples.get(&key) {
            return list.choose(rng).copied();
        }
        let set = self.entities(r, value, value_is_head);
        if set.is_empty() {
            return None;
        }
        let n = rng.gen_range(0..set.len());
        set.iter().nth(n).copied()
    }

    /// Up to `n` random neighbours of `value` over `r`, with replacement.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        r: SymbolId,
        value: SymbolId,
        value_is_head: bool,
        n: usize,
        rng: &mut R,
    ) -> Vec<SymbolId> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            match self.random_entity(r, value, value_is_head, rng) {
                Some(e) => out.push(e),
                None => break,
            }
        }
        out
    }

    /// A uniformly random triple.
    pub fn random_triple<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Triple> {
        self.triples.choose(rng).copied()
    }

    /// A uniformly random triple of relation `r`.
    pub fn random_triple_of<R: Rng + ?Sized>(&self, r: SymbolId, rng: &mut R) -> Option<Triple> {
        self.by_relation(r).choose(rng).copied()
    }

    /// Resolve a relation label, failing if the graph never uses it.
    pub fn relation(&self, label: &str) -> GraphResult<SymbolId> {
        self.symbols
            .lookup(label)
            .filter(|id| self.by_relation.contains_key(id))
            .ok_or_else(|| GraphError::UnknownRelation {
                relation: label.to_string(),
            })
    }

    /// Fail if `r` is not a relation of this graph.
    pub fn ensure_relation(&self, r: SymbolId) -> GraphResult<()> {
        if self.by_relation.contains_key(&r) {
            Ok(())
        } else {
            Err(GraphError::UnknownRelation {
                relation: self.symbols.label(r).to_string(),
            })
        }
    }

    /// All relations of the graph.
    pub fn relations(&self) -> impl Iterator<Item = SymbolId> + '_ {
        self.by_relation.keys().copied()
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            triples: self.triples.len(),
            subjects: self.by_head.len(),
            objects: self.by_tail.len(),
            relations: self.by_relation.len(),
            sampling_lists: self.tail_samples.len() + self.head_samples.len(),
        }
    }
}

impl std::fmt::Debug for GraphIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphIndex")
            .field("stats", &self.stats())
            .finish()
    }
}

fn sampling_lists(sets: &HashMap<Key, HashSet<SymbolId>>, seed: u64) -> HashMap<Key, Vec<SymbolId>> {
    let hasher = std::hash::BuildHasherDefault::<std::collections::hash_map::DefaultHasher>::default();
    sets.par_iter()
        .filter(|(_, set)| set.len() > SAMPLING_THRESHOLD)
        .map(|(key, set)| {
            let mut h = hasher.build_hasher();
            key.hash(&mut h);
            let mut rng = StdRng::seed_from_u64(seed ^ h.finish());
            let mut list: Vec<SymbolId> = set.iter().copied().collect();
            list.sort_unstable();
            list.shuffle(&mut rng);
            list.truncate(SAMPLING_CAP);
            (*key, list)
        })
        .collect()
}
