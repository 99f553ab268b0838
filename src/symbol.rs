//! Interned labels for entities and relations.
//!
//! Every string the miner sees is interned once into a [`SymbolId`]; triples,
//! atoms, and rules only ever carry ids. The [`SymbolTable`] maps in both
//! directions and can be shared across threads.

use std::num::NonZeroU64;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Unique, niche-optimized identifier for an interned label.
///
/// Uses `NonZeroU64` so that `Option<SymbolId>` is the same size as `SymbolId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct SymbolId(NonZeroU64);

impl SymbolId {
    /// Create a `SymbolId` from a raw `u64`.
    ///
    /// Returns `None` if `raw` is zero.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(SymbolId)
    }

    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Position of this id in the table's label vector.
    fn slot(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

impl std::fmt::Display for SymbolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sym:{}", self.0)
    }
}

/// Bidirectional label ↔ id table.
///
/// Ids are dense and start at 1, so the reverse direction is a plain vector.
/// Interning is idempotent: the same label always maps to the same id.
pub struct SymbolTable {
    /// Forward map: label → id.
    label_to_id: DashMap<Arc<str>, SymbolId>,
    /// Reverse map: `labels[id - 1]` is the label of `id`.
    labels: RwLock<Vec<Arc<str>>>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            label_to_id: DashMap::new(),
            labels: RwLock::new(Vec::new()),
        }
    }

    /// Intern a label, returning its id.
    pub fn intern(&self, label: &str) -> SymbolId {
        if let Some(id) = self.label_to_id.get(label) {
            return *id.value();
        }
        let mut labels = self.labels.write().expect("symbol table lock poisoned");
        // Double-check after acquiring the write lock.
        if let Some(id) = self.label_to_id.get(label) {
            return *id.value();
        }
        let label: Arc<str> = Arc::from(label);
        labels.push(Arc::clone(&label));
        let id = SymbolId(NonZeroU64::MIN.saturating_add(labels.len() as u64 - 1));
        self.label_to_id.insert(label, id);
        id
    }

    /// Look up an already-interned label.
    pub fn lookup(&self, label: &str) -> Option<SymbolId> {
        self.label_to_id.get(label).map(|r| *r.value())
    }

    /// Resolve an id back to its label.
    ///
    /// Ids from another table resolve to `"?"` rather than panicking.
    pub fn label(&self, id: SymbolId) -> Arc<str> {
        let labels = self.labels.read().expect("symbol table lock poisoned");
        labels
            .get(id.slot())
            .cloned()
            .unwrap_or_else(|| Arc::from("?"))
    }

    /// Number of interned labels.
    pub fn len(&self) -> usize {
        self.label_to_id.len()
    }

    /// Whether nothing has been interned yet.
    pub fn is_empty(&self) -> bool {
        self.label_to_id.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolTable")
            .field("len", &self.len())
            .finish()
    }
}
