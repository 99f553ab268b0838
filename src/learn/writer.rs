//! Snapshot writing.
//!
//! A snapshot is a copy of the store taken while workers are parked. Writing
//! it happens on its own thread so mining can resume immediately.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::Serialize;

use crate::error::{LearnError, RuleError};
use crate::rule::{Rule, RuleResult};
use crate::symbol::SymbolTable;

use super::LearnResult;

/// What a snapshot file holds.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotStats {
    pub path: PathBuf,
    pub rules: usize,
    pub by_kind: BTreeMap<&'static str, usize>,
    pub by_length: BTreeMap<usize, usize>,
}

/// Write `rules` to `path`, one rule line each, best confidence first.
pub fn write_rules(path: &Path, mut rules: Vec<Rule>, symbols: &SymbolTable) -> RuleResult<SnapshotStats> {
    let err = |source| RuleError::Write {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(err)?;
    }

    rules.sort_by(|a, b| {
        b.scores()
            .confidence
            .total_cmp(&a.scores().confidence)
            .then_with(|| b.scores().correct.cmp(&a.scores().correct))
    });

    let mut by_kind = BTreeMap::new();
    let mut by_length = BTreeMap::new();
    let mut out = BufWriter::new(File::create(path).map_err(err)?);
    for rule in &rules {
        writeln!(out, "{}", rule.to_line(symbols)).map_err(err)?;
        *by_kind.entry(rule.kind().name()).or_insert(0) += 1;
        *by_length.entry(rule.len()).or_insert(0) += 1;
    }
    out.flush().map_err(err)?;

    let stats = SnapshotStats {
        path: path.to_path_buf(),
        rules: rules.len(),
        by_kind,
        by_length,
    };
    tracing::info!(
        path = %path.display(),
        rules = stats.rules,
        by_kind = ?stats.by_kind,
        by_length = ?stats.by_length,
        "snapshot written"
    );
    Ok(stats)
}

/// Write a snapshot on a dedicated thread.
pub fn spawn_writer(
    path: PathBuf,
    rules: Vec<Rule>,
    symbols: Arc<SymbolTable>,
) -> LearnResult<JoinHandle<RuleResult<SnapshotStats>>> {
    let name = format!("snapshot-{}", path.display());
    let display = path.display().to_string();
    std::thread::Builder::new()
        .name(name)
        .spawn(move || write_rules(&path, rules, &symbols))
        .map_err(|source| LearnError::WriterSpawn {
            path: display,
            source,
        })
}

/// Wait for a writer and surface its outcome.
pub fn join_writer(path: &Path, handle: JoinHandle<RuleResult<SnapshotStats>>) -> LearnResult<SnapshotStats> {
    match handle.join() {
        Ok(result) => Ok(result?),
        Err(_) => Err(LearnError::WriterPanic {
            path: path.display().to_string(),
        }),
    }
}
