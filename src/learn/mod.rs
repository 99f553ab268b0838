//! Time-budgeted, batch-synchronized rule mining.
//!
//! [`Learner::run`] starts one thread per configured worker and coordinates
//! them from the calling thread:
//!
//! 1. Warm-up: every worker signals readiness, then the [`Dice`] hands each
//!    one a rule type and the first batch starts.
//! 2. Each batch lasts `learn.batch_ms`. At its end the coordinator drains
//!    the workers through the [`BatchBarrier`], folds their reports into the
//!    Dice and assigns new types.
//! 3. When the elapsed time passes the next entry of `learn.snapshots_secs`
//!    the store is copied while workers are parked and written to
//!    `<output>-<seconds>` on a writer thread. The last entry, or an
//!    interrupt, ends the run after its snapshot is on disk.

pub mod barrier;
pub mod dice;
pub mod worker;
pub mod writer;

pub use barrier::{BatchBarrier, Phase, WorkerReport};
pub use dice::{Dice, TypeCode};
pub use writer::SnapshotStats;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;

use crate::config::MineConfig;
use crate::error::{LearnError, MineResult};
use crate::graph::{GraphIndex, ReadOptions};
use crate::rule::RuleResult;
use crate::sample::resolve_relations;
use crate::store::RuleStore;
use crate::symbol::SymbolId;

use worker::Shared;

/// Result type for the learn loop.
pub type LearnResult<T> = std::result::Result<T, LearnError>;

/// Coordinator poll interval.
const POLL: Duration = Duration::from_millis(10);

/// An intermediate snapshot still being written.
type PendingWriter = (PathBuf, JoinHandle<RuleResult<SnapshotStats>>);

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub batches: u64,
    /// Rules in the store at the end.
    pub rules: usize,
    /// Candidate rules generated over all batches.
    pub created: usize,
    /// Insertions reported by workers over all batches.
    pub stored: usize,
    pub snapshots: Vec<PathBuf>,
    /// Whether an interrupt ended the run early.
    pub interrupted: bool,
    pub elapsed_ms: u128,
}

/// `<output>-<secs>`.
pub fn snapshot_path(output: &Path, secs: u64) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(format!("-{secs}"));
    PathBuf::from(name)
}

/// A configured mining run over a loaded graph.
pub struct Learner {
    config: MineConfig,
    graph: Arc<GraphIndex>,
    store: Arc<RuleStore>,
    start_relations: Vec<SymbolId>,
}

impl Learner {
    /// Prepare a run over an already built graph.
    ///
    /// Fails if the config is invalid or a single-relation restriction names
    /// a relation the graph does not have.
    pub fn new(config: MineConfig, graph: GraphIndex) -> MineResult<Self> {
        config.validate()?;
        let graph = match config.learn.seed {
            Some(seed) => graph.with_seed(seed),
            None => graph,
        };
        let start_relations = resolve_relations(&graph, &config.input.single_relations)?;
        Ok(Self {
            config,
            graph: Arc::new(graph),
            store: Arc::new(RuleStore::new()),
            start_relations,
        })
    }

    /// Load the training graph (and base facts, if configured) and prepare a run.
    pub fn from_config(config: MineConfig) -> MineResult<Self> {
        let opts = ReadOptions::from(&config.input);
        let mut graph = GraphIndex::load(&config.paths.training, &opts)?;
        if let Some(base) = &config.paths.base_facts {
            let added = graph.merge_file(base, &opts)?;
            tracing::info!(path = %base.display(), added, "merged base facts");
        }
        let stats = graph.stats();
        tracing::info!(
            triples = stats.triples,
            relations = stats.relations,
            sampling_lists = stats.sampling_lists,
            "graph indexed"
        );
        Self::new(config, graph)
    }

    pub fn config(&self) -> &MineConfig {
        &self.config
    }

    pub fn graph(&self) -> &Arc<GraphIndex> {
        &self.graph
    }

    pub fn store(&self) -> &Arc<RuleStore> {
        &self.store
    }

    /// Mine until the last configured snapshot.
    pub fn run(&self) -> LearnResult<RunSummary> {
        self.run_until(&AtomicBool::new(false))
    }

    /// Mine until the last configured snapshot or until `stop` is raised,
    /// whichever comes first. Either way a terminal snapshot is written.
    pub fn run_until(&self, stop: &AtomicBool) -> LearnResult<RunSummary> {
        let started = Instant::now();
        let workers = self.config.learn.workers;
        let shared = Arc::new(Shared {
            graph: Arc::clone(&self.graph),
            store: Arc::clone(&self.store),
            barrier: BatchBarrier::new(workers),
            config: self.config.clone(),
            start_relations: self.start_relations.clone(),
        });

        tracing::info!(
            workers,
            batch_ms = self.config.learn.batch_ms,
            snapshots = ?self.config.learn.snapshots_secs,
            "starting workers"
        );
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let s = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("miner-{index}"))
                .spawn(move || worker::run(index, s));
            match spawned {
                Ok(h) => handles.push(h),
                Err(source) => {
                    shared.barrier.terminate();
                    join_workers(handles)?;
                    return Err(LearnError::Spawn { index, source });
                }
            }
        }

        let outcome = self.coordinate(&shared, stop, started);
        shared.barrier.terminate();
        let joined = join_workers(handles);
        let mut summary = outcome?;
        joined?;
        summary.elapsed_ms = started.elapsed().as_millis();
        Ok(summary)
    }

    fn coordinate(&self, shared: &Shared, stop: &AtomicBool, started: Instant) -> LearnResult<RunSummary> {
        let mut pending = None;
        let outcome = self.schedule(shared, stop, started, &mut pending);
        settle_pending(outcome, pending)
    }

    fn schedule(
        &self,
        shared: &Shared,
        stop: &AtomicBool,
        started: Instant,
        pending: &mut Option<PendingWriter>,
    ) -> LearnResult<RunSummary> {
        let cfg = &self.config;
        let barrier = &shared.barrier;
        let batch_len = Duration::from_millis(cfg.learn.batch_ms);
        let schedule = &cfg.learn.snapshots_secs;
        let mut dice = Dice::new(&cfg.dice, &cfg.rules, cfg.paths.dice.clone());
        let mut rng = match cfg.learn.seed {
            Some(seed) => StdRng::seed_from_u64(seed.rotate_left(32)),
            None => StdRng::from_entropy(),
        };
        let mut summary = RunSummary::default();
        let mut next_snapshot = 0;

        barrier.wait_ready()?;
        let assign = |dice: &Dice, batch: u64, rng: &mut StdRng| -> Vec<TypeCode> {
            (0..barrier.workers()).map(|_| dice.ask(batch, rng)).collect()
        };
        barrier.start_batch(assign(&dice, 0, &mut rng));
        let mut batch_started = Instant::now();

        loop {
            thread::sleep(POLL);
            if let Some(err) = barrier.take_failure() {
                return Err(err);
            }
            let interrupted = stop.load(Ordering::Relaxed);
            let snapshot_due = interrupted || started.elapsed().as_secs() >= schedule[next_snapshot];
            if !snapshot_due && batch_started.elapsed() < batch_len {
                continue;
            }

            let reports = barrier.drain()?;
            summary.batches += 1;
            let (mut created, mut stored) = (0, 0);
            for r in &reports {
                dice.add_score(r.code, r.score);
                created += r.created;
                stored += r.stored;
            }
            summary.created += created;
            summary.stored += stored;
            dice.recompute();
            dice.save();
            tracing::info!(
                batch = summary.batches,
                created,
                stored,
                rules = self.store.len(),
                dice = %dice,
                "batch complete"
            );
            dice.reset();

            if snapshot_due {
                barrier.begin_snapshot();
                let terminal = interrupted || next_snapshot + 1 == schedule.len();
                let secs = if terminal {
                    cfg.final_snapshot_secs()
                } else {
                    schedule[next_snapshot]
                };
                if let Some((path, handle)) = pending.take() {
                    writer::join_writer(&path, handle)?;
                }
                let path = snapshot_path(&cfg.paths.output, secs);
                let handle = writer::spawn_writer(
                    path.clone(),
                    self.store.snapshot(),
                    Arc::clone(self.graph.symbols()),
                )?;
                dice.write(&secs.to_string())?;
                summary.snapshots.push(path.clone());
                next_snapshot += 1;
                if terminal {
                    writer::join_writer(&path, handle)?;
                    summary.interrupted = interrupted;
                    break;
                }
                *pending = Some((path, handle));
            }

            barrier.start_batch(assign(&dice, summary.batches, &mut rng));
            batch_started = Instant::now();
        }

        summary.rules = self.store.len();
        tracing::info!(
            batches = summary.batches,
            rules = summary.rules,
            interrupted = summary.interrupted,
            "mining finished"
        );
        Ok(summary)
    }
}

/// Wait for a writer left behind by `outcome` before surfacing it.
///
/// An error in `outcome` takes precedence over one from the writer.
fn settle_pending<T>(outcome: LearnResult<T>, pending: Option<PendingWriter>) -> LearnResult<T> {
    let Some((path, handle)) = pending else {
        return outcome;
    };
    let joined = writer::join_writer(&path, handle);
    match (outcome, joined) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(_)) => Err(err),
        (Err(err), Err(writer_err)) => {
            tracing::warn!(path = %path.display(), error = %writer_err, "pending snapshot failed");
            Err(err)
        }
    }
}

fn join_workers(handles: Vec<JoinHandle<()>>) -> LearnResult<()> {
    let mut result = Ok(());
    for (index, h) in handles.into_iter().enumerate() {
        if h.join().is_err() && result.is_ok() {
            result = Err(LearnError::WorkerPanic { index });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_paths_keep_directory() {
        let p = snapshot_path(Path::new("out/rules"), 10);
        assert_eq!(p, PathBuf::from("out/rules-10"));
    }

    #[test]
    fn failed_runs_wait_for_the_pending_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules-5");
        let graph = GraphIndex::from_labels([("aa", "r1", "bb"), ("bb", "r2", "aa")]);
        let rules: Vec<_> = ["r1(X,Y) <= r2(Y,X)", "r2(X,Y) <= r1(Y,X)"]
            .iter()
            .map(|t| crate::rule::Rule::parse_line(&format!("1\t1\t1\t{t}"), 1, graph.symbols()).unwrap())
            .collect();
        let handle = writer::spawn_writer(path.clone(), rules, Arc::clone(graph.symbols())).unwrap();

        let outcome: LearnResult<()> = Err(LearnError::WorkerPanic { index: 3 });
        let settled = settle_pending(outcome, Some((path.clone(), handle)));
        assert!(matches!(settled, Err(LearnError::WorkerPanic { index: 3 })));
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn writer_errors_surface_from_successful_runs() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the snapshot file should go makes the write fail.
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        let symbols = Arc::new(crate::symbol::SymbolTable::new());
        let handle = writer::spawn_writer(path.clone(), Vec::new(), symbols).unwrap();
        let settled = settle_pending(Ok(7), Some((path, handle)));
        assert!(matches!(settled, Err(LearnError::Rule(_))));
        assert_eq!(settle_pending(Ok(7), None).unwrap(), 7);
    }

    #[test]
    fn unknown_start_relation_is_rejected() {
        let graph = GraphIndex::from_labels([("aa", "r1", "bb")]);
        let mut config = MineConfig::new("unused", "unused");
        config.input.single_relations = vec!["r9".into()];
        assert!(Learner::new(config, graph).is_err());
    }
}
