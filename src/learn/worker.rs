//! The per-thread mining loop.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::{MineConfig, RulesConfig};
use crate::graph::GraphIndex;
use crate::rule::{Acceptance, Generalizer, Scorer};
use crate::sample::PathSampler;
use crate::store::RuleStore;
use crate::symbol::SymbolId;

use super::LearnResult;
use super::barrier::{BatchBarrier, Departure, Resume, WorkerReport};
use super::dice::{Shape, TypeCode};

/// State shared by the coordinator and every worker.
pub(crate) struct Shared {
    pub graph: Arc<GraphIndex>,
    pub store: Arc<RuleStore>,
    pub barrier: BatchBarrier,
    pub config: MineConfig,
    pub start_relations: Vec<SymbolId>,
}

/// How walks are sampled for a type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    /// Hops per walk: the head hop plus one per body atom.
    pub steps: usize,
    pub cyclic: bool,
    /// Only lift cyclic walks to their cyclic rule.
    pub only_xy: bool,
}

impl Mode {
    pub fn for_code(code: TypeCode, rules: &RulesConfig) -> Self {
        match code.shape() {
            Shape::Zero => Self {
                steps: 1,
                cyclic: false,
                only_xy: false,
            },
            Shape::Cyclic(len) => Self {
                steps: len + 1,
                cyclic: true,
                only_xy: len > rules.max_length_grounded_cyclic,
            },
            Shape::Acyclic(len) => Self {
                steps: len + 1,
                cyclic: false,
                only_xy: false,
            },
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    stored: usize,
    created: usize,
    score: f64,
}

/// RNG for worker `index`: seeded runs give each worker its own stream.
pub(crate) fn worker_rng(seed: Option<u64>, index: usize) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s.wrapping_add(index as u64)),
        None => StdRng::from_entropy(),
    }
}

/// Body of worker thread `index`. Returns when the run terminates or after
/// recording a fatal error with the barrier.
pub(crate) fn run(index: usize, shared: Arc<Shared>) {
    let barrier = &shared.barrier;
    let _departure = Departure::new(barrier, index);
    let mut rng = worker_rng(shared.config.learn.seed, index);

    let sampler = PathSampler::new(&shared.graph).with_start_relations(shared.start_relations.clone());
    let generalizer = Generalizer::new(&shared.config.rules);
    let scorer = Scorer::new(&shared.graph, &shared.config.scoring);
    let acceptance = Acceptance::new(&shared.config.scoring);
    let unit = Unit {
        shared: &shared,
        sampler,
        generalizer,
        scorer,
        acceptance,
    };

    let Some(mut code) = barrier.arrive(index) else {
        return;
    };
    loop {
        let mode = Mode::for_code(code, &shared.config.rules);
        let mut tally = Tally::default();
        while barrier.is_running() {
            if let Err(err) = unit.mine_once(mode, &mut tally, &mut rng) {
                tracing::warn!(worker = index, error = %err, "worker stopped");
                barrier.fail(index, err);
                return;
            }
        }
        let report = WorkerReport {
            worker: index,
            code,
            stored: tally.stored,
            created: tally.created,
            score: tally.score,
        };
        match barrier.report_and_pause(index, report) {
            Resume::Continue(next) => code = next,
            Resume::Stop => return,
        }
    }
}

struct Unit<'a> {
    shared: &'a Shared,
    sampler: PathSampler<'a>,
    generalizer: Generalizer,
    scorer: Scorer<'a>,
    acceptance: Acceptance,
}

impl Unit<'_> {
    /// Sample one walk and push its generalizations through scoring into
    /// the store.
    fn mine_once(&self, mode: Mode, tally: &mut Tally, rng: &mut StdRng) -> LearnResult<()> {
        let Some(path) = self.sampler.sample(mode.steps, mode.cyclic, None, None, rng) else {
            return Ok(());
        };
        if !path.is_valid() {
            return Ok(());
        }
        let store = &self.shared.store;
        for mut rule in self.generalizer.generalize(&path, mode.only_xy) {
            tally.created += 1;
            if store.contains(&rule) {
                continue;
            }
            let scores = self.scorer.score(&rule, rng)?;
            rule.set_scores(scores);
            if !self.acceptance.accepts(&rule) || !self.shared.barrier.is_running() {
                continue;
            }
            let reward = rule.reward(&self.shared.config.scoring);
            if store.try_store(rule) {
                tally.stored += 1;
                tally.score += reward;
            }
        }
        Ok(())
    }
}
