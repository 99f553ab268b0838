//! Phase barrier between the coordinator and the mining workers.
//!
//! Workers spin on [`BatchBarrier::is_running`] between units of work and
//! block only inside the barrier. The coordinator moves the phase; every
//! move happens under one lock and wakes all waiters, so a worker can never
//! report before a drain was requested nor resume before every report of
//! the batch is in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

use crate::error::LearnError;

use super::LearnResult;
use super::dice::TypeCode;

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Workers are starting and signalling readiness.
    Warmup,
    /// Workers mine under their current assignment.
    Running,
    /// Workers report their batch statistics and park.
    Draining,
    /// Workers are parked while the store is copied out.
    Snapshotting,
    /// Workers exit.
    Terminated,
}

/// One worker's statistics for the batch that just ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerReport {
    pub worker: usize,
    pub code: TypeCode,
    /// Rules this worker inserted into the store.
    pub stored: usize,
    /// Candidate rules this worker generated.
    pub created: usize,
    /// Summed reward of the stored rules.
    pub score: f64,
}

/// What a parked worker does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resume {
    /// Mine the next batch under this type.
    Continue(TypeCode),
    Stop,
}

#[derive(Debug)]
struct State {
    phase: Phase,
    generation: u64,
    ready: usize,
    assignments: Vec<Option<TypeCode>>,
    reports: Vec<Option<WorkerReport>>,
    gone: Vec<bool>,
    failure: Option<LearnError>,
}

impl State {
    fn settled(&self) -> usize {
        self.reports
            .iter()
            .zip(&self.gone)
            .filter(|(r, gone)| r.is_some() || **gone)
            .count()
    }
}

/// Batch barrier shared by the coordinator and `workers` worker threads.
#[derive(Debug)]
pub struct BatchBarrier {
    workers: usize,
    state: Mutex<State>,
    changed: Condvar,
    running: AtomicBool,
}

impl BatchBarrier {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            state: Mutex::new(State {
                phase: Phase::Warmup,
                generation: 0,
                ready: 0,
                assignments: vec![None; workers],
                reports: vec![None; workers],
                gone: vec![false; workers],
                failure: None,
            }),
            changed: Condvar::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("barrier lock poisoned")
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed.wait(guard).expect("barrier lock poisoned")
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    // -----------------------------------------------------------------------
    // Worker side
    // -----------------------------------------------------------------------

    /// Cheap poll for the mining loop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Signal readiness and wait for the first assignment.
    ///
    /// Returns `None` if the run ends before the first batch starts.
    pub fn arrive(&self, worker: usize) -> Option<TypeCode> {
        let mut state = self.lock();
        state.ready += 1;
        self.changed.notify_all();
        while state.phase == Phase::Warmup {
            state = self.wait(state);
        }
        match state.phase {
            Phase::Terminated => None,
            _ => state.assignments[worker],
        }
    }

    /// Block until the phase is `phase` or the run terminates.
    pub fn wait_for_phase(&self, phase: Phase) -> Phase {
        let mut state = self.lock();
        while state.phase != phase && state.phase != Phase::Terminated {
            state = self.wait(state);
        }
        state.phase
    }

    /// Report the batch just mined, then park until the next batch.
    ///
    /// The report is recorded once per batch; it is only accepted after the
    /// coordinator has started draining.
    pub fn report_and_pause(&self, worker: usize, report: WorkerReport) -> Resume {
        let mut state = self.lock();
        while state.phase == Phase::Running {
            state = self.wait(state);
        }
        if state.phase == Phase::Terminated {
            return Resume::Stop;
        }
        if state.reports[worker].is_none() {
            state.reports[worker] = Some(report);
            self.changed.notify_all();
        }
        let generation = state.generation;
        while state.generation == generation && state.phase != Phase::Terminated {
            state = self.wait(state);
        }
        match (state.phase, state.assignments[worker]) {
            (Phase::Terminated, _) | (_, None) => Resume::Stop,
            (_, Some(code)) => Resume::Continue(code),
        }
    }

    /// Record a fatal worker error; the worker counts as gone.
    pub fn fail(&self, worker: usize, err: LearnError) {
        let mut state = self.lock();
        if state.failure.is_none() {
            state.failure = Some(err);
        }
        state.gone[worker] = true;
        self.changed.notify_all();
    }

    /// Mark a worker as exited.
    pub fn depart(&self, worker: usize) {
        let mut state = self.lock();
        state.gone[worker] = true;
        self.changed.notify_all();
    }

    // -----------------------------------------------------------------------
    // Coordinator side
    // -----------------------------------------------------------------------

    /// Block until every worker has arrived or exited.
    pub fn wait_ready(&self) -> LearnResult<()> {
        let mut state = self.lock();
        loop {
            if let Some(err) = state.failure.take() {
                return Err(err);
            }
            let gone = state.gone.iter().filter(|g| **g).count();
            if state.ready + gone >= self.workers {
                return Ok(());
            }
            state = self.wait(state);
        }
    }

    /// Hand out one type per worker and start a batch.
    pub fn start_batch(&self, assignments: Vec<TypeCode>) {
        let mut state = self.lock();
        state.assignments = assignments.into_iter().map(Some).collect();
        state.assignments.resize(self.workers, None);
        state.reports = vec![None; self.workers];
        state.generation += 1;
        state.phase = Phase::Running;
        self.running.store(true, Ordering::Release);
        self.changed.notify_all();
    }

    /// End the batch and collect one report per live worker.
    ///
    /// Fails with the first worker error recorded.
    pub fn drain(&self) -> LearnResult<Vec<WorkerReport>> {
        let mut state = self.lock();
        state.phase = Phase::Draining;
        self.running.store(false, Ordering::Release);
        self.changed.notify_all();
        loop {
            if let Some(err) = state.failure.take() {
                return Err(err);
            }
            if state.settled() >= self.workers {
                break;
            }
            state = self.wait(state);
        }
        Ok(state.reports.iter_mut().filter_map(Option::take).collect())
    }

    /// Mark the parked workers as held for a snapshot.
    pub fn begin_snapshot(&self) {
        let mut state = self.lock();
        state.phase = Phase::Snapshotting;
        self.changed.notify_all();
    }

    /// Release every waiter for good.
    pub fn terminate(&self) {
        let mut state = self.lock();
        state.phase = Phase::Terminated;
        self.running.store(false, Ordering::Release);
        self.changed.notify_all();
    }

    pub fn take_failure(&self) -> Option<LearnError> {
        self.lock().failure.take()
    }
}

/// Marks its worker as gone when dropped, recording a panic as a failure.
pub struct Departure<'a> {
    barrier: &'a BatchBarrier,
    worker: usize,
}

impl<'a> Departure<'a> {
    pub fn new(barrier: &'a BatchBarrier, worker: usize) -> Self {
        Self { barrier, worker }
    }
}

impl Drop for Departure<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.barrier.fail(self.worker, LearnError::WorkerPanic { index: self.worker });
        } else {
            self.barrier.depart(self.worker);
        }
    }
}
