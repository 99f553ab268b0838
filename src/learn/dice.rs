//! Adaptive allocation of rule types to workers.
//!
//! Every rule shape a worker can be told to mine is a [`TypeCode`]. After
//! each batch the coordinator folds the workers' productivity into the
//! [`Dice`], which then decides what each worker mines next: mostly the
//! productive types, with an annealed share of uniformly random picks so no
//! type starves.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;

use crate::config::{DiceConfig, DicePolicy, MAX_SUPPORTED_ACYCLIC, MAX_SUPPORTED_CYCLIC, RulesConfig};
use crate::error::LearnError;

use super::LearnResult;

/// Number of type codes.
pub const SLOTS: usize = 1 + MAX_SUPPORTED_CYCLIC + MAX_SUPPORTED_ACYCLIC;

/// Starting relevance of every enabled type.
///
/// Larger than any real mean score, so each type is tried before scores
/// start to steer; small enough that the sum over all slots stays finite.
pub const INITIAL: f64 = f64::MAX / (SLOTS as f64 + 1.0);

/// Stand-in for a zero score, and the relevance floor.
pub const GAMMA: f64 = 1e-4;

const CYCLIC_BASE: u8 = 1;
const ACYCLIC_BASE: u8 = CYCLIC_BASE + MAX_SUPPORTED_CYCLIC as u8;

// ---------------------------------------------------------------------------
// Type codes
// ---------------------------------------------------------------------------

/// A rule shape and body length packed into one small integer.
///
/// `0` is the zero rule, `1..=10` cyclic lengths, `11..=13` acyclic lengths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeCode(u8);

/// The four facets a [`TypeCode`] encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeFacets {
    pub zero: bool,
    pub cyclic: bool,
    pub acyclic: bool,
    pub len: usize,
}

/// What a worker mines under a type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Zero,
    Cyclic(usize),
    Acyclic(usize),
}

impl TypeCode {
    /// Pack the facets; `None` unless exactly one kind flag is set and the
    /// length fits that kind.
    pub fn encode(zero: bool, cyclic: bool, acyclic: bool, len: usize) -> Option<Self> {
        match (zero, cyclic, acyclic) {
            (true, false, false) if len == 0 => Some(Self(0)),
            (false, true, false) if (1..=MAX_SUPPORTED_CYCLIC).contains(&len) => {
                Some(Self(CYCLIC_BASE + len as u8 - 1))
            }
            (false, false, true) if (1..=MAX_SUPPORTED_ACYCLIC).contains(&len) => {
                Some(Self(ACYCLIC_BASE + len as u8 - 1))
            }
            _ => None,
        }
    }

    pub fn decode(self) -> TypeFacets {
        let (zero, cyclic, acyclic, len) = match self.shape() {
            Shape::Zero => (true, false, false, 0),
            Shape::Cyclic(n) => (false, true, false, n),
            Shape::Acyclic(n) => (false, false, true, n),
        };
        TypeFacets {
            zero,
            cyclic,
            acyclic,
            len,
        }
    }

    pub fn shape(self) -> Shape {
        match self.0 {
            0 => Shape::Zero,
            c if c < ACYCLIC_BASE => Shape::Cyclic((c - CYCLIC_BASE) as usize + 1),
            c => Shape::Acyclic((c - ACYCLIC_BASE) as usize + 1),
        }
    }

    pub fn from_index(i: usize) -> Option<Self> {
        (i < SLOTS).then_some(Self(i as u8))
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn all() -> impl Iterator<Item = TypeCode> {
        (0..SLOTS as u8).map(TypeCode)
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shape() {
            Shape::Zero => write!(f, "zero"),
            Shape::Cyclic(n) => write!(f, "c{n}"),
            Shape::Acyclic(n) => write!(f, "a{n}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Dice
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct AuditRow {
    timestamp_ms: u128,
    means: [f64; SLOTS],
    freqs: [u64; SLOTS],
}

/// Per-type productivity tracker and type picker.
///
/// Owned by the coordinator; workers never touch it.
#[derive(Debug)]
pub struct Dice {
    policy: DicePolicy,
    epsilon: f64,
    annealing: f64,
    enabled: [bool; SLOTS],
    relevance: [f64; SLOTS],
    current: [f64; SLOTS],
    freq: [u64; SLOTS],
    rows: Vec<AuditRow>,
    audit_path: Option<PathBuf>,
}

impl Dice {
    /// Enabled types follow the configured rule lengths and shape toggles.
    pub fn new(cfg: &DiceConfig, rules: &RulesConfig, audit_path: Option<PathBuf>) -> Self {
        let mut enabled = [false; SLOTS];
        for code in TypeCode::all() {
            enabled[code.index()] = match code.shape() {
                Shape::Zero => rules.zero_rules,
                Shape::Cyclic(n) => n <= rules.max_length_cyclic,
                Shape::Acyclic(n) => n <= rules.max_length_acyclic,
            };
        }
        let relevance = std::array::from_fn(|i| if enabled[i] { INITIAL } else { 0.0 });
        Self {
            policy: cfg.policy,
            epsilon: cfg.epsilon,
            annealing: cfg.annealing,
            enabled,
            relevance,
            current: [0.0; SLOTS],
            freq: [0; SLOTS],
            rows: Vec::new(),
            audit_path,
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = TypeCode> + '_ {
        TypeCode::all().filter(|c| self.enabled[c.index()])
    }

    /// Current draw weight of `code`; zero for disabled types.
    pub fn weight(&self, code: TypeCode) -> f64 {
        self.relevance[code.index()]
    }

    /// Fold one worker's batch productivity into `code`.
    pub fn add_score(&mut self, code: TypeCode, score: f64) {
        let i = code.index();
        self.current[i] += if score > 0.0 { score } else { GAMMA };
        self.freq[i] += 1;
    }

    /// Turn the batch's scores into draw weights.
    ///
    /// A type that was mined this batch gets its mean score; others keep
    /// their weight. No enabled weight drops below [`GAMMA`].
    pub fn recompute(&mut self) {
        for i in 0..SLOTS {
            if !self.enabled[i] {
                continue;
            }
            if self.current[i] > 0.0 && self.freq[i] > 0 {
                self.relevance[i] = self.current[i] / self.freq[i] as f64;
            }
            self.relevance[i] = self.relevance[i].max(GAMMA);
        }
    }

    /// Pick a type for one worker in batch `batch`.
    pub fn ask<R: Rng + ?Sized>(&self, batch: u64, rng: &mut R) -> TypeCode {
        let codes: Vec<TypeCode> = self.enabled().collect();
        let explore = ((self.annealing - batch as f64) / self.annealing).max(self.epsilon);
        if codes.len() == 1 || rng.r#gen::<f64>() < explore {
            return codes.choose(rng).copied().unwrap_or(TypeCode(0));
        }
        match self.policy {
            DicePolicy::Greedy => codes
                .iter()
                .copied()
                .max_by(|a, b| self.weight(*a).total_cmp(&self.weight(*b)))
                .unwrap_or(TypeCode(0)),
            DicePolicy::Proportional => {
                let weights: Vec<f64> = codes.iter().map(|c| self.weight(*c)).collect();
                match WeightedIndex::new(&weights) {
                    Ok(dist) => codes[dist.sample(rng)],
                    Err(_) => codes.choose(rng).copied().unwrap_or(TypeCode(0)),
                }
            }
        }
    }

    /// Clear the batch scores.
    pub fn reset(&mut self) {
        self.current = [0.0; SLOTS];
        self.freq = [0; SLOTS];
    }

    /// Record the batch's mean scores and frequencies as an audit row.
    pub fn save(&mut self) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let means = std::array::from_fn(|i| self.current[i] / self.freq[i].max(1) as f64);
        self.rows.push(AuditRow {
            timestamp_ms,
            means,
            freqs: self.freq,
        });
    }

    /// Write every audit row so far to `<audit_path>_<suffix>`.
    ///
    /// Returns the written path, or `None` when no audit path is configured.
    pub fn write(&self, suffix: &str) -> LearnResult<Option<PathBuf>> {
        let Some(base) = &self.audit_path else {
            return Ok(None);
        };
        let path = suffixed(base, suffix);
        let mut out = String::from("timestamp_ms");
        for code in self.enabled() {
            out.push_str(&format!("\t{code}_mean\t{code}_freq"));
        }
        out.push('\n');
        for row in &self.rows {
            out.push_str(&row.timestamp_ms.to_string());
            for code in self.enabled() {
                let i = code.index();
                out.push_str(&format!("\t{}\t{}", row.means[i], row.freqs[i]));
            }
            out.push('\n');
        }
        let err = |source| LearnError::DiceWrite {
            path: path.display().to_string(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(err)?;
        }
        fs::write(&path, out).map_err(err)?;
        Ok(Some(path))
    }
}

impl fmt::Display for Dice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, code) in self.enabled().enumerate() {
            if n > 0 {
                write!(f, " ")?;
            }
            let w = self.weight(code);
            if w >= INITIAL {
                write!(f, "{code}=untried")?;
            } else {
                write!(f, "{code}={w:.4}")?;
            }
        }
        Ok(())
    }
}

/// `<base>_<suffix>`, keeping the directory of `base`.
pub(crate) fn suffixed(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push("_");
    name.push(suffix);
    PathBuf::from(name)
}
