//! Typed run configuration loaded from TOML.
//!
//! Every section has documented defaults. Unknown keys are rejected when the
//! file is parsed, and [`MineConfig::validate`] checks value ranges before a run
//! starts, so a typo fails fast instead of silently mining with a default.
//!
//! ```toml
//! [paths]
//! training = "data/train.txt"
//! output = "out/rules"
//!
//! [learn]
//! workers = 8
//! batch_ms = 5000
//! snapshots_secs = [10, 100]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Body length limits of the type-code space.
pub const MAX_SUPPORTED_CYCLIC: usize = 10;
pub const MAX_SUPPORTED_ACYCLIC: usize = 3;

/// Full configuration of a mining run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MineConfig {
    pub paths: PathsConfig,
    #[serde(default)]
    pub learn: LearnConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub dice: DiceConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub read: ReadConfig,
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Triple file the graph index is built from.
    pub training: PathBuf,
    /// Snapshot prefix; each snapshot is written to `<output>-<seconds>`.
    pub output: PathBuf,
    /// Optional prefix for the allocator audit, written to `<dice>_<seconds>`.
    #[serde(default)]
    pub dice: Option<PathBuf>,
    /// Optional triple file whose facts are merged into the index after load.
    #[serde(default)]
    pub base_facts: Option<PathBuf>,
}

/// Scheduler timing and parallelism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LearnConfig {
    /// Number of mining worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Wall-clock duration of one batch in milliseconds.
    #[serde(default = "default_batch_ms")]
    pub batch_ms: u64,
    /// Elapsed seconds at which snapshots are written; the last one ends the run.
    #[serde(default = "default_snapshots_secs")]
    pub snapshots_secs: Vec<u64>,
    /// Base seed for worker RNGs. Entropy-seeded when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}
fn default_batch_ms() -> u64 {
    5_000
}
fn default_snapshots_secs() -> Vec<u64> {
    vec![10, 100, 200, 400]
}

impl Default for LearnConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_ms: default_batch_ms(),
            snapshots_secs: default_snapshots_secs(),
            seed: None,
        }
    }
}

/// Which rule shapes are mined and how long they may get.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesConfig {
    /// Longest cyclic body (0 disables cyclic rules).
    #[serde(default = "default_max_length_cyclic")]
    pub max_length_cyclic: usize,
    /// Longest acyclic body (0 disables acyclic rules).
    #[serde(default = "default_max_length_acyclic")]
    pub max_length_acyclic: usize,
    /// Cyclic walks up to this body length also yield acyclic rules anchored
    /// at the closing constant; longer ones only yield the cyclic rule.
    #[serde(default = "default_max_length_grounded_cyclic")]
    pub max_length_grounded_cyclic: usize,
    /// Mine bodyless zero rules.
    #[serde(default = "default_true")]
    pub zero_rules: bool,
    /// Mine acyclic rules whose last body variable dangles.
    #[serde(default = "default_true")]
    pub one_anchor_rules: bool,
    /// Keep acyclic rules whose head constant reappears as the last body
    /// constant, as the acyclic rules of a grounded cyclic walk are.
    #[serde(default = "default_true")]
    pub keep_self_anchored: bool,
}

fn default_max_length_cyclic() -> usize {
    3
}
fn default_max_length_acyclic() -> usize {
    1
}
fn default_max_length_grounded_cyclic() -> usize {
    1
}
fn default_true() -> bool {
    true
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_length_cyclic: default_max_length_cyclic(),
            max_length_acyclic: default_max_length_acyclic(),
            max_length_grounded_cyclic: default_max_length_grounded_cyclic(),
            zero_rules: true,
            one_anchor_rules: true,
            keep_self_anchored: true,
        }
    }
}

/// How a worker turns its accepted rules into a productivity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardMode {
    /// Number of correct predictions.
    Correct,
    /// Correct predictions times confidence.
    CorrectConfidence,
    /// Correct predictions times applied confidence.
    CorrectApplied,
    /// Correct predictions times squared applied confidence.
    CorrectAppliedSquared,
    /// Correct predictions times applied confidence, halved per extra body atom.
    LengthDiscounted,
}

/// How cyclic rule bodies are grounded during scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundingStrategy {
    /// Bounded depth-first enumeration.
    Dfs,
    /// Random single-path groundings from both ends of the body.
    Beam,
}

/// Rule scoring bounds and acceptance thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoringConfig {
    /// Cap on distinct groundings collected per rule.
    #[serde(default = "default_sample_size")]
    pub sample_size: usize,
    /// Grounding stops descending through nodes with more neighbours than this.
    #[serde(default = "default_branching_bound")]
    pub branching_bound: usize,
    /// Cap on attempts when grounding backwards from the last atom.
    #[serde(default = "default_max_grounding_attempts")]
    pub max_grounding_attempts: usize,
    /// Beam grounding stops after this many consecutive repeated pairs.
    #[serde(default = "default_beam_max_repetitions")]
    pub beam_max_repetitions: usize,
    /// Acyclic rules whose last atom has fewer groundings predict nothing.
    #[serde(default = "default_min_last_atom_groundings")]
    pub min_last_atom_groundings: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_correct")]
    pub min_correct: usize,
    /// Zero rules need strictly more correct predictions than this.
    #[serde(default = "default_min_correct_zero")]
    pub min_correct_zero: usize,
    /// Pseudo-count of unseen negatives in the applied confidence.
    #[serde(default = "default_unseen_negatives")]
    pub unseen_negatives: usize,
    #[serde(default = "default_zero_weight")]
    pub zero_weight: f64,
    #[serde(default = "default_one_anchor_weight")]
    pub one_anchor_weight: f64,
    #[serde(default = "default_reward")]
    pub reward: RewardMode,
    #[serde(default = "default_grounding")]
    pub grounding: GroundingStrategy,
}

fn default_sample_size() -> usize {
    2_000
}
fn default_branching_bound() -> usize {
    1_000
}
fn default_max_grounding_attempts() -> usize {
    100_000
}
fn default_beam_max_repetitions() -> usize {
    5
}
fn default_min_last_atom_groundings() -> usize {
    5
}
fn default_min_confidence() -> f64 {
    0.0001
}
fn default_min_correct() -> usize {
    2
}
fn default_min_correct_zero() -> usize {
    100
}
fn default_unseen_negatives() -> usize {
    5
}
fn default_zero_weight() -> f64 {
    0.01
}
fn default_one_anchor_weight() -> f64 {
    0.1
}
fn default_reward() -> RewardMode {
    RewardMode::LengthDiscounted
}
fn default_grounding() -> GroundingStrategy {
    GroundingStrategy::Dfs
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            sample_size: default_sample_size(),
            branching_bound: default_branching_bound(),
            max_grounding_attempts: default_max_grounding_attempts(),
            beam_max_repetitions: default_beam_max_repetitions(),
            min_last_atom_groundings: default_min_last_atom_groundings(),
            min_confidence: default_min_confidence(),
            min_correct: default_min_correct(),
            min_correct_zero: default_min_correct_zero(),
            unseen_negatives: default_unseen_negatives(),
            zero_weight: default_zero_weight(),
            one_anchor_weight: default_one_anchor_weight(),
            reward: default_reward(),
            grounding: default_grounding(),
        }
    }
}

/// Exploitation policy of the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DicePolicy {
    /// Always the type with the best mean score.
    Greedy,
    /// Draw proportionally to mean score.
    Proportional,
}

/// Allocator exploration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiceConfig {
    #[serde(default = "default_policy")]
    pub policy: DicePolicy,
    /// Lower bound on the probability of a uniformly random pick.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Number of batches over which random picks anneal down to `epsilon`.
    #[serde(default = "default_annealing")]
    pub annealing: f64,
}

fn default_policy() -> DicePolicy {
    DicePolicy::Proportional
}
fn default_epsilon() -> f64 {
    0.1
}
fn default_annealing() -> f64 {
    5.0
}

impl Default for DiceConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
            epsilon: default_epsilon(),
            annealing: default_annealing(),
        }
    }
}

/// How the triple file is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Restrict walk start triples to these relations.
    #[serde(default)]
    pub single_relations: Vec<String>,
    /// Replace the object of `x r x` triples by `reflexive_token`.
    #[serde(default = "default_true")]
    pub reflexive_rewrite: bool,
    #[serde(default = "default_reflexive_token")]
    pub reflexive_token: String,
    /// Prefix entity labels with `e` and relation labels with `r`.
    #[serde(default)]
    pub safe_prefix: bool,
}

fn default_reflexive_token() -> String {
    "me_myself_i".into()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            single_relations: Vec::new(),
            reflexive_rewrite: true,
            reflexive_token: default_reflexive_token(),
            safe_prefix: false,
        }
    }
}

/// File-level filter applied when a rule file is read back.
///
/// Independent of the acceptance thresholds in [`ScoringConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReadConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_correct")]
    pub min_correct: usize,
    #[serde(default = "default_read_max_length")]
    pub max_length: usize,
    #[serde(default = "default_true")]
    pub cyclic: bool,
    #[serde(default = "default_true")]
    pub two_anchor: bool,
    #[serde(default = "default_true")]
    pub one_anchor: bool,
    #[serde(default = "default_true")]
    pub zero: bool,
}

fn default_read_max_length() -> usize {
    10
}

impl Default for ReadConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            min_correct: default_min_correct(),
            max_length: default_read_max_length(),
            cyclic: true,
            two_anchor: true,
            one_anchor: true,
            zero: true,
        }
    }
}

impl MineConfig {
    /// A config with default settings for the given input and output paths.
    pub fn new(training: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            paths: PathsConfig {
                training: training.into(),
                output: output.into(),
                dice: None,
                base_facts: None,
            },
            learn: LearnConfig::default(),
            rules: RulesConfig::default(),
            scoring: ScoringConfig::default(),
            dice: DiceConfig::default(),
            input: InputConfig::default(),
            read: ReadConfig::default(),
        }
    }

    /// Load and validate from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".into(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints.
    pub fn validate(&self) -> ConfigResult<()> {
        let learn = &self.learn;
        if learn.workers == 0 {
            return Err(invalid("learn.workers", "at least one worker is required"));
        }
        if learn.batch_ms == 0 {
            return Err(invalid("learn.batch_ms", "batch duration must be positive"));
        }
        if learn.snapshots_secs.is_empty() {
            return Err(invalid(
                "learn.snapshots_secs",
                "at least one snapshot time is required; the last one ends the run",
            ));
        }
        if learn.snapshots_secs.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(
                "learn.snapshots_secs",
                "snapshot times must be strictly increasing",
            ));
        }

        let rules = &self.rules;
        if rules.max_length_cyclic > MAX_SUPPORTED_CYCLIC {
            return Err(invalid(
                "rules.max_length_cyclic",
                format!("at most {MAX_SUPPORTED_CYCLIC} is supported"),
            ));
        }
        if rules.max_length_acyclic > MAX_SUPPORTED_ACYCLIC {
            return Err(invalid(
                "rules.max_length_acyclic",
                format!("at most {MAX_SUPPORTED_ACYCLIC} is supported"),
            ));
        }
        if !rules.zero_rules && rules.max_length_cyclic == 0 && rules.max_length_acyclic == 0 {
            return Err(invalid("rules", "every rule type is disabled"));
        }

        let scoring = &self.scoring;
        if scoring.sample_size == 0 {
            return Err(invalid("scoring.sample_size", "must be positive"));
        }
        if scoring.branching_bound == 0 {
            return Err(invalid("scoring.branching_bound", "must be positive"));
        }
        if !(0.0..=1.0).contains(&scoring.min_confidence) {
            return Err(invalid("scoring.min_confidence", "must lie in [0, 1]"));
        }

        let dice = &self.dice;
        if !(0.0..=1.0).contains(&dice.epsilon) {
            return Err(invalid("dice.epsilon", "must lie in [0, 1]"));
        }
        if dice.annealing <= 0.0 {
            return Err(invalid("dice.annealing", "must be positive"));
        }

        if self.input.reflexive_rewrite && self.input.reflexive_token.chars().count() < 2 {
            return Err(invalid(
                "input.reflexive_token",
                "must be at least two characters like any other constant",
            ));
        }
        if self.input.reflexive_rewrite && !crate::graph::is_rule_safe(&self.input.reflexive_token) {
            return Err(invalid(
                "input.reflexive_token",
                "must not contain `(`, `)`, `,`, `<=` or surrounding spaces",
            ));
        }
        if !(0.0..=1.0).contains(&self.read.min_confidence) {
            return Err(invalid("read.min_confidence", "must lie in [0, 1]"));
        }
        Ok(())
    }

    /// Elapsed seconds of the terminal snapshot.
    pub fn final_snapshot_secs(&self) -> u64 {
        self.learn.snapshots_secs.last().copied().unwrap_or(0)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [paths]
        training = "train.txt"
        output = "out/rules"
    "#;

    #[test]
    fn minimal_config_takes_defaults() {
        let cfg = MineConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(cfg.learn.batch_ms, 5_000);
        assert_eq!(cfg.learn.snapshots_secs, vec![10, 100, 200, 400]);
        assert_eq!(cfg.rules.max_length_cyclic, 3);
        assert!(cfg.rules.keep_self_anchored);
        assert_eq!(cfg.scoring.reward, RewardMode::LengthDiscounted);
        assert_eq!(cfg.dice.policy, DicePolicy::Proportional);
        assert_eq!(cfg.final_snapshot_secs(), 400);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let text = format!("{MINIMAL}\n[learn]\nworkerz = 3\n");
        let err = MineConfig::from_toml(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_paths_is_rejected() {
        let err = MineConfig::from_toml("[learn]\nworkers = 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn snapshots_must_increase() {
        let text = format!("{MINIMAL}\n[learn]\nsnapshots_secs = [10, 10]\n");
        let err = MineConfig::from_toml(&text).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "learn.snapshots_secs",
                ..
            }
        ));
    }

    #[test]
    fn reflexive_token_must_be_a_rule_label() {
        let text = format!(
            "{MINIMAL}\n[input]\nreflexive_rewrite = true\nreflexive_token = \"me,myself\"\n"
        );
        let err = MineConfig::from_toml(&text).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "input.reflexive_token",
                ..
            }
        ));
    }

    #[test]
    fn enum_settings_parse_snake_case() {
        let text = format!(
            "{MINIMAL}\n[scoring]\nreward = \"correct_applied\"\ngrounding = \"beam\"\n[dice]\npolicy = \"greedy\"\n"
        );
        let cfg = MineConfig::from_toml(&text).unwrap();
        assert_eq!(cfg.scoring.reward, RewardMode::CorrectApplied);
        assert_eq!(cfg.scoring.grounding, GroundingStrategy::Beam);
        assert_eq!(cfg.dice.policy, DicePolicy::Greedy);
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mine.toml");
        std::fs::write(&path, "[paths\n").unwrap();
        match MineConfig::load(&path) {
            Err(ConfigError::Parse { path: p, .. }) => assert!(p.ends_with("mine.toml")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn all_types_disabled_is_invalid() {
        let mut cfg = MineConfig::new("t", "o");
        cfg.rules.zero_rules = false;
        cfg.rules.max_length_cyclic = 0;
        cfg.rules.max_length_acyclic = 0;
        assert!(cfg.validate().is_err());
    }
}
