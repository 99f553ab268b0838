//! Rich diagnostic error types for the akh-mine engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text so a failed run says exactly which
//! relation, file, or setting was at fault.
//!
//! Expected outcomes of mining (a walk that found no continuation, a candidate
//! rule that scored too low, a duplicate insertion) are not errors and never
//! show up here.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for the akh-mine engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum MineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Learn(#[from] LearnError),
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("failed to read triples from {path}")]
    #[diagnostic(
        code(akh::graph::io),
        help("Check that the training file exists and is readable.")
    )]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("internal reference to relation \"{relation}\", which is not indexed")]
    #[diagnostic(
        code(akh::graph::unknown_relation),
        help(
            "A rule or a single-relation restriction names a relation that does not \
             occur in the loaded graph. Check that the rule set and the triple set \
             fit together."
        )
    )]
    UnknownRelation { relation: String },

    #[error("graph contains no usable triples")]
    #[diagnostic(
        code(akh::graph::empty),
        help(
            "Every line of the input was skipped. Lines need at least three \
             tab- or space-separated tokens and constants of two or more characters."
        )
    )]
    Empty,
}

// ---------------------------------------------------------------------------
// Rule errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum RuleError {
    #[error("malformed rule line {line}: {message}")]
    #[diagnostic(
        code(akh::rule::parse),
        help(
            "Rule lines have the form \
             `predicted<TAB>correct<TAB>confidence<TAB>head <= body1, body2`."
        )
    )]
    Parse { line: usize, message: String },

    #[error("failed to read rules from {path}")]
    #[diagnostic(code(akh::rule::io), help("Check that the rule file exists and is readable."))]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to write rule snapshot {path}")]
    #[diagnostic(
        code(akh::rule::write),
        help("Check that the output directory exists and has free space.")
    )]
    Write {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    #[diagnostic(code(akh::config::read), help("Check that the file exists and is readable."))]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {message}")]
    #[diagnostic(
        code(akh::config::parse),
        help(
            "The config must be valid TOML. Unknown keys are rejected; \
             check the key names against the documented sections."
        )
    )]
    Parse { path: String, message: String },

    #[error("invalid value for `{field}`: {reason}")]
    #[diagnostic(code(akh::config::invalid))]
    Invalid { field: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Learn loop errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LearnError {
    #[error("failed to start worker thread {index}")]
    #[diagnostic(
        code(akh::learn::spawn),
        help(
            "The operating system refused to start a worker. Lower `learn.workers` \
             or raise the process thread limit; the miner never runs with fewer \
             workers than configured."
        )
    )]
    Spawn {
        index: usize,
        source: std::io::Error,
    },

    #[error("worker {index} panicked")]
    #[diagnostic(code(akh::learn::worker_panic))]
    WorkerPanic { index: usize },

    #[error("failed to start snapshot writer for {path}")]
    #[diagnostic(code(akh::learn::writer_spawn))]
    WriterSpawn {
        path: String,
        source: std::io::Error,
    },

    #[error("snapshot writer for {path} panicked")]
    #[diagnostic(code(akh::learn::writer_panic))]
    WriterPanic { path: String },

    #[error("failed to write dice audit {path}")]
    #[diagnostic(code(akh::learn::dice_write))]
    DiceWrite {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to install signal handler: {message}")]
    #[diagnostic(code(akh::learn::signal))]
    Signal { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rule(#[from] RuleError),
}

/// Convenience alias for functions returning akh-mine results.
pub type MineResult<T> = std::result::Result<T, MineError>;
