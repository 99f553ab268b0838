//! Reading rule files back, with a shape and quality filter.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::config::ReadConfig;
use crate::error::RuleError;
use crate::symbol::SymbolTable;

use super::{Rule, RuleKind, RuleResult};

/// Which rules survive reading a rule file.
#[derive(Debug, Clone)]
pub struct ReadFilter {
    pub min_confidence: f64,
    pub min_correct: usize,
    pub max_length: usize,
    pub cyclic: bool,
    pub two_anchor: bool,
    pub one_anchor: bool,
    pub zero: bool,
}

impl From<&ReadConfig> for ReadFilter {
    fn from(cfg: &ReadConfig) -> Self {
        Self {
            min_confidence: cfg.min_confidence,
            min_correct: cfg.min_correct,
            max_length: cfg.max_length,
            cyclic: cfg.cyclic,
            two_anchor: cfg.two_anchor,
            one_anchor: cfg.one_anchor,
            zero: cfg.zero,
        }
    }
}

impl Default for ReadFilter {
    fn default() -> Self {
        Self::from(&ReadConfig::default())
    }
}

impl ReadFilter {
    pub fn keeps(&self, rule: &Rule) -> bool {
        let s = rule.scores();
        let kind_enabled = match rule.kind() {
            RuleKind::Cyclic => self.cyclic,
            RuleKind::AcyclicTwoAnchor { .. } => self.two_anchor,
            RuleKind::AcyclicOneAnchor { .. } => self.one_anchor,
            RuleKind::Zero { .. } => self.zero,
        };
        kind_enabled
            && s.confidence >= self.min_confidence
            && s.correct >= self.min_correct
            && rule.len() <= self.max_length
    }
}

/// Read every rule line of `reader` that passes `filter`.
///
/// Blank lines are skipped; any other unparsable line is an error.
pub fn parse_rules<R: BufRead>(
    reader: R,
    symbols: &SymbolTable,
    filter: &ReadFilter,
    path: &str,
) -> RuleResult<Vec<Rule>> {
    let mut rules = Vec::new();
    let mut dropped = 0usize;
    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|source| RuleError::Io {
            path: path.to_string(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let rule = Rule::parse_line(&line, i + 1, symbols)?;
        if filter.keeps(&rule) {
            rules.push(rule);
        } else {
            dropped += 1;
        }
    }
    tracing::debug!(path, kept = rules.len(), dropped, "read rule file");
    Ok(rules)
}

/// Read and filter the rule file at `path`.
pub fn read_rules(path: &Path, symbols: &SymbolTable, filter: &ReadFilter) -> RuleResult<Vec<Rule>> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|source| RuleError::Io {
        path: display.clone(),
        source,
    })?;
    parse_rules(BufReader::new(file), symbols, filter, &display)
}
