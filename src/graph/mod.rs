//! Knowledge graph: interned triples and the read-only index mined over.
//!
//! The graph is read once from a line-oriented edge list, indexed by
//! [`GraphIndex`], and never mutated while mining runs. Only an explicit
//! [`GraphIndex::merge`] before mining can add facts.
//!
//! Line parsing lives here because it decides which triples exist at all:
//! constants shorter than two characters are invalid, and reflexive facts
//! can be rewritten to a sentinel object.

pub mod index;

pub use index::{GraphIndex, GraphResult, IndexStats};

use serde::{Deserialize, Serialize};

use crate::config::InputConfig;
use crate::symbol::SymbolId;

/// A fact `(subject, relation, object)` over interned labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: SymbolId,
    pub relation: SymbolId,
    pub object: SymbolId,
}

impl Triple {
    pub fn new(subject: SymbolId, relation: SymbolId, object: SymbolId) -> Self {
        Self {
            subject,
            relation,
            object,
        }
    }

    /// The subject if `head` is set, otherwise the object.
    pub fn value(&self, head: bool) -> SymbolId {
        if head { self.subject } else { self.object }
    }
}

/// Label-level triple as read from a line, before interning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTriple {
    pub subject: String,
    pub relation: String,
    pub object: String,
}

impl RawTriple {
    fn new(subject: &str, relation: &str, object: &str) -> Self {
        Self {
            subject: subject.to_string(),
            relation: relation.to_string(),
            object: object.to_string(),
        }
    }
}

/// Options controlling how lines become triples.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Sentinel object for `x r x` facts; `None` keeps them verbatim.
    pub reflexive_token: Option<String>,
    /// Prefix entity labels with `e` and relation labels with `r`.
    pub safe_prefix: bool,
}

impl From<&InputConfig> for ReadOptions {
    fn from(input: &InputConfig) -> Self {
        Self {
            reflexive_token: input
                .reflexive_rewrite
                .then(|| input.reflexive_token.clone()),
            safe_prefix: input.safe_prefix,
        }
    }
}

const ENTITY_PREFIX: &str = "e";
const RELATION_PREFIX: &str = "r";

/// What a single input line turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Too short to hold a fact; skipped without comment.
    Blank,
    /// One fact, or a rewritten reflexive fact followed by its mirror.
    Facts(Vec<RawTriple>),
    /// Could not be split into a fact.
    Malformed(&'static str),
    /// Split fine, but a constant is shorter than two characters.
    Invalid,
}

/// Whether `label` reads back unchanged from a rule line.
///
/// Rule lines delimit atoms with parentheses and commas and split head from
/// body at `<=`, and terms are trimmed when read.
pub fn is_rule_safe(label: &str) -> bool {
    !label.contains(['(', ')', ',']) && !label.contains("<=") && label.trim() == label
}

/// Parse one line of an edge list.
///
/// Tokens are tab-separated, falling back to spaces and then to `#` when a
/// split yields fewer than three tokens. A fourth token must be `.`; a
/// five-token line is the legacy form whose fields may contain spaces.
pub fn parse_line(line: &str, opts: &ReadOptions) -> LineOutcome {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.chars().count() <= 2 {
        return LineOutcome::Blank;
    }
    let mut tokens = split_nonempty(line, '\t');
    if tokens.len() < 3 {
        tokens = split_nonempty(line, ' ');
    }
    if tokens.len() < 3 {
        tokens = split_nonempty(line, '#');
    }

    let (s, r, o) = match tokens.len() {
        3 => (tokens[0].to_string(), tokens[1].to_string(), tokens[2].to_string()),
        4 if tokens[3] == "." => {
            (tokens[0].to_string(), tokens[1].to_string(), tokens[2].to_string())
        }
        4 => return LineOutcome::Malformed("fourth token is not a `.` terminator"),
        5 => (
            tokens[0].replace(' ', "_"),
            tokens[1].replace(' ', "_"),
            tokens[2].replace(' ', "_"),
        ),
        n if n < 3 => return LineOutcome::Malformed("fewer than three tokens"),
        _ => return LineOutcome::Malformed("too many tokens"),
    };

    let (s, r, o) = if opts.safe_prefix {
        (
            format!("{ENTITY_PREFIX}{s}"),
            format!("{RELATION_PREFIX}{r}"),
            format!("{ENTITY_PREFIX}{o}"),
        )
    } else {
        (s, r, o)
    };

    if s.chars().count() < 2 || o.chars().count() < 2 {
        return LineOutcome::Invalid;
    }
    if ![&s, &r, &o].iter().all(|l| is_rule_safe(l)) {
        return LineOutcome::Malformed("label contains `(`, `)`, `,`, `<=` or surrounding spaces");
    }

    match &opts.reflexive_token {
        Some(token) if s == o => LineOutcome::Facts(vec![
            RawTriple::new(&s, &r, token),
            RawTriple::new(token, &r, &s),
        ]),
        _ => LineOutcome::Facts(vec![RawTriple::new(&s, &r, &o)]),
    }
}

fn split_nonempty(line: &str, sep: char) -> Vec<&str> {
    line.split(sep).filter(|t| !t.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(outcome: LineOutcome) -> Vec<(String, String, String)> {
        match outcome {
            LineOutcome::Facts(v) => v
                .into_iter()
                .map(|t| (t.subject, t.relation, t.object))
                .collect(),
            other => panic!("expected facts, got {other:?}"),
        }
    }

    fn plain() -> ReadOptions {
        ReadOptions::default()
    }

    #[test]
    fn tab_and_space_separated() {
        let a = facts(parse_line("paris\tcapital_of\tfrance", &plain()));
        let b = facts(parse_line("paris capital_of france", &plain()));
        assert_eq!(a, b);
        assert_eq!(a[0].0, "paris");
    }

    #[test]
    fn trailing_dot_is_tolerated() {
        let f = facts(parse_line("paris capital_of france .", &plain()));
        assert_eq!(f[0].2, "france");
        assert!(matches!(
            parse_line("paris capital_of france !", &plain()),
            LineOutcome::Malformed(_)
        ));
    }

    #[test]
    fn legacy_five_field_normalizes_spaces() {
        let f = facts(parse_line("new york\tlocated in\tusa\tx\ty", &plain()));
        assert_eq!(f[0], ("new_york".into(), "located_in".into(), "usa".into()));
    }

    #[test]
    fn hash_separated_fields() {
        let f = facts(parse_line("paris#capital_of#france", &plain()));
        assert_eq!(f[0].1, "capital_of");
    }

    #[test]
    fn short_lines_and_short_constants() {
        assert_eq!(parse_line("ab", &plain()), LineOutcome::Blank);
        assert_eq!(parse_line("a r bb", &plain()), LineOutcome::Invalid);
        assert!(matches!(parse_line("only two", &plain()), LineOutcome::Malformed(_)));
    }

    #[test]
    fn labels_must_survive_rule_lines() {
        for line in [
            "f(x)\tr1\tbb",
            "aa\tborn in,at\tbb",
            "aa\tr1\t<=bb",
            "aa\tr1\tbb \t.",
        ] {
            assert!(
                matches!(parse_line(line, &plain()), LineOutcome::Malformed(_)),
                "{line:?}"
            );
        }
        let f = facts(parse_line("dbpedia:Paris\tborn_in.x/y\tq-42", &plain()));
        assert_eq!(f[0].0, "dbpedia:Paris");
        assert!(is_rule_safe("new york"));
    }

    #[test]
    fn reflexive_rewrite_adds_mirror() {
        let opts = ReadOptions {
            reflexive_token: Some("me_myself_i".into()),
            safe_prefix: false,
        };
        let f = facts(parse_line("bob knows bob", &opts));
        assert_eq!(
            f,
            vec![
                ("bob".into(), "knows".into(), "me_myself_i".into()),
                ("me_myself_i".into(), "knows".into(), "bob".into()),
            ]
        );
        assert_eq!(facts(parse_line("bob knows bob", &plain())).len(), 1);
    }

    #[test]
    fn safe_prefix_applies_before_length_check() {
        let opts = ReadOptions {
            reflexive_token: None,
            safe_prefix: true,
        };
        let f = facts(parse_line("a 1 b", &opts));
        assert_eq!(f[0], ("ea".into(), "r1".into(), "eb".into()));
    }
}
