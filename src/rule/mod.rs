//! Mined rules: terms, atoms, and the tagged [`RuleKind`].
//!
//! A rule is `head <= body1, body2, ...` over relation atoms. Head slots are
//! the variables `X` (left) and `Y` (right); body-only variables are `A`..`P`.
//! Every rule is kept in a canonical form so that structural equality is
//! rule identity, regardless of which walk produced it.
//!
//! Rules print as `predicted<TAB>correct<TAB>confidence<TAB>head <= body`,
//! one per line, and every such line parses back with [`Rule::parse_line`].

pub mod filter;
pub mod generalize;
pub mod score;

pub use filter::ReadFilter;
pub use generalize::Generalizer;
pub use score::{Acceptance, Scorer};

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

use serde::Serialize;

use crate::config::{RewardMode, ScoringConfig};
use crate::error::RuleError;
use crate::sample::Direction;
use crate::symbol::{SymbolId, SymbolTable};

/// Result type for rule operations.
pub type RuleResult<T> = std::result::Result<T, RuleError>;

/// Number of distinct body-only variables (`A`..`P`).
pub const FREE_VARIABLES: u8 = 16;

// ---------------------------------------------------------------------------
// Terms
// ---------------------------------------------------------------------------

/// A rule variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Var {
    X,
    Y,
    /// Body-only variable; `Free(0)` prints as `A`.
    Free(u8),
}

impl Var {
    fn parse(token: &str) -> Option<Self> {
        let mut chars = token.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        match c {
            'X' => Some(Var::X),
            'Y' => Some(Var::Y),
            'A'..='P' => Some(Var::Free(c as u8 - b'A')),
            _ => None,
        }
    }
}

impl std::fmt::Display for Var {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Var::X => write!(f, "X"),
            Var::Y => write!(f, "Y"),
            Var::Free(n) => write!(f, "{}", (b'A' + n) as char),
        }
    }
}

/// Which head slot of an acyclic or zero rule is the variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum HeadVar {
    /// `r(X, c)`: predicts subjects for a fixed object.
    X,
    /// `r(c, Y)`: predicts objects for a fixed subject.
    Y,
}

/// A variable or a graph constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Term {
    Var(Var),
    Const(SymbolId),
}

impl Term {
    pub fn as_var(self) -> Option<Var> {
        match self {
            Term::Var(v) => Some(v),
            Term::Const(_) => None,
        }
    }

    pub fn as_const(self) -> Option<SymbolId> {
        match self {
            Term::Const(c) => Some(c),
            Term::Var(_) => None,
        }
    }
}

/// `relation(left, right)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atom {
    pub relation: SymbolId,
    pub left: Term,
    pub right: Term,
}

impl Atom {
    pub fn new(relation: SymbolId, left: Term, right: Term) -> Self {
        Self {
            relation,
            left,
            right,
        }
    }

    /// Ground atom of a triple.
    pub fn ground(subject: SymbolId, relation: SymbolId, object: SymbolId) -> Self {
        Self::new(relation, Term::Const(subject), Term::Const(object))
    }

    pub fn contains(&self, term: Term) -> bool {
        self.left == term || self.right == term
    }

    pub fn contains_var(&self, var: Var) -> bool {
        self.contains(Term::Var(var))
    }

    /// The atom's constant, left slot first.
    pub fn constant(&self) -> Option<SymbolId> {
        self.left.as_const().or(self.right.as_const())
    }

    /// Replace every occurrence of `c` by `var`, returning how many were replaced.
    fn replace(&mut self, c: SymbolId, var: Var) -> usize {
        let mut n = 0;
        for slot in [&mut self.left, &mut self.right] {
            if *slot == Term::Const(c) {
                *slot = Term::Var(var);
                n += 1;
            }
        }
        n
    }

    fn rename(&mut self, map: &HashMap<u8, u8>) {
        for slot in [&mut self.left, &mut self.right] {
            if let Term::Var(Var::Free(n)) = slot {
                if let Some(m) = map.get(n) {
                    *n = *m;
                }
            }
        }
    }

    pub fn display<'a>(&'a self, symbols: &'a SymbolTable) -> AtomDisplay<'a> {
        AtomDisplay {
            atom: self,
            symbols,
        }
    }

    fn parse(text: &str, symbols: &SymbolTable) -> Option<Self> {
        let text = text.trim();
        let open = text.find('(')?;
        let inner = text[open + 1..].strip_suffix(')')?;
        let (left, right) = inner.split_once(',')?;
        let relation = &text[..open];
        if relation.is_empty() {
            return None;
        }
        let term = |t: &str| {
            let t = t.trim();
            match Var::parse(t) {
                Some(v) => Term::Var(v),
                None => Term::Const(symbols.intern(t)),
            }
        };
        Some(Self::new(symbols.intern(relation), term(left), term(right)))
    }
}

pub struct AtomDisplay<'a> {
    atom: &'a Atom,
    symbols: &'a SymbolTable,
}

impl std::fmt::Display for AtomDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let term = |t: Term| match t {
            Term::Var(v) => v.to_string(),
            Term::Const(c) => self.symbols.label(c).to_string(),
        };
        write!(
            f,
            "{}({},{})",
            self.symbols.label(self.atom.relation),
            term(self.atom.left),
            term(self.atom.right)
        )
    }
}

// ---------------------------------------------------------------------------
// Rule kind
// ---------------------------------------------------------------------------

/// Shape of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RuleKind {
    /// `r(X,Y) <= ...` with a body chain from `X` to `Y`.
    Cyclic,
    /// One head constant; the body chain ends in a dangling variable.
    AcyclicOneAnchor { target: HeadVar },
    /// One head constant; the body chain ends in a second constant.
    AcyclicTwoAnchor { target: HeadVar },
    /// One head constant and no body.
    Zero { target: HeadVar },
}

impl RuleKind {
    fn classify(head: &Atom, body: &[Atom]) -> Option<Self> {
        let target = match (head.left, head.right) {
            (Term::Var(Var::X), Term::Var(Var::Y)) => {
                return (!body.is_empty()).then_some(RuleKind::Cyclic);
            }
            (Term::Var(Var::X), Term::Const(_)) => HeadVar::X,
            (Term::Const(_), Term::Var(Var::Y)) => HeadVar::Y,
            _ => return None,
        };
        Some(match body.last() {
            None => RuleKind::Zero { target },
            Some(last) if last.constant().is_some() => RuleKind::AcyclicTwoAnchor { target },
            Some(_) => RuleKind::AcyclicOneAnchor { target },
        })
    }

    pub fn target(self) -> Option<HeadVar> {
        match self {
            RuleKind::Cyclic => None,
            RuleKind::AcyclicOneAnchor { target }
            | RuleKind::AcyclicTwoAnchor { target }
            | RuleKind::Zero { target } => Some(target),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RuleKind::Cyclic => "cyclic",
            RuleKind::AcyclicOneAnchor { .. } => "acyclic_one_anchor",
            RuleKind::AcyclicTwoAnchor { .. } => "acyclic_two_anchor",
            RuleKind::Zero { .. } => "zero",
        }
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Counts from grounding a rule against the graph.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Scores {
    /// Distinct groundings the body produced.
    pub predicted: usize,
    /// How many of those make the head true.
    pub correct: usize,
    pub confidence: f64,
}

impl Scores {
    pub fn new(predicted: usize, correct: usize) -> Self {
        let confidence = if predicted == 0 {
            0.0
        } else {
            correct as f64 / predicted as f64
        };
        Self {
            predicted,
            correct,
            confidence,
        }
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A mined rule in canonical form.
///
/// Equality and hashing cover kind, head, and body; scores are not part of
/// a rule's identity.
#[derive(Debug, Clone)]
pub struct Rule {
    kind: RuleKind,
    head: Atom,
    body: Vec<Atom>,
    scores: Scores,
}

impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.head == other.head && self.body == other.body
    }
}

impl Eq for Rule {}

impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.head.hash(state);
        self.body.hash(state);
    }
}

impl Rule {
    /// Build a rule from a head and body, classifying and canonicalizing it.
    ///
    /// Returns `None` if the shape is not a mined rule shape: a head with two
    /// constants, a cyclic head without body, or too many free variables.
    pub fn new(head: Atom, mut body: Vec<Atom>) -> Option<Self> {
        let kind = RuleKind::classify(&head, &body)?;
        if kind == RuleKind::Cyclic && body.len() > 1 && body[0].contains_var(Var::Y) {
            body.reverse();
        }
        let mut rename = HashMap::new();
        for atom in &body {
            for term in [atom.left, atom.right] {
                if let Term::Var(Var::Free(n)) = term {
                    let next = rename.len() as u8;
                    rename.entry(n).or_insert(next);
                }
            }
        }
        if rename.len() > FREE_VARIABLES as usize {
            return None;
        }
        for atom in &mut body {
            atom.rename(&rename);
        }
        Some(Self {
            kind,
            head,
            body,
            scores: Scores::default(),
        })
    }

    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    pub fn head(&self) -> &Atom {
        &self.head
    }

    pub fn body(&self) -> &[Atom] {
        &self.body
    }

    /// Body length.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn scores(&self) -> Scores {
        self.scores
    }

    pub fn set_scores(&mut self, scores: Scores) {
        self.scores = scores;
    }

    pub fn with_scores(mut self, scores: Scores) -> Self {
        self.scores = scores;
        self
    }

    /// Which head slot is the variable, for non-cyclic rules.
    pub fn target(&self) -> Option<HeadVar> {
        self.kind.target()
    }

    /// `h <= h`.
    pub fn is_trivial(&self) -> bool {
        self.body.len() == 1 && self.head == self.body[0]
    }

    /// Two-anchor rule whose head constant reappears as the last body constant.
    pub fn is_self_anchored(&self) -> bool {
        matches!(self.kind, RuleKind::AcyclicTwoAnchor { .. })
            && self.head.constant().is_some()
            && self.head.constant() == self.body.last().and_then(Atom::constant)
    }

    /// First-hop direction for walks that extend this rule.
    pub fn direction_lock(&self) -> Option<Direction> {
        match self.target()? {
            HeadVar::X => Some(Direction::Backward),
            HeadVar::Y => Some(Direction::Forward),
        }
    }

    /// Every relation the rule mentions, head first.
    pub fn relations(&self) -> impl Iterator<Item = SymbolId> + '_ {
        std::iter::once(self.head.relation).chain(self.body.iter().map(|a| a.relation))
    }

    /// Hash that is stable across runs and processes.
    pub fn stable_hash(&self) -> u64 {
        let mut h = DefaultHasher::new();
        self.hash(&mut h);
        h.finish()
    }

    /// Confidence with pseudo-negatives, down-weighted for weak shapes.
    pub fn applied_confidence(&self, cfg: &ScoringConfig) -> f64 {
        let s = self.scores;
        let applied = s.correct as f64 / (s.predicted + cfg.unseen_negatives) as f64;
        match self.kind {
            RuleKind::Zero { .. } => applied * cfg.zero_weight,
            RuleKind::AcyclicOneAnchor { .. } => applied * cfg.one_anchor_weight,
            _ => applied,
        }
    }

    /// Productivity credited to the worker that stored this rule.
    pub fn reward(&self, cfg: &ScoringConfig) -> f64 {
        let s = self.scores;
        let correct = s.correct as f64;
        let applied = self.applied_confidence(cfg);
        match cfg.reward {
            RewardMode::Correct => correct,
            RewardMode::CorrectConfidence => correct * s.confidence,
            RewardMode::CorrectApplied => correct * applied,
            RewardMode::CorrectAppliedSquared => correct * applied * applied,
            RewardMode::LengthDiscounted => {
                let discount = 2f64.powi(self.body.len().saturating_sub(1) as i32);
                correct * applied / discount
            }
        }
    }

    pub fn display<'a>(&'a self, symbols: &'a SymbolTable) -> RuleDisplay<'a> {
        RuleDisplay {
            rule: self,
            symbols,
        }
    }

    /// The snapshot line for this rule, without a trailing newline.
    pub fn to_line(&self, symbols: &SymbolTable) -> String {
        let s = self.scores;
        format!(
            "{}\t{}\t{}\t{}",
            s.predicted,
            s.correct,
            s.confidence,
            self.display(symbols)
        )
    }

    /// Parse a snapshot line, interning labels into `symbols`.
    pub fn parse_line(line: &str, line_no: usize, symbols: &SymbolTable) -> RuleResult<Self> {
        let err = |message: &str| RuleError::Parse {
            line: line_no,
            message: message.to_string(),
        };
        let fields: Vec<&str> = line.trim_end_matches(['\r', '\n']).split('\t').collect();
        let [predicted, correct, confidence, text] = fields[..] else {
            return Err(err("expected four tab-separated fields"));
        };
        let predicted: usize = predicted
            .trim()
            .parse()
            .map_err(|_| err("predicted count is not an integer"))?;
        let correct: usize = correct
            .trim()
            .parse()
            .map_err(|_| err("correct count is not an integer"))?;
        let confidence: f64 = confidence
            .trim()
            .parse()
            .map_err(|_| err("confidence is not a number"))?;

        let (head, body) = text
            .split_once("<=")
            .ok_or_else(|| err("missing `<=` between head and body"))?;
        let head = Atom::parse(head, symbols).ok_or_else(|| err("malformed head atom"))?;
        let body = body.trim();
        let body = if body.is_empty() {
            Vec::new()
        } else {
            body.split(", ")
                .map(|a| Atom::parse(a, symbols))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| err("malformed body atom"))?
        };
        let rule = Rule::new(head, body).ok_or_else(|| err("not a supported rule shape"))?;
        Ok(rule.with_scores(Scores {
            predicted,
            correct,
            confidence,
        }))
    }
}

pub struct RuleDisplay<'a> {
    rule: &'a Rule,
    symbols: &'a SymbolTable,
}

impl std::fmt::Display for RuleDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <= ", self.rule.head.display(self.symbols))?;
        for (i, atom) in self.rule.body.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", atom.display(self.symbols))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Term {
        Term::Var(Var::X)
    }
    fn y() -> Term {
        Term::Var(Var::Y)
    }
    fn free(n: u8) -> Term {
        Term::Var(Var::Free(n))
    }

    #[test]
    fn classify_shapes() {
        let t = SymbolTable::new();
        let (r, s, c, d) = (t.intern("r"), t.intern("s"), t.intern("cc"), t.intern("dd"));

        let cyclic = Rule::new(Atom::new(r, x(), y()), vec![Atom::new(s, y(), x())]).unwrap();
        assert_eq!(cyclic.kind(), RuleKind::Cyclic);

        let two = Rule::new(
            Atom::new(r, x(), Term::Const(c)),
            vec![Atom::new(s, x(), Term::Const(d))],
        )
        .unwrap();
        assert_eq!(two.kind(), RuleKind::AcyclicTwoAnchor { target: HeadVar::X });
        assert_eq!(two.direction_lock(), Some(Direction::Backward));

        let one = Rule::new(
            Atom::new(r, Term::Const(c), y()),
            vec![Atom::new(s, y(), free(3))],
        )
        .unwrap();
        assert_eq!(one.kind(), RuleKind::AcyclicOneAnchor { target: HeadVar::Y });
        assert_eq!(one.body()[0].right, free(0));

        let zero = Rule::new(Atom::new(r, x(), Term::Const(c)), vec![]).unwrap();
        assert_eq!(zero.kind(), RuleKind::Zero { target: HeadVar::X });

        assert!(Rule::new(Atom::ground(c, r, d), vec![]).is_none());
        assert!(Rule::new(Atom::new(r, x(), y()), vec![]).is_none());
    }

    #[test]
    fn cyclic_body_starts_from_x() {
        let t = SymbolTable::new();
        let (r, s, u) = (t.intern("r"), t.intern("s"), t.intern("u"));
        let from_y = Rule::new(
            Atom::new(r, x(), y()),
            vec![Atom::new(s, y(), free(5)), Atom::new(u, free(5), x())],
        )
        .unwrap();
        let from_x = Rule::new(
            Atom::new(r, x(), y()),
            vec![Atom::new(u, free(0), x()), Atom::new(s, y(), free(0))],
        )
        .unwrap();
        assert_eq!(from_y, from_x);
        assert_eq!(from_y.stable_hash(), from_x.stable_hash());
        assert_eq!(from_y.display(&t).to_string(), "r(X,Y) <= u(A,X), s(Y,A)");
    }

    #[test]
    fn scores_do_not_affect_identity() {
        let t = SymbolTable::new();
        let (r, s) = (t.intern("r"), t.intern("s"));
        let a = Rule::new(Atom::new(r, x(), y()), vec![Atom::new(s, x(), y())]).unwrap();
        let b = a.clone().with_scores(Scores::new(10, 7));
        assert_eq!(a, b);
    }

    #[test]
    fn trivial_and_self_anchored() {
        let t = SymbolTable::new();
        let (r, s, c) = (t.intern("r"), t.intern("s"), t.intern("cc"));
        let trivial = Rule::new(Atom::new(r, x(), y()), vec![Atom::new(r, x(), y())]).unwrap();
        assert!(trivial.is_trivial());
        let anchored = Rule::new(
            Atom::new(r, x(), Term::Const(c)),
            vec![Atom::new(s, Term::Const(c), x())],
        )
        .unwrap();
        assert!(anchored.is_self_anchored());
        assert!(!anchored.is_trivial());
    }

    #[test]
    fn line_round_trip() {
        let t = SymbolTable::new();
        for line in [
            "12\t9\t0.75\tr(X,Y) <= s(X,A), u(A,Y)",
            "300\t150\t0.5\tborn_in(X,paris) <= ",
            "20\t4\t0.2\tlives_in(alice,Y) <= works_in(Y,A)",
            "5\t3\t0.6\tborn_in.x/y(X,dbpedia:Paris) <= lives in(X,A)",
        ] {
            let rule = Rule::parse_line(line, 1, &t).unwrap();
            assert_eq!(rule.to_line(&t), line);
        }
    }

    #[test]
    fn malformed_lines_are_errors() {
        let t = SymbolTable::new();
        assert!(Rule::parse_line("r(X,Y) <= s(X,Y)", 3, &t).is_err());
        assert!(Rule::parse_line("1\t1\tx\tr(X,Y) <= s(X,Y)", 3, &t).is_err());
        assert!(Rule::parse_line("1\t1\t1\tr(X,Y) s(X,Y)", 3, &t).is_err());
        match Rule::parse_line("1\t1\t1\tr(aa,bb) <= ", 7, &t) {
            Err(RuleError::Parse { line, .. }) => assert_eq!(line, 7),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[test]
    fn reward_modes() {
        let t = SymbolTable::new();
        let (r, s, u) = (t.intern("r"), t.intern("s"), t.intern("u"));
        let rule = Rule::new(
            Atom::new(r, x(), y()),
            vec![Atom::new(s, x(), free(0)), Atom::new(u, free(0), y())],
        )
        .unwrap()
        .with_scores(Scores::new(15, 10));
        let mut cfg = ScoringConfig::default();
        // applied = 10 / 20
        assert!((rule.applied_confidence(&cfg) - 0.5).abs() < 1e-12);
        assert!((rule.reward(&cfg) - 2.5).abs() < 1e-12);
        cfg.reward = RewardMode::Correct;
        assert_eq!(rule.reward(&cfg), 10.0);
        cfg.reward = RewardMode::CorrectAppliedSquared;
        assert!((rule.reward(&cfg) - 2.5).abs() < 1e-12);
    }
}
