//! Grounding rules against the graph to count predictions.
//!
//! Each rule kind has its own bounded grounding: cyclic rules enumerate body
//! chains from one head variable to the other, acyclic rules walk backwards
//! from the last atom to the head variable, and zero rules just count.

use std::collections::HashSet;

use rand::Rng;

use crate::config::{GroundingStrategy, ScoringConfig};
use crate::graph::GraphIndex;
use crate::symbol::SymbolId;

use super::{Atom, HeadVar, Rule, RuleKind, RuleResult, Scores, Term, Var};

/// Scores rules against a borrowed graph.
pub struct Scorer<'a> {
    graph: &'a GraphIndex,
    cfg: &'a ScoringConfig,
}

impl<'a> Scorer<'a> {
    pub fn new(graph: &'a GraphIndex, cfg: &'a ScoringConfig) -> Self {
        Self { graph, cfg }
    }

    /// Count the rule's predictions and how many of them are known facts.
    ///
    /// Fails if the rule mentions a relation the graph does not have.
    pub fn score<R: Rng + ?Sized>(&self, rule: &Rule, rng: &mut R) -> RuleResult<Scores> {
        for r in rule.relations() {
            self.graph.ensure_relation(r)?;
        }
        Ok(match rule.kind() {
            RuleKind::Cyclic => {
                let pairs = match self.cfg.grounding {
                    GroundingStrategy::Dfs => self.cyclic_pairs(rule.body(), rng),
                    GroundingStrategy::Beam => self.beam_pairs(rule.body(), rng),
                };
                let r = rule.head().relation;
                let correct = pairs
                    .iter()
                    .filter(|(x, y)| self.graph.is_true(*x, r, *y))
                    .count();
                Scores::new(pairs.len(), correct)
            }
            RuleKind::AcyclicOneAnchor { target } | RuleKind::AcyclicTwoAnchor { target } => {
                self.acyclic(rule, target)
            }
            RuleKind::Zero { target } => self.zero(rule.head(), target),
        })
    }

    // -----------------------------------------------------------------------
    // Cyclic
    // -----------------------------------------------------------------------

    /// Distinct `(x, y)` groundings of a cyclic body by bounded enumeration.
    fn cyclic_pairs<R: Rng + ?Sized>(&self, body: &[Atom], rng: &mut R) -> HashSet<(SymbolId, SymbolId)> {
        let first = &body[0];
        let start_var = if first.contains_var(Var::X) { Var::X } else { Var::Y };
        let start_is_left = first.left == Term::Var(start_var);
        let triples = self.graph.by_relation(first.relation);

        let mut pairs = HashSet::new();
        let mut starts = HashSet::new();
        let mut previous = Vec::with_capacity(body.len() + 1);
        let mut ends = HashSet::new();
        let mut counter = 0;
        let offset = if triples.is_empty() { 0 } else { rng.gen_range(0..triples.len()) };

        for i in 0..triples.len() {
            let start = triples[(offset + i) % triples.len()].value(start_is_left);
            if !starts.insert(start) {
                continue;
            }
            counter += 1;
            previous.clear();
            previous.push(start);
            ends.clear();
            self.chain(body, 0, start_var, start, &mut previous, &mut ends);
            for &end in &ends {
                pairs.insert(match start_var {
                    Var::X => (start, end),
                    _ => (end, start),
                });
            }
            if counter > self.cfg.sample_size || pairs.len() > self.cfg.sample_size {
                break;
            }
        }
        pairs
    }

    /// Extend a chain grounding through `body[idx..]`, collecting the values
    /// of the final variable into `ends`.
    fn chain(
        &self,
        body: &[Atom],
        idx: usize,
        current: Var,
        value: SymbolId,
        previous: &mut Vec<SymbolId>,
        ends: &mut HashSet<SymbolId>,
    ) {
        let atom = &body[idx];
        let next_is_left = atom.left != Term::Var(current);
        let next_values = self.graph.entities(atom.relation, value, !next_is_left);

        if idx + 1 == body.len() {
            ends.extend(
                next_values
                    .iter()
                    .filter(|v| **v != value && !previous.contains(*v)),
            );
            return;
        }
        if next_values.len() > self.cfg.branching_bound {
            return;
        }
        let Some(next_var) = (if next_is_left { atom.left } else { atom.right }).as_var() else {
            return;
        };
        for &next in next_values {
            if previous.contains(&next) {
                continue;
            }
            previous.push(next);
            self.chain(body, idx + 1, next_var, next, previous, ends);
            previous.pop();
        }
    }

    /// Distinct `(x, y)` groundings from random single-path walks, run
    /// alternately from each end of the body.
    fn beam_pairs<R: Rng + ?Sized>(&self, body: &[Atom], rng: &mut R) -> HashSet<(SymbolId, SymbolId)> {
        let forward_start = if body[0].contains_var(Var::X) { Var::X } else { Var::Y };
        let backward_start = if forward_start == Var::X { Var::Y } else { Var::X };
        let reversed: Vec<Atom> = body.iter().rev().copied().collect();

        let mut pairs = HashSet::new();
        let mut attempts = 0;
        let mut repetitions = 0;
        while pairs.len() < self.cfg.sample_size
            && attempts < self.cfg.max_grounding_attempts
            && repetitions < self.cfg.beam_max_repetitions
        {
            let (atoms, start_var) = if attempts % 2 == 0 {
                (body, forward_start)
            } else {
                (&reversed[..], backward_start)
            };
            attempts += 1;
            let Some((start, end)) = self.random_chain(atoms, start_var, rng) else {
                continue;
            };
            let pair = match start_var {
                Var::X => (start, end),
                _ => (end, start),
            };
            if pairs.insert(pair) {
                repetitions = 0;
            } else {
                repetitions += 1;
            }
        }
        pairs
    }

    fn random_chain<R: Rng + ?Sized>(
        &self,
        atoms: &[Atom],
        start_var: Var,
        rng: &mut R,
    ) -> Option<(SymbolId, SymbolId)> {
        let first = atoms.first()?;
        let start = self
            .graph
            .random_triple_of(first.relation, rng)?
            .value(first.left == Term::Var(start_var));
        let mut previous = vec![start];
        let (mut current, mut value) = (start_var, start);
        for atom in atoms {
            let next_is_left = atom.left != Term::Var(current);
            let next = self
                .graph
                .random_entity(atom.relation, value, !next_is_left, rng)?;
            if previous.contains(&next) {
                return None;
            }
            previous.push(next);
            value = next;
            if let Some(v) = (if next_is_left { atom.left } else { atom.right }).as_var() {
                current = v;
            }
        }
        Some((start, value))
    }

    // -----------------------------------------------------------------------
    // Acyclic
    // -----------------------------------------------------------------------

    fn acyclic(&self, rule: &Rule, target: HeadVar) -> Scores {
        let body = rule.body();
        let Some(head_const) = rule.head().constant() else {
            return Scores::default();
        };
        let last_idx = body.len() - 1;
        let last = &body[last_idx];
        let mut walk = Reversed {
            scorer: self,
            body,
            previous: Vec::with_capacity(body.len() + 2),
            values: HashSet::new(),
        };

        match last.constant() {
            Some(anchor) => {
                let anchor_is_left = last.left == Term::Const(anchor);
                let Some(var) = (if anchor_is_left { last.right } else { last.left }).as_var() else {
                    return Scores::default();
                };
                let starts = self.graph.entities(last.relation, anchor, anchor_is_left);
                if starts.len() < self.cfg.min_last_atom_groundings {
                    return Scores::default();
                }
                let mut counter = 0;
                for &v in starts {
                    walk.previous.clear();
                    walk.previous.extend([anchor, head_const]);
                    walk.descend(var, v, last_idx as isize - 1);
                    counter += 1;
                    if walk.values.len() >= self.cfg.sample_size
                        || counter >= self.cfg.max_grounding_attempts
                    {
                        break;
                    }
                }
            }
            None => {
                let connects = |t: Term| {
                    t.as_var().is_some_and(|v| {
                        matches!(v, Var::X | Var::Y) || body[..last_idx].iter().any(|a| a.contains_var(v))
                    })
                };
                let next_is_left = connects(last.left);
                let Some(var) = (if next_is_left { last.left } else { last.right }).as_var() else {
                    return Scores::default();
                };
                let triples = self.graph.by_relation(last.relation);
                if triples.len() < self.cfg.min_last_atom_groundings {
                    return Scores::default();
                }
                let mut counter = 0;
                for t in triples {
                    walk.previous.clear();
                    walk.previous.extend([t.value(!next_is_left), head_const]);
                    walk.descend(var, t.value(next_is_left), last_idx as isize - 1);
                    counter += 1;
                    if walk.values.len() >= self.cfg.sample_size
                        || counter >= self.cfg.max_grounding_attempts
                    {
                        break;
                    }
                }
            }
        }

        let r = rule.head().relation;
        let correct = walk
            .values
            .iter()
            .filter(|v| match target {
                HeadVar::X => self.graph.is_true(**v, r, head_const),
                HeadVar::Y => self.graph.is_true(head_const, r, **v),
            })
            .count();
        Scores::new(walk.values.len(), correct)
    }

    // -----------------------------------------------------------------------
    // Zero
    // -----------------------------------------------------------------------

    fn zero(&self, head: &Atom, target: HeadVar) -> Scores {
        let Some(c) = head.constant() else {
            return Scores::default();
        };
        let predicted = self.graph.by_relation(head.relation).len();
        let correct = self
            .graph
            .entities(head.relation, c, target == HeadVar::Y)
            .len();
        Scores::new(predicted, correct)
    }
}

/// Backward grounding state for acyclic bodies.
struct Reversed<'s, 'a> {
    scorer: &'s Scorer<'a>,
    body: &'s [Atom],
    previous: Vec<SymbolId>,
    values: HashSet<SymbolId>,
}

impl Reversed<'_, '_> {
    /// `var` is bound to `value` at `body[idx + 1]`; continue towards the head.
    fn descend(&mut self, var: Var, value: SymbolId, idx: isize) {
        if self.previous.contains(&value) {
            return;
        }
        if idx < 0 {
            self.values.insert(value);
            return;
        }
        if self.values.len() >= self.scorer.cfg.sample_size {
            return;
        }
        let atom = self.body[idx as usize];
        let next_is_left = atom.left != Term::Var(var);
        let Some(next_var) = (if next_is_left { atom.left } else { atom.right }).as_var() else {
            return;
        };
        let graph = self.scorer.graph;
        self.previous.push(value);
        for &next in graph.entities(atom.relation, value, !next_is_left) {
            self.descend(next_var, next, idx - 1);
            if self.values.len() >= self.scorer.cfg.sample_size {
                break;
            }
        }
        self.previous.pop();
    }
}

// ---------------------------------------------------------------------------
// Acceptance
// ---------------------------------------------------------------------------

/// Thresholds a scored rule must meet to be stored.
#[derive(Debug, Clone, Copy)]
pub struct Acceptance {
    min_confidence: f64,
    min_correct: usize,
    min_correct_zero: usize,
}

impl Acceptance {
    pub fn new(cfg: &ScoringConfig) -> Self {
        Self {
            min_confidence: cfg.min_confidence,
            min_correct: cfg.min_correct,
            min_correct_zero: cfg.min_correct_zero,
        }
    }

    pub fn accepts(&self, rule: &Rule) -> bool {
        let s = rule.scores();
        if s.confidence < self.min_confidence || s.correct < self.min_correct {
            return false;
        }
        match rule.kind() {
            RuleKind::Zero { .. } => s.correct > self.min_correct_zero,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn parse(g: &GraphIndex, text: &str) -> Rule {
        Rule::parse_line(&format!("0\t0\t0\t{text}"), 1, g.symbols()).unwrap()
    }

    fn two_cycles() -> GraphIndex {
        GraphIndex::from_labels([
            ("aa", "r1", "bb"),
            ("bb", "r2", "cc"),
            ("cc", "r3", "aa"),
            ("dd", "r1", "ee"),
            ("ee", "r2", "ff"),
            ("ff", "r3", "dd"),
        ])
    }

    #[test]
    fn cyclic_rule_on_two_cycles() {
        let g = two_cycles();
        let cfg = ScoringConfig::default();
        let rule = parse(&g, "r1(X,Y) <= r3(A,X), r2(Y,A)");
        let mut rng = StdRng::seed_from_u64(1);
        let s = Scorer::new(&g, &cfg).score(&rule, &mut rng).unwrap();
        assert_eq!((s.predicted, s.correct), (2, 2));
        assert_eq!(s.confidence, 1.0);
        assert!(Acceptance::new(&cfg).accepts(&rule.with_scores(s)));
    }

    #[test]
    fn beam_grounding_finds_the_same_pairs() {
        let g = two_cycles();
        let cfg = ScoringConfig {
            grounding: GroundingStrategy::Beam,
            beam_max_repetitions: 50,
            ..ScoringConfig::default()
        };
        let rule = parse(&g, "r1(X,Y) <= r3(A,X), r2(Y,A)");
        let mut rng = StdRng::seed_from_u64(2);
        let s = Scorer::new(&g, &cfg).score(&rule, &mut rng).unwrap();
        assert_eq!((s.predicted, s.correct), (2, 2));
    }

    #[test]
    fn cyclic_rule_with_wrong_predictions() {
        let g = GraphIndex::from_labels([
            ("aa", "knows", "bb"),
            ("bb", "knows", "aa"),
            ("cc", "knows", "dd"),
            ("dd", "likes", "cc"),
            ("ee", "likes", "ff"),
        ]);
        let cfg = ScoringConfig::default();
        // likes(X,Y) <= knows(Y,X) grounds (aa,bb), (bb,aa), (dd,cc); only (dd,cc) holds.
        let rule = parse(&g, "likes(X,Y) <= knows(Y,X)");
        let mut rng = StdRng::seed_from_u64(3);
        let s = Scorer::new(&g, &cfg).score(&rule, &mut rng).unwrap();
        assert_eq!((s.predicted, s.correct), (3, 1));
    }

    #[test]
    fn two_anchor_rule() {
        let mut triples = Vec::new();
        let people: Vec<String> = (0..8).map(|i| format!("p{i}")).collect();
        for (i, p) in people.iter().enumerate() {
            triples.push((p.as_str(), "lives_in", "paris"));
            if i < 6 {
                triples.push((p.as_str(), "speaks", "french"));
            }
        }
        let g = GraphIndex::from_labels(triples);
        let cfg = ScoringConfig::default();
        let rule = parse(&g, "speaks(X,french) <= lives_in(X,paris)");
        let mut rng = StdRng::seed_from_u64(4);
        let s = Scorer::new(&g, &cfg).score(&rule, &mut rng).unwrap();
        assert_eq!((s.predicted, s.correct), (8, 6));

        let strict = ScoringConfig {
            min_last_atom_groundings: 9,
            ..ScoringConfig::default()
        };
        let s = Scorer::new(&g, &strict).score(&rule, &mut rng).unwrap();
        assert_eq!(s, Scores::default());
    }

    #[test]
    fn one_anchor_rule() {
        let g = GraphIndex::from_labels([
            ("p1", "owns", "c1"),
            ("p2", "owns", "c2"),
            ("p3", "owns", "c3"),
            ("p4", "owns", "c4"),
            ("p5", "owns", "c5"),
            ("p1", "type", "driver"),
            ("p2", "type", "driver"),
        ]);
        let cfg = ScoringConfig::default();
        let rule = parse(&g, "type(X,driver) <= owns(X,A)");
        let mut rng = StdRng::seed_from_u64(5);
        let s = Scorer::new(&g, &cfg).score(&rule, &mut rng).unwrap();
        assert_eq!((s.predicted, s.correct), (5, 2));
    }

    #[test]
    fn zero_rule_counts_relation() {
        let g = GraphIndex::from_labels([
            ("aa", "born_in", "paris"),
            ("bb", "born_in", "paris"),
            ("cc", "born_in", "rome"),
        ]);
        let cfg = ScoringConfig::default();
        let rule = parse(&g, "born_in(X,paris) <= ");
        let mut rng = StdRng::seed_from_u64(6);
        let s = Scorer::new(&g, &cfg).score(&rule, &mut rng).unwrap();
        assert_eq!((s.predicted, s.correct), (3, 2));
        // 2 correct does not clear the zero-rule bar.
        assert!(!Acceptance::new(&cfg).accepts(&rule.with_scores(s)));
    }

    #[test]
    fn unknown_relation_is_an_error() {
        let g = two_cycles();
        let rule = parse(&g, "r1(X,Y) <= r9(X,Y)");
        let cfg = ScoringConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        assert!(Scorer::new(&g, &cfg).score(&rule, &mut rng).is_err());
    }
}
