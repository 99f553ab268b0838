//! Lifting ground walks into rules.
//!
//! The first hop of a [`Path`] becomes the head and the remaining hops the
//! body, as ground atoms. Generalization then replaces constants by
//! variables:
//!
//! - both head constants by `X`/`Y` (cyclic walks only),
//! - one head constant by its head variable, then either every interior
//!   constant (two-anchor) or every body constant (one-anchor),
//! - a single-hop walk lifts to the two zero rules.

use crate::config::RulesConfig;
use crate::sample::Path;
use crate::symbol::SymbolId;

use super::{Atom, HeadVar, Rule, RuleKind, Term, Var};

/// Ground or partially lifted rule, before classification.
#[derive(Debug, Clone)]
struct Draft {
    head: Atom,
    body: Vec<Atom>,
    next_free: u8,
}

impl Draft {
    fn from_path(path: &Path) -> Self {
        let ground = |i: usize| {
            let t = path.triple(i);
            Atom::ground(t.subject, t.relation, t.object)
        };
        Self {
            head: ground(0),
            body: (1..path.steps()).map(ground).collect(),
            next_free: 0,
        }
    }

    fn replace(&mut self, c: SymbolId, var: Var) -> usize {
        let mut n = self.head.replace(c, var);
        for atom in &mut self.body {
            n += atom.replace(c, var);
        }
        n
    }

    fn fresh(&mut self) -> Var {
        let v = Var::Free(self.next_free);
        self.next_free += 1;
        v
    }

    /// Replace every constant in `atoms` (other than `keep`) by fresh variables.
    fn free_constants(&mut self, atoms: std::ops::Range<usize>, keep: Option<SymbolId>) {
        for i in atoms {
            for slot in [self.body[i].left, self.body[i].right] {
                if let Term::Const(c) = slot {
                    if Some(c) != keep {
                        let v = self.fresh();
                        self.replace(c, v);
                    }
                }
            }
        }
    }

    /// Replace one head constant by its head variable.
    ///
    /// The constant must also occur in the body, unless there is no body.
    fn lift(&self, target: HeadVar) -> Option<Self> {
        let (c, var) = match target {
            HeadVar::X => (self.head.left.as_const()?, Var::X),
            HeadVar::Y => (self.head.right.as_const()?, Var::Y),
        };
        let mut out = self.clone();
        let n = out.replace(c, var);
        if n < 2 && !out.body.is_empty() {
            return None;
        }
        Some(out)
    }

    fn left_right(&self) -> Option<Rule> {
        let mut out = self.clone();
        out.replace(self.head.left.as_const()?, Var::X);
        out.replace(self.head.right.as_const()?, Var::Y);
        out.free_constants(0..out.body.len(), None);
        out.finish(|k| k == RuleKind::Cyclic)
    }

    fn two_anchor(&self) -> Option<Rule> {
        let mut out = self.clone();
        let keep = out.head.constant();
        let interior = out.body.len().saturating_sub(1);
        out.free_constants(0..interior, keep);
        out.finish(|k| matches!(k, RuleKind::AcyclicTwoAnchor { .. }))
    }

    fn one_anchor(&self) -> Option<Rule> {
        let mut out = self.clone();
        let keep = out.head.constant();
        out.free_constants(0..out.body.len(), keep);
        out.finish(|k| matches!(k, RuleKind::AcyclicOneAnchor { .. }))
    }

    fn finish(self, expect: impl Fn(RuleKind) -> bool) -> Option<Rule> {
        Rule::new(self.head, self.body).filter(|r| expect(r.kind()))
    }
}

/// Turns sampled paths into candidate rules.
#[derive(Debug, Clone)]
pub struct Generalizer {
    zero_rules: bool,
    one_anchor_rules: bool,
    keep_self_anchored: bool,
}

impl Generalizer {
    pub fn new(cfg: &RulesConfig) -> Self {
        Self {
            zero_rules: cfg.zero_rules,
            one_anchor_rules: cfg.one_anchor_rules,
            keep_self_anchored: cfg.keep_self_anchored,
        }
    }

    /// All generalizations of `path`.
    ///
    /// With `only_xy`, a cyclic walk yields just its cyclic rule. Trivial
    /// rules never come back. Self-anchored rules, which only grounded cyclic
    /// walks produce, are dropped when `keep_self_anchored` is off.
    pub fn generalize(&self, path: &Path, only_xy: bool) -> Vec<Rule> {
        let draft = Draft::from_path(path);
        let cyclic = path.is_cyclic();
        let mut out = Vec::new();

        if cyclic {
            out.extend(draft.left_right());
        }
        if !(cyclic && only_xy) {
            for target in [HeadVar::X, HeadVar::Y] {
                let Some(lifted) = draft.lift(target) else {
                    continue;
                };
                if lifted.body.is_empty() {
                    if self.zero_rules {
                        out.extend(lifted.finish(|k| matches!(k, RuleKind::Zero { .. })));
                    }
                    continue;
                }
                out.extend(lifted.two_anchor());
                if !cyclic && self.one_anchor_rules {
                    out.extend(lifted.one_anchor());
                }
            }
        }

        out.retain(|r| !r.is_trivial() && (self.keep_self_anchored || !r.is_self_anchored()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphIndex, Triple};
    use crate::sample::{Direction, PathSampler};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Sample from `start` until the walk renders as `expected`.
    fn walk(g: &GraphIndex, start: (&str, &str, &str), dir: Direction, expected: &str, cyclic: bool) -> Path {
        let id = |l: &str| g.symbols().lookup(l).unwrap();
        let t = Triple::new(id(start.0), id(start.1), id(start.2));
        let steps = expected.split(' ').count() / 2;
        let sampler = PathSampler::new(g);
        let mut rng = StdRng::seed_from_u64(11);
        (0..500)
            .filter_map(|_| sampler.sample(steps, cyclic, Some(t), Some(dir), &mut rng))
            .find(|p| p.display(g.symbols()).to_string() == expected)
            .expect("walk")
    }

    fn rendered(g: &GraphIndex, rules: &[Rule]) -> Vec<String> {
        let mut v: Vec<String> = rules.iter().map(|r| r.display(g.symbols()).to_string()).collect();
        v.sort();
        v
    }

    #[test]
    fn cyclic_walk_yields_cyclic_rule() {
        let g = GraphIndex::from_labels([("aa", "r1", "bb"), ("bb", "r2", "cc"), ("cc", "r3", "aa")]);
        let p = walk(&g, ("aa", "r1", "bb"), Direction::Forward, "aa +r1 bb +r2 cc +r3 aa", true);
        let rules = Generalizer::new(&RulesConfig::default()).generalize(&p, true);
        assert_eq!(rendered(&g, &rules), vec!["r1(X,Y) <= r3(A,X), r2(Y,A)"]);
    }

    #[test]
    fn grounded_cyclic_adds_one_sided_rules() {
        let g = GraphIndex::from_labels([("aa", "r1", "bb"), ("bb", "r2", "aa")]);
        let p = walk(&g, ("aa", "r1", "bb"), Direction::Forward, "aa +r1 bb +r2 aa", true);
        let cfg = RulesConfig::default();
        assert_eq!(cfg.max_length_grounded_cyclic, 1);
        let rules = Generalizer::new(&cfg).generalize(&p, false);
        assert_eq!(
            rendered(&g, &rules),
            vec![
                "r1(X,Y) <= r2(Y,X)",
                "r1(X,bb) <= r2(bb,X)",
                "r1(aa,Y) <= r2(Y,aa)"
            ]
        );
        assert!(rules.iter().any(|r| r.kind() != RuleKind::Cyclic));
        assert_eq!(
            rendered(&g, &Generalizer::new(&cfg).generalize(&p, true)),
            vec!["r1(X,Y) <= r2(Y,X)"]
        );
    }

    #[test]
    fn self_anchored_rules_can_be_dropped() {
        let g = GraphIndex::from_labels([("aa", "r1", "bb"), ("bb", "r2", "aa")]);
        let p = walk(&g, ("aa", "r1", "bb"), Direction::Forward, "aa +r1 bb +r2 aa", true);
        let cfg = RulesConfig {
            keep_self_anchored: false,
            ..RulesConfig::default()
        };
        let rules = Generalizer::new(&cfg).generalize(&p, false);
        assert_eq!(rendered(&g, &rules), vec!["r1(X,Y) <= r2(Y,X)"]);
    }

    #[test]
    fn acyclic_walk_yields_both_anchorings() {
        let g = GraphIndex::from_labels([("aa", "r1", "bb"), ("aa", "r2", "cc")]);
        let p = walk(&g, ("aa", "r1", "bb"), Direction::Backward, "bb -r1 aa +r2 cc", false);
        let rules = Generalizer::new(&RulesConfig::default()).generalize(&p, false);
        assert_eq!(
            rendered(&g, &rules),
            vec!["r1(X,bb) <= r2(X,A)", "r1(X,bb) <= r2(X,cc)"]
        );
        let cfg = RulesConfig {
            one_anchor_rules: false,
            ..RulesConfig::default()
        };
        let rules = Generalizer::new(&cfg).generalize(&p, false);
        assert_eq!(rendered(&g, &rules), vec!["r1(X,bb) <= r2(X,cc)"]);
    }

    #[test]
    fn single_hop_yields_zero_rules() {
        let g = GraphIndex::from_labels([("aa", "r1", "bb")]);
        let p = walk(&g, ("aa", "r1", "bb"), Direction::Forward, "aa +r1 bb", false);
        let rules = Generalizer::new(&RulesConfig::default()).generalize(&p, false);
        assert_eq!(rendered(&g, &rules), vec!["r1(X,bb) <= ", "r1(aa,Y) <= "]);
        let cfg = RulesConfig {
            zero_rules: false,
            ..RulesConfig::default()
        };
        assert!(Generalizer::new(&cfg).generalize(&p, false).is_empty());
    }
}
