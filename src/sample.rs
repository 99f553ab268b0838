//! Random walks over the graph index.
//!
//! A [`Path`] is a chain of hops `n0 -r1- n1 -r2- ... nk`, each hop followed
//! forward (`+`, along the edge) or backward (`-`, against it). The
//! [`PathSampler`] makes a single attempt per call and reports failure as
//! `None`; retrying is the caller's business.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::graph::{GraphIndex, GraphResult, Triple};
use crate::rule::{HeadVar, Rule};
use crate::symbol::{SymbolId, SymbolTable};

/// Direction a hop was followed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From subject to object (`+`).
    Forward,
    /// From object to subject (`-`).
    Backward,
}

impl Direction {
    pub fn marker(self) -> char {
        match self {
            Direction::Forward => '+',
            Direction::Backward => '-',
        }
    }

    fn coin<R: Rng + ?Sized>(rng: &mut R) -> Self {
        if rng.gen_bool(0.5) {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// A sampled walk.
///
/// `nodes` has one more entry than `relations` and `directions`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    nodes: Vec<SymbolId>,
    relations: Vec<SymbolId>,
    directions: Vec<Direction>,
}

impl Path {
    fn start(t: &Triple, direction: Direction) -> Self {
        let (from, to) = match direction {
            Direction::Forward => (t.subject, t.object),
            Direction::Backward => (t.object, t.subject),
        };
        Self {
            nodes: vec![from, to],
            relations: vec![t.relation],
            directions: vec![direction],
        }
    }

    fn push(&mut self, relation: SymbolId, direction: Direction, node: SymbolId) {
        self.relations.push(relation);
        self.directions.push(direction);
        self.nodes.push(node);
    }

    /// Number of hops.
    pub fn steps(&self) -> usize {
        self.relations.len()
    }

    pub fn nodes(&self) -> &[SymbolId] {
        &self.nodes
    }

    /// Hop `i` as `(from, relation, to, direction)`.
    pub fn hop(&self, i: usize) -> (SymbolId, SymbolId, SymbolId, Direction) {
        (
            self.nodes[i],
            self.relations[i],
            self.nodes[i + 1],
            self.directions[i],
        )
    }

    /// Hop `i` as the graph triple it traversed.
    pub fn triple(&self, i: usize) -> Triple {
        let (from, relation, to, direction) = self.hop(i);
        match direction {
            Direction::Forward => Triple::new(from, relation, to),
            Direction::Backward => Triple::new(to, relation, from),
        }
    }

    pub fn first(&self) -> SymbolId {
        self.nodes[0]
    }

    pub fn last(&self) -> SymbolId {
        self.nodes[self.nodes.len() - 1]
    }

    /// Whether the walk ends where it started.
    pub fn closes_cycle(&self) -> bool {
        self.first() == self.last()
    }

    /// Whether a walk of two or more hops returns to either node of its first hop.
    pub fn is_cyclic(&self) -> bool {
        self.steps() > 1 && (self.last() == self.nodes[0] || self.last() == self.nodes[1])
    }

    /// Interior nodes avoid the first hop's nodes, and no node after the
    /// first repeats.
    pub fn is_valid(&self) -> bool {
        let (x, y) = (self.nodes[0], self.nodes[1]);
        let last = self.nodes.len() - 1;
        if self.nodes[2.min(last)..last].iter().any(|n| *n == x || *n == y) {
            return false;
        }
        let tail = &self.nodes[1..];
        tail.iter()
            .enumerate()
            .all(|(i, n)| !tail[i + 1..].contains(n))
    }

    /// Render as `n0 +r1 n1 -r2 n2` with labels.
    pub fn display<'a>(&'a self, symbols: &'a SymbolTable) -> PathDisplay<'a> {
        PathDisplay {
            path: self,
            symbols,
        }
    }
}

pub struct PathDisplay<'a> {
    path: &'a Path,
    symbols: &'a SymbolTable,
}

impl std::fmt::Display for PathDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbols.label(self.path.nodes[0]))?;
        for i in 0..self.path.steps() {
            let (_, r, to, d) = self.path.hop(i);
            write!(
                f,
                " {}{} {}",
                d.marker(),
                self.symbols.label(r),
                self.symbols.label(to)
            )?;
        }
        Ok(())
    }
}

/// Resolve start-relation labels against the graph.
///
/// A label the graph never uses as a relation is a configuration error.
pub fn resolve_relations(graph: &GraphIndex, labels: &[String]) -> GraphResult<Vec<SymbolId>> {
    labels.iter().map(|label| graph.relation(label)).collect()
}

/// Walk generator over a borrowed graph index.
pub struct PathSampler<'g> {
    graph: &'g GraphIndex,
    start_relations: Vec<SymbolId>,
}

impl<'g> PathSampler<'g> {
    pub fn new(graph: &'g GraphIndex) -> Self {
        Self {
            graph,
            start_relations: Vec::new(),
        }
    }

    /// Only start walks from triples of these relations.
    pub fn with_start_relations(mut self, relations: Vec<SymbolId>) -> Self {
        self.start_relations = relations;
        self
    }

    fn pick_start<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Triple> {
        match self.start_relations.choose(rng) {
            Some(r) => self.graph.random_triple_of(*r, rng),
            None => self.graph.random_triple(rng),
        }
    }

    /// Sample a walk of `steps` hops.
    ///
    /// With `cyclic` set, the final hop must close back to the start node and
    /// the walk needs at least two hops. Without it, a walk that closes a
    /// cycle is rejected. `start` fixes the first triple and `lock` fixes the
    /// direction of the first hop.
    pub fn sample<R: Rng + ?Sized>(
        &self,
        steps: usize,
        cyclic: bool,
        start: Option<Triple>,
        lock: Option<Direction>,
        rng: &mut R,
    ) -> Option<Path> {
        if steps == 0 || (cyclic && steps < 2) {
            return None;
        }
        let first = match start {
            Some(t) => t,
            None => self.pick_start(rng)?,
        };
        if first.subject == first.object {
            return None;
        }
        let direction = lock.unwrap_or_else(|| Direction::coin(rng));
        let mut path = Path::start(&first, direction);

        for i in 1..steps {
            let current = path.last();
            let direction = Direction::coin(rng);
            let candidates = match direction {
                Direction::Forward => self.graph.by_head(current),
                Direction::Backward => self.graph.by_tail(current),
            };
            if candidates.is_empty() {
                return None;
            }
            let next_of = |t: &Triple| match direction {
                Direction::Forward => t.object,
                Direction::Backward => t.subject,
            };
            let next = if cyclic && i == steps - 1 {
                let target = path.first();
                let closing: Vec<&Triple> = candidates
                    .iter()
                    .filter(|t| next_of(t) == target)
                    .collect();
                *closing.choose(rng)?
            } else {
                candidates.choose(rng)?
            };
            path.push(next.relation, direction, next_of(next));
        }

        if !cyclic && path.is_cyclic() {
            return None;
        }
        Some(path)
    }

    /// Sample a walk that starts at a grounding of `rule`'s head.
    ///
    /// The start triple has the head relation and matches the head constant;
    /// the first hop direction is locked by which head slot is a variable.
    pub fn sample_for_rule<R: Rng + ?Sized>(
        &self,
        rule: &Rule,
        steps: usize,
        cyclic: bool,
        rng: &mut R,
    ) -> GraphResult<Option<Path>> {
        let head = rule.head();
        self.graph.ensure_relation(head.relation)?;
        let candidates: Vec<Triple> = match (rule.target(), head.constant()) {
            (Some(HeadVar::X), Some(c)) => self
                .graph
                .by_tail(c)
                .iter()
                .filter(|t| t.relation == head.relation)
                .copied()
                .collect(),
            (Some(HeadVar::Y), Some(c)) => self
                .graph
                .by_head(c)
                .iter()
                .filter(|t| t.relation == head.relation)
                .copied()
                .collect(),
            _ => self.graph.by_relation(head.relation).to_vec(),
        };
        let Some(start) = candidates.choose(rng).copied() else {
            return Ok(None);
        };
        Ok(self.sample(steps, cyclic, Some(start), rule.direction_lock(), rng))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

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

    fn chain() -> GraphIndex {
        GraphIndex::from_labels([
            ("aa", "r1", "bb"),
            ("bb", "r2", "cc"),
            ("cc", "r3", "dd"),
            ("dd", "r4", "ee"),
            ("bb", "r5", "aa"),
        ])
    }

    #[test]
    fn cyclic_walks_close_or_fail() {
        let g = two_cycles();
        let sampler = PathSampler::new(&g);
        let mut rng = StdRng::seed_from_u64(1);
        let mut found = 0;
        for _ in 0..500 {
            if let Some(p) = sampler.sample(3, true, None, None, &mut rng) {
                assert!(p.closes_cycle());
                assert_eq!(p.steps(), 3);
                found += 1;
            }
        }
        assert!(found > 0);
    }

    #[test]
    fn acyclic_walks_never_close() {
        for g in [two_cycles(), chain()] {
            let sampler = PathSampler::new(&g);
            let mut rng = StdRng::seed_from_u64(2);
            for steps in 1..=3 {
                for _ in 0..300 {
                    if let Some(p) = sampler.sample(steps, false, None, None, &mut rng) {
                        assert!(!p.closes_cycle());
                        assert_eq!(p.steps(), steps);
                    }
                }
            }
        }
    }

    #[test]
    fn single_hop_cycle_request_fails() {
        let g = two_cycles();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(PathSampler::new(&g).sample(1, true, None, None, &mut rng).is_none());
    }

    #[test]
    fn reflexive_start_is_rejected() {
        let g = GraphIndex::from_labels([("aa", "knows", "aa"), ("aa", "likes", "bb")]);
        let t = g.by_relation(g.symbols().lookup("knows").unwrap())[0];
        let mut rng = StdRng::seed_from_u64(4);
        assert!(
            PathSampler::new(&g)
                .sample(1, false, Some(t), None, &mut rng)
                .is_none()
        );
    }

    #[test]
    fn locked_direction_is_respected() {
        let g = chain();
        let sampler = PathSampler::new(&g);
        let t = g.triples()[1];
        let mut rng = StdRng::seed_from_u64(5);
        let p = sampler
            .sample(1, false, Some(t), Some(Direction::Backward), &mut rng)
            .unwrap();
        assert_eq!(p.first(), t.object);
        assert_eq!(p.triple(0), t);
    }

    #[test]
    fn start_relations_restrict_first_hop() {
        let g = chain();
        let r4 = g.relation("r4").unwrap();
        let sampler = PathSampler::new(&g).with_start_relations(vec![r4]);
        let mut rng = StdRng::seed_from_u64(6);
        for _ in 0..50 {
            if let Some(p) = sampler.sample(1, false, None, None, &mut rng) {
                assert_eq!(p.triple(0).relation, r4);
            }
        }
        assert!(resolve_relations(&g, &["r9".to_string()]).is_err());
    }

    #[test]
    fn validity_rejects_revisits() {
        let g = chain();
        let id = |l: &str| g.symbols().lookup(l).unwrap();
        let mut p = Path::start(&Triple::new(id("aa"), id("r1"), id("bb")), Direction::Forward);
        p.push(id("r2"), Direction::Forward, id("cc"));
        assert!(p.is_valid());
        let mut back = p.clone();
        back.push(id("r2"), Direction::Backward, id("bb"));
        assert!(!back.is_valid());
        let mut closing = p.clone();
        closing.push(id("r3"), Direction::Forward, id("aa"));
        assert!(closing.is_valid());
        assert!(closing.is_cyclic());
        assert_eq!(
            closing.display(g.symbols()).to_string(),
            "aa +r1 bb +r2 cc +r3 aa"
        );
    }

    fn rule(g: &GraphIndex, text: &str) -> Rule {
        Rule::parse_line(&format!("1\t1\t1\t{text}"), 1, g.symbols()).unwrap()
    }

    fn fan_in() -> GraphIndex {
        GraphIndex::from_labels([
            ("aa", "r1", "bb"),
            ("cc", "r1", "bb"),
            ("aa", "r1", "dd"),
            ("bb", "r2", "ee"),
            ("bb", "r2", "ff"),
            ("dd", "r2", "ee"),
            ("aa", "r3", "ee"),
        ])
    }

    #[test]
    fn x_anchored_rules_walk_backward_from_the_head_constant() {
        let g = fan_in();
        let bb = g.symbols().lookup("bb").unwrap();
        let r1 = g.relation("r1").unwrap();
        let r = rule(&g, "r1(X,bb) <= r3(X,A)");
        assert_eq!(r.direction_lock(), Some(Direction::Backward));
        let sampler = PathSampler::new(&g);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let p = sampler.sample_for_rule(&r, 1, false, &mut rng).unwrap().unwrap();
            let (_, _, _, dir) = p.hop(0);
            assert_eq!(dir, Direction::Backward);
            assert_eq!(p.first(), bb);
            let t = p.triple(0);
            assert_eq!((t.relation, t.object), (r1, bb));
        }
    }

    #[test]
    fn y_anchored_rules_walk_forward_from_the_head_constant() {
        let g = fan_in();
        let bb = g.symbols().lookup("bb").unwrap();
        let r2 = g.relation("r2").unwrap();
        let r = rule(&g, "r2(bb,Y) <= r1(A,Y)");
        assert_eq!(r.direction_lock(), Some(Direction::Forward));
        let sampler = PathSampler::new(&g);
        let mut rng = StdRng::seed_from_u64(8);
        for _ in 0..50 {
            let p = sampler.sample_for_rule(&r, 1, false, &mut rng).unwrap().unwrap();
            assert_eq!(p.hop(0).3, Direction::Forward);
            assert_eq!(p.first(), bb);
            let t = p.triple(0);
            assert_eq!((t.subject, t.relation), (bb, r2));
        }
    }

    #[test]
    fn cyclic_rules_start_anywhere_in_their_head_relation() {
        let g = fan_in();
        let r1 = g.relation("r1").unwrap();
        let r = rule(&g, "r1(X,Y) <= r3(X,Y)");
        assert_eq!(r.direction_lock(), None);
        let mut rng = StdRng::seed_from_u64(9);
        let sampler = PathSampler::new(&g);
        for _ in 0..20 {
            if let Some(p) = sampler.sample_for_rule(&r, 1, false, &mut rng).unwrap() {
                assert_eq!(p.triple(0).relation, r1);
            }
        }
    }

    #[test]
    fn rule_sampling_with_unknown_relation_is_an_error() {
        let g = fan_in();
        let r = rule(&g, "r9(X,bb) <= r1(X,A)");
        let mut rng = StdRng::seed_from_u64(10);
        assert!(
            PathSampler::new(&g)
                .sample_for_rule(&r, 2, false, &mut rng)
                .is_err()
        );
    }
}
