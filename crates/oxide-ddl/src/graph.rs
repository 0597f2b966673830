//! Foreign-key dependency graph between tables and safe job ordering.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt::Debug;

use serde::Serialize;
use tracing::{debug, warn};

/// One foreign key viewed as a dependency of `owner` on `referenced`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Edge<N, E> {
    pub owner: N,
    pub referenced: N,
    pub id: E,
}

/// Directed multigraph with an edge owner -> referenced per foreign key.
#[derive(Debug, Clone)]
pub struct DependencyGraph<N, E> {
    nodes: BTreeSet<N>,
    edges: Vec<Edge<N, E>>,
}

impl<N, E> Default for DependencyGraph<N, E> {
    fn default() -> Self {
        Self {
            nodes: BTreeSet::new(),
            edges: Vec::new(),
        }
    }
}

impl<N, E> DependencyGraph<N, E>
where
    N: Ord + Copy + Debug,
    E: Ord + Copy + Debug,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: N) {
        self.nodes.insert(node);
    }

    /// Adds an edge; both endpoints become nodes.
    pub fn add_edge(&mut self, owner: N, referenced: N, id: E) {
        self.nodes.insert(owner);
        self.nodes.insert(referenced);
        self.edges.push(Edge { owner, referenced, id });
    }

    #[must_use]
    pub const fn nodes(&self) -> &BTreeSet<N> {
        &self.nodes
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge<N, E>] {
        &self.edges
    }

    fn successors<'a>(&'a self, node: N, skip: &'a BTreeSet<E>) -> impl Iterator<Item = N> + 'a {
        self.edges
            .iter()
            .filter(move |e| e.owner == node && !skip.contains(&e.id))
            .map(|e| e.referenced)
    }

    fn reachable_without(&self, start: N, skip: &BTreeSet<E>) -> BTreeSet<N> {
        let mut seen = BTreeSet::new();
        let mut stack: Vec<N> = self.successors(start, skip).collect();
        while let Some(node) = stack.pop() {
            if seen.insert(node) {
                stack.extend(self.successors(node, skip));
            }
        }
        seen
    }

    /// Tables `node` transitively depends on. Contains `node` itself only if
    /// it sits on a cycle.
    #[must_use]
    pub fn reachable_from(&self, node: N) -> BTreeSet<N> {
        self.reachable_without(node, &BTreeSet::new())
    }

    /// Returns edges whose removal makes the graph acyclic.
    ///
    /// Self references are ignored. Among the edges on a cycle, one whose
    /// owner satisfies `prefer` is removed first, then the lowest
    /// `(owner, referenced, id)`; the search repeats until no cycle is left.
    pub fn detect_cycles<F>(&self, prefer: F) -> Vec<Edge<N, E>>
    where
        F: Fn(N) -> bool,
    {
        let mut broken: Vec<Edge<N, E>> = Vec::new();
        let mut skip: BTreeSet<E> = BTreeSet::new();
        loop {
            let candidate = self
                .edges
                .iter()
                .filter(|e| e.owner != e.referenced && !skip.contains(&e.id))
                .filter(|e| self.reachable_without(e.referenced, &skip).contains(&e.owner))
                .min_by_key(|e| (!prefer(e.owner), e.owner, e.referenced, e.id))
                .copied();
            let Some(edge) = candidate else { break };
            warn!(owner = ?edge.owner, referenced = ?edge.referenced, id = ?edge.id, "Breaking foreign key cycle");
            skip.insert(edge.id);
            broken.push(edge);
        }
        broken
    }

    fn ordered(&self, referenced_first: bool) -> Vec<N> {
        let broken: BTreeSet<E> = self.detect_cycles(|_| false).into_iter().map(|e| e.id).collect();
        let jobs: Vec<N> = self.nodes.iter().copied().collect();
        let deps: Vec<(N, N)> = self
            .edges
            .iter()
            .filter(|e| e.owner != e.referenced && !broken.contains(&e.id))
            .map(|e| {
                if referenced_first {
                    (e.referenced, e.owner)
                } else {
                    (e.owner, e.referenced)
                }
            })
            .collect();
        safe_topological_order(&jobs, &deps, |n| n)
    }

    /// Order in which tables can be dropped: referencing tables first.
    #[must_use]
    pub fn drop_order(&self) -> Vec<N> {
        self.ordered(false)
    }

    /// Order in which tables can be created: referenced tables first.
    #[must_use]
    pub fn build_order(&self) -> Vec<N> {
        self.ordered(true)
    }
}

/// Orders `jobs` so that for every `(before, after)` in `dependencies`,
/// `before` comes first. Ready jobs run lowest `priority` first.
///
/// Dependencies naming unknown jobs are ignored. If the dependencies cannot
/// all be satisfied, the lowest-priority blocked job is forced and a warning
/// is logged.
pub fn safe_topological_order<J, P, F>(jobs: &[J], dependencies: &[(J, J)], priority: F) -> Vec<J>
where
    J: Ord + Copy + Debug,
    P: Ord,
    F: Fn(J) -> P,
{
    let known: BTreeSet<J> = jobs.iter().copied().collect();
    let mut blockers: BTreeMap<J, usize> = known.iter().map(|&j| (j, 0)).collect();
    let mut unlocks: BTreeMap<J, Vec<J>> = BTreeMap::new();
    for &(before, after) in dependencies {
        if before == after || !known.contains(&before) || !known.contains(&after) {
            continue;
        }
        *blockers.entry(after).or_insert(0) += 1;
        unlocks.entry(before).or_default().push(after);
    }

    let mut ready: BinaryHeap<Reverse<(P, J)>> = blockers
        .iter()
        .filter(|(_, &count)| count == 0)
        .map(|(&j, _)| Reverse((priority(j), j)))
        .collect();
    let mut done: BTreeSet<J> = BTreeSet::new();
    let mut order = Vec::with_capacity(known.len());

    while order.len() < known.len() {
        let next = if let Some(Reverse((_, job))) = ready.pop() {
            job
        } else {
            let Some(forced) = known
                .iter()
                .copied()
                .filter(|j| !done.contains(j))
                .min_by_key(|&j| (priority(j), j))
            else {
                break;
            };
            warn!(job = ?forced, "Unsatisfiable ordering, forcing job");
            forced
        };
        if !done.insert(next) {
            continue;
        }
        debug!(job = ?next, "Scheduled");
        order.push(next);
        for &after in unlocks.get(&next).map(Vec::as_slice).unwrap_or_default() {
            if let Some(count) = blockers.get_mut(&after) {
                *count = count.saturating_sub(1);
                if *count == 0 && !done.contains(&after) {
                    ready.push(Reverse((priority(after), after)));
                }
            }
        }
    }
    order
}
