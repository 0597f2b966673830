//! Ordering of simultaneous renames within one namespace.
//!
//! Each pending rename is an edge `from -> to`. Names are unique in a
//! namespace, so the edges form disjoint chains and cycles. A chain is applied
//! from its end: the last rename targets a free name, which frees the name
//! the previous one targets. A cycle has no free end; its lowest-key member
//! is first parked under a temporary name, which turns the cycle into a chain.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

/// One atomic rename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameStep<K> {
    pub key: K,
    pub from: String,
    pub to: String,
}

impl<K> RenameStep<K> {
    pub fn new(key: K, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            key,
            from: from.into(),
            to: to.into(),
        }
    }
}

fn fold(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Orders `requests` so that no step ever renames onto a name still in use.
///
/// `temporary` produces the parking name for a key; it must not collide with
/// any caller-visible name. Requests whose source and target are equal are
/// dropped. Names compare ASCII case-insensitively.
pub fn resolve_renames<K, F>(requests: Vec<RenameStep<K>>, mut temporary: F) -> Vec<RenameStep<K>>
where
    K: Ord + Copy + std::fmt::Debug,
    F: FnMut(K) -> String,
{
    let mut steps = Vec::with_capacity(requests.len());
    let mut pending: BTreeMap<K, (String, String)> = BTreeMap::new();
    for request in requests {
        if request.from == request.to {
            continue;
        }
        if fold(&request.from) == fold(&request.to) {
            // Case-only change; the name is never free for anyone else.
            steps.push(request);
            continue;
        }
        pending.insert(request.key, (request.from, request.to));
    }
    let mut by_source: HashMap<String, K> = pending.iter().map(|(&k, (from, _))| (fold(from), k)).collect();

    while let Some((&start, _)) = pending.iter().next() {
        let mut path = vec![start];
        let mut cycle = false;
        loop {
            let Some(current) = path.last().copied() else { break };
            let Some((_, to)) = pending.get(&current) else { break };
            match by_source.get(&fold(to)).copied() {
                Some(next) if next == start => {
                    cycle = true;
                    break;
                }
                Some(next) if !path.contains(&next) => path.push(next),
                Some(_) => {
                    warn!(?start, "Rename chain revisits a member, breaking it as a cycle");
                    cycle = true;
                    break;
                }
                None => break,
            }
        }

        if cycle {
            let Some((from, to)) = pending.remove(&start) else { break };
            let parked = temporary(start);
            debug!(?start, from = %from, parked = %parked, "Breaking rename cycle");
            by_source.remove(&fold(&from));
            by_source.insert(fold(&parked), start);
            steps.push(RenameStep::new(start, from, parked.clone()));
            pending.insert(start, (parked, to));
            continue;
        }

        for key in path.into_iter().rev() {
            if let Some((from, to)) = pending.remove(&key) {
                by_source.remove(&fold(&from));
                steps.push(RenameStep { key, from, to });
            }
        }
    }
    steps
}
