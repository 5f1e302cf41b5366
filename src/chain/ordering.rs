// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stable constraint ordering inside one phase bucket.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use super::ChainEntry;

/// Order the entries of one phase so every before/after edge is honoured.
///
/// `entries` must be in insertion order.  Among interceptors that are free
/// to run, the one inserted first goes first, so unconstrained interceptors
/// keep their relative order.  Edges between entries sharing an id are
/// ignored.  On a cycle the ids of the entries that cannot be placed are
/// returned instead.
pub(crate) fn order_bucket(entries: Vec<ChainEntry>) -> Result<Vec<ChainEntry>, Vec<String>> {
    let n = entries.len();
    if n < 2 {
        return Ok(entries);
    }

    let (successors, in_degree) = edges(&entries);

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);
    let mut remaining = in_degree;

    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        for &j in &successors[i] {
            remaining[j] -= 1;
            if remaining[j] == 0 {
                ready.push(Reverse(j));
            }
        }
    }

    if order.len() < n {
        return Err(cycle_members(&entries, &successors, &order));
    }

    let mut slots: Vec<Option<ChainEntry>> = entries.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}

/// Successor lists and in-degrees of the before/after graph.
fn edges(entries: &[ChainEntry]) -> (Vec<Vec<usize>>, Vec<usize>) {
    let n = entries.len();
    let mut by_id: HashMap<&str, Vec<usize>> = HashMap::with_capacity(n);
    for (i, entry) in entries.iter().enumerate() {
        by_id.entry(entry.interceptor.id()).or_default().push(i);
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut in_degree = vec![0usize; n];

    for (i, entry) in entries.iter().enumerate() {
        let id = entry.interceptor.id();

        for target in entry.interceptor.before() {
            for &j in by_id.get(target.as_str()).into_iter().flatten() {
                if entries[j].interceptor.id() != id {
                    successors[i].push(j);
                    in_degree[j] += 1;
                }
            }
        }

        for source in entry.interceptor.after() {
            for &j in by_id.get(source.as_str()).into_iter().flatten() {
                if entries[j].interceptor.id() != id {
                    successors[j].push(i);
                    in_degree[i] += 1;
                }
            }
        }
    }

    (successors, in_degree)
}

/// Ids of the unplaced entries that sit on (or between) cycles.
///
/// Entries that were only blocked because they hang off a cycle are peeled
/// away until every survivor has both a predecessor and a successor among
/// the survivors.
fn cycle_members(entries: &[ChainEntry], successors: &[Vec<usize>], placed: &[usize]) -> Vec<String> {
    let n = entries.len();
    let mut alive = vec![true; n];
    for &i in placed {
        alive[i] = false;
    }

    loop {
        let mut has_in = vec![false; n];
        let mut has_out = vec![false; n];
        for i in (0..n).filter(|&i| alive[i]) {
            for &j in successors[i].iter().filter(|&&j| alive[j]) {
                has_out[i] = true;
                has_in[j] = true;
            }
        }

        let mut pruned = false;
        for i in 0..n {
            if alive[i] && !(has_in[i] && has_out[i]) {
                alive[i] = false;
                pruned = true;
            }
        }
        if !pruned {
            break;
        }
    }

    let mut ids: Vec<String> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let id = entry.interceptor.id();
        if alive[i] && !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids
}
