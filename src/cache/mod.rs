// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memoization of the most recently built chain.
//!
//! The cache keeps exactly one `(fingerprints, template)` pair behind an
//! [`ArcSwapOption`], so the hit path is a lock-free load followed by a
//! comparison of cheap fingerprints:
//!
//! * versioned lists ([`InterceptorList`](crate::interceptor::InterceptorList))
//!   compare identity, length and modification count;
//! * plain slices compare length and the identity of every element.
//!
//! A miss takes consistent snapshots of every source, builds a new template
//! and publishes it.  Concurrent misses may build twice; the last writer wins,
//! which is harmless because building is deterministic.

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;

use crate::chain::{ChainTemplate, PhaseInterceptorChain};
use crate::core::{ChainError, PhaseInterceptor};
use crate::interceptor::{InterceptorSource, ListVersion};
use crate::phase::PhaseSet;
use crate::{debug_fmt, trace_fmt};

type Interceptors = Arc<Vec<Arc<dyn PhaseInterceptor>>>;

#[derive(Debug)]
enum Fingerprint {
    Versioned(ListVersion),
    // Holding the Arcs keeps the addresses from being reused.
    Plain(Interceptors),
}

impl Fingerprint {
    fn matches(&self, source: &InterceptorSource<'_>) -> bool {
        match (self, source) {
            (Fingerprint::Versioned(version), InterceptorSource::Versioned(list)) => {
                *version == list.version()
            }
            (Fingerprint::Plain(known), InterceptorSource::Plain(list)) => {
                known.len() == list.len()
                    && known.iter().zip(list.iter()).all(|(a, b)| same_instance(a, b))
            }
            _ => false,
        }
    }
}

fn same_instance(a: &Arc<dyn PhaseInterceptor>, b: &Arc<dyn PhaseInterceptor>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[derive(Debug)]
struct ChainHolder {
    phases: PhaseSet,
    fingerprints: Vec<Fingerprint>,
    template: ChainTemplate,
}

impl ChainHolder {
    fn matches(&self, phases: &PhaseSet, sources: &[InterceptorSource<'_>]) -> bool {
        self.phases == *phases
            && self.fingerprints.len() == sources.len()
            && self
                .fingerprints
                .iter()
                .zip(sources)
                .all(|(fingerprint, source)| fingerprint.matches(source))
    }
}

/// Single-entry cache of resolved chains.
#[derive(Debug, Default)]
pub struct PhaseChainCache {
    holder: ArcSwapOption<ChainHolder>,
    builds: AtomicU64,
}

impl PhaseChainCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a chain for the given phases and sources, built or cached.
    ///
    /// The returned chain always has fresh execution state; only the resolved
    /// order is shared with other chains handed out by this cache.
    pub fn get(
        &self,
        phases: &PhaseSet,
        sources: &[InterceptorSource<'_>],
    ) -> Result<PhaseInterceptorChain, ChainError> {
        let current = self.holder.load();
        if let Some(holder) = current.as_ref() {
            if holder.matches(phases, sources) {
                trace_fmt!("PhaseChainCache", "Reusing cached chain template");
                return Ok(holder.template.instantiate());
            }
        }

        let (fingerprints, lists): (Vec<Fingerprint>, Vec<Interceptors>) = sources
            .iter()
            .map(|source| match source {
                InterceptorSource::Versioned(list) => {
                    let snapshot = list.snapshot();
                    (Fingerprint::Versioned(snapshot.version), snapshot.interceptors)
                }
                InterceptorSource::Plain(list) => {
                    let items: Interceptors = Arc::new(list.to_vec());
                    (Fingerprint::Plain(items.clone()), items)
                }
            })
            .unzip();

        let slices: Vec<&[Arc<dyn PhaseInterceptor>]> = lists.iter().map(|l| l.as_slice()).collect();
        let chain = PhaseInterceptorChain::build(phases, &slices)?;
        let builds = self.builds.fetch_add(1, Ordering::Relaxed) + 1;
        debug_fmt!(
            "PhaseChainCache",
            "Built chain template #{} with {} interceptors",
            builds,
            chain.len()
        );

        self.holder.store(Some(Arc::new(ChainHolder {
            phases: phases.clone(),
            fingerprints,
            template: chain.template(),
        })));

        Ok(chain)
    }

    /// Number of times the ordering algorithm ran.
    pub fn build_count(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Drop the cached template; the next `get` rebuilds.
    pub fn clear(&self) {
        self.holder.store(None);
    }

    pub fn is_populated(&self) -> bool {
        self.holder.load().is_some()
    }
}
