// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interceptor bookkeeping and the versioned provider lists chains are built from.
//!
//! [`InterceptorBase`] is the optional convenience base every built-in
//! interceptor embeds: it owns the id, the phase and the before/after sets.
//! [`InterceptorList`] is a concurrently readable list with a modification
//! counter the chain cache uses as a cheap version fingerprint.


use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::core::{Direction, PhaseInterceptor};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque per-instance token, handed out in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceToken(u64);

impl InstanceToken {
    pub fn next() -> Self {
        Self(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Id, phase and ordering constraints of one interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorBase {
    id: String,
    phase: String,
    before: BTreeSet<String>,
    after: BTreeSet<String>,
}

impl InterceptorBase {
    /// Use an explicit id.
    pub fn new(id: impl Into<String>, phase: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: phase.into(),
            before: BTreeSet::new(),
            after: BTreeSet::new(),
        }
    }

    /// Use the type name of `T` as id.
    pub fn for_type<T: ?Sized>(phase: impl Into<String>) -> Self {
        Self::new(std::any::type_name::<T>(), phase)
    }

    /// Use the type name of `T` suffixed with a fresh [`InstanceToken`], so
    /// several instances of one type can be addressed individually.
    pub fn unique<T: ?Sized>(phase: impl Into<String>) -> Self {
        Self::new(
            format!("{}-{}", std::any::type_name::<T>(), InstanceToken::next()),
            phase,
        )
    }

    /// Builder form of [`add_before`](Self::add_before).
    pub fn run_before(mut self, id: impl Into<String>) -> Self {
        self.add_before(id);
        self
    }

    /// Builder form of [`add_after`](Self::add_after).
    pub fn run_after(mut self, id: impl Into<String>) -> Self {
        self.add_after(id);
        self
    }

    pub fn add_before(&mut self, id: impl Into<String>) {
        self.before.insert(id.into());
    }

    pub fn add_before_all<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.before.extend(ids.into_iter().map(Into::into));
    }

    pub fn add_after(&mut self, id: impl Into<String>) {
        self.after.insert(id.into());
    }

    pub fn add_after_all<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.after.extend(ids.into_iter().map(Into::into));
    }

    pub fn set_before(&mut self, ids: BTreeSet<String>) {
        self.before = ids;
    }

    pub fn set_after(&mut self, ids: BTreeSet<String>) {
        self.after = ids;
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    pub fn set_phase(&mut self, phase: impl Into<String>) {
        self.phase = phase.into();
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn phase(&self) -> &str {
        &self.phase
    }

    pub fn before(&self) -> &BTreeSet<String> {
        &self.before
    }

    pub fn after(&self) -> &BTreeSet<String> {
        &self.after
    }
}

/// Identity, length and modification count of an [`InterceptorList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListVersion {
    pub list: InstanceToken,
    pub len: usize,
    pub mod_count: u64,
}

/// A consistent view of an [`InterceptorList`] at one version.
#[derive(Debug, Clone)]
pub struct ListSnapshot {
    pub version: ListVersion,
    pub interceptors: Arc<Vec<Arc<dyn PhaseInterceptor>>>,
}

#[derive(Debug, Default)]
struct ListState {
    items: Arc<Vec<Arc<dyn PhaseInterceptor>>>,
    mod_count: u64,
}

/// An ordered, concurrently readable list of interceptors.
///
/// Every structural change bumps the modification counter.  Readers take
/// snapshots that share the item vector; writers copy it on change.
#[derive(Debug)]
pub struct InterceptorList {
    token: InstanceToken,
    state: RwLock<ListState>,
}

impl Default for InterceptorList {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptorList {
    pub fn new() -> Self {
        Self {
            token: InstanceToken::next(),
            state: RwLock::new(ListState::default()),
        }
    }

    pub fn with_interceptors<I>(interceptors: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn PhaseInterceptor>>,
    {
        let list = Self::new();
        list.extend(interceptors);
        list
    }

    pub fn push(&self, interceptor: Arc<dyn PhaseInterceptor>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Arc::make_mut(&mut state.items).push(interceptor);
        state.mod_count += 1;
    }

    pub fn extend<I>(&self, interceptors: I)
    where
        I: IntoIterator<Item = Arc<dyn PhaseInterceptor>>,
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let items = Arc::make_mut(&mut state.items);
        let before = items.len();
        items.extend(interceptors);
        if items.len() != before {
            state.mod_count += 1;
        }
    }

    /// Remove every interceptor with the given id.  Returns how many were removed.
    pub fn remove(&self, id: &str) -> usize {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let removed = state.items.iter().filter(|i| i.id() == id).count();
        if removed > 0 {
            Arc::make_mut(&mut state.items).retain(|i| i.id() != id);
            state.mod_count += 1;
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if !state.items.is_empty() {
            state.items = Arc::new(Vec::new());
            state.mod_count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn mod_count(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .mod_count
    }

    pub fn version(&self) -> ListVersion {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        ListVersion {
            list: self.token,
            len: state.items.len(),
            mod_count: state.mod_count,
        }
    }

    /// Items and version read under one lock.
    pub fn snapshot(&self) -> ListSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        ListSnapshot {
            version: ListVersion {
                list: self.token,
                len: state.items.len(),
                mod_count: state.mod_count,
            },
            interceptors: state.items.clone(),
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.snapshot()
            .interceptors
            .iter()
            .map(|i| i.id().to_string())
            .collect()
    }
}

/// One input list handed to the chain cache.
///
/// Versioned lists are compared by identity, length and modification count;
/// plain slices are compared element by element by pointer identity.
#[derive(Debug, Clone, Copy)]
pub enum InterceptorSource<'a> {
    Versioned(&'a InterceptorList),
    Plain(&'a [Arc<dyn PhaseInterceptor>]),
}

impl<'a> From<&'a InterceptorList> for InterceptorSource<'a> {
    fn from(list: &'a InterceptorList) -> Self {
        InterceptorSource::Versioned(list)
    }
}

impl<'a> From<&'a Arc<InterceptorList>> for InterceptorSource<'a> {
    fn from(list: &'a Arc<InterceptorList>) -> Self {
        InterceptorSource::Versioned(list.as_ref())
    }
}

impl<'a> From<&'a [Arc<dyn PhaseInterceptor>]> for InterceptorSource<'a> {
    fn from(list: &'a [Arc<dyn PhaseInterceptor>]) -> Self {
        InterceptorSource::Plain(list)
    }
}

impl<'a> From<&'a Vec<Arc<dyn PhaseInterceptor>>> for InterceptorSource<'a> {
    fn from(list: &'a Vec<Arc<dyn PhaseInterceptor>>) -> Self {
        InterceptorSource::Plain(list.as_slice())
    }
}

/// The four interceptor lists one configuration layer contributes.
#[derive(Debug, Default)]
pub struct InterceptorProvider {
    in_interceptors: InterceptorList,
    out_interceptors: InterceptorList,
    in_fault_interceptors: InterceptorList,
    out_fault_interceptors: InterceptorList,
}

impl InterceptorProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_interceptors(&self) -> &InterceptorList {
        &self.in_interceptors
    }

    pub fn out_interceptors(&self) -> &InterceptorList {
        &self.out_interceptors
    }

    pub fn in_fault_interceptors(&self) -> &InterceptorList {
        &self.in_fault_interceptors
    }

    pub fn out_fault_interceptors(&self) -> &InterceptorList {
        &self.out_fault_interceptors
    }

    /// Regular list for a direction.
    pub fn interceptors(&self, direction: Direction) -> &InterceptorList {
        match direction {
            Direction::Inbound => &self.in_interceptors,
            Direction::Outbound => &self.out_interceptors,
        }
    }

    /// Fault list for a direction.
    pub fn fault_interceptors(&self, direction: Direction) -> &InterceptorList {
        match direction {
            Direction::Inbound => &self.in_fault_interceptors,
            Direction::Outbound => &self.out_fault_interceptors,
        }
    }
}
