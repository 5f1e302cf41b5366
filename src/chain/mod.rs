// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The phase interceptor chain – ordering and execution.
//!
//! A chain places every interceptor into the bucket of its phase, orders
//! each bucket by the before/after constraints and concatenates the buckets
//! by phase order.  Executing the chain walks that sequence with a cursor:
//!
//! ```text
//!   Ready ──do_intercept──▶ Running ──▶ Complete
//!                             │  ▲
//!                     suspend │  │ resume
//!                             ▼  │
//!                            Paused
//!   Running ──fault──▶ fault branch ──▶ Faulted
//!   any ──abort──▶ Aborted
//! ```
//!
//! When the message carries a fault the chain takes the fault branch: the
//! interceptors that have not run yet get `handle_fault` in chain order,
//! then the interceptors that already ran (including the one that raised)
//! get `handle_fault` in reverse order.  Cleanups pushed during execution
//! run last-in first-out once the chain completes or faults.

mod ordering;


use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::{ChainError, Fault, FaultMode, Message, PhaseInterceptor};
use crate::phase::PhaseSet;
use crate::{debug_fmt, error_fmt, trace_fmt, warn_fmt};

/// Execution state of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    /// Built, not yet started
    Ready,
    /// Currently walking its interceptors
    Running,
    /// Suspended; resumes after the interceptor that suspended it
    Paused,
    /// Finished through the fault branch
    Faulted,
    /// Finished without fault
    Complete,
    /// Cancelled from outside or by an interceptor
    Aborted,
}

impl ChainState {
    /// Returns true if the chain cannot run any further.
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ChainState::Faulted | ChainState::Complete | ChainState::Aborted
        )
    }
}

impl fmt::Display for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainState::Ready => write!(f, "ready"),
            ChainState::Running => write!(f, "running"),
            ChainState::Paused => write!(f, "paused"),
            ChainState::Faulted => write!(f, "faulted"),
            ChainState::Complete => write!(f, "complete"),
            ChainState::Aborted => write!(f, "aborted"),
        }
    }
}

/// Action run once the chain completes or faults.
pub type Cleanup = Box<dyn FnOnce(&mut Message, ChainState) + Send>;

/// Notified after the fault branch of a chain has run.
pub trait FaultObserver: fmt::Debug + Send + Sync {
    fn on_fault(&self, message: &mut Message);
}

/// Told about every fault an interceptor raises.
pub trait FaultListener: fmt::Debug + Send + Sync {
    /// Return `true` to let the chain log the fault as well.
    fn fault_occurred(&self, fault: &Fault, description: &str, message: &Message) -> bool;
}

/// Cooperative cancellation for a running chain, usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// The chain stops before invoking its next interceptor.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ChainEntry {
    pub(crate) interceptor: Arc<dyn PhaseInterceptor>,
    pub(crate) phase: usize,
    pub(crate) seq: u64,
}

/// The resolved, immutable order of a chain without any execution state.
///
/// Templates are what the chain cache keeps; every [`instantiate`](Self::instantiate)
/// shares the resolved sequence and starts with fresh state.
#[derive(Debug, Clone)]
pub struct ChainTemplate {
    phases: PhaseSet,
    entries: Arc<Vec<ChainEntry>>,
    next_seq: u64,
}

impl ChainTemplate {
    pub fn instantiate(&self) -> PhaseInterceptorChain {
        PhaseInterceptorChain::from_parts(self.phases.clone(), self.entries.clone(), self.next_seq)
    }

    pub fn phases(&self) -> &PhaseSet {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True when both templates share one resolved sequence.
    pub fn shares_order_with(&self, chain: &PhaseInterceptorChain) -> bool {
        Arc::ptr_eq(&self.entries, &chain.entries)
    }
}

/// An ordered, resumable interceptor chain for one message.
pub struct PhaseInterceptorChain {
    phases: PhaseSet,
    entries: Arc<Vec<ChainEntry>>,
    next_seq: u64,
    cursor: usize,
    started_at: usize,
    state: ChainState,
    abort: AbortHandle,
    cleanups: Vec<Cleanup>,
    fault_observer: Option<Arc<dyn FaultObserver>>,
    fault_listener: Option<Arc<dyn FaultListener>>,
}

impl PhaseInterceptorChain {
    /// Create an empty chain over the given phases.
    pub fn new(phases: PhaseSet) -> Self {
        Self::from_parts(phases, Arc::new(Vec::new()), 0)
    }

    fn from_parts(phases: PhaseSet, entries: Arc<Vec<ChainEntry>>, next_seq: u64) -> Self {
        Self {
            phases,
            entries,
            next_seq,
            cursor: 0,
            started_at: 0,
            state: ChainState::Ready,
            abort: AbortHandle::default(),
            cleanups: Vec::new(),
            fault_observer: None,
            fault_listener: None,
        }
    }

    /// Build a chain from interceptor lists, taken in the given order.
    ///
    /// An interceptor whose id is already present in its phase is skipped.
    /// Fails on the first interceptor with an unknown phase and on any
    /// before/after cycle.
    pub fn build(
        phases: &PhaseSet,
        sources: &[&[Arc<dyn PhaseInterceptor>]],
    ) -> Result<Self, ChainError> {
        let mut buckets: Vec<Vec<ChainEntry>> = vec![Vec::new(); phases.len()];
        let mut seq = 0u64;

        for source in sources {
            for interceptor in source.iter() {
                let phase = Self::locate_phase(phases, interceptor.as_ref())?;
                let bucket = &mut buckets[phase];
                if bucket.iter().any(|e| e.interceptor.id() == interceptor.id()) {
                    trace_fmt!(
                        "PhaseInterceptorChain",
                        "Skipping duplicate interceptor {} in phase {}",
                        interceptor.id(),
                        interceptor.phase()
                    );
                    continue;
                }
                bucket.push(ChainEntry {
                    interceptor: interceptor.clone(),
                    phase,
                    seq,
                });
                seq += 1;
            }
        }

        let mut entries = Vec::with_capacity(seq as usize);
        for (phase, bucket) in buckets.into_iter().enumerate() {
            let ordered = ordering::order_bucket(bucket)
                .map_err(|ids| Self::cycle_error(phases, phase, ids))?;
            entries.extend(ordered);
        }

        let chain = Self::from_parts(phases.clone(), Arc::new(entries), seq);
        debug_fmt!(
            "PhaseInterceptorChain",
            "Chain was created. Current flow:\n{}",
            chain
        );
        Ok(chain)
    }

    fn locate_phase(phases: &PhaseSet, interceptor: &dyn PhaseInterceptor) -> Result<usize, ChainError> {
        phases.index_of(interceptor.phase()).ok_or_else(|| {
            let err = ChainError::UnknownPhase {
                interceptor: interceptor.id().to_string(),
                phase: interceptor.phase().to_string(),
            };
            error_fmt!("PhaseInterceptorChain", "{}", err);
            err
        })
    }

    fn cycle_error(phases: &PhaseSet, phase: usize, interceptors: Vec<String>) -> ChainError {
        let err = ChainError::OrderingCycle {
            phase: phases
                .get(phase)
                .map(|p| p.name().to_string())
                .unwrap_or_default(),
            interceptors,
        };
        error_fmt!("PhaseInterceptorChain", "{}", err);
        err
    }

    /// A copy sharing this chain's resolved order, with fresh execution state.
    pub fn clone_chain(&self) -> Self {
        let mut chain = Self::from_parts(self.phases.clone(), self.entries.clone(), self.next_seq);
        chain.fault_observer = self.fault_observer.clone();
        chain.fault_listener = self.fault_listener.clone();
        chain
    }

    /// The resolved order of this chain, detached from its execution state.
    pub fn template(&self) -> ChainTemplate {
        ChainTemplate {
            phases: self.phases.clone(),
            entries: self.entries.clone(),
            next_seq: self.next_seq,
        }
    }

    /// Add an interceptor unless one with the same id already sits in its phase.
    ///
    /// Returns whether the interceptor was scheduled.  See [`add_forced`](Self::add_forced)
    /// for the placement rules.
    pub fn add(&mut self, interceptor: Arc<dyn PhaseInterceptor>) -> Result<bool, ChainError> {
        self.insert(interceptor, false)
    }

    /// Add an interceptor even if its id is already present.
    ///
    /// Once execution has started only interceptors that have not run yet
    /// are considered: the new interceptor is ordered among the remaining
    /// interceptors of its phase.  An interceptor whose phase precedes the
    /// phase of the last executed interceptor is not scheduled.
    pub fn add_forced(&mut self, interceptor: Arc<dyn PhaseInterceptor>) -> Result<bool, ChainError> {
        self.insert(interceptor, true)
    }

    pub fn add_all<I>(&mut self, interceptors: I) -> Result<(), ChainError>
    where
        I: IntoIterator<Item = Arc<dyn PhaseInterceptor>>,
    {
        for interceptor in interceptors {
            self.add(interceptor)?;
        }
        Ok(())
    }

    fn insert(&mut self, interceptor: Arc<dyn PhaseInterceptor>, force: bool) -> Result<bool, ChainError> {
        let phase = Self::locate_phase(&self.phases, interceptor.as_ref())?;
        let (start, end) = self.phase_range(phase);

        if !force
            && self.entries[start..end]
                .iter()
                .any(|e| e.interceptor.id() == interceptor.id())
        {
            trace_fmt!(
                "PhaseInterceptorChain",
                "Interceptor {} already present in phase {}",
                interceptor.id(),
                interceptor.phase()
            );
            return Ok(false);
        }

        if let Some(last) = self.cursor.checked_sub(1).and_then(|i| self.entries.get(i)) {
            if phase < last.phase {
                warn_fmt!(
                    "PhaseInterceptorChain",
                    "Not scheduling interceptor {}: phase {} has already passed",
                    interceptor.id(),
                    interceptor.phase()
                );
                return Ok(false);
            }
        }

        let region_start = start.max(self.cursor);
        let mut region: Vec<ChainEntry> = self.entries[region_start..end].to_vec();
        region.sort_by_key(|e| e.seq);
        region.push(ChainEntry {
            interceptor,
            phase,
            seq: self.next_seq,
        });

        let ordered = ordering::order_bucket(region)
            .map_err(|ids| Self::cycle_error(&self.phases, phase, ids))?;

        self.next_seq += 1;
        Arc::make_mut(&mut self.entries).splice(region_start..end, ordered);
        Ok(true)
    }

    /// Remove every interceptor with this id that has not run yet.
    pub fn remove(&mut self, id: &str) -> usize {
        let cursor = self.cursor;
        let removed = self.entries[cursor..]
            .iter()
            .filter(|e| e.interceptor.id() == id)
            .count();
        if removed > 0 {
            let entries = Arc::make_mut(&mut self.entries);
            let tail: Vec<ChainEntry> = entries
                .drain(cursor..)
                .filter(|e| e.interceptor.id() != id)
                .collect();
            entries.extend(tail);
        }
        removed
    }

    // Entries are sorted by phase, so a phase occupies one contiguous range.
    fn phase_range(&self, phase: usize) -> (usize, usize) {
        let start = self.entries.partition_point(|e| e.phase < phase);
        let end = self.entries.partition_point(|e| e.phase <= phase);
        (start, end)
    }

    fn position_of(&self, id: &str) -> Result<usize, ChainError> {
        self.entries
            .iter()
            .position(|e| e.interceptor.id() == id)
            .ok_or_else(|| ChainError::UnknownInterceptor(id.to_string()))
    }

    /// Run the chain from its current position.
    ///
    /// Interceptors may call this re-entrantly on the chain they are handed
    /// to run the rest of the chain before doing their own post-processing.
    /// Calling it on a paused chain resumes it.  On an aborted chain it
    /// returns immediately.
    ///
    /// Returns the state the chain stopped in.  A fault is returned as
    /// [`ChainError::Fault`] after the fault branch has run.
    pub fn do_intercept(&mut self, message: &mut Message) -> Result<ChainState, ChainError> {
        match self.state {
            ChainState::Ready | ChainState::Running | ChainState::Paused => self.run(message),
            ChainState::Aborted => Ok(ChainState::Aborted),
            state => Err(ChainError::IllegalState(format!(
                "cannot run a chain that is {state}"
            ))),
        }
    }

    /// Run every interceptor after the one with the given id.
    pub fn do_intercept_starting_after(
        &mut self,
        message: &mut Message,
        id: &str,
    ) -> Result<ChainState, ChainError> {
        let position = self.position_of(id)?;
        self.start_from(message, position + 1)
    }

    /// Run the chain beginning with the interceptor with the given id.
    pub fn do_intercept_starting_at(
        &mut self,
        message: &mut Message,
        id: &str,
    ) -> Result<ChainState, ChainError> {
        let position = self.position_of(id)?;
        self.start_from(message, position)
    }

    fn start_from(&mut self, message: &mut Message, position: usize) -> Result<ChainState, ChainError> {
        if self.state != ChainState::Ready {
            return Err(ChainError::IllegalState(format!(
                "cannot restart a chain that is {}",
                self.state
            )));
        }
        self.cursor = position;
        self.started_at = position;
        self.run(message)
    }

    /// Continue a paused chain after the interceptor that paused it.
    pub fn resume(&mut self, message: &mut Message) -> Result<ChainState, ChainError> {
        if self.state != ChainState::Paused {
            return Err(ChainError::IllegalState(format!(
                "cannot resume a chain that is {}",
                self.state
            )));
        }
        debug_fmt!(
            "PhaseInterceptorChain",
            "Resuming chain at position {} of {}",
            self.cursor,
            self.entries.len()
        );
        self.run(message)
    }

    /// Pause the chain.  The interceptor currently running finishes; the
    /// calling `do_intercept` then returns [`ChainState::Paused`].
    pub fn suspend(&mut self) {
        if matches!(self.state, ChainState::Ready | ChainState::Running) {
            self.state = ChainState::Paused;
        }
    }

    /// Abort the chain.  Interceptors that already ran are not unwound.
    pub fn abort(&mut self) {
        self.abort.abort();
        self.state = ChainState::Aborted;
    }

    /// Handle for aborting this chain from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Rewind a chain that is not running back to [`ChainState::Ready`].
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.started_at = 0;
        self.state = ChainState::Ready;
        self.abort = AbortHandle::default();
        self.cleanups.clear();
    }

    /// Register an action to run (last-in first-out) when the chain completes or faults.
    pub fn push_cleanup<F>(&mut self, cleanup: F)
    where
        F: FnOnce(&mut Message, ChainState) + Send + 'static,
    {
        self.cleanups.push(Box::new(cleanup));
    }

    pub fn set_fault_observer(&mut self, observer: Arc<dyn FaultObserver>) {
        self.fault_observer = Some(observer);
    }

    pub fn fault_observer(&self) -> Option<&Arc<dyn FaultObserver>> {
        self.fault_observer.as_ref()
    }

    pub fn set_fault_listener(&mut self, listener: Arc<dyn FaultListener>) {
        self.fault_listener = Some(listener);
    }

    fn run(&mut self, message: &mut Message) -> Result<ChainState, ChainError> {
        self.state = ChainState::Running;

        while self.cursor < self.entries.len() {
            if self.abort.is_aborted() {
                return Ok(self.mark_aborted());
            }
            if message.has_fault() {
                return self.fault_branch(message);
            }

            let entry = self.entries[self.cursor].clone();
            self.cursor += 1;

            let interceptor = entry.interceptor.as_ref();
            trace_fmt!(
                "PhaseInterceptorChain",
                "Invoking handle_message on interceptor {}",
                interceptor.id()
            );

            if let Err(fault) = interceptor.handle_message(message, self) {
                match self.state {
                    ChainState::Faulted | ChainState::Aborted => {
                        debug_fmt!(
                            "PhaseInterceptorChain",
                            "Ignoring fault from {} raised after the chain finished: {}",
                            interceptor.id(),
                            fault
                        );
                    }
                    _ => {
                        let fault = fault.with_interceptor(interceptor.id());
                        self.report_fault(&fault, message);
                        message.set_fault(fault);
                        return self.fault_branch(message);
                    }
                }
            }

            match self.state {
                ChainState::Running => {}
                ChainState::Paused => {
                    debug_fmt!(
                        "PhaseInterceptorChain",
                        "Chain paused after interceptor {}",
                        interceptor.id()
                    );
                    return Ok(ChainState::Paused);
                }
                ChainState::Faulted => return Err(Self::surfaced_fault(message)),
                // A nested run finished the chain, or an interceptor aborted it.
                state => return Ok(state),
            }
        }

        if message.has_fault() {
            return self.fault_branch(message);
        }

        self.state = ChainState::Complete;
        self.run_cleanups(message);
        Ok(ChainState::Complete)
    }

    fn fault_branch(&mut self, message: &mut Message) -> Result<ChainState, ChainError> {
        let fault = Self::surfaced_fault(message);
        let executed = self.cursor;

        while self.cursor < self.entries.len() {
            let entry = self.entries[self.cursor].clone();
            self.cursor += 1;
            trace_fmt!(
                "PhaseInterceptorChain",
                "Invoking handle_fault on remaining interceptor {}",
                entry.interceptor.id()
            );
            entry.interceptor.handle_fault(message);
        }

        for index in (self.started_at..executed).rev() {
            let entry = self.entries[index].clone();
            trace_fmt!(
                "PhaseInterceptorChain",
                "Unwinding interceptor {}",
                entry.interceptor.id()
            );
            entry.interceptor.handle_fault(message);
        }

        self.state = ChainState::Faulted;
        self.run_cleanups(message);

        if let Some(observer) = self.fault_observer.clone() {
            observer.on_fault(message);
        }

        Err(fault)
    }

    fn surfaced_fault(message: &Message) -> ChainError {
        match message.fault() {
            Some(fault) => ChainError::Fault(fault.clone()),
            None => ChainError::Fault(Fault::new("chain faulted")),
        }
    }

    fn report_fault(&self, fault: &Fault, message: &Message) {
        let description = format!(
            "Interceptor {} has thrown exception, unwinding now",
            fault.interceptor_id().unwrap_or("<unknown>")
        );

        let log_default = match &self.fault_listener {
            Some(listener) => listener.fault_occurred(fault, &description, message),
            None => true,
        };

        if log_default {
            match fault.mode() {
                FaultMode::CheckedApplication => {
                    debug_fmt!("PhaseInterceptorChain", "{}: {}", description, fault)
                }
                _ => warn_fmt!("PhaseInterceptorChain", "{}: {}", description, fault),
            }
        }
    }

    fn mark_aborted(&mut self) -> ChainState {
        debug_fmt!(
            "PhaseInterceptorChain",
            "Chain aborted at position {} of {}",
            self.cursor,
            self.entries.len()
        );
        self.state = ChainState::Aborted;
        ChainState::Aborted
    }

    fn run_cleanups(&mut self, message: &mut Message) {
        let state = self.state;
        while let Some(cleanup) = self.cleanups.pop() {
            cleanup(message, state);
        }
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    pub fn phases(&self) -> &PhaseSet {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of interceptors the cursor has moved past.
    pub fn position(&self) -> usize {
        self.cursor
    }

    /// Interceptors in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PhaseInterceptor>> {
        self.entries.iter().map(|e| &e.interceptor)
    }

    pub fn interceptor_ids(&self) -> Vec<String> {
        self.iter().map(|i| i.id().to_string()).collect()
    }

    /// Interceptors the cursor has not reached yet.
    pub fn remaining(&self) -> impl Iterator<Item = &Arc<dyn PhaseInterceptor>> {
        self.entries[self.cursor.min(self.entries.len())..]
            .iter()
            .map(|e| &e.interceptor)
    }
}

impl fmt::Debug for PhaseInterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhaseInterceptorChain")
            .field("interceptors", &self.interceptor_ids())
            .field("cursor", &self.cursor)
            .field("state", &self.state)
            .field("cleanups", &self.cleanups.len())
            .finish()
    }
}

impl fmt::Display for PhaseInterceptorChain {
    /// One line per non-empty phase: `  name [id, id]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, phase) in self.phases.iter().enumerate() {
            let (start, end) = self.phase_range(index);
            if start == end {
                continue;
            }
            let ids: Vec<&str> = self.entries[start..end]
                .iter()
                .map(|e| e.interceptor.id())
                .collect();
            writeln!(f, "  {} [{}]", phase.name(), ids.join(", "))?;
        }
        Ok(())
    }
}
