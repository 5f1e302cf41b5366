// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message initiation – the entry point that turns a message into a run of
//! the right chain.
//!
//! A [`ChainInitiator`] owns the layered provider lists of one bus or
//! endpoint (bus lists first, endpoint lists second).  For every message it
//! asks a per-direction [`PhaseChainCache`] for a chain, attaches a
//! [`FaultChainObserver`] and drives the chain on the calling thread.


use std::sync::Arc;

use crate::cache::PhaseChainCache;
use crate::chain::{ChainState, FaultObserver, PhaseInterceptorChain};
use crate::core::{ChainError, Direction, Fault, Message};
use crate::interceptor::{InterceptorList, InterceptorProvider, InterceptorSource};
use crate::phase::PhaseManager;
use crate::{debug_fmt, error_fmt, trace_fmt, warn_fmt};

/// Outcome of driving a message through a chain.
#[derive(Debug)]
pub enum Invocation {
    /// Every interceptor ran.
    Complete(Message),
    /// The fault branch ran; `fault` is the error that caused it.
    Faulted { message: Message, fault: Fault },
    /// An interceptor suspended the chain.
    Suspended(SuspendedInvocation),
    /// The chain was aborted.
    Aborted(Message),
}

impl Invocation {
    pub fn is_complete(&self) -> bool {
        matches!(self, Invocation::Complete(_))
    }

    /// The message, unless the invocation is suspended.
    pub fn into_message(self) -> Option<Message> {
        match self {
            Invocation::Complete(message)
            | Invocation::Aborted(message)
            | Invocation::Faulted { message, .. } => Some(message),
            Invocation::Suspended(_) => None,
        }
    }

    fn settle(
        chain: PhaseInterceptorChain,
        message: Message,
        result: Result<ChainState, ChainError>,
    ) -> Result<Self, ChainError> {
        match result {
            Ok(ChainState::Complete) => Ok(Invocation::Complete(message)),
            Ok(ChainState::Aborted) => Ok(Invocation::Aborted(message)),
            Ok(ChainState::Paused) => Ok(Invocation::Suspended(SuspendedInvocation {
                chain,
                message,
            })),
            Ok(state) => Err(ChainError::IllegalState(format!(
                "chain returned in state {state}"
            ))),
            Err(ChainError::Fault(fault)) => Ok(Invocation::Faulted { message, fault }),
            Err(err) => Err(err),
        }
    }
}

/// A paused chain together with its message.
///
/// Can be moved to any thread and resumed there; the chain continues after
/// the interceptor that suspended it.
#[derive(Debug)]
pub struct SuspendedInvocation {
    chain: PhaseInterceptorChain,
    message: Message,
}

impl SuspendedInvocation {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut Message {
        &mut self.message
    }

    pub fn chain(&self) -> &PhaseInterceptorChain {
        &self.chain
    }

    /// Continue the chain on the current thread.
    pub fn resume(mut self) -> Result<Invocation, ChainError> {
        debug_fmt!(
            "SuspendedInvocation",
            "Resuming message {}",
            self.message.id()
        );
        let result = self.chain.resume(&mut self.message);
        Invocation::settle(self.chain, self.message, result)
    }

    /// Continue the chain on the tokio blocking pool.
    pub async fn resume_async(self) -> Result<Invocation, ChainError> {
        tokio::task::spawn_blocking(move || self.resume())
            .await
            .map_err(|e| ChainError::Other(format!("resume task failed: {e}")))?
    }

    /// Abort the chain instead of resuming it.
    pub fn abort(mut self) -> Message {
        self.chain.abort();
        self.message
    }
}

/// Reply produced by the fault chain, stored on the faulted message.
#[derive(Debug)]
pub struct FaultResponse(pub Message);

fn opposite(direction: Direction) -> Direction {
    match direction {
        Direction::Inbound => Direction::Outbound,
        Direction::Outbound => Direction::Inbound,
    }
}

fn sources(
    providers: &[Arc<InterceptorProvider>],
    select: impl Fn(&InterceptorProvider) -> &InterceptorList,
) -> Vec<InterceptorSource<'_>> {
    providers
        .iter()
        .map(|provider| InterceptorSource::Versioned(select(provider)))
        .collect()
}

/// Runs the fault lists once a chain has faulted.
///
/// The fault chain travels the opposite direction of the faulted message:
/// an inbound fault is answered through the outbound fault lists and phases.
/// The fault chain's message carries the [`Fault`] as content and ends up
/// on the faulted message as a [`FaultResponse`].
#[derive(Debug)]
pub struct FaultChainObserver {
    phases: PhaseManager,
    providers: Vec<Arc<InterceptorProvider>>,
    in_cache: PhaseChainCache,
    out_cache: PhaseChainCache,
}

impl FaultChainObserver {
    pub fn new(phases: PhaseManager, providers: Vec<Arc<InterceptorProvider>>) -> Self {
        Self {
            phases,
            providers,
            in_cache: PhaseChainCache::new(),
            out_cache: PhaseChainCache::new(),
        }
    }

    /// The fault chain handling faults of messages travelling `direction`.
    pub fn fault_chain(&self, direction: Direction) -> Result<PhaseInterceptorChain, ChainError> {
        let direction = opposite(direction);
        let cache = match direction {
            Direction::Inbound => &self.in_cache,
            Direction::Outbound => &self.out_cache,
        };
        let sources = sources(&self.providers, |p| p.fault_interceptors(direction));
        cache.get(self.phases.phases(direction), &sources)
    }
}

impl FaultObserver for FaultChainObserver {
    fn on_fault(&self, message: &mut Message) {
        let Some(fault) = message.fault().cloned() else {
            return;
        };

        let mut chain = match self.fault_chain(message.direction()) {
            Ok(chain) => chain,
            Err(e) => {
                error_fmt!("FaultChainObserver", "Cannot build fault chain: {}", e);
                return;
            }
        };
        if chain.is_empty() {
            trace_fmt!("FaultChainObserver", "No fault interceptors configured");
            return;
        }

        let mut fault_message = Message::new(opposite(message.direction()));
        fault_message.put("sluice.fault", serde_json::Value::String(fault.to_string()));
        fault_message.put(
            "sluice.faulted_message",
            serde_json::Value::String(message.id().to_string()),
        );
        fault_message.set_content(fault);

        if let Err(e) = chain.do_intercept(&mut fault_message) {
            warn_fmt!(
                "FaultChainObserver",
                "Fault chain for message {} failed: {}",
                message.id(),
                e
            );
        }
        message.set_content(FaultResponse(fault_message));
    }
}

/// Drives messages through the chains of one bus or endpoint.
#[derive(Debug)]
pub struct ChainInitiator {
    name: String,
    phases: PhaseManager,
    providers: Vec<Arc<InterceptorProvider>>,
    in_cache: PhaseChainCache,
    out_cache: PhaseChainCache,
    fault_observer: Arc<FaultChainObserver>,
}

impl ChainInitiator {
    /// `providers` are layered in order; earlier lists contribute first.
    pub fn new(
        name: impl Into<String>,
        phases: PhaseManager,
        providers: Vec<Arc<InterceptorProvider>>,
    ) -> Self {
        let fault_observer = Arc::new(FaultChainObserver::new(
            phases.clone(),
            providers.clone(),
        ));
        Self {
            name: name.into(),
            phases,
            providers,
            in_cache: PhaseChainCache::new(),
            out_cache: PhaseChainCache::new(),
            fault_observer,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phase_manager(&self) -> &PhaseManager {
        &self.phases
    }

    pub fn cache(&self, direction: Direction) -> &PhaseChainCache {
        match direction {
            Direction::Inbound => &self.in_cache,
            Direction::Outbound => &self.out_cache,
        }
    }

    pub fn fault_observer(&self) -> &Arc<FaultChainObserver> {
        &self.fault_observer
    }

    /// A fresh chain for messages travelling `direction`.
    pub fn chain(&self, direction: Direction) -> Result<PhaseInterceptorChain, ChainError> {
        let sources = sources(&self.providers, |p| p.interceptors(direction));
        self.cache(direction)
            .get(self.phases.phases(direction), &sources)
    }

    /// Drive `message` through the chain of its direction.
    ///
    /// Build errors are returned as `Err`; runtime faults as
    /// [`Invocation::Faulted`] after the fault chain ran.
    pub fn on_message(&self, mut message: Message) -> Result<Invocation, ChainError> {
        let mut chain = self.chain(message.direction())?;
        chain.set_fault_observer(self.fault_observer.clone());

        debug_fmt!(
            "ChainInitiator",
            "{}: dispatching {} message {} through {} interceptors",
            self.name,
            message.direction(),
            message.id(),
            chain.len()
        );

        let result = chain.do_intercept(&mut message);
        Invocation::settle(chain, message, result)
    }
}
