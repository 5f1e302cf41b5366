// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Core primitives – messages, faults, errors & the interceptor capability.
//!
//! Everything that physically moves through a chain is defined in this
//! module.  No ordering logic lives here; that sits in `chain` (ordering and
//! execution) and `cache` (memoization).


use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::chain::PhaseInterceptorChain;
use crate::config::ConfigError;

/// Errors raised while building or driving a chain.
#[derive(Error, Debug)]
pub enum ChainError {
    /// An interceptor declares a phase that is not part of the phase set.
    #[error("interceptor '{interceptor}' references unknown phase '{phase}'")]
    UnknownPhase { interceptor: String, phase: String },

    /// The before/after constraints of one phase cannot be satisfied.
    #[error(
        "unresolvable before/after cycle in phase '{phase}' between: {}",
        .interceptors.join(", ")
    )]
    OrderingCycle {
        phase: String,
        interceptors: Vec<String>,
    },

    /// Two phases in one phase set share a name.
    #[error("duplicate phase '{0}'")]
    DuplicatePhase(String),

    /// A traversal was requested relative to an interceptor the chain does not hold.
    #[error("no interceptor with id '{0}' in chain")]
    UnknownInterceptor(String),

    /// The requested operation is not valid in the chain's current state.
    #[error("illegal chain state: {0}")]
    IllegalState(String),

    /// An interceptor could not be created from its definition.
    #[error("interceptor error: {0}")]
    InterceptorError(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A runtime fault surfaced after the fault branch ran.
    #[error(transparent)]
    Fault(#[from] Fault),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Returns true for errors that make a chain unusable before any message is processed.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ChainError::UnknownPhase { .. }
                | ChainError::OrderingCycle { .. }
                | ChainError::DuplicatePhase(_)
                | ChainError::InterceptorError(_)
                | ChainError::ConfigError(_)
        )
    }
}

impl From<ConfigError> for ChainError {
    fn from(err: ConfigError) -> Self {
        ChainError::ConfigError(err.to_string())
    }
}

/// How a fault came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultMode {
    /// An unexpected failure inside an interceptor.
    #[default]
    Runtime,
    /// A failure the invoked operation declares.
    CheckedApplication,
    /// An undeclared failure raised by the invoked operation.
    UncheckedApplication,
}

/// A runtime error recorded on a message while a chain executes.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct Fault {
    message: String,
    mode: FaultMode,
    interceptor: Option<String>,
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl Fault {
    /// Create a runtime fault with the given description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            mode: FaultMode::Runtime,
            interceptor: None,
            source: None,
        }
    }

    /// Wrap an arbitrary error, keeping it reachable through `source()`.
    pub fn from_error<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            message: err.to_string(),
            mode: FaultMode::Runtime,
            interceptor: None,
            source: Some(Arc::new(err)),
        }
    }

    pub fn with_mode(mut self, mode: FaultMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attribute the fault to an interceptor unless it already is.
    pub fn with_interceptor(mut self, id: impl Into<String>) -> Self {
        if self.interceptor.is_none() {
            self.interceptor = Some(id.into());
        }
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn mode(&self) -> FaultMode {
        self.mode
    }

    /// Id of the interceptor that raised the fault, if known.
    pub fn interceptor_id(&self) -> Option<&str> {
        self.interceptor.as_deref()
    }
}

/// Which way a message travels through the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// The carrier handed to every interceptor.
///
/// The chain never looks inside a message except for the recorded fault.
/// Interceptors exchange data through string-keyed JSON `properties` and
/// through typed `contents` (one value per type).
pub struct Message {
    id: Uuid,
    direction: Direction,
    /// Custom properties that can be set by interceptors
    pub properties: HashMap<String, Value>,
    contents: HashMap<TypeId, Box<dyn Any + Send>>,
    fault: Option<Fault>,
}

impl Message {
    pub fn new(direction: Direction) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            properties: HashMap::new(),
            contents: HashMap::new(),
            fault: None,
        }
    }

    pub fn inbound() -> Self {
        Self::new(Direction::Inbound)
    }

    pub fn outbound() -> Self {
        Self::new(Direction::Outbound)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn put(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.properties.insert(key.into(), value)
    }

    /// Store a typed content value, replacing any previous value of that type.
    pub fn set_content<T: Any + Send>(&mut self, value: T) {
        self.contents.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn content<T: Any + Send>(&self) -> Option<&T> {
        self.contents
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
    }

    pub fn content_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.contents
            .get_mut(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_mut::<T>())
    }

    pub fn take_content<T: Any + Send>(&mut self) -> Option<T> {
        self.contents
            .remove(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast::<T>().ok())
            .map(|boxed| *boxed)
    }

    pub fn fault(&self) -> Option<&Fault> {
        self.fault.as_ref()
    }

    pub fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    /// Record a fault.  The next interceptor the chain reaches takes the fault branch.
    pub fn set_fault(&mut self, fault: Fault) {
        self.fault = Some(fault);
    }

    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("properties", &self.properties)
            .field("contents", &self.contents.len())
            .field("fault", &self.fault)
            .finish()
    }
}

static NO_IDS: BTreeSet<String> = BTreeSet::new();

/// A unit of message processing placed into exactly one phase.
///
/// Only `id`, `phase`, `before` and `after` are consulted when a chain is
/// ordered.  `before`/`after` name other interceptors of the *same* phase;
/// references to ids that are absent have no effect.
///
/// Implementations usually embed an [`InterceptorBase`](crate::interceptor::InterceptorBase)
/// and delegate the four placement accessors to it.
pub trait PhaseInterceptor: fmt::Debug + Send + Sync {
    fn id(&self) -> &str;

    /// Name of the phase this interceptor runs in.
    fn phase(&self) -> &str;

    /// Ids this interceptor must run before.
    fn before(&self) -> &BTreeSet<String> {
        &NO_IDS
    }

    /// Ids this interceptor must run after.
    fn after(&self) -> &BTreeSet<String> {
        &NO_IDS
    }

    /// Process the message.
    ///
    /// `chain` is the chain currently driving the message; interceptors use
    /// it to add interceptors, suspend, push cleanups or run the rest of the
    /// chain re-entrantly.
    fn handle_message(
        &self,
        message: &mut Message,
        chain: &mut PhaseInterceptorChain,
    ) -> Result<(), Fault>;

    /// Called instead of (or after) `handle_message` once the message carries a fault.
    fn handle_fault(&self, _message: &mut Message) {}
}
