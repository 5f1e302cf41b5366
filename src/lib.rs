// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sluice - a phase-ordered interceptor chain for message processing
//!
//! Messages travel through an ordered chain of interceptors.  Each
//! interceptor declares the phase it belongs to and, optionally, which
//! interceptors it must run before or after.  Sluice resolves that into a
//! deterministic order, caches the result and drives messages through it
//! with support for faults, suspension and dynamic modification.
//!
//! # Core Principles
//!
//! - **Determinism**: The same interceptors always resolve to the same order
//! - **Cheap reuse**: Resolved chains are cached until an interceptor list changes
//! - **Extensibility**: Interceptors are plain trait objects; built-ins are registered by name
//! - **Configuration**: Buses and endpoints can be described entirely in JSON, TOML or YAML
//!
//! # Phases and ordering
//!
//! Every direction has an ordered [`PhaseSet`].  Interceptors in an earlier
//! phase run before any interceptor of a later phase; inside a phase,
//! `before`/`after` constraints are honoured and ties keep insertion order.
//! Constraints that reference interceptors outside the phase are ignored.
//!
//! # Custom Interceptors
//!
//! ```rust
//! use sluice::{Fault, InterceptorBase, Message, PhaseInterceptor, PhaseInterceptorChain};
//! use sluice::phase::names;
//!
//! #[derive(Debug)]
//! struct Stamp {
//!     base: InterceptorBase,
//! }
//!
//! impl PhaseInterceptor for Stamp {
//!     fn id(&self) -> &str {
//!         self.base.id()
//!     }
//!
//!     fn phase(&self) -> &str {
//!         self.base.phase()
//!     }
//!
//!     fn handle_message(
//!         &self,
//!         message: &mut Message,
//!         _chain: &mut PhaseInterceptorChain,
//!     ) -> Result<(), Fault> {
//!         message.put("stamped", serde_json::json!(true));
//!         Ok(())
//!     }
//! }
//!
//! let bus = sluice::Bus::loader()
//!     .without_logging()
//!     .with_in_interceptor(std::sync::Arc::new(Stamp {
//!         base: InterceptorBase::new("stamp", names::INVOKE),
//!     }))
//!     .build()
//!     .unwrap();
//!
//! let message = bus
//!     .on_message(Message::inbound())
//!     .unwrap()
//!     .into_message()
//!     .unwrap();
//! assert_eq!(message.get("stamped"), Some(&serde_json::json!(true)));
//! ```

// Module declarations
pub mod cache;
pub mod chain;
pub mod config;
pub mod core;
pub mod interceptor;
pub mod interceptors;
pub mod loader;
pub mod logging;
pub mod observer;
pub mod phase;

// Re-export key types at the crate root for convenience
pub use cache::PhaseChainCache;
pub use chain::{
    AbortHandle, ChainState, ChainTemplate, FaultListener, FaultObserver, PhaseInterceptorChain,
};
pub use config::{Config, ConfigError, ConfigProvider, ConfigProviderExt};
pub use core::{ChainError, Direction, Fault, FaultMode, Message, PhaseInterceptor};
pub use interceptor::{
    InstanceToken, InterceptorBase, InterceptorList, InterceptorProvider, InterceptorSource,
};
pub use interceptors::{
    register_interceptor, InterceptorDefinition, InterceptorFactory, LoggingInterceptor,
    PropertyInterceptor, TimingInterceptor,
};
pub use loader::{Bus, Endpoint, LoaderError, SluiceLoader};
pub use observer::{ChainInitiator, FaultChainObserver, FaultResponse, Invocation, SuspendedInvocation};
pub use phase::{Phase, PhaseManager, PhaseSet};
