// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in interceptors
//!
//! Interceptors are **opt-in** – they only run when referenced from one of
//! the interceptor lists of the bus or of an endpoint.  Every definition is
//! `{type, config}`; besides its own keys each `config` accepts the
//! placement keys of [`PlacementConfig`]:
//!
//! ```yaml
//! bus:
//!   in_interceptors:
//!     - type: timing
//!       config:
//!         id: timing
//!     - type: logging
//!       config:
//!         level: info
//!         after: [timing]
//! ```

#[cfg(test)]
mod tests;

use crate::chain::{ChainState, PhaseInterceptorChain};
use crate::core::{ChainError, Fault, Message, PhaseInterceptor};
use crate::interceptor::InterceptorBase;
use crate::logging::structured::{self, MessageInfo};
use crate::phase::names;
use crate::{debug_fmt, error_fmt, info_fmt, trace_fmt, warn_fmt};
use chrono::Utc;
use log::Level;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Constructor signature every dynamic interceptor must implement
pub type InterceptorConstructor = fn(Value) -> Result<Arc<dyn PhaseInterceptor>, ChainError>;

/// Global registry – `register_interceptor()` writes to it,
/// `InterceptorFactory::create_interceptor()` reads from it.
static INTERCEPTOR_REGISTRY: Lazy<RwLock<HashMap<String, InterceptorConstructor>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Register an interceptor type under a unique name.
/// Call this **before** you load the bus:
///
/// ```rust
/// use std::sync::Arc;
/// use sluice::interceptors::{register_interceptor, PlacementConfig};
/// use sluice::{Fault, InterceptorBase, Message, PhaseInterceptor, PhaseInterceptorChain};
///
/// #[derive(Debug)]
/// struct Audit(InterceptorBase);
///
/// impl PhaseInterceptor for Audit {
///     fn id(&self) -> &str { self.0.id() }
///     fn phase(&self) -> &str { self.0.phase() }
///     fn handle_message(&self, _: &mut Message, _: &mut PhaseInterceptorChain) -> Result<(), Fault> {
///         Ok(())
///     }
/// }
///
/// register_interceptor("audit", |cfg| {
///     let placement: PlacementConfig = serde_json::from_value(cfg)
///         .map_err(|e| sluice::ChainError::InterceptorError(e.to_string()))?;
///     Ok(Arc::new(Audit(placement.base::<Audit>("pre-invoke"))))
/// });
/// ```
pub fn register_interceptor(name: &str, ctor: InterceptorConstructor) {
    INTERCEPTOR_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(name.to_string(), ctor);
}

fn get_registered_interceptor(name: &str) -> Option<InterceptorConstructor> {
    INTERCEPTOR_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(name)
        .copied()
}

/// One entry of an interceptor list in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterceptorDefinition {
    #[serde(rename = "type")]
    pub interceptor_type: String,
    #[serde(default)]
    pub config: Value,
}

impl InterceptorDefinition {
    pub fn new(interceptor_type: impl Into<String>, config: Value) -> Self {
        Self {
            interceptor_type: interceptor_type.into(),
            config,
        }
    }

    pub fn create(&self) -> Result<Arc<dyn PhaseInterceptor>, ChainError> {
        InterceptorFactory::create_interceptor(&self.interceptor_type, self.config.clone())
    }
}

/// Placement keys shared by every interceptor definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    /// Explicit id; defaults to the interceptor type name
    #[serde(default)]
    pub id: Option<String>,

    /// Phase override
    #[serde(default)]
    pub phase: Option<String>,

    /// Ids this interceptor must run before
    #[serde(default)]
    pub before: BTreeSet<String>,

    /// Ids this interceptor must run after
    #[serde(default)]
    pub after: BTreeSet<String>,

    /// Suffix the default id with an instance token
    #[serde(default)]
    pub unique: bool,
}

impl PlacementConfig {
    /// Build the [`InterceptorBase`] for an interceptor of type `T`.
    pub fn base<T: ?Sized>(&self, default_phase: &str) -> InterceptorBase {
        let phase = self.phase.as_deref().unwrap_or(default_phase);
        let mut base = match &self.id {
            Some(id) => InterceptorBase::new(id.clone(), phase),
            None if self.unique => InterceptorBase::unique::<T>(phase),
            None => InterceptorBase::for_type::<T>(phase),
        };
        base.set_before(self.before.clone());
        base.set_after(self.after.clone());
        base
    }
}

fn parse_config<T: DeserializeOwned>(kind: &str, config: Value) -> Result<T, ChainError> {
    // A missing `config` deserializes like an empty object.
    let config = if config.is_null() {
        Value::Object(Default::default())
    } else {
        config
    };

    serde_json::from_value(config).map_err(|e| {
        let err = ChainError::InterceptorError(format!("Invalid {kind} interceptor config: {e}"));
        error_fmt!("Interceptor", "{}", err);
        err
    })
}

macro_rules! delegate_placement {
    () => {
        fn id(&self) -> &str {
            self.base.id()
        }

        fn phase(&self) -> &str {
            self.base.phase()
        }

        fn before(&self) -> &BTreeSet<String> {
            self.base.before()
        }

        fn after(&self) -> &BTreeSet<String> {
            self.base.after()
        }
    };
}

/// Configuration for a logging interceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingInterceptorConfig {
    #[serde(flatten)]
    pub placement: PlacementConfig,

    /// Log level to use
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to log message properties
    #[serde(default = "default_true")]
    pub log_properties: bool,

    /// Overrides `bus.logging.include_message_context` for this interceptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_message_context: Option<bool>,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl Default for LoggingInterceptorConfig {
    fn default() -> Self {
        Self {
            placement: PlacementConfig::default(),
            level: default_log_level(),
            log_properties: true,
            include_message_context: None,
        }
    }
}

/// Logs every message passing through its phase.
#[derive(Debug)]
pub struct LoggingInterceptor {
    base: InterceptorBase,
    config: LoggingInterceptorConfig,
}

impl Default for LoggingInterceptor {
    fn default() -> Self {
        Self::new(LoggingInterceptorConfig::default())
    }
}

impl LoggingInterceptor {
    pub fn new(config: LoggingInterceptorConfig) -> Self {
        Self {
            base: config.placement.base::<Self>(names::PRE_STREAM),
            config,
        }
    }

    fn level(&self) -> Level {
        match self.config.level.to_lowercase().as_str() {
            "error" => Level::Error,
            "warn" => Level::Warn,
            "info" => Level::Info,
            "trace" => Level::Trace,
            _ => Level::Debug,
        }
    }

    fn log(&self, line: &str) {
        match self.level() {
            Level::Error => error_fmt!("LoggingInterceptor", "{}", line),
            Level::Warn => warn_fmt!("LoggingInterceptor", "{}", line),
            Level::Info => info_fmt!("LoggingInterceptor", "{}", line),
            Level::Debug => debug_fmt!("LoggingInterceptor", "{}", line),
            Level::Trace => trace_fmt!("LoggingInterceptor", "{}", line),
        }
    }

    fn include_context(&self) -> bool {
        self.config
            .include_message_context
            .unwrap_or_else(crate::logging::include_message_context)
    }

    /// One line summarising the message, properties sorted by key.
    ///
    /// Direction and message id lead the line unless message context is
    /// switched off.
    pub fn describe(&self, message: &Message) -> String {
        let mut line = if self.include_context() {
            format!("{} message {}", message.direction(), message.id())
        } else {
            "message".to_string()
        };
        if self.config.log_properties && !message.properties.is_empty() {
            let properties: BTreeMap<&String, &Value> = message.properties.iter().collect();
            let rendered: Vec<String> = properties
                .into_iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect();
            line.push_str(&format!(" [{}]", rendered.join(", ")));
        }
        line
    }
}

impl PhaseInterceptor for LoggingInterceptor {
    delegate_placement!();

    fn handle_message(
        &self,
        message: &mut Message,
        _chain: &mut PhaseInterceptorChain,
    ) -> Result<(), Fault> {
        let line = self.describe(message);
        if crate::logging::is_structured_logging() {
            let logger = if self.include_context() {
                let info = MessageInfo::new(message, self.base.id());
                structured::with_message_context(&slog_scope::logger(), &info)
            } else {
                slog_scope::logger()
            };
            slog::info!(logger, "{}", line);
        } else {
            self.log(&format!(">> {line}"));
        }
        Ok(())
    }

    fn handle_fault(&self, message: &mut Message) {
        if let Some(fault) = message.fault() {
            warn_fmt!(
                "LoggingInterceptor",
                "<< {} faulted: {}",
                self.describe(message),
                fault
            );
        }
    }
}

/// Configuration for a property interceptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropertyInterceptorConfig {
    #[serde(flatten)]
    pub placement: PlacementConfig,

    /// Properties to add or replace
    #[serde(default)]
    pub set: BTreeMap<String, Value>,

    /// Properties to remove
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Sets and removes message properties.
#[derive(Debug)]
pub struct PropertyInterceptor {
    base: InterceptorBase,
    config: PropertyInterceptorConfig,
}

impl PropertyInterceptor {
    pub fn new(config: PropertyInterceptorConfig) -> Self {
        Self {
            base: config.placement.base::<Self>(names::USER_LOGICAL),
            config,
        }
    }
}

impl PhaseInterceptor for PropertyInterceptor {
    delegate_placement!();

    fn handle_message(
        &self,
        message: &mut Message,
        _chain: &mut PhaseInterceptorChain,
    ) -> Result<(), Fault> {
        for key in &self.config.remove {
            message.properties.remove(key);
        }
        for (key, value) in &self.config.set {
            message.put(key.clone(), value.clone());
        }
        trace_fmt!(
            "PropertyInterceptor",
            "Applied {} set / {} remove to message {}",
            self.config.set.len(),
            self.config.remove.len(),
            message.id()
        );
        Ok(())
    }
}

/// Configuration for a timing interceptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingInterceptorConfig {
    #[serde(flatten)]
    pub placement: PlacementConfig,

    /// Property receiving the RFC 3339 start time
    #[serde(default = "default_started_property")]
    pub started_property: String,

    /// Property receiving the elapsed milliseconds once the chain finishes
    #[serde(default = "default_elapsed_property")]
    pub elapsed_property: String,
}

fn default_started_property() -> String {
    "sluice.started_at".to_string()
}

fn default_elapsed_property() -> String {
    "sluice.elapsed_ms".to_string()
}

impl Default for TimingInterceptorConfig {
    fn default() -> Self {
        Self {
            placement: PlacementConfig::default(),
            started_property: default_started_property(),
            elapsed_property: default_elapsed_property(),
        }
    }
}

/// Stamps the start time and records the elapsed time when the chain
/// completes or faults.
#[derive(Debug)]
pub struct TimingInterceptor {
    base: InterceptorBase,
    config: TimingInterceptorConfig,
}

impl Default for TimingInterceptor {
    fn default() -> Self {
        Self::new(TimingInterceptorConfig::default())
    }
}

impl TimingInterceptor {
    pub fn new(config: TimingInterceptorConfig) -> Self {
        Self {
            base: config.placement.base::<Self>(names::PRE_STREAM),
            config,
        }
    }
}

impl PhaseInterceptor for TimingInterceptor {
    delegate_placement!();

    fn handle_message(
        &self,
        message: &mut Message,
        chain: &mut PhaseInterceptorChain,
    ) -> Result<(), Fault> {
        let started = Utc::now();
        message.put(
            self.config.started_property.clone(),
            Value::String(started.to_rfc3339()),
        );

        let property = self.config.elapsed_property.clone();
        chain.push_cleanup(move |message: &mut Message, state: ChainState| {
            let elapsed = (Utc::now() - started).num_milliseconds().max(0);
            message.put(property, Value::from(elapsed));
            debug_fmt!(
                "TimingInterceptor",
                "Message {} finished as {} after {}ms",
                message.id(),
                state,
                elapsed
            );
        });
        Ok(())
    }
}

/// Factory for creating interceptors from configuration.
#[derive(Debug)]
pub struct InterceptorFactory;

impl InterceptorFactory {
    /// Create an interceptor from its type name and configuration.
    ///
    /// Registered types take precedence over the built-in ones.
    pub fn create_interceptor(
        interceptor_type: &str,
        config: Value,
    ) -> Result<Arc<dyn PhaseInterceptor>, ChainError> {
        debug_fmt!(
            "Interceptor",
            "Creating interceptor of type '{}' with config: {}",
            interceptor_type,
            config
        );

        if let Some(ctor) = get_registered_interceptor(interceptor_type) {
            return ctor(config);
        }

        match interceptor_type {
            "logging" => Ok(Arc::new(LoggingInterceptor::new(parse_config(
                interceptor_type,
                config,
            )?))),
            "property" => Ok(Arc::new(PropertyInterceptor::new(parse_config(
                interceptor_type,
                config,
            )?))),
            "timing" => Ok(Arc::new(TimingInterceptor::new(parse_config(
                interceptor_type,
                config,
            )?))),
            _ => {
                let err = ChainError::InterceptorError(format!(
                    "Unknown interceptor type: {interceptor_type}"
                ));
                error_fmt!("Interceptor", "{}", err);
                Err(err)
            }
        }
    }
}
