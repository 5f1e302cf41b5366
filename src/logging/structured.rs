// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Structured logging for Sluice.
//!
//! Builds `slog` loggers with terminal or JSON output and attaches message
//! context (trace id, message id, direction, chain) to child loggers.

use chrono::{DateTime, Utc};
use slog::{Drain, Logger, o};
use slog_async::Async;
use slog_json::Json;
use slog_term::{FullFormat, TermDecorator};
use std::io;
use uuid::Uuid;

use crate::core::Message;

/// Structured logging format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable terminal output
    Terminal,
    /// JSON formatted output
    Json,
}

/// Structured logger configuration
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub format: LogFormat,
    pub level: slog::Level,
    /// Key-value pairs included in every record
    pub static_fields: Vec<(String, String)>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Terminal,
            level: slog::Level::Info,
            static_fields: Vec::new(),
        }
    }
}

/// Create a structured logger with the given configuration.
pub fn create_logger(config: &LoggerConfig) -> Logger {
    let logger = match config.format {
        LogFormat::Terminal => {
            let decorator = TermDecorator::new().build();
            let drain = FullFormat::new(decorator).build().fuse();
            let drain = drain.filter_level(config.level).fuse();
            Logger::root(Async::new(drain).build().fuse(), o!())
        }
        LogFormat::Json => {
            let drain = Json::new(io::stdout()).add_default_keys().build().fuse();
            let drain = drain.filter_level(config.level).fuse();
            Logger::root(Async::new(drain).build().fuse(), o!())
        }
    };

    config.static_fields.iter().fold(logger, |logger, (key, value)| {
        // slog keys are static; loggers are built once per process.
        let key: &'static str = Box::leak(key.clone().into_boxed_str());
        logger.new(o!(key => value.clone()))
    })
}

/// Generate a new trace ID
pub fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

/// Context of one message passing through a chain.
#[derive(Debug, Clone)]
pub struct MessageInfo {
    /// Unique id for this pass through a chain
    pub trace_id: String,
    pub message_id: String,
    pub direction: String,
    /// Name of the bus or endpoint driving the chain
    pub chain: String,
    pub started_at: DateTime<Utc>,
}

impl MessageInfo {
    pub fn new(message: &Message, chain: impl Into<String>) -> Self {
        Self {
            trace_id: generate_trace_id(),
            message_id: message.id().to_string(),
            direction: message.direction().to_string(),
            chain: chain.into(),
            started_at: Utc::now(),
        }
    }

    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds().max(0)
    }
}

/// Create a child logger carrying message context.
pub fn with_message_context(logger: &Logger, info: &MessageInfo) -> Logger {
    logger.new(o!(
        "trace_id" => info.trace_id.clone(),
        "message_id" => info.message_id.clone(),
        "direction" => info.direction.clone(),
        "chain" => info.chain.clone(),
    ))
}

/// Keeps the global structured logger installed while alive.
pub struct LoggerGuard {
    _guard: slog_scope::GlobalLoggerGuard,
}

/// Install a structured logger as the global `slog-scope` logger.
pub fn init_global_logger(config: &LoggerConfig) -> LoggerGuard {
    let guard = slog_scope::set_global_logger(create_logger(config));
    LoggerGuard { _guard: guard }
}
