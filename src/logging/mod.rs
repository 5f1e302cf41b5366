// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Logging utilities for Sluice.
//!
//! Library code logs through the `log` facade with the `*_fmt!` macros from
//! [`wrapper`].  Binaries pick the backend once at startup: plain
//! `env_logger`, or a `slog` root logger bridged from `log` by `slog-stdlog`.

pub mod config;
pub mod structured;
pub mod wrapper;

#[cfg(test)]
pub mod test_logger;

#[cfg(test)]
mod tests;

use log::LevelFilter;
use once_cell::sync::OnceCell;
use slog_scope::GlobalLoggerGuard;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::logging::config::LoggingConfig;

static INIT: Once = Once::new();
static USING_STRUCTURED: AtomicBool = AtomicBool::new(false);
static SLOG_GUARD: OnceCell<GlobalLoggerGuard> = OnceCell::new();
static INCLUDE_MESSAGE_CONTEXT: AtomicBool = AtomicBool::new(true);

fn level_name(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Trace => "trace",
        LevelFilter::Debug => "debug",
        LevelFilter::Info => "info",
        LevelFilter::Warn => "warn",
        LevelFilter::Error => "error",
        LevelFilter::Off => "off",
    }
}

/// Parse a level name, defaulting to `info`.
pub fn parse_level(name: &str) -> LevelFilter {
    name.parse().unwrap_or(LevelFilter::Info)
}

/// Initialize `env_logger` with the specified level.  `RUST_LOG` wins.
///
/// Only the first call has an effect.
pub fn init(level: Option<LevelFilter>) {
    INIT.call_once(|| {
        let env = env_logger::Env::default()
            .filter_or("RUST_LOG", level.map_or("info", level_name));

        // Another logger may already be installed (tests, embedding apps).
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_target(true)
            .try_init();

        crate::info_fmt!("Logging", "Logging initialized at level: {}", log::max_level());
    });
}

/// Initialize logging according to `config`.
///
/// With `structured: true` a `slog` logger (terminal or JSON, asynchronous)
/// becomes the global `slog-scope` logger and the `log` facade is bridged
/// into it.  Otherwise this is [`init`].
pub fn init_with_config(level: LevelFilter, config: &LoggingConfig) {
    if !config.structured {
        init(Some(level));
        return;
    }

    INIT.call_once(|| {
        let logger = structured::create_logger(&config.to_logger_config());
        let _ = SLOG_GUARD.set(slog_scope::set_global_logger(logger));

        if slog_stdlog::init_with_level(level.to_level().unwrap_or(log::Level::Error)).is_ok() {
            log::set_max_level(level);
            USING_STRUCTURED.store(true, Ordering::SeqCst);
        }

        crate::info_fmt!("Logging", "Structured logging initialized ({})", config.format);
    });
}

/// Whether the `slog` backend is active.
pub fn is_structured_logging() -> bool {
    USING_STRUCTURED.load(Ordering::SeqCst)
}

/// Set whether message log lines carry the message id, direction and
/// structured context fields.  Logging interceptors without their own
/// setting follow this value.
pub fn set_include_message_context(include: bool) {
    INCLUDE_MESSAGE_CONTEXT.store(include, Ordering::SeqCst);
}

pub fn include_message_context() -> bool {
    INCLUDE_MESSAGE_CONTEXT.load(Ordering::SeqCst)
}
