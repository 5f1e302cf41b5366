// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Environment variable-based configuration provider implementation.
//!
//! `SLUICE_BUS_NAME=orders` becomes `bus.name`.  Underscores and dots are
//! interchangeable in lookups, so `SLUICE_BUS_IN_INTERCEPTORS` answers the
//! key `bus.in_interceptors`.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::env;

use super::ConfigError;
use super::ConfigProvider;

/// Configuration provider that retrieves values from environment variables.
#[derive(Debug)]
pub struct EnvConfigProvider {
    /// Prefix for environment variables (e.g., "SLUICE_").
    prefix: String,
    /// Matching variables keyed by their normalized key.
    cache: HashMap<String, String>,
}

impl EnvConfigProvider {
    pub fn new(prefix: &str) -> Self {
        let mut provider = Self {
            prefix: prefix.to_string(),
            cache: HashMap::new(),
        };
        provider.refresh_cache();
        provider
    }

    /// Re-read the process environment.
    pub fn refresh_cache(&mut self) {
        self.cache = env::vars()
            .filter_map(|(key, value)| {
                key.strip_prefix(self.prefix.as_str())
                    .map(|rest| (Self::normalize(rest), value))
            })
            .collect();
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn normalize(key: &str) -> String {
        key.to_lowercase().replace('_', ".")
    }

    /// Parse a string value into a JSON Value: JSON first, then bool and
    /// numbers, falling back to a plain string.
    fn parse_value_to_json(value: &str) -> Value {
        if let Ok(json_value) = serde_json::from_str(value) {
            return json_value;
        }

        if value.eq_ignore_ascii_case("true") {
            return json!(true);
        } else if value.eq_ignore_ascii_case("false") {
            return json!(false);
        }

        if let Ok(int_val) = value.parse::<i64>() {
            return json!(int_val);
        }
        if let Ok(float_val) = value.parse::<f64>() {
            return json!(float_val);
        }

        json!(value)
    }
}

impl Default for EnvConfigProvider {
    fn default() -> Self {
        Self::new("SLUICE_")
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self
            .cache
            .get(&Self::normalize(key))
            .map(|value| Self::parse_value_to_json(value)))
    }

    fn has(&self, key: &str) -> bool {
        self.cache.contains_key(&Self::normalize(key))
    }

    fn provider_name(&self) -> &str {
        "env"
    }
}
