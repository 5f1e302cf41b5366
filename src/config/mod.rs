// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sluice configuration subsystem
//!
//! A bus is created from an ordered list of [`ConfigProvider`]s; later
//! providers override earlier ones.  Typical stacking order:
//!
//! 1. `FileConfigProvider` – `sluice.{toml,json,yaml}`
//! 2. `EnvConfigProvider`  – `SLUICE_BUS_NAME=orders`
//! 3. *your* provider implementing [`ConfigProvider`]
//!
//! | key | type | default | description |
//! |-----|------|---------|-------------|
//! | `bus.name`                  | string | `"sluice"` | Bus name used in logs |
//! | `bus.logging`               | object | – | See [`LoggingConfig`](crate::logging::config::LoggingConfig) |
//! | `bus.phases.inbound`        | array  | built-in | `[{name, priority}]` inbound phase overrides |
//! | `bus.phases.outbound`       | array  | built-in | `[{name, priority}]` outbound phase overrides |
//! | `bus.in_interceptors`       | array  | `[]` | Interceptor definitions (`{type, config}`) |
//! | `bus.out_interceptors`      | array  | `[]` | |
//! | `bus.in_fault_interceptors` | array  | `[]` | |
//! | `bus.out_fault_interceptors`| array  | `[]` | |
//! | `endpoints`                 | array  | `[]` | Named endpoints with the same four lists |

mod env;
pub mod error;
mod file;


pub use env::EnvConfigProvider;
pub use error::ConfigError;
pub use file::{FileConfigProvider, FileFormat};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use std::sync::Arc;

/// Core configuration provider trait that all configuration sources must implement.
/// This trait is object-safe since it doesn't contain generic methods.
pub trait ConfigProvider: Debug + Send + Sync {
    /// Check if the configuration provider has a value for the given key.
    fn has(&self, key: &str) -> bool;

    /// Get the name of the configuration provider for debugging purposes.
    fn provider_name(&self) -> &str;

    /// Get a raw configuration value by dot-separated key.
    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError>;
}

fn deserialize<T: DeserializeOwned>(key: &str, value: Value) -> Result<T, ConfigError> {
    serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

/// Typed access on top of [`ConfigProvider`].
pub trait ConfigProviderExt: ConfigProvider {
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get_raw(key)?
            .map(|value| deserialize(key, value))
            .transpose()
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

/// Builder for the configuration system.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a configuration provider.  Providers added later win.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Add an already shared provider.
    pub fn with_shared_provider(mut self, provider: Arc<dyn ConfigProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> Config {
        Config {
            providers: self.providers,
        }
    }
}

/// Layered configuration over an ordered list of providers.
#[derive(Debug, Clone, Default)]
pub struct Config {
    providers: Vec<Arc<dyn ConfigProvider>>,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        for provider in self.providers.iter().rev() {
            if provider.has(key) {
                return provider.get_raw(key);
            }
        }
        Ok(None)
    }

    /// Get a value from the last provider that has the key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.get_raw(key)?
            .map(|value| deserialize(key, value))
            .transpose()
    }

    pub fn get_or_default<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Like [`get`](Self::get) but a missing key is an error.
    pub fn require<T: DeserializeOwned>(&self, key: &str) -> Result<T, ConfigError> {
        self.get(key)?
            .ok_or_else(|| ConfigError::NotFound(key.to_string()))
    }

    pub fn has(&self, key: &str) -> bool {
        self.providers.iter().any(|p| p.has(key))
    }

    /// Names of the providers, in priority order (lowest first).
    pub fn provider_names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.provider_name().to_string())
            .collect()
    }

    /// A builder holding this configuration's providers, for layering more on top.
    pub fn to_builder(&self) -> ConfigBuilder {
        ConfigBuilder {
            providers: self.providers.clone(),
        }
    }

    /// Configuration backed by a single file.
    pub fn default_file(file_path: &str) -> Result<Self, ConfigError> {
        let provider = FileConfigProvider::new(file_path)?;
        Ok(Self::builder().with_provider(provider).build())
    }
}
