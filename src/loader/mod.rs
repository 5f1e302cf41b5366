// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! High-level entry-point – "turn the key and go".
//!
//! The [`SluiceLoader`] consumes configuration, builds the phase manager,
//! instantiates the configured interceptors into the bus and endpoint
//! provider lists and returns a [`Bus`] whose chains are known to build.


use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, ConfigError, ConfigProvider, EnvConfigProvider, FileConfigProvider};
use crate::core::{ChainError, Direction, Message, PhaseInterceptor};
use crate::interceptor::{InterceptorList, InterceptorProvider};
use crate::interceptors::InterceptorDefinition;
use crate::logging::{self, config::LoggingConfig};
use crate::observer::{ChainInitiator, Invocation};
use crate::phase::{PhaseManager, PhasesConfig};
use crate::{debug_fmt, error_fmt, info_fmt};

/// Errors that can occur while loading a bus.
#[derive(Error, Debug)]
pub enum LoaderError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(#[from] ConfigError),

    /// An interceptor or chain could not be built
    #[error("chain error: {0}")]
    ChainError(#[from] ChainError),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// The four interceptor lists of one configuration layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterceptorListsConfig {
    #[serde(default)]
    pub in_interceptors: Vec<InterceptorDefinition>,
    #[serde(default)]
    pub out_interceptors: Vec<InterceptorDefinition>,
    #[serde(default)]
    pub in_fault_interceptors: Vec<InterceptorDefinition>,
    #[serde(default)]
    pub out_fault_interceptors: Vec<InterceptorDefinition>,
}

impl InterceptorListsConfig {
    /// Instantiate every definition into a new provider.
    pub fn to_provider(&self) -> Result<InterceptorProvider, ChainError> {
        let provider = InterceptorProvider::new();
        for (definitions, list) in [
            (&self.in_interceptors, provider.in_interceptors()),
            (&self.out_interceptors, provider.out_interceptors()),
            (&self.in_fault_interceptors, provider.in_fault_interceptors()),
            (&self.out_fault_interceptors, provider.out_fault_interceptors()),
        ] {
            Self::fill(list, definitions)?;
        }
        Ok(provider)
    }

    fn fill(list: &InterceptorList, definitions: &[InterceptorDefinition]) -> Result<(), ChainError> {
        let interceptors = definitions
            .iter()
            .map(InterceptorDefinition::create)
            .collect::<Result<Vec<_>, _>>()?;
        list.extend(interceptors);
        Ok(())
    }
}

/// A named endpoint as it appears under `endpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(flatten)]
    pub interceptors: InterceptorListsConfig,
}

/// An endpoint: its own provider lists layered after the bus lists.
#[derive(Debug)]
pub struct Endpoint {
    name: String,
    provider: Arc<InterceptorProvider>,
    initiator: ChainInitiator,
}

impl Endpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &Arc<InterceptorProvider> {
        &self.provider
    }

    pub fn initiator(&self) -> &ChainInitiator {
        &self.initiator
    }

    /// Drive a message through this endpoint's chain.
    pub fn on_message(&self, message: Message) -> Result<Invocation, ChainError> {
        self.initiator.on_message(message)
    }
}

fn check_chains(initiator: &ChainInitiator) -> Result<(), ChainError> {
    for direction in [Direction::Inbound, Direction::Outbound] {
        initiator.chain(direction)?;
        initiator.fault_observer().fault_chain(direction)?;
    }
    Ok(())
}

/// A loaded bus: phases, bus-scoped interceptors and endpoints.
#[derive(Debug)]
pub struct Bus {
    name: String,
    config: Arc<Config>,
    phases: PhaseManager,
    provider: Arc<InterceptorProvider>,
    initiator: ChainInitiator,
    endpoints: Vec<Endpoint>,
}

impl Bus {
    /// Create a new loader for initializing a bus.
    pub fn loader() -> SluiceLoader {
        SluiceLoader::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn phase_manager(&self) -> &PhaseManager {
        &self.phases
    }

    /// Bus-scoped interceptor lists.  Changes apply to the next message.
    pub fn provider(&self) -> &Arc<InterceptorProvider> {
        &self.provider
    }

    /// Drives messages through the bus lists only.
    pub fn initiator(&self) -> &ChainInitiator {
        &self.initiator
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn endpoint(&self, name: &str) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.name == name)
    }

    /// Drive a message through the bus lists.
    pub fn on_message(&self, message: Message) -> Result<Invocation, ChainError> {
        self.initiator.on_message(message)
    }
}

/// Builder for initializing and configuring a [`Bus`].
#[derive(Debug, Default)]
pub struct SluiceLoader {
    config: Option<Config>,
    config_file_path: Option<String>,
    use_env_vars: bool,
    env_prefix: Option<String>,
    providers: Vec<Arc<dyn ConfigProvider>>,
    in_interceptors: Vec<Arc<dyn PhaseInterceptor>>,
    out_interceptors: Vec<Arc<dyn PhaseInterceptor>>,
    skip_logging: bool,
}

impl SluiceLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Read a JSON, TOML or YAML configuration file.
    pub fn with_config_file(mut self, file_path: &str) -> Self {
        self.config_file_path = Some(file_path.to_string());
        self
    }

    /// Layer `SLUICE_*` environment variables over the file.
    pub fn with_env_vars(mut self) -> Self {
        self.use_env_vars = true;
        self
    }

    /// Set a custom prefix for environment variables (default is "SLUICE_").
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_string());
        self.use_env_vars = true;
        self
    }

    /// Add a configuration provider on top of everything else.
    pub fn with_provider<P: ConfigProvider + 'static>(mut self, provider: P) -> Self {
        self.providers.push(Arc::new(provider));
        self
    }

    /// Append an interceptor to the bus inbound list.
    pub fn with_in_interceptor(mut self, interceptor: Arc<dyn PhaseInterceptor>) -> Self {
        self.in_interceptors.push(interceptor);
        self
    }

    /// Append an interceptor to the bus outbound list.
    pub fn with_out_interceptor(mut self, interceptor: Arc<dyn PhaseInterceptor>) -> Self {
        self.out_interceptors.push(interceptor);
        self
    }

    /// Leave logging setup to the caller.
    pub fn without_logging(mut self) -> Self {
        self.skip_logging = true;
        self
    }

    fn assemble_config(&mut self) -> Result<Config, LoaderError> {
        let mut builder = match self.config.take() {
            Some(config) => config.to_builder(),
            None => Config::builder(),
        };

        if let Some(file_path) = &self.config_file_path {
            builder = builder.with_provider(FileConfigProvider::new(file_path)?);
        }

        if self.use_env_vars {
            builder = builder.with_provider(match &self.env_prefix {
                Some(prefix) => EnvConfigProvider::new(prefix),
                None => EnvConfigProvider::default(),
            });
        }

        for provider in self.providers.drain(..) {
            builder = builder.with_shared_provider(provider);
        }

        Ok(builder.build())
    }

    /// Build the bus.
    ///
    /// Every chain of the bus and its endpoints is built once, so unknown
    /// phases and ordering cycles fail here rather than on the first message.
    pub fn build(mut self) -> Result<Bus, LoaderError> {
        let config = Arc::new(self.assemble_config()?);

        let logging_config: LoggingConfig = config.get_or_default("bus.logging", LoggingConfig::default())?;
        if config.has("bus.logging") {
            logging::set_include_message_context(logging_config.include_message_context);
        }
        if !self.skip_logging {
            logging::init_with_config(logging::parse_level(&logging_config.level), &logging_config);
        }

        let name: String = config.get_or_default("bus.name", "sluice".to_string())?;
        info_fmt!("Loader", "Loading bus '{}'", name);

        let phases_config: PhasesConfig = config.get_or_default("bus.phases", PhasesConfig::default())?;
        let phases = PhaseManager::from_config(&phases_config)?;

        let bus_lists = InterceptorListsConfig {
            in_interceptors: config.get_or_default("bus.in_interceptors", Vec::new())?,
            out_interceptors: config.get_or_default("bus.out_interceptors", Vec::new())?,
            in_fault_interceptors: config.get_or_default("bus.in_fault_interceptors", Vec::new())?,
            out_fault_interceptors: config.get_or_default("bus.out_fault_interceptors", Vec::new())?,
        };
        let provider = bus_lists.to_provider()?;
        provider.in_interceptors().extend(self.in_interceptors.drain(..));
        provider.out_interceptors().extend(self.out_interceptors.drain(..));
        let provider = Arc::new(provider);

        let initiator = ChainInitiator::new(name.clone(), phases.clone(), vec![provider.clone()]);
        check_chains(&initiator).inspect_err(|e| error_fmt!("Loader", "Bus '{}': {}", name, e))?;

        let endpoint_configs: Vec<EndpointConfig> = config.get_or_default("endpoints", Vec::new())?;
        let mut seen = HashSet::new();
        let mut endpoints = Vec::with_capacity(endpoint_configs.len());
        for endpoint_config in endpoint_configs {
            if !seen.insert(endpoint_config.name.clone()) {
                return Err(ConfigError::InvalidValue {
                    key: "endpoints".to_string(),
                    message: format!("duplicate endpoint '{}'", endpoint_config.name),
                }
                .into());
            }

            let endpoint_provider = Arc::new(endpoint_config.interceptors.to_provider()?);
            let endpoint_initiator = ChainInitiator::new(
                format!("{}/{}", name, endpoint_config.name),
                phases.clone(),
                vec![provider.clone(), endpoint_provider.clone()],
            );
            check_chains(&endpoint_initiator).inspect_err(|e| {
                error_fmt!("Loader", "Endpoint '{}': {}", endpoint_config.name, e)
            })?;

            debug_fmt!("Loader", "Loaded endpoint '{}'", endpoint_config.name);
            endpoints.push(Endpoint {
                name: endpoint_config.name,
                provider: endpoint_provider,
                initiator: endpoint_initiator,
            });
        }

        info_fmt!(
            "Loader",
            "Bus '{}' loaded with {} endpoint(s)",
            name,
            endpoints.len()
        );

        Ok(Bus {
            name,
            config,
            phases,
            provider,
            initiator,
            endpoints,
        })
    }
}
