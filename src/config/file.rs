// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! File-based configuration provider implementation.

use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

use super::ConfigError;
use super::ConfigProvider;

/// Supported file formats for configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// JSON format (.json)
    Json,
    /// TOML format (.toml)
    Toml,
    /// YAML format (.yaml, .yml)
    Yaml,
}

impl FileFormat {
    /// Detect the file format from the file extension.
    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension().and_then(|ext| {
            match ext.to_string_lossy().to_lowercase().as_str() {
                "json" => Some(FileFormat::Json),
                "toml" => Some(FileFormat::Toml),
                "yaml" | "yml" => Some(FileFormat::Yaml),
                _ => None,
            }
        })
    }

    /// Parse `content` into a JSON object.
    pub fn parse(self, content: &str) -> Result<Map<String, Value>, ConfigError> {
        match self {
            FileFormat::Json => {
                let value: Value = serde_json::from_str(content)
                    .map_err(|e| ConfigError::provider_error("file", format!("invalid JSON: {e}")))?;
                Self::into_object(value)
            }
            FileFormat::Toml => {
                let value: toml::Value = toml::from_str(content)
                    .map_err(|e| ConfigError::provider_error("file", format!("invalid TOML: {e}")))?;
                Self::convert(value, "TOML")
            }
            FileFormat::Yaml => {
                let value: serde_yaml::Value = serde_yaml::from_str(content)
                    .map_err(|e| ConfigError::provider_error("file", format!("invalid YAML: {e}")))?;
                Self::convert(value, "YAML")
            }
        }
    }

    fn convert<T: Serialize>(value: T, name: &str) -> Result<Map<String, Value>, ConfigError> {
        let value = serde_json::to_value(value).map_err(|e| {
            ConfigError::provider_error("file", format!("failed to convert {name}: {e}"))
        })?;
        Self::into_object(value)
    }

    fn into_object(value: Value) -> Result<Map<String, Value>, ConfigError> {
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(ConfigError::provider_error(
                "file",
                "root configuration must be an object",
            )),
        }
    }
}

/// File-based configuration provider.
#[derive(Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
    format: FileFormat,
    data: Map<String, Value>,
}

impl FileConfigProvider {
    /// Read and parse the file; the format comes from the extension.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        let path = PathBuf::from(path);
        let format = FileFormat::from_extension(&path)
            .ok_or_else(|| ConfigError::provider_error("file", "unsupported file format"))?;

        let content = fs::read_to_string(&path).map_err(|e| {
            ConfigError::provider_error("file", format!("failed to read {}: {e}", path.display()))
        })?;
        let data = format.parse(&content)?;

        Ok(Self { path, format, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    /// Walk a dot-separated key path.  Numeric segments index arrays.
    fn get_nested_value(&self, key_path: &str) -> Option<&Value> {
        let mut parts = key_path.split('.');
        let mut current = self.data.get(parts.next()?)?;

        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }

        Some(current)
    }
}

impl ConfigProvider for FileConfigProvider {
    fn has(&self, key: &str) -> bool {
        self.get_nested_value(key).is_some()
    }

    fn provider_name(&self) -> &str {
        "file"
    }

    fn get_raw(&self, key: &str) -> Result<Option<Value>, ConfigError> {
        Ok(self.get_nested_value(key).cloned())
    }
}
