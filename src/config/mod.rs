//! Typed configuration from environment variables.
//!
//! Loads once at startup. Sensitive values wrapped in secrecy::SecretString
//! to prevent log leaks. Service addresses live in a [`ServiceMap`] that is
//! handed to whatever needs to dial out; nothing here is process-global.

use std::collections::BTreeMap;
use std::path::Path;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::classify::sentiment::DEFAULT_MODEL;
use crate::error::{Error, Result};

/// Logical name of the storage service.
pub const STORAGE_SERVICE: &str = "storage-service";
/// Logical name of the categorising service.
pub const CATEGORISING_SERVICE: &str = "categorising-service";

#[derive(Debug)]
pub struct Config {
    /// Only the categorising service needs this.
    pub anthropic_api_key: Option<SecretString>,
    pub classifier_model: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub services: ServiceMap,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut services = match optional_var("INTAKE_SERVICES_FILE") {
            Some(path) => ServiceMap::load(path)?,
            None => ServiceMap::default(),
        };
        if let Some(addr) = optional_var("STORAGE_SERVICE_ADDR") {
            services.insert(STORAGE_SERVICE, addr);
        }
        if let Some(addr) = optional_var("CATEGORISING_SERVICE_ADDR") {
            services.insert(CATEGORISING_SERVICE, addr);
        }

        Ok(Self {
            anthropic_api_key: optional_var("ANTHROPIC_API_KEY").map(SecretString::from),
            classifier_model: optional_var("CLASSIFIER_MODEL")
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            services,
        })
    }

    /// The API key, or a configuration error naming the missing variable.
    pub fn require_api_key(&self) -> Result<&SecretString> {
        self.anthropic_api_key.as_ref().ok_or_else(|| {
            Error::Config("required environment variable ANTHROPIC_API_KEY is not set".to_string())
        })
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Logical service name → base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceMap(BTreeMap<String, String>);

impl Default for ServiceMap {
    fn default() -> Self {
        Self::empty()
            .with(STORAGE_SERVICE, "http://storage-service:8080")
            .with(CATEGORISING_SERVICE, "http://categorising-service:8080")
    }
}

#[derive(Deserialize)]
struct ServicesFile {
    #[serde(default)]
    services: BTreeMap<String, String>,
}

impl ServiceMap {
    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, name: impl Into<String>, addr: impl Into<String>) -> Self {
        self.insert(name, addr);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, addr: impl Into<String>) {
        self.0.insert(name.into(), addr.into());
    }

    /// Base URL for `name`, without a trailing slash.
    pub fn address(&self, name: &str) -> Result<&str> {
        self.0
            .get(name)
            .map(|addr| addr.trim_end_matches('/'))
            .ok_or_else(|| Error::Config(format!("no address configured for {name}")))
    }

    /// Parse a `[services]` table. Entries override the defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let file: ServicesFile = toml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid services file: {e}")))?;
        let mut map = Self::default();
        map.0.extend(file.services);
        Ok(map)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read services file {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }
}
