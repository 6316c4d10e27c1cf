//! Configuration Module
//!
//! Loads the `Azure:Cosmos` settings from environment variables, an arbitrary
//! lookup function, or a JSON settings document.

use std::env;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

// == Setting Names ==
const ENDPOINT_KEY: &str = "Azure:Cosmos:Endpoint";
const ACCOUNT_KEY_KEY: &str = "Azure:Cosmos:AccountKey";
const DATABASE_NAME_KEY: &str = "Azure:Cosmos:DatabaseName";
const ENSURE_KEY: &str = "Azure:Cosmos:EnsureDatabaseOnFirstUse";

/// Cosmos connection settings resolved once at startup.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Account endpoint, e.g. `https://acct.documents.azure.com:443/`
    pub endpoint: String,
    /// Account key used to open clients
    pub account_key: String,
    /// Database used when a caller does not name one
    pub database_name: String,
    /// Provision the database the first time a handle is created
    #[serde(default = "default_ensure_database")]
    pub ensure_database_on_first_use: bool,
}

fn default_ensure_database() -> bool {
    true
}

impl Config {
    /// Creates a config with `ensure_database_on_first_use` enabled.
    pub fn new(
        endpoint: impl Into<String>,
        account_key: impl Into<String>,
        database_name: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            account_key: account_key.into(),
            database_name: database_name.into(),
            ensure_database_on_first_use: true,
        }
    }

    /// Sets whether databases are provisioned on first use.
    pub fn with_ensure_database_on_first_use(mut self, ensure: bool) -> Self {
        self.ensure_database_on_first_use = ensure;
        self
    }

    /// Loads the config from environment variables.
    ///
    /// # Environment Variables
    /// - `AZURE_COSMOS_ENDPOINT` - Account endpoint (required)
    /// - `AZURE_COSMOS_ACCOUNT_KEY` - Account key (required)
    /// - `AZURE_COSMOS_DATABASE_NAME` - Default database (required)
    /// - `AZURE_COSMOS_ENSURE_DATABASE_ON_FIRST_USE` - `true`/`false` (default: true)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(env_var_name(name)).ok())
    }

    /// Loads the config through `lookup`, which receives setting names such
    /// as `Azure:Cosmos:Endpoint`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| Error::Config(format!("{name} is required")))
        };

        let ensure_database_on_first_use = match lookup(ENSURE_KEY) {
            Some(raw) => parse_bool(ENSURE_KEY, &raw)?,
            None => default_ensure_database(),
        };

        Ok(Self {
            endpoint: required(ENDPOINT_KEY)?,
            account_key: required(ACCOUNT_KEY_KEY)?,
            database_name: required(DATABASE_NAME_KEY)?,
            ensure_database_on_first_use,
        })
    }

    /// Loads the config from the `Azure.Cosmos` section of a JSON settings
    /// document.
    pub fn from_json(json: &str) -> Result<Self> {
        let document: Value = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid settings document: {e}")))?;

        let section = document
            .get("Azure")
            .and_then(|azure| azure.get("Cosmos"))
            .cloned()
            .ok_or_else(|| Error::Config("Azure:Cosmos section is required".to_string()))?;

        let config: Config = serde_json::from_value(section)
            .map_err(|e| Error::Config(format!("invalid Azure:Cosmos section: {e}")))?;
        config.validate()
    }

    /// Rejects blank required values.
    pub fn validate(self) -> Result<Self> {
        for (name, value) in [
            (ENDPOINT_KEY, &self.endpoint),
            (ACCOUNT_KEY_KEY, &self.account_key),
            (DATABASE_NAME_KEY, &self.database_name),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{name} is required")));
            }
        }
        Ok(self)
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("endpoint", &self.endpoint)
            .field("account_key", &"<redacted>")
            .field("database_name", &self.database_name)
            .field(
                "ensure_database_on_first_use",
                &self.ensure_database_on_first_use,
            )
            .finish()
    }
}

/// `Azure:Cosmos:AccountKey` -> `AZURE_COSMOS_ACCOUNT_KEY`
fn env_var_name(setting: &str) -> String {
    let mut name = String::with_capacity(setting.len() + 8);
    let mut prev: Option<char> = None;
    for ch in setting.chars() {
        if ch == ':' {
            name.push('_');
        } else {
            if ch.is_ascii_uppercase() && matches!(prev, Some(p) if p.is_ascii_lowercase()) {
                name.push('_');
            }
            name.push(ch.to_ascii_uppercase());
        }
        prev = Some(ch);
    }
    name
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(Error::Config(format!(
            "{name} must be a boolean, got '{other}'"
        ))),
    }
}
