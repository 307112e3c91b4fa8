//! Startup configuration: environment settings and the YAML rule file.
//!
//! Everything here is read once before the servers start; the resulting
//! rule chains are immutable for the life of the process.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::rules::{
    FailurePolicy, Guard, ReinvocationPolicy, Rule, RuleChains, RuleEngine, RuleSpec, Selector,
};
use crate::webhooks::policies::{BuiltRule, BuiltinRule, ChainKind};
use crate::webhooks::{WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT};

/// Home namespace of the server, injected through the downward API
pub const ENV_POD_NAMESPACE: &str = "POD_NAMESPACE";
/// Path of the YAML rule file
pub const ENV_CONFIG_PATH: &str = "ADMISSION_CONFIG";
pub const ENV_WEBHOOK_PORT: &str = "WEBHOOK_PORT";
pub const ENV_HEALTH_PORT: &str = "HEALTH_PORT";

pub const DEFAULT_CONFIG_PATH: &str = "/etc/admission-gate/rules.yaml";
pub const DEFAULT_WEBHOOK_PORT: u16 = WEBHOOK_PORT;
pub const DEFAULT_HEALTH_PORT: u16 = 8080;
/// Rule deadline when `timeoutMs` is omitted
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

/// Errors loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid rule file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid {var}={value:?}: expected a port number")]
    InvalidPort { var: String, value: String },

    #[error("{chain} rule with empty name")]
    EmptyName { chain: ChainKind },

    #[error("duplicate {chain} rule name {name:?}")]
    DuplicateRule { chain: ChainKind, name: String },

    #[error("rule {name:?} has a zero timeout")]
    ZeroTimeout { name: String },

    #[error("rule {name:?} of type {rule_type} cannot be registered in the {chain} chain")]
    WrongChain {
        name: String,
        rule_type: &'static str,
        chain: ChainKind,
    },

    #[error("rule {name:?} has an invalid pattern: {source}")]
    InvalidPattern { name: String, source: regex::Error },
}

/// Process settings taken from the environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub home_namespace: Option<String>,
    pub config_path: PathBuf,
    pub webhook_port: u16,
    pub health_port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            home_namespace: None,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            webhook_port: DEFAULT_WEBHOOK_PORT,
            health_port: DEFAULT_HEALTH_PORT,
            cert_path: PathBuf::from(WEBHOOK_CERT_PATH),
            key_path: PathBuf::from(WEBHOOK_KEY_PATH),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build settings from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let port = |var: &str, default: u16| -> Result<u16, ConfigError> {
            match lookup(var) {
                Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidPort {
                    var: var.to_string(),
                    value,
                }),
                None => Ok(default),
            }
        };

        Ok(Self {
            home_namespace: lookup(ENV_POD_NAMESPACE).filter(|ns| !ns.is_empty()),
            config_path: lookup(ENV_CONFIG_PATH)
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            webhook_port: port(ENV_WEBHOOK_PORT, defaults.webhook_port)?,
            health_port: port(ENV_HEALTH_PORT, defaults.health_port)?,
            cert_path: defaults.cert_path,
            key_path: defaults.key_path,
        })
    }

    /// Whether both TLS files are present
    pub fn tls_available(&self) -> bool {
        self.cert_path.exists() && self.key_path.exists()
    }
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

/// One rule entry in the rule file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleDescriptor {
    pub name: String,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    #[serde(default)]
    pub reinvocation_policy: ReinvocationPolicy,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub namespace_exclusions: Vec<String>,
    #[serde(default, rename = "match")]
    pub selector: Selector,
    pub rule: BuiltinRule,
}

impl RuleDescriptor {
    /// Registration attributes of this rule
    pub fn spec(&self) -> RuleSpec {
        let spec = RuleSpec::new(self.name.clone())
            .applies_to(self.selector.clone())
            .failure_policy(self.failure_policy)
            .reinvocation(self.reinvocation_policy)
            .timeout(Duration::from_millis(self.timeout_ms));
        self.namespace_exclusions
            .iter()
            .fold(spec, |spec, ns| spec.exclude_namespace(ns.clone()))
    }
}

/// The YAML rule file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RuleFile {
    /// Overrides `POD_NAMESPACE` when set
    #[serde(default)]
    pub home_namespace: Option<String>,
    #[serde(default)]
    pub mutators: Vec<RuleDescriptor>,
    #[serde(default)]
    pub validators: Vec<RuleDescriptor>,
}

impl RuleFile {
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Read the rule file. A missing file yields empty chains.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_yaml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Rule file not found, starting with empty rule chains");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Validate every entry and build the chains in file order
    pub fn into_chains(self) -> Result<RuleChains, ConfigError> {
        let mut chains = RuleChains::new();

        for (descriptor, spec, built) in build_chain(self.mutators, ChainKind::Mutating)? {
            match built {
                BuiltRule::Mutator(body) => chains.mutators.push(Rule::new(spec, body)),
                BuiltRule::Validator(_) => {
                    return Err(wrong_chain(&descriptor, ChainKind::Mutating));
                }
            }
        }
        for (descriptor, spec, built) in build_chain(self.validators, ChainKind::Validating)? {
            match built {
                BuiltRule::Validator(body) => chains.validators.push(Rule::new(spec, body)),
                BuiltRule::Mutator(_) => {
                    return Err(wrong_chain(&descriptor, ChainKind::Validating));
                }
            }
        }

        Ok(chains)
    }

    /// Build the rule engine. The file's `homeNamespace` wins over `fallback_home`.
    pub fn into_engine(self, fallback_home: Option<String>) -> Result<RuleEngine, ConfigError> {
        let home = self
            .home_namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or(fallback_home);
        match &home {
            Some(ns) => info!(namespace = %ns, "Requests in home namespace will bypass all rules"),
            None => warn!("No home namespace configured, self-reference guard disabled"),
        }
        let chains = self.into_chains()?;
        info!(
            mutators = chains.mutators.len(),
            validators = chains.validators.len(),
            "Loaded rule chains"
        );
        Ok(RuleEngine::new(chains, Guard::new(home)))
    }
}

fn wrong_chain(descriptor: &RuleDescriptor, chain: ChainKind) -> ConfigError {
    ConfigError::WrongChain {
        name: descriptor.name.clone(),
        rule_type: descriptor.rule.type_name(),
        chain,
    }
}

type Built = (RuleDescriptor, RuleSpec, BuiltRule);

fn build_chain(descriptors: Vec<RuleDescriptor>, chain: ChainKind) -> Result<Vec<Built>, ConfigError> {
    let mut seen = HashSet::new();
    let mut built = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        if descriptor.name.is_empty() {
            return Err(ConfigError::EmptyName { chain });
        }
        if !seen.insert(descriptor.name.clone()) {
            return Err(ConfigError::DuplicateRule {
                chain,
                name: descriptor.name,
            });
        }
        if descriptor.timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                name: descriptor.name,
            });
        }
        if descriptor.rule.chain() != chain {
            return Err(wrong_chain(&descriptor, chain));
        }

        let spec = descriptor.spec();
        let body = descriptor
            .rule
            .clone()
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                name: descriptor.name.clone(),
                source,
            })?;
        built.push((descriptor, spec, body));
    }

    Ok(built)
}
