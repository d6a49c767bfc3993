use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use promptbench_llm::{ProviderDescriptor, ProviderKind};
use serde::Deserialize;
use thiserror::Error;

pub const PROVIDERS_FILE_NAME: &str = "providers.toml";
const DEFAULT_LOG_LEVEL: &str = "warn";
const DEFAULT_CONF_DIR_NAME: &str = ".promptbench";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("provider '{name}' has unknown kind '{kind}'")]
    UnknownKind { name: String, kind: String },
    #[error("provider '{0}' needs a base_url")]
    MissingBaseUrl(String),
    #[error("provider '{0}' is not configured")]
    UnknownProvider(String),
    #[error("no provider selected; pass --provider or set default_provider")]
    NoProviderSelected,
}

#[derive(Debug, Deserialize, Default)]
struct ProvidersToml {
    #[serde(default)]
    default_provider: Option<String>,
    #[serde(default)]
    log: LogToml,
    #[serde(default)]
    providers: BTreeMap<String, ProviderToml>,
}

#[derive(Debug, Deserialize, Default)]
struct LogToml {
    #[serde(default)]
    level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProviderToml {
    kind: String,
    #[serde(default)]
    base_url: Option<String>,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default)]
    referer: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

/// One named backend from `providers.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_env: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
}

impl ProviderEntry {
    fn builtin(kind: ProviderKind, base_url: &str) -> Self {
        Self {
            name: builtin_name(kind).to_string(),
            kind,
            base_url: base_url.to_string(),
            api_key: None,
            api_key_env: None,
            referer: None,
            title: None,
        }
    }

    /// Descriptor with the key resolved from the entry, its `api_key_env`, or left
    /// empty for the adapter's own `<KIND>_API_KEY` fallback.
    pub fn descriptor(&self) -> ProviderDescriptor {
        let mut descriptor = ProviderDescriptor::new(self.kind, self.base_url.clone());
        descriptor.api_key = self.api_key.clone().or_else(|| {
            self.api_key_env
                .as_deref()
                .and_then(|name| std::env::var(name).ok())
                .filter(|key| !key.trim().is_empty())
        });
        descriptor.referer = self.referer.clone();
        descriptor.title = self.title.clone();
        descriptor
    }

    /// Where the key comes from, without revealing it.
    pub fn key_source(&self) -> String {
        if self.api_key.is_some() {
            return "inline".to_string();
        }
        let env_name = self
            .api_key_env
            .clone()
            .unwrap_or_else(|| self.kind.api_key_env());
        let state = match std::env::var(&env_name) {
            Ok(value) if !value.trim().is_empty() => "set",
            _ => "unset",
        };
        format!("${env_name} ({state})")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRegistry {
    pub default_provider: Option<String>,
    pub log_level: String,
    pub providers: BTreeMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    /// Registry used when no `providers.toml` exists: one entry per public vendor.
    pub fn builtin() -> Self {
        let providers = [
            ProviderKind::OpenAICompatible,
            ProviderKind::Anthropic,
            ProviderKind::Gemini,
            ProviderKind::OpenRouter,
        ]
        .into_iter()
        .filter_map(|kind| default_base_url(kind).map(|url| ProviderEntry::builtin(kind, url)))
        .map(|entry| (entry.name.clone(), entry))
        .collect();
        Self {
            default_provider: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            providers,
        }
    }

    pub fn select(&self, name: Option<&str>) -> Result<&ProviderEntry, ConfigError> {
        let name = name
            .or(self.default_provider.as_deref())
            .ok_or(ConfigError::NoProviderSelected)?;
        self.providers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProvider(name.to_string()))
    }
}

/// Directory holding `providers.toml`: the `--conf-dir` flag, else `~/.promptbench`.
///
/// A leading `~` is expanded and relative flags are anchored at the working directory.
pub fn config_dir(flag: Option<&Path>) -> PathBuf {
    let Some(flag) = flag else {
        return user_home().join(DEFAULT_CONF_DIR_NAME);
    };
    let expanded = match flag.strip_prefix("~") {
        Ok(rest) if rest.as_os_str().is_empty() => user_home(),
        Ok(rest) => user_home().join(rest),
        Err(_) => flag.to_path_buf(),
    };
    if expanded.is_absolute() {
        return expanded;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(expanded),
        Err(_) => expanded,
    }
}

fn user_home() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map_or_else(|| PathBuf::from("."), PathBuf::from)
}

pub fn providers_config_path(home: &Path) -> PathBuf {
    home.join(PROVIDERS_FILE_NAME)
}

pub fn load_registry(home: &Path) -> Result<ProviderRegistry, ConfigError> {
    let path = providers_config_path(home);
    if !path.exists() {
        return Ok(ProviderRegistry::builtin());
    }
    let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    parse_registry(&raw).map_err(|error| match error {
        ConfigError::Parse { source, .. } => ConfigError::Parse { path, source },
        other => other,
    })
}

pub fn parse_registry(raw: &str) -> Result<ProviderRegistry, ConfigError> {
    let parsed: ProvidersToml = toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: PathBuf::from(PROVIDERS_FILE_NAME),
        source,
    })?;

    let mut providers = BTreeMap::new();
    for (name, provider) in parsed.providers {
        let kind = ProviderKind::parse(&provider.kind).ok_or_else(|| ConfigError::UnknownKind {
            name: name.clone(),
            kind: provider.kind.clone(),
        })?;
        let base_url = provider
            .base_url
            .filter(|url| !url.trim().is_empty())
            .or_else(|| default_base_url(kind).map(str::to_string))
            .ok_or_else(|| ConfigError::MissingBaseUrl(name.clone()))?;
        providers.insert(
            name.clone(),
            ProviderEntry {
                name,
                kind,
                base_url,
                api_key: provider.api_key.filter(|key| !key.trim().is_empty()),
                api_key_env: provider.api_key_env,
                referer: provider.referer,
                title: provider.title,
            },
        );
    }

    Ok(ProviderRegistry {
        default_provider: parsed.default_provider,
        log_level: parsed
            .log
            .level
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        providers,
    })
}

fn builtin_name(kind: ProviderKind) -> &'static str {
    match kind {
        ProviderKind::OpenAICompatible => "openai",
        other => other.as_str(),
    }
}

fn default_base_url(kind: ProviderKind) -> Option<&'static str> {
    match kind {
        ProviderKind::OpenAICompatible => Some("https://api.openai.com"),
        ProviderKind::Anthropic => Some("https://api.anthropic.com"),
        ProviderKind::Gemini => Some("https://generativelanguage.googleapis.com"),
        ProviderKind::OpenRouter => Some("https://openrouter.ai/api"),
        ProviderKind::CustomGateway => None,
    }
}
