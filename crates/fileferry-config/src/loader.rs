//! Settings loading from YAML documents and the environment.
//!
//! # Design
//! - `${VAR}` placeholders are resolved before YAML parsing; unknown variables
//!   keep their placeholder text so the failure is visible in validation.
//! - `FILEFERRY_*` variables override whatever the document says.
//! - Lookups are injectable so tests never mutate the process environment.

use std::path::{Path, PathBuf};

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineSettings;
use crate::validate::validate;

/// Variable naming a YAML file to load.
pub const CONFIG_PATH_ENV: &str = "FILEFERRY_CONFIG";
const DATABASE_URL_ENV: &str = "FILEFERRY_DATABASE_URL";
const LOG_LEVEL_ENV: &str = "FILEFERRY_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "FILEFERRY_LOG_FORMAT";
const RETRY_MAX_ATTEMPTS_ENV: &str = "FILEFERRY_RETRY_MAX_ATTEMPTS";
const RETRY_INITIAL_BACKOFF_ENV: &str = "FILEFERRY_RETRY_INITIAL_BACKOFF_MS";
const RETRY_MAX_BACKOFF_ENV: &str = "FILEFERRY_RETRY_MAX_BACKOFF_MS";
const SOURCE_ROOT_ENV: &str = "FILEFERRY_SOURCE_ROOT";
const DESTINATION_ROOT_ENV: &str = "FILEFERRY_DESTINATION_ROOT";

const PLACEHOLDER_PATTERN: &str = r"\$\{([^}]+)\}";

type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

/// Builds [`EngineSettings`] from files and environment variables.
pub struct ConfigLoader<'a> {
    lookup: Box<Lookup<'a>>,
}

impl std::fmt::Debug for ConfigLoader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigLoader").finish_non_exhaustive()
    }
}

impl ConfigLoader<'static> {
    /// Loader reading the process environment.
    #[must_use]
    pub fn from_process_env() -> Self {
        Self {
            lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }
}

impl<'a> ConfigLoader<'a> {
    /// Loader reading variables through `lookup`.
    pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + 'a) -> Self {
        Self {
            lookup: Box::new(lookup),
        }
    }

    /// Load settings: the file named by `FILEFERRY_CONFIG` (if any), then overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load(&self) -> ConfigResult<EngineSettings> {
        match (self.lookup)(CONFIG_PATH_ENV) {
            Some(path) => self.load_path(Path::new(&path)),
            None => self.finish(EngineSettings::default()),
        }
    }

    /// Load settings from a YAML file, then apply overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load_path(&self, path: &Path) -> ConfigResult<EngineSettings> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: PathBuf::from(path),
            source,
        })?;
        debug!(path = %path.display(), "loading configuration file");
        self.load_str(&text)
    }

    /// Load settings from YAML text, then apply overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load_str(&self, text: &str) -> ConfigResult<EngineSettings> {
        let resolved = substitute_placeholders(text, &*self.lookup)?;
        let settings = if resolved.trim().is_empty() {
            EngineSettings::default()
        } else {
            serde_yaml::from_str(&resolved).map_err(|source| ConfigError::Parse { source })?
        };
        self.finish(settings)
    }

    fn finish(&self, mut settings: EngineSettings) -> ConfigResult<EngineSettings> {
        self.apply_overrides(&mut settings)?;
        validate(&settings)?;
        Ok(settings)
    }

    fn apply_overrides(&self, settings: &mut EngineSettings) -> ConfigResult<()> {
        if let Some(url) = self.var(DATABASE_URL_ENV) {
            settings.database_url = Some(url);
        }
        if let Some(level) = self.var(LOG_LEVEL_ENV) {
            settings.telemetry.level = level;
        }
        if let Some(format) = self.var(LOG_FORMAT_ENV) {
            settings.telemetry.format = Some(format);
        }
        if let Some(value) = self.var(RETRY_MAX_ATTEMPTS_ENV) {
            settings.retry.max_attempts = parse_number(RETRY_MAX_ATTEMPTS_ENV, &value)?;
        }
        if let Some(value) = self.var(RETRY_INITIAL_BACKOFF_ENV) {
            settings.retry.initial_backoff_ms = parse_number(RETRY_INITIAL_BACKOFF_ENV, &value)?;
        }
        if let Some(value) = self.var(RETRY_MAX_BACKOFF_ENV) {
            settings.retry.max_backoff_ms = parse_number(RETRY_MAX_BACKOFF_ENV, &value)?;
        }
        if let Some(root) = self.var(SOURCE_ROOT_ENV) {
            settings.storage.source_root = Some(PathBuf::from(root));
        }
        if let Some(root) = self.var(DESTINATION_ROOT_ENV) {
            settings.storage.destination_root = Some(PathBuf::from(root));
        }
        Ok(())
    }

    fn var(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> ConfigResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv {
            name,
            value: value.to_string(),
        })
}

/// Replace `${VAR}` placeholders using `lookup`; unknown variables are left intact.
///
/// # Errors
///
/// Returns [`ConfigError::Pattern`] if the placeholder pattern fails to compile.
pub fn substitute_placeholders(
    text: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> ConfigResult<String> {
    let pattern =
        Regex::new(PLACEHOLDER_PATTERN).map_err(|source| ConfigError::Pattern { source })?;
    let replaced = pattern.replace_all(text, |captures: &Captures<'_>| {
        lookup(&captures[1]).unwrap_or_else(|| captures[0].to_string())
    });
    Ok(replaced.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn placeholders_resolve_or_stay_visible() -> anyhow::Result<()> {
        let vars = env(&[("DB_HOST", "db.internal")]);
        let text = "url: postgres://${DB_HOST}/ferry?user=${DB_USER}";
        let resolved = substitute_placeholders(text, &|name| vars.get(name).cloned())?;
        assert_eq!(resolved, "url: postgres://db.internal/ferry?user=${DB_USER}");
        Ok(())
    }

    #[test]
    fn yaml_document_with_overrides() -> anyhow::Result<()> {
        let vars = env(&[
            ("GRANT_BUCKET", "finance-exports"),
            ("FILEFERRY_RETRY_MAX_ATTEMPTS", "5"),
            ("FILEFERRY_LOG_FORMAT", "json"),
        ]);
        let loader = ConfigLoader::with_lookup(|name| vars.get(name).cloned());
        let settings = loader.load_str(
            r"
retry:
  initial_backoff_ms: 50
grants:
  - requester: alice
    bucket: ${GRANT_BUCKET}
    prefix: reports/
metadata_retries: 1
",
        )?;
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_backoff_ms, 50);
        assert_eq!(settings.metadata_retries, 1);
        assert_eq!(settings.grants[0].bucket, "finance-exports");
        assert_eq!(settings.telemetry.format.as_deref(), Some("json"));
        Ok(())
    }

    #[test]
    fn empty_environment_yields_defaults() -> anyhow::Result<()> {
        let loader = ConfigLoader::with_lookup(|_| None);
        assert_eq!(loader.load()?, EngineSettings::default());
        Ok(())
    }

    #[test]
    fn malformed_override_is_reported() {
        let vars = env(&[("FILEFERRY_RETRY_MAX_ATTEMPTS", "three")]);
        let loader = ConfigLoader::with_lookup(|name| vars.get(name).cloned());
        let err = loader.load().expect_err("non-numeric override");
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                name: "FILEFERRY_RETRY_MAX_ATTEMPTS",
                ..
            }
        ));
    }

    #[test]
    fn load_reads_file_named_by_environment() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "collaborator_timeout_ms: 750")?;
        let path = file.path().display().to_string();
        let loader = ConfigLoader::with_lookup(move |name| {
            (name == CONFIG_PATH_ENV).then(|| path.clone())
        });
        let settings = loader.load()?;
        assert_eq!(settings.collaborator_timeout_ms, 750);
        Ok(())
    }

    #[test]
    fn invalid_yaml_is_a_parse_error() {
        let loader = ConfigLoader::with_lookup(|_| None);
        let err = loader.load_str("retry: [unterminated").expect_err("bad yaml");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
