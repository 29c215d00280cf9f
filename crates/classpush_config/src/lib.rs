use config::{Config, ConfigError, Environment, File};
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub mod models;
pub use models::*;

/// Marker value replaced by an environment variable named after the field path.
pub const SECRET_FROM_ENV: &str = "secret_from_env";

/// Loads the configuration for the current `RUN_ENV`.
///
/// Sources, later ones winning:
/// 1. `<dir>/default.*`
/// 2. `<dir>/<RUN_ENV>.*` (`RUN_ENV` defaults to `debug`)
/// 3. environment variables `<PREFIX>__SECTION__KEY` (`PREFIX` defaults to `CLASSPUSH`)
///
/// `<dir>` is `CLASSPUSH_CONFIG_DIR`, or `config` relative to the working directory.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    ensure_dotenv_loaded();

    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| "debug".to_string());
    let config_dir = env::var("CLASSPUSH_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config"));

    load_config_from(&config_dir, &run_env)
}

/// Loads the configuration from an explicit directory and environment name.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, ConfigError> {
    let prefix = env::var("PREFIX").unwrap_or_else(|_| "CLASSPUSH".to_string());

    let default_path = config_dir.join("default");
    let env_path = config_dir.join(run_env);

    debug!(
        "Loading config from {} and {}",
        default_path.display(),
        env_path.display()
    );

    let builder = Config::builder()
        .add_source(File::with_name(&default_path.to_string_lossy()).required(false))
        .add_source(File::with_name(&env_path.to_string_lossy()).required(false))
        .add_source(Environment::with_prefix(&prefix).separator("__"));

    let raw_config: AppConfig = builder.build()?.try_deserialize()?;
    apply_env_overrides_from_marker(raw_config)
}

/// Recursively replaces all "secret_from_env" string values with environment variable values.
///
/// A marker without a matching variable becomes `null`, so optional settings read as unset
/// instead of carrying the marker text as a value.
fn inject_env_secrets(value: &mut Value) {
    fn walk(path: Vec<String>, obj: &mut Value) {
        match obj {
            Value::Object(map) => {
                for (k, v) in map.iter_mut() {
                    let mut new_path = path.clone();
                    new_path.push(k.to_string());
                    walk(new_path, v);
                }
            }
            Value::String(s) if s == SECRET_FROM_ENV => {
                let env_key = path.join("_").to_uppercase();
                match std::env::var(&env_key) {
                    Ok(env_val) if !env_val.is_empty() => *obj = Value::String(env_val),
                    _ => {
                        warn!("env var {} not found for {}", env_key, SECRET_FROM_ENV);
                        *obj = Value::Null;
                    }
                }
            }
            _ => {}
        }
    }

    walk(vec![], value);
}

/// Applies environment overrides based on "secret_from_env" markers in serialized config
pub fn apply_env_overrides_from_marker(config: AppConfig) -> Result<AppConfig, ConfigError> {
    let mut json = serde_json::to_value(&config)
        .map_err(|err| ConfigError::Message(format!("failed to serialize config: {err}")))?;
    inject_env_secrets(&mut json);
    serde_json::from_value(json)
        .map_err(|err| ConfigError::Message(format!("failed to apply env secrets: {err}")))
}

static INIT_DOTENV: OnceCell<()> = OnceCell::new();

/// Ensures that the dotenv file is loaded into the environment variables.
///
/// The file is `DOTENV_OVERRIDE` if set, else the first command line argument when it
/// starts with `.env`, else `.env`. Loading happens at most once per process.
///
/// # Return
///
/// The path that was (or would have been) loaded.
pub fn ensure_dotenv_loaded() -> String {
    let dotenv_path_override = std::env::var("DOTENV_OVERRIDE").ok();
    let dotenv_path_arg = env::args().nth(1).filter(|s| s.starts_with(".env"));

    let dotenv_path = dotenv_path_override
        .or(dotenv_path_arg)
        .unwrap_or_else(|| ".env".to_string());

    INIT_DOTENV.get_or_init(|| {
        dotenv::from_filename(&dotenv_path).ok();
    });

    dotenv_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_files_yield_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(dir.path(), "debug").unwrap();

        assert_eq!(config.registry.backend, RegistryBackend::Memory);
        assert_eq!(config.registry.poll_interval_ms, 30_000);
        assert_eq!(config.local_cache.key, "fcm_token");
        assert!(config.messaging.vapid_key.is_none());
        assert!(!config.lifecycle.remove_on_sign_out);
    }

    #[test]
    fn test_environment_file_overrides_default() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path();
        fs::write(
            dir.join("default.toml"),
            "[registry]\nbackend = \"memory\"\npoll_interval_ms = 1000\n\n[messaging]\nvapid_key = \"BDefaultKey\"\n",
        )
        .unwrap();
        fs::write(
            dir.join("staging.toml"),
            "[registry]\nbackend = \"sqlite\"\n\n[registry.database]\nurl = \"sqlite::memory:\"\n\n[lifecycle]\nremove_on_sign_out = true\n",
        )
        .unwrap();

        let config = load_config_from(dir, "staging").unwrap();

        assert_eq!(config.registry.backend, RegistryBackend::Sqlite);
        assert_eq!(config.registry.poll_interval_ms, 1000);
        assert_eq!(
            config.registry.database.as_ref().map(|d| d.url.as_str()),
            Some("sqlite::memory:")
        );
        assert_eq!(config.messaging.vapid_key.as_deref(), Some("BDefaultKey"));
        assert!(config.lifecycle.remove_on_sign_out);
    }

    #[test]
    fn test_secret_marker_without_env_becomes_unset() {
        let mut config = AppConfig::default();
        config.registry.firestore = Some(FirestoreConfig {
            project_id: Some(SECRET_FROM_ENV.to_string()),
            key_path: Some("/etc/classpush/sa.json".to_string()),
            database_id: None,
            base_url: None,
        });

        let config = apply_env_overrides_from_marker(config).unwrap();
        let firestore = config.registry.firestore.unwrap();

        // REGISTRY_FIRESTORE_PROJECT_ID is not set in the test environment
        assert!(firestore.project_id.is_none());
        assert_eq!(firestore.key_path.as_deref(), Some("/etc/classpush/sa.json"));
    }
}
