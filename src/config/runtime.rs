use crate::{errors::Errors, sync::SyncConfig};
use once_cell::sync::OnceCell;
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
    time::Duration,
};

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_RETRY_DELAY_MS: u64 = 1000;
const DEFAULT_CHANNEL_SIZE: usize = 10;

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RuntimeConfig {
    pub store: Store,
    #[serde(default)]
    pub prefixes: Prefixes,
    #[serde(default)]
    pub watch: Watch,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Store {
    pub endpoint: String,
    pub connect_timeout_ms: Option<u64>, // default: 5000
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Prefixes {
    #[serde(default = "default_domain_prefix")]
    pub domain: String,
    #[serde(default = "default_service_prefix")]
    pub service: String,
}

impl Default for Prefixes {
    fn default() -> Self {
        Prefixes {
            domain: default_domain_prefix(),
            service: default_service_prefix(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Deserialize, serde::Serialize)]
pub struct Watch {
    pub retry_delay_ms: Option<u64>, // default: 1000
    pub channel_size: Option<usize>, // default: 10
}

fn default_domain_prefix() -> String {
    "/domains".to_string()
}

fn default_service_prefix() -> String {
    "/services".to_string()
}

fn validate_prefix(name: &str, prefix: &str) -> Result<(), Errors> {
    if !prefix.starts_with('/') || prefix.len() < 2 {
        return Err(Errors::ConfigError(format!(
            "{} prefix must be an absolute key, got {:?}",
            name, prefix
        )));
    }
    if prefix.ends_with('/') {
        return Err(Errors::ConfigError(format!(
            "{} prefix must not end with '/', got {:?}",
            name, prefix
        )));
    }
    Ok(())
}

fn nested(outer: &str, inner: &str) -> bool {
    inner == outer
        || inner
            .strip_prefix(outer)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

impl RuntimeConfig {
    pub fn from_yaml(raw: &str) -> Result<Self, Errors> {
        serde_yml::from_str(raw)
            .map_err(|e| Errors::ConfigError(format!("Unable to parse config file: {}", e)))
    }

    pub fn validate(&self) -> Result<(), Errors> {
        if self.store.endpoint.is_empty() {
            return Err(Errors::ConfigError("Store endpoint is empty".to_string()));
        }
        validate_prefix("Domain", &self.prefixes.domain)?;
        validate_prefix("Service", &self.prefixes.service)?;
        if nested(&self.prefixes.domain, &self.prefixes.service)
            || nested(&self.prefixes.service, &self.prefixes.domain)
        {
            return Err(Errors::ConfigError(format!(
                "Domain prefix {} and service prefix {} overlap",
                self.prefixes.domain, self.prefixes.service
            )));
        }
        if self.watch.channel_size == Some(0) {
            return Err(Errors::ConfigError(
                "Watch channel size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(
            self.store
                .connect_timeout_ms
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        )
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            domain_prefix: self.prefixes.domain.clone(),
            service_prefix: self.prefixes.service.clone(),
            retry_delay: Duration::from_millis(
                self.watch.retry_delay_ms.unwrap_or(DEFAULT_RETRY_DELAY_MS),
            ),
            channel_size: self.watch.channel_size.unwrap_or(DEFAULT_CHANNEL_SIZE),
        }
    }
}

// Initialize global configuration
static GLOBAL_RUNTIME_CONFIG: OnceCell<RuntimeConfig> = OnceCell::new();

/// Explicit path, else `ROUTE_SYNC_CONF`, else `.config/route_sync.yaml`.
pub fn resolve_path(explicit: Option<&Path>) -> Result<PathBuf, Errors> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    match std::env::var("ROUTE_SYNC_CONF") {
        Ok(val) => Ok(PathBuf::from(val)),
        Err(_e) => {
            let conf_path = std::env::current_dir().map_err(|e| {
                Errors::ConfigError(format!("Unable to get current directory: {}", e))
            })?;
            Ok(conf_path.join(".config/route_sync.yaml"))
        }
    }
}

pub fn load(path: &Path) -> Result<RuntimeConfig, Errors> {
    let open_conf = File::open(path).map_err(|e| {
        Errors::ConfigError(format!("Unable to open config file {:?}: {}", path, e))
    })?;
    let read_conf = BufReader::new(open_conf);
    let conf: RuntimeConfig = serde_yml::from_reader(read_conf)
        .map_err(|e| Errors::ConfigError(format!("Unable to parse config file: {}", e)))?;
    conf.validate()?;
    Ok(conf)
}

pub fn initialize(explicit: Option<&Path>) -> Result<(), Errors> {
    let conf = load(&resolve_path(explicit)?)?;
    GLOBAL_RUNTIME_CONFIG
        .set(conf)
        .map_err(|_| Errors::ConfigError("Unable to set global config".to_string()))
}

pub fn config() -> Result<&'static RuntimeConfig, Errors> {
    GLOBAL_RUNTIME_CONFIG
        .get()
        .ok_or_else(|| Errors::ConfigError("Config not initialized".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply() -> Result<(), Errors> {
        let conf = RuntimeConfig::from_yaml("store:\n  endpoint: http://127.0.0.1:2379\n")?;
        conf.validate()?;
        assert_eq!(conf.connect_timeout(), Duration::from_millis(5000));
        assert_eq!(conf.sync_config(), SyncConfig::default());
        Ok(())
    }

    #[test]
    fn test_full_document() -> Result<(), Errors> {
        let conf = RuntimeConfig::from_yaml(
            r#"
store:
  endpoint: http://etcd:4001
  connect_timeout_ms: 250
prefixes:
  domain: /gogeta/domains
  service: /gogeta/services
watch:
  retry_delay_ms: 200
  channel_size: 32
"#,
        )?;
        conf.validate()?;
        let sync = conf.sync_config();
        assert_eq!(sync.domain_prefix, "/gogeta/domains");
        assert_eq!(sync.service_prefix, "/gogeta/services");
        assert_eq!(sync.retry_delay, Duration::from_millis(200));
        assert_eq!(sync.channel_size, 32);
        assert_eq!(conf.connect_timeout(), Duration::from_millis(250));
        Ok(())
    }

    #[test]
    fn test_invalid_prefixes() -> Result<(), Errors> {
        for (domain, service) in [
            ("domains", "/services"),
            ("/domains/", "/services"),
            ("/", "/services"),
            ("/routing", "/routing/services"),
            ("/same", "/same"),
        ] {
            let mut conf =
                RuntimeConfig::from_yaml("store:\n  endpoint: http://127.0.0.1:2379\n")?;
            conf.prefixes.domain = domain.to_string();
            conf.prefixes.service = service.to_string();
            assert!(conf.validate().is_err(), "{} / {}", domain, service);
        }
        Ok(())
    }

    #[test]
    fn test_explicit_path_wins() -> Result<(), Errors> {
        let path = resolve_path(Some(Path::new("/tmp/route_sync.yaml")))?;
        assert_eq!(path, PathBuf::from("/tmp/route_sync.yaml"));
        assert!(load(Path::new("/nonexistent/route_sync.yaml")).is_err());
        Ok(())
    }
}
