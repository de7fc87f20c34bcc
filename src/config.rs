use crate::error::{Error, Result};
use std::{env, path::PathBuf, time::Duration};

/// How often and for how long to poll for a condition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Polling {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Polling {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

#[derive(Clone, Debug)]
pub struct Timeouts {
    /// Proxy service to appear after it was applied
    pub service: Polling,
    /// Proxy pods to reach the running phase
    pub pods: Polling,
    /// Proxy deployment rollout after a config change
    pub deployment: Polling,
    pub expose: Polling,
    pub cleanup: Polling,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            service: Polling::new(Duration::from_secs(10), Duration::from_secs(60)),
            pods: Polling::new(Duration::from_millis(500), Duration::from_secs(5 * 60)),
            deployment: Polling::new(Duration::from_secs(2), Duration::from_secs(5 * 60)),
            expose: Polling::new(Duration::from_secs(10), Duration::from_secs(5 * 60)),
            cleanup: Polling::new(Duration::from_secs(10), Duration::from_secs(2 * 60)),
        }
    }
}

/// Connection settings for the Dex gRPC API
#[derive(Clone, Debug)]
pub struct DexConfig {
    /// `host:port` of the Dex gRPC endpoint
    pub host_and_port: String,
    pub client_crt: PathBuf,
    pub client_key: PathBuf,
    pub client_ca: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Namespace the operator runs in, holds the operator secret
    pub operator_namespace: String,

    /// Restrict the watch to a single namespace, all namespaces if unset
    pub watch_namespace: Option<String>,

    pub dex: DexConfig,

    /// ClusterRole the proxy service accounts get bound to
    pub cluster_role_name: String,

    pub health_port: u16,

    pub timeouts: Timeouts,
}

impl ControllerConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self::from_lookup(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::ConfigError(format!("{} must be set", key)))
        };

        let health_port = match lookup("HEALTH_PORT") {
            Some(port) => port
                .parse()
                .map_err(|_| Error::ConfigError(format!("HEALTH_PORT '{}' is not a port", port)))?,
            None => 8080,
        };

        Ok(Self {
            operator_namespace: required("OPERATOR_NAMESPACE")?,
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            dex: DexConfig {
                host_and_port: required("DEX_GRPC_HOST_PORT")?,
                client_crt: required("DEX_GRPC_CLIENT_CRT")?.into(),
                client_key: required("DEX_GRPC_CLIENT_KEY")?.into(),
                client_ca: required("DEX_GRPC_CLIENT_CA")?.into(),
            },
            cluster_role_name: required("CLUSTER_ROLE_NAME")?,
            health_port,
            timeouts: Timeouts::default(),
        })
    }

    /// Check that the Dex credentials are present on disk
    pub fn validate(&self) -> Result<()> {
        for (what, path) in [
            ("client certificate", &self.dex.client_crt),
            ("client key", &self.dex.client_key),
            ("CA certificate", &self.dex.client_ca),
        ] {
            if !path.is_file() {
                return Err(Error::ConfigError(format!(
                    "Dex gRPC {} '{}' does not exist",
                    what,
                    path.display()
                )));
            }
        }
        Ok(())
    }
}
