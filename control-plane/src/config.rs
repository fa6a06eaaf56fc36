use crate::resolver::{Group, labels_match};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty group name")]
    EmptyGroupName,

    #[error("Priority and normal groups share the name: {0}")]
    DuplicateGroupName(String),

    #[error("Empty listener domain")]
    EmptyDomain,

    #[error("Poll timeout cannot be 0")]
    InvalidPollTimeout,
}

/// Control plane configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener proxies connect to for discovery requests
    #[serde(default = "Listener::discovery")]
    pub listener: Listener,
    /// Listener for health and readiness checks
    #[serde(default = "Listener::admin")]
    pub admin_listener: Listener,
    /// External-facing domain the generated listener resource is named after
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub groups: Groups,
    /// How long a discovery request whose version is already current is held
    /// open waiting for a newer snapshot
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
    /// Upper bound on draining open connections at shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::discovery(),
            admin_listener: Listener::admin(),
            domain: default_domain(),
            groups: Groups::default(),
            poll_timeout_secs: default_poll_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.domain.is_empty() {
            return Err(ValidationError::EmptyDomain);
        }

        if self.poll_timeout_secs == 0 {
            return Err(ValidationError::InvalidPollTimeout);
        }

        self.groups.validate()
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    fn discovery() -> Self {
        Listener {
            host: "0.0.0.0".into(),
            port: 8000,
        }
    }

    fn admin() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 8001,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// The two routing classes. A proxy reporting the priority name in
/// `node.cluster` joins the priority group; any other label joins the normal
/// group. Each name also becomes the cluster name inside its group's
/// snapshot. Logs and metric tags refer to the groups by their fixed kind
/// (`priority`, `normal`), not by these names.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Groups {
    pub priority: GroupConfig,
    pub normal: GroupConfig,
}

impl Default for Groups {
    fn default() -> Self {
        Groups {
            priority: GroupConfig {
                name: "priority".into(),
                backend: SocketAddr::from(([127, 0, 0, 1], 12000)),
            },
            normal: GroupConfig {
                name: "normal".into(),
                backend: SocketAddr::from(([127, 0, 0, 1], 14000)),
            },
        }
    }
}

impl Groups {
    pub fn get(&self, group: Group) -> &GroupConfig {
        match group {
            Group::Priority => &self.priority,
            Group::Normal => &self.normal,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.priority.name.is_empty() || self.normal.name.is_empty() {
            return Err(ValidationError::EmptyGroupName);
        }

        if labels_match(&self.priority.name, &self.normal.name) {
            return Err(ValidationError::DuplicateGroupName(
                self.priority.name.clone(),
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct GroupConfig {
    pub name: String,
    /// Backend the group's single endpoint points at
    pub backend: SocketAddr,
}

fn default_domain() -> String {
    "my-test-domain".into()
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 18000
admin_listener:
    host: "127.0.0.1"
    port: 18001
domain: xds.internal
groups:
    priority:
        name: gold
        backend: "10.0.0.5:12000"
    normal:
        name: bronze
        backend: "10.0.0.6:14000"
poll_timeout_secs: 5
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 18000);
        assert_eq!(config.domain, "xds.internal");
        assert_eq!(config.groups.priority.name, "gold");
        assert_eq!(
            config.groups.normal.backend,
            "10.0.0.6:14000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.poll_timeout(), Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout_secs, 10);
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.listener.port, 8000);
        assert_eq!(config.domain, "my-test-domain");
        assert_eq!(config.groups.priority.name, "priority");
        assert_eq!(config.groups.normal.name, "normal");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let base_config = Config::default();

        let mut config = base_config.clone();
        config.admin_listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config = base_config.clone();
        config.domain = "".into();
        assert_eq!(config.validate(), Err(ValidationError::EmptyDomain));

        let mut config = base_config.clone();
        config.groups.normal.name = "".into();
        assert_eq!(config.validate(), Err(ValidationError::EmptyGroupName));

        let mut config = base_config.clone();
        config.groups.normal.name = "PRIORITY".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateGroupName(_))
        ));

        let mut config = base_config.clone();
        config.groups.priority.name = "über".into();
        config.groups.normal.name = "ÜBER".into();
        assert!(matches!(
            config.validate(),
            Err(ValidationError::DuplicateGroupName(_))
        ));

        let mut config = base_config;
        config.poll_timeout_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPollTimeout));
    }

    #[test]
    fn test_deserialization_errors() {
        // Backend must be a socket address
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
groups:
    priority: {name: priority, backend: "not-an-address"}
    normal: {name: normal, backend: "127.0.0.1:14000"}
"#
            )
            .is_err()
        );

        // Missing port
        assert!(serde_yaml::from_str::<Config>("listener: {host: 0.0.0.0}").is_err());
    }
}
