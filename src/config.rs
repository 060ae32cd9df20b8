//! Server configuration, stored as JSON.
//!
//! A missing file is created with the defaults below, so a first run leaves a
//! config behind that can be edited and reloaded.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use ipnet::Ipv4Net;

use crate::error::{Error, Result};
use crate::handler::HandlerConfig;
use crate::options::{OptionCode, Options};
use crate::store::{DEFAULT_ADDRESS_PREFIX, DEFAULT_LEASE_PREFIX};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address of this server. Sent as the server identifier and never leased.
    pub server_ip: Ipv4Addr,
    /// Network to lease from, e.g. `10.0.0.0/24`.
    pub cidr: String,
    pub lease_duration_seconds: u32,
    /// Deadline for handling one message, store round trips included.
    pub handle_timeout_millis: u64,
    pub key_prefix: String,
    pub address_prefix: String,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub domain_name: Option<String>,
    pub store: StoreConfig,
}

/// Which key-value store holds the leases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store. Leases are lost on exit and not shared.
    #[default]
    Memory,
    Etcd {
        endpoints: Vec<String>,
        #[serde(default = "default_dial_timeout_millis")]
        dial_timeout_millis: u64,
    },
}

fn default_dial_timeout_millis() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(10, 0, 0, 1),
            cidr: "10.0.0.0/24".to_string(),
            lease_duration_seconds: 43200,
            handle_timeout_millis: 1000,
            key_prefix: DEFAULT_LEASE_PREFIX.to_string(),
            address_prefix: DEFAULT_ADDRESS_PREFIX.to_string(),
            gateway: Some(Ipv4Addr::new(10, 0, 0, 1)),
            dns_servers: vec![Ipv4Addr::new(8, 8, 8, 8), Ipv4Addr::new(8, 8, 4, 4)],
            domain_name: None,
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let network = self.network()?;

        if !network.contains(&self.server_ip) {
            return Err(Error::InvalidConfig(format!(
                "server_ip {} is outside {}",
                self.server_ip, network
            )));
        }

        if self.lease_duration_seconds == 0 {
            return Err(Error::InvalidConfig(
                "lease_duration_seconds must be greater than 0".to_string(),
            ));
        }

        if self.handle_timeout_millis == 0 {
            return Err(Error::InvalidConfig(
                "handle_timeout_millis must be greater than 0".to_string(),
            ));
        }

        if self.key_prefix.is_empty() || self.address_prefix.is_empty() {
            return Err(Error::InvalidConfig(
                "key_prefix and address_prefix must not be empty".to_string(),
            ));
        }

        if self.key_prefix.starts_with(&self.address_prefix)
            || self.address_prefix.starts_with(&self.key_prefix)
        {
            return Err(Error::InvalidConfig(
                "key_prefix and address_prefix must not overlap".to_string(),
            ));
        }

        if let StoreConfig::Etcd { endpoints, .. } = &self.store
            && endpoints.is_empty()
        {
            return Err(Error::InvalidConfig(
                "etcd store needs at least one endpoint".to_string(),
            ));
        }

        Ok(())
    }

    /// The configured network with host bits cleared.
    pub fn network(&self) -> Result<Ipv4Net> {
        let network: Ipv4Net = self.cidr.trim().parse().map_err(|error| Error::InvalidCidr {
            cidr: self.cidr.clone(),
            reason: format!("{}", error),
        })?;
        Ok(network.trunc())
    }

    /// Options offered to clients: subnet mask and broadcast address from the
    /// CIDR, plus router, DNS servers and domain name when configured.
    pub fn dhcp_options(&self) -> Result<Options> {
        let network = self.network()?;
        let mut options = Options::new();

        options.insert_ipv4(OptionCode::SubnetMask, network.netmask());
        options.insert_ipv4(OptionCode::BroadcastAddress, network.broadcast());

        if let Some(gateway) = self.gateway {
            options.insert_ipv4_list(OptionCode::Router, &[gateway]);
        }

        if !self.dns_servers.is_empty() {
            options.insert_ipv4_list(OptionCode::DnsServer, &self.dns_servers);
        }

        if let Some(domain) = &self.domain_name {
            options.insert(OptionCode::DomainName, domain.as_bytes());
        }

        Ok(options)
    }

    pub fn handler_config(&self) -> Result<HandlerConfig> {
        Ok(HandlerConfig {
            server_ip: self.server_ip,
            cidr: self.cidr.clone(),
            lease_duration: Duration::from_secs(u64::from(self.lease_duration_seconds)),
            handle_timeout: Duration::from_millis(self.handle_timeout_millis),
            options: self.dhcp_options()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lease_duration_seconds, 43200);
        assert_eq!(config.handle_timeout_millis, 1000);
        assert_eq!(config.key_prefix, "dhcp::leases::");
    }

    #[test]
    fn test_invalid_cidr() {
        let config = Config {
            cidr: "10.0.0.0/40".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidCidr { .. })));
    }

    #[test]
    fn test_server_ip_outside_network() {
        let config = Config {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let config = Config {
            lease_duration_seconds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            handle_timeout_millis: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overlapping_prefixes_rejected() {
        let config = Config {
            key_prefix: "dhcp::".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_etcd_without_endpoints_rejected() {
        let config = Config {
            store: StoreConfig::Etcd {
                endpoints: Vec::new(),
                dial_timeout_millis: 5000,
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_config_json() {
        let memory: StoreConfig = serde_json::from_str(r#"{"backend":"memory"}"#).unwrap();
        assert_eq!(memory, StoreConfig::Memory);

        let etcd: StoreConfig =
            serde_json::from_str(r#"{"backend":"etcd","endpoints":["http://127.0.0.1:2379"]}"#)
                .unwrap();
        assert_eq!(
            etcd,
            StoreConfig::Etcd {
                endpoints: vec!["http://127.0.0.1:2379".to_string()],
                dial_timeout_millis: 5000,
            }
        );
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"server_ip":"172.16.0.1","cidr":"172.16.0.0/16"}"#).unwrap();

        assert!(config.validate().is_ok());
        assert_eq!(config.lease_duration_seconds, 43200);
        assert_eq!(config.store, StoreConfig::Memory);
    }

    #[test]
    fn test_dhcp_options() {
        let config = Config {
            domain_name: Some("lab.local".to_string()),
            ..Default::default()
        };
        let options = config.dhcp_options().unwrap();

        assert_eq!(
            options.ipv4(OptionCode::SubnetMask),
            Some(Ipv4Addr::new(255, 255, 255, 0))
        );
        assert_eq!(
            options.ipv4(OptionCode::BroadcastAddress),
            Some(Ipv4Addr::new(10, 0, 0, 255))
        );
        assert_eq!(options.ipv4(OptionCode::Router), Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(options.get(OptionCode::DnsServer), Some(&[8u8, 8, 8, 8, 8, 8, 4, 4][..]));
        assert_eq!(options.get(OptionCode::DomainName), Some(&b"lab.local"[..]));
    }

    #[test]
    fn test_load_or_create_round_trip() {
        let path = std::env::temp_dir().join(format!("dhcpkv-config-{}.json", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let created = Config::load_or_create(&path).unwrap();
        assert_eq!(created, Config::default());
        assert!(path.exists());

        let edited = Config {
            cidr: "10.1.0.0/16".to_string(),
            server_ip: Ipv4Addr::new(10, 1, 0, 1),
            ..Default::default()
        };
        edited.save(&path).unwrap();
        assert_eq!(Config::load_or_create(&path).unwrap(), edited);

        std::fs::remove_file(&path).unwrap();
    }
}
