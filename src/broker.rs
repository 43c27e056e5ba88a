//! Candidate broker endpoints
//!
//! Discovery reports brokers as services; each record is keyed by the id of
//! the service that announced it. The connection manager tries candidates in
//! ascending service-id order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Identifier of the discovery service that announced a broker
pub type ServiceId = i64;

/// Default MQTT port used when a URL omits one
pub const DEFAULT_MQTT_PORT: u16 = 1883;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerInfo {
    pub host: String,
    pub port: u16,
}

impl BrokerInfo {
    pub fn new(host: &str, port: u16) -> Result<Self, String> {
        if host.trim().is_empty() {
            return Err("broker host cannot be empty".to_string());
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Parse `mqtt://host[:port]` (or `tcp://`)
    pub fn from_url(raw: &str) -> Result<Self, String> {
        let url = Url::parse(raw).map_err(|e| format!("invalid broker URL '{raw}': {e}"))?;
        match url.scheme() {
            "mqtt" | "tcp" => {}
            other => return Err(format!("unsupported broker URL scheme '{other}'")),
        }
        let host = url
            .host_str()
            .ok_or_else(|| format!("broker URL '{raw}' has no host"))?;
        Self::new(host, url.port().unwrap_or(DEFAULT_MQTT_PORT))
    }
}

impl fmt::Display for BrokerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Registry of known brokers
#[derive(Debug, Default)]
pub struct BrokerRegistry {
    brokers: BTreeMap<ServiceId, Arc<BrokerInfo>>,
}

impl BrokerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record; returns the replaced one
    pub fn insert(&mut self, id: ServiceId, info: BrokerInfo) -> Option<Arc<BrokerInfo>> {
        self.brokers.insert(id, Arc::new(info))
    }

    pub fn remove(&mut self, id: ServiceId) -> Option<Arc<BrokerInfo>> {
        self.brokers.remove(&id)
    }

    pub fn contains(&self, id: ServiceId) -> bool {
        self.brokers.contains_key(&id)
    }

    pub fn get(&self, id: ServiceId) -> Option<Arc<BrokerInfo>> {
        self.brokers.get(&id).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.brokers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.brokers.len()
    }

    /// Copy of the candidates, so connecting does not need the client lock
    pub fn snapshot(&self) -> Vec<(ServiceId, Arc<BrokerInfo>)> {
        self.brokers
            .iter()
            .map(|(id, info)| (*id, Arc::clone(info)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_url() {
        let info = BrokerInfo::from_url("mqtt://broker.local:8883").unwrap();
        assert_eq!(info, BrokerInfo::new("broker.local", 8883).unwrap());

        let info = BrokerInfo::from_url("tcp://10.0.0.1").unwrap();
        assert_eq!(info.port, DEFAULT_MQTT_PORT);
        assert_eq!(info.to_string(), "10.0.0.1:1883");
    }

    #[test]
    fn test_from_url_rejects_bad_input() {
        assert!(BrokerInfo::from_url("http://broker.local").is_err());
        assert!(BrokerInfo::from_url("not a url").is_err());
        assert!(BrokerInfo::new("  ", 1883).is_err());
    }

    #[test]
    fn test_snapshot_is_ordered_by_service_id() {
        let mut registry = BrokerRegistry::new();
        registry.insert(7, BrokerInfo::new("b", 1883).unwrap());
        registry.insert(3, BrokerInfo::new("a", 1883).unwrap());
        registry.insert(11, BrokerInfo::new("c", 1883).unwrap());

        let hosts: Vec<_> = registry
            .snapshot()
            .iter()
            .map(|(_, info)| info.host.clone())
            .collect();
        assert_eq!(hosts, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_insert_replaces_and_remove() {
        let mut registry = BrokerRegistry::new();
        assert!(registry.insert(1, BrokerInfo::new("a", 1883).unwrap()).is_none());
        let old = registry.insert(1, BrokerInfo::new("b", 1884).unwrap());
        assert_eq!(old.unwrap().host, "a");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(1).unwrap().port, 1884);

        assert!(registry.remove(1).is_some());
        assert!(registry.remove(1).is_none());
        assert!(registry.is_empty());
    }
}
