use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Prefix,
    Regex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct ApiEndpoint {
    pub method: String,
    pub path: String,
    pub match_type: MatchType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiSource {
    Route,
    OpenApi,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub name: String,
    pub namespace: String,
    pub apis: Vec<ApiEndpoint>,
    pub source: ApiSource,
}

impl ServiceEntry {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::EmptyServiceName);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEdge {
    pub source: String,
    pub target: String,
    pub call_count: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceMapMetadata {
    pub interval_secs: u64,
    pub lookback_secs: u64,
    pub stale: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// The canonical published document produced by each Service Discovery tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMap {
    pub timestamp: DateTime<Utc>,
    pub services: HashMap<String, ServiceEntry>,
    pub topology: Vec<ServiceEdge>,
    pub metadata: ServiceMapMetadata,
}

impl ServiceMap {
    pub fn empty(now: DateTime<Utc>, interval_secs: u64, lookback_secs: u64) -> Self {
        Self {
            timestamp: now,
            services: HashMap::new(),
            topology: Vec::new(),
            metadata: ServiceMapMetadata { interval_secs, lookback_secs, stale: false, errors: Vec::new() },
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for entry in self.services.values() {
            entry.validate()?;
        }
        for edge in &self.topology {
            if edge.source.trim().is_empty() || edge.target.trim().is_empty() {
                return Err(DomainError::EmptyServiceName);
            }
        }
        Ok(())
    }

    /// Byte-equal JSON comparison ignoring `timestamp`, used by the
    /// Discovery Pipeline to detect "nothing changed this tick".
    pub fn content_equal(&self, other: &ServiceMap) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        a.timestamp = DateTime::<Utc>::default();
        b.timestamp = DateTime::<Utc>::default();
        crate::hash::compute_canonical_hash(&a) == crate::hash::compute_canonical_hash(&b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_name_rejected() {
        let mut map = ServiceMap::empty(Utc::now(), 300, 3600);
        map.services.insert(
            "x".into(),
            ServiceEntry { name: "".into(), namespace: "ns".into(), apis: vec![], source: ApiSource::Route },
        );
        assert!(map.validate().is_err());
    }

    #[test]
    fn content_equal_ignores_timestamp() {
        let a = ServiceMap::empty(Utc::now(), 300, 3600);
        let mut b = a.clone();
        b.timestamp = a.timestamp + chrono::Duration::seconds(5);
        assert!(a.content_equal(&b));
    }
}
