// SPDX-License-Identifier: AGPL-3.0
//! Service discovery record shape, common to every discovery backend
//! (`mdns`, `dns-sd`, `consul`, `manual`). Only `mdns` has a concrete
//! network implementation in this crate; the others share the contract
//! with unspecified backends per the source material's placeholder
//! clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryMethod {
    Mdns,
    DnsSd,
    Consul,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDiscoveryRecord {
    pub service_name: String,
    pub instance_name: String,
    pub hostname: String,
    pub port: u16,
    pub txt_records: HashMap<String, String>,
    pub ttl: u32,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DiscoveryCacheKey {
    pub method: DiscoveryMethod,
    pub service_type: String,
}

impl DiscoveryCacheKey {
    pub fn new(method: DiscoveryMethod, service_type: impl Into<String>) -> Self {
        Self {
            method,
            service_type: service_type.into(),
        }
    }
}

/// Minimum TTL across a batch of records, used as the cache entry's TTL.
pub fn min_ttl(records: &[ServiceDiscoveryRecord]) -> u32 {
    records.iter().map(|r| r.ttl).min().unwrap_or(0)
}
