// SPDX-License-Identifier: AGPL-3.0
//! Backend service discovery. Only [`mdns`] has a concrete network
//! implementation; `dns-sd` and `consul` share [`ServiceDiscoveryRecord`]
//! but are out of scope for this deployment.

pub mod mdns;

pub use mdns::MdnsDiscovery;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::domain::discovery::{DiscoveryCacheKey, ServiceDiscoveryRecord};

struct CacheEntry {
    records: Vec<ServiceDiscoveryRecord>,
    expires_at: Instant,
}

/// Wraps an mDNS lookup with a TTL cache keyed by
/// `(method, service_type)`, so repeated resolution of the same service
/// type within the lowest advertised TTL reuses the prior answer set.
pub struct DiscoveryCache {
    mdns: Arc<MdnsDiscovery>,
    cache: Mutex<HashMap<DiscoveryCacheKey, CacheEntry>>,
}

impl DiscoveryCache {
    pub fn new(mdns: Arc<MdnsDiscovery>) -> Self {
        Self {
            mdns,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, service_type: &str, query_timeout: Duration) -> anyhow::Result<Vec<ServiceDiscoveryRecord>> {
        let key = DiscoveryCacheKey::new(crate::domain::discovery::DiscoveryMethod::Mdns, service_type);
        if let Some(entry) = self.cache.lock().await.get(&key) {
            if entry.expires_at > Instant::now() {
                return Ok(entry.records.clone());
            }
        }

        let records = self.mdns.query(service_type, query_timeout).await?;
        let ttl = crate::domain::discovery::min_ttl(&records);
        if ttl > 0 {
            self.cache.lock().await.insert(
                key,
                CacheEntry {
                    records: records.clone(),
                    expires_at: Instant::now() + Duration::from_secs(ttl as u64),
                },
            );
        }
        Ok(records)
    }
}
