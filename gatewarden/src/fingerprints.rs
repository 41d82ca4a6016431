// gatewarden/src/fingerprints.rs
//
// Server-side store for client-side fingerprint submissions. The intake
// endpoint hands us a signed opaque token plus a JSON blob; what the engine
// keeps is the parsed BrowserFingerprintResult keyed by IP-hash. Transport
// of the probe script is the host's problem.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::net::IpAddr;

use crate::events::BrowserFingerprintResult;

/// Results older than this are ignored by lookups.
const FINGERPRINT_TTL_MINUTES: i64 = 60;

pub struct FingerprintStore {
    by_ip_hash: DashMap<String, BrowserFingerprintResult>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self { by_ip_hash: DashMap::new() }
    }

    pub fn ip_hash(ip: IpAddr) -> String {
        let mut h = Sha256::new();
        h.update(ip.to_string().as_bytes());
        hex::encode(&h.finalize()[..8])
    }

    /// Store a fingerprint submission against its source IP.
    pub fn ingest(&self, ip: IpAddr, mut result: BrowserFingerprintResult) {
        let key = Self::ip_hash(ip);
        result.ip_hash = key.clone();
        self.by_ip_hash.insert(key, result);
    }

    pub fn lookup_ip(&self, ip: IpAddr) -> Option<BrowserFingerprintResult> {
        self.lookup(&Self::ip_hash(ip))
    }

    pub fn lookup(&self, ip_hash: &str) -> Option<BrowserFingerprintResult> {
        let entry = self.by_ip_hash.get(ip_hash)?;
        let cutoff = Utc::now() - Duration::minutes(FINGERPRINT_TTL_MINUTES);
        if entry.collected_at < cutoff {
            return None;
        }
        Some(entry.clone())
    }

    pub fn has_fingerprint(&self, ip: IpAddr) -> bool {
        self.lookup_ip(ip).is_some()
    }

    pub fn sweep(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::minutes(FINGERPRINT_TTL_MINUTES);
        self.by_ip_hash.retain(|_, v| v.collected_at >= cutoff);
    }

    pub fn len(&self) -> usize {
        self.by_ip_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ip_hash.is_empty()
    }
}

impl Default for FingerprintStore {
    fn default() -> Self {
        Self::new()
    }
}
