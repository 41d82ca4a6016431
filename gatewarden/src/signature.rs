// gatewarden/src/signature.rs
//
// Deterministic signature derivation — HMAC-SHA256 over normalized request
// attributes, truncated to 128 bits, encoded as 26 chars of lowercase
// base32. A signature identifies a logical flow of requests, not a TCP
// connection; rotating the secret invalidates all prior signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::net::IpAddr;

use crate::events::RequestSnapshot;

type HmacSha256 = Hmac<Sha256>;

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

pub struct SignatureDeriver {
    secret: Vec<u8>,
}

impl SignatureDeriver {
    pub fn new(secret: &str) -> Self {
        Self { secret: secret.as_bytes().to_vec() }
    }

    /// Derive the stable signature id for a request. Identical snapshots
    /// always produce identical ids for a fixed secret.
    pub fn derive(&self, snapshot: &RequestSnapshot) -> String {
        let ua_family = ua_family(snapshot.user_agent());
        let ip_prefix = ip_prefix(snapshot.remote_ip);
        let lang_head = snapshot
            .header("accept-language")
            .map(primary_language_tag)
            .unwrap_or_default();
        let ja4 = snapshot.tls_fingerprint.as_deref().unwrap_or("").to_lowercase();
        let platform = snapshot
            .client_hint_platform
            .as_deref()
            .unwrap_or("")
            .to_lowercase();

        // Field order is part of the contract.
        let material = format!("{ua_family}|{ip_prefix}|{lang_head}|{ja4}|{platform}");

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(material.as_bytes());
        let digest = mac.finalize().into_bytes();

        base32_encode(&digest[..16])
    }
}

/// Reduce an IP to its flow prefix: /24 for IPv4, /64 for IPv6.
fn ip_prefix(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.0/24", o[0], o[1], o[2])
        }
        IpAddr::V6(v6) => {
            let s = v6.segments();
            format!("{:x}:{:x}:{:x}:{:x}::/64", s[0], s[1], s[2], s[3])
        }
    }
}

/// Collapse a raw User-Agent into a coarse family token. Version numbers and
/// build metadata never enter the signature.
fn ua_family(ua: &str) -> String {
    let lower = ua.to_lowercase();
    for family in [
        "firefox", "edg", "opr", "chrome", "safari", "curl", "wget", "python",
        "go-http-client", "okhttp", "java", "bot", "spider", "headless",
    ] {
        if lower.contains(family) {
            return family.to_string();
        }
    }
    if lower.is_empty() { "empty".to_string() } else { "other".to_string() }
}

/// First language tag of an Accept-Language header, lowercased, region kept.
fn primary_language_tag(value: &str) -> String {
    value
        .split(',')
        .next()
        .unwrap_or("")
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

/// RFC 4648 base32 without padding; 16 bytes → 26 chars.
fn base32_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 8 / 5 + 1);
    let mut buffer: u32 = 0;
    let mut bits: u8 = 0;
    for &b in bytes {
        buffer = (buffer << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(ua: &str, ip: &str, lang: Option<&str>) -> RequestSnapshot {
        let mut headers = vec![("user-agent".to_string(), ua.to_string())];
        if let Some(l) = lang {
            headers.push(("accept-language".to_string(), l.to_string()));
        }
        RequestSnapshot {
            request_id:  "r1".into(),
            method:      "GET".into(),
            path:        "/".into(),
            headers,
            remote_ip:   ip.parse().unwrap(),
            remote_port: 443,
            protocol:    "2".into(),
            tls_fingerprint: None,
            h2_settings_hash: None,
            geo:         None,
            client_hint_platform: None,
            received_at: Utc::now(),
            bot_label:   None,
        }
    }

    #[test]
    fn derivation_is_deterministic() {
        let deriver = SignatureDeriver::new("secret");
        let a = deriver.derive(&snapshot("Mozilla/5.0 Chrome/120", "203.0.113.7", Some("en-GB,en;q=0.9")));
        let b = deriver.derive(&snapshot("Mozilla/5.0 Chrome/120", "203.0.113.7", Some("en-GB,en;q=0.9")));
        assert_eq!(a, b);
        assert_eq!(a.len(), 26);
        assert!(a.chars().all(|c| BASE32_ALPHABET.contains(&(c as u8))));
    }

    #[test]
    fn same_slash24_same_signature() {
        let deriver = SignatureDeriver::new("secret");
        let a = deriver.derive(&snapshot("curl/8.0", "203.0.113.7", None));
        let b = deriver.derive(&snapshot("curl/8.1", "203.0.113.200", None));
        // Same UA family + same /24 → same flow.
        assert_eq!(a, b);
    }

    #[test]
    fn rotating_secret_invalidates() {
        let s = snapshot("curl/8.0", "203.0.113.7", None);
        let a = SignatureDeriver::new("one").derive(&s);
        let b = SignatureDeriver::new("two").derive(&s);
        assert_ne!(a, b);
    }

    #[test]
    fn language_reduced_to_primary_tag() {
        assert_eq!(primary_language_tag("en-GB,en;q=0.9,fr;q=0.5"), "en-gb");
        assert_eq!(primary_language_tag("de"), "de");
    }
}
