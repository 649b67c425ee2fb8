//! JoinEUI → Join Server resolution.
//!
//! Resolution order: exact JoinEUI entry, longest matching JoinEUI prefix,
//! configured default. The resulting client speaks the same JSON envelopes as
//! a roaming peer, with the JoinEUI as the receiver id.

use crate::backend::client::{Client, ClientConfig};
use crate::config::JoinServerConfig;
use crate::error::Error;
use crate::lorawan::Eui64;

#[derive(Debug, Clone)]
struct Entry {
    /// Prefix value, left-aligned in 64 bits.
    prefix: u64,
    prefix_bits: u8,
    server: String,
}

impl Entry {
    fn matches(&self, join_eui: Eui64) -> bool {
        if self.prefix_bits == 0 {
            return true;
        }
        (join_eui.as_u64() ^ self.prefix) >> (64 - self.prefix_bits as u32) == 0
    }
}

/// Maps JoinEUIs to Join Server endpoints.
pub struct JoinServerDirectory {
    http: reqwest::Client,
    sender_id: String,
    default: Option<String>,
    entries: Vec<Entry>,
}

impl JoinServerDirectory {
    pub fn from_config(config: &JoinServerConfig, sender_id: String) -> Result<Self, Error> {
        let mut entries = Vec::with_capacity(config.resolve_join_eui.len());
        for item in &config.resolve_join_eui {
            entries.push(parse_entry(&item.join_eui, item.server.clone())?);
        }

        Ok(Self {
            http: reqwest::Client::new(),
            sender_id,
            default: config.default.as_ref().map(|d| d.server.clone()),
            entries,
        })
    }

    /// Resolve the Join Server responsible for `join_eui`.
    pub fn client_for(&self, join_eui: Eui64) -> Result<Client, Error> {
        let server = self
            .entries
            .iter()
            .filter(|e| e.matches(join_eui))
            .max_by_key(|e| e.prefix_bits)
            .map(|e| e.server.as_str())
            .or(self.default.as_deref())
            .ok_or(Error::JsNotFound(join_eui))?;

        Ok(Client::new(
            self.http.clone(),
            ClientConfig {
                sender_id: self.sender_id.clone(),
                receiver_id: join_eui.to_string(),
                server: server.to_string(),
            },
        ))
    }
}

/// Parse `"<16 hex digits>"` (exact) or `"<hex>/<prefix-bits>"` (range).
fn parse_entry(spec: &str, server: String) -> Result<Entry, Error> {
    let (hex_part, bits) = match spec.split_once('/') {
        Some((h, b)) => {
            let bits: u8 = b
                .parse()
                .map_err(|_| Error::Config(format!("invalid joineui prefix length: {}", spec)))?;
            (h, bits)
        }
        None => (spec, 64),
    };

    if bits > 64 || hex_part.len() > 16 || hex_part.is_empty() || hex_part.len() % 2 != 0 {
        return Err(Error::Config(format!("invalid joineui entry: {}", spec)));
    }
    let hex_bits = (hex_part.len() * 4) as u8;
    if bits > hex_bits {
        return Err(Error::Config(format!(
            "joineui prefix length exceeds given digits: {}",
            spec
        )));
    }

    let value = u64::from_str_radix(hex_part, 16)
        .map_err(|e| Error::Config(format!("invalid joineui hex {}: {}", spec, e)))?;
    let prefix = value << (64 - hex_bits as u32);

    Ok(Entry {
        prefix,
        prefix_bits: bits,
        server,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JoinServerDefault, ResolveJoinEui};

    fn directory(entries: Vec<(&str, &str)>, default: Option<&str>) -> JoinServerDirectory {
        let config = JoinServerConfig {
            default: default.map(|s| JoinServerDefault { server: s.into() }),
            resolve_join_eui: entries
                .into_iter()
                .map(|(eui, server)| ResolveJoinEui {
                    join_eui: eui.into(),
                    server: server.into(),
                })
                .collect(),
        };
        JoinServerDirectory::from_config(&config, "030201".into()).unwrap()
    }

    #[test]
    fn test_exact_match_wins() {
        let dir = directory(
            vec![
                ("01020304/32", "http://range"),
                ("0102030405060708", "http://exact"),
            ],
            Some("http://default"),
        );
        let client = dir
            .client_for(Eui64([1, 2, 3, 4, 5, 6, 7, 8]))
            .unwrap();
        assert_eq!(client.server(), "http://exact");
        assert_eq!(client.receiver_id(), "0102030405060708");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let dir = directory(
            vec![("0102/16", "http://short"), ("01020304/32", "http://long")],
            None,
        );
        let client = dir
            .client_for(Eui64([1, 2, 3, 4, 0xaa, 0xbb, 0xcc, 0xdd]))
            .unwrap();
        assert_eq!(client.server(), "http://long");

        let client = dir
            .client_for(Eui64([1, 2, 0xff, 0, 0, 0, 0, 0]))
            .unwrap();
        assert_eq!(client.server(), "http://short");
    }

    #[test]
    fn test_default_fallback() {
        let dir = directory(vec![("0102/16", "http://short")], Some("http://default"));
        let client = dir.client_for(Eui64([9, 9, 9, 9, 9, 9, 9, 9])).unwrap();
        assert_eq!(client.server(), "http://default");
    }

    #[test]
    fn test_no_match_no_default() {
        let dir = directory(vec![("0102/16", "http://short")], None);
        let err = dir.client_for(Eui64([9, 9, 9, 9, 9, 9, 9, 9])).unwrap_err();
        assert!(matches!(err, Error::JsNotFound(_)));
    }

    #[test]
    fn test_invalid_entries_rejected() {
        assert!(parse_entry("xyz", "s".into()).is_err());
        assert!(parse_entry("0102/72", "s".into()).is_err());
        assert!(parse_entry("01/16", "s".into()).is_err());
    }
}
