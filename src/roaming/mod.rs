//! Roaming agreements: the NetID → peer table.
//!
//! Loaded once at startup from the configuration. An agreement carries the
//! peer endpoint plus the local policy knobs (MIC checking, maximum session
//! lifetime, optional KEK for returned session keys). A wildcard entry may be
//! declared; exact NetID matches take precedence.

pub mod gwinfo;
pub mod session;

use std::time::Duration;

use crate::backend::client::{Client, ClientConfig};
use crate::config::RoamingServer;
use crate::error::Error;
use crate::lorawan::{Aes128Key, NetId};

#[derive(Debug, Clone)]
pub struct Agreement {
    pub net_id: NetId,
    pub server: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub passive_roaming: bool,
    pub check_mic: bool,
    /// Upper bound on peer-declared session lifetimes.
    pub passive_roaming_lifetime: Duration,
    /// Declared but not wired; answers are synchronous only.
    pub async_interface: bool,
    pub kek: Option<(String, Aes128Key)>,
}

impl Agreement {
    pub fn kek_ref(&self) -> Option<(&str, &Aes128Key)> {
        self.kek.as_ref().map(|(label, key)| (label.as_str(), key))
    }
}

/// Maps NetIDs to roaming agreements and peer clients.
pub struct RoamingDirectory {
    http: reqwest::Client,
    agreements: Vec<Agreement>,
    wildcard: Option<Agreement>,
}

impl RoamingDirectory {
    pub fn from_config(servers: &[RoamingServer], our_net_id: NetId) -> Result<Self, Error> {
        let mut agreements = Vec::new();
        let mut wildcard = None;

        for s in servers {
            let kek = match (&s.kek_label, &s.kek_key) {
                (Some(label), Some(key)) => {
                    let key: Aes128Key = key
                        .parse()
                        .map_err(|e| Error::Config(format!("roaming kek_key: {}", e)))?;
                    Some((label.clone(), key))
                }
                (None, None) => None,
                _ => {
                    return Err(Error::Config(
                        "roaming kek_label and kek_key must be set together".into(),
                    ))
                }
            };

            let is_wildcard = s.net_id == "*";
            let net_id = if is_wildcard {
                NetId::default()
            } else {
                s.net_id
                    .parse()
                    .map_err(|e| Error::Config(format!("roaming net_id: {}", e)))?
            };

            let agreement = Agreement {
                net_id,
                server: s.server.clone(),
                sender_id: s
                    .sender_id
                    .clone()
                    .unwrap_or_else(|| our_net_id.to_string()),
                receiver_id: s.receiver_id.clone().unwrap_or_else(|| s.net_id.clone()),
                passive_roaming: s.passive_roaming,
                check_mic: s.check_mic,
                passive_roaming_lifetime: Duration::from_secs(s.passive_roaming_lifetime_secs),
                async_interface: s.async_interface,
                kek,
            };

            if is_wildcard {
                if wildcard.is_some() {
                    return Err(Error::Config("multiple wildcard roaming entries".into()));
                }
                wildcard = Some(agreement);
            } else {
                agreements.push(agreement);
            }
        }

        Ok(Self {
            http: reqwest::Client::new(),
            agreements,
            wildcard,
        })
    }

    /// The agreement covering `net_id`, or `NoAgreement`.
    pub fn agreement_for(&self, net_id: NetId) -> Result<&Agreement, Error> {
        self.agreements
            .iter()
            .find(|a| a.net_id == net_id)
            .or(self.wildcard.as_ref())
            .ok_or(Error::NoAgreement(net_id))
    }

    /// Peer client plus the agreement it was built from.
    pub fn client_for(&self, net_id: NetId) -> Result<(Client, &Agreement), Error> {
        let agreement = self.agreement_for(net_id)?;
        let receiver_id = if agreement.receiver_id == "*" {
            net_id.to_string()
        } else {
            agreement.receiver_id.clone()
        };
        let client = Client::new(
            self.http.clone(),
            ClientConfig {
                sender_id: agreement.sender_id.clone(),
                receiver_id,
                server: agreement.server.clone(),
            },
        );
        Ok((client, agreement))
    }

    /// Whether an inbound sender id (NetID hex) belongs to a known agreement.
    pub fn is_known_sender(&self, sender_id: &str) -> bool {
        match sender_id.parse::<NetId>() {
            Ok(net_id) => self.agreement_for(net_id).is_ok(),
            Err(_) => false,
        }
    }

    /// Exact-match agreements, for DevAddr prefix scanning on the data path.
    pub fn agreements(&self) -> &[Agreement] {
        &self.agreements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(net_id: &str) -> RoamingServer {
        RoamingServer {
            net_id: net_id.into(),
            server: format!("http://{}.example", net_id),
            sender_id: None,
            receiver_id: None,
            passive_roaming: true,
            check_mic: true,
            passive_roaming_lifetime_secs: 60,
            async_interface: false,
            kek_label: None,
            kek_key: None,
        }
    }

    #[test]
    fn test_exact_agreement() {
        let dir =
            RoamingDirectory::from_config(&[server("060606")], NetId([3, 2, 1])).unwrap();
        let (client, agreement) = dir.client_for(NetId([6, 6, 6])).unwrap();
        assert_eq!(client.server(), "http://060606.example");
        assert_eq!(client.receiver_id(), "060606");
        assert_eq!(agreement.sender_id, "030201");
        assert!(agreement.check_mic);
    }

    #[test]
    fn test_no_agreement() {
        let dir =
            RoamingDirectory::from_config(&[server("060606")], NetId([3, 2, 1])).unwrap();
        let err = dir.client_for(NetId([7, 7, 7])).unwrap_err();
        assert!(matches!(err, Error::NoAgreement(_)));
        assert!(err.is_abort());
    }

    #[test]
    fn test_wildcard_fallback() {
        let dir = RoamingDirectory::from_config(
            &[server("060606"), server("*")],
            NetId([3, 2, 1]),
        )
        .unwrap();
        let (client, _) = dir.client_for(NetId([7, 7, 7])).unwrap();
        assert_eq!(client.server(), "http://*.example");
        // Wildcard addresses the requested peer.
        assert_eq!(client.receiver_id(), "070707");
    }

    #[test]
    fn test_known_sender() {
        let dir =
            RoamingDirectory::from_config(&[server("060606")], NetId([3, 2, 1])).unwrap();
        assert!(dir.is_known_sender("060606"));
        assert!(!dir.is_known_sender("070707"));
        assert!(!dir.is_known_sender("zz"));
    }

    #[test]
    fn test_kek_must_be_complete() {
        let mut s = server("060606");
        s.kek_label = Some("kek1".into());
        assert!(RoamingDirectory::from_config(&[s], NetId([3, 2, 1])).is_err());
    }
}
