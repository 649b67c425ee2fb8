//! In-memory passive-roaming session store.
//!
//! Sessions are indexed by session id and by DevAddr. The DevAddr index is
//! multi-valued: roaming DevAddrs can collide across networks, so lookups
//! return every live candidate and the caller disambiguates by MIC. Expired
//! records are removed the first time they are consulted after their
//! lifetime; a background sweep reclaims records never touched again.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::lorawan::{mic, Aes128Key, DevAddr, Eui64, NetId};

/// Interval of the background eviction sweep.
pub const EVICT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct PassiveRoamingSession {
    /// Locally minted; `Uuid::nil()` until the store assigns one.
    pub session_id: Uuid,
    pub net_id: NetId,
    pub dev_addr: DevAddr,
    pub dev_eui: Option<Eui64>,
    /// Absolute expiry.
    pub lifetime: DateTime<Utc>,
    pub lorawan11: bool,
    pub f_nwk_s_int_key: Option<Aes128Key>,
    pub s_nwk_s_int_key: Option<Aes128Key>,
    pub nwk_s_enc_key: Option<Aes128Key>,
    /// Highest accepted uplink counter.
    pub f_cnt_up: u32,
}

impl PassiveRoamingSession {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.lifetime <= now
    }

    /// Decide whether a data uplink belongs to this session, returning the
    /// reconstructed 32-bit counter on acceptance. Frames at or below the
    /// accepted counter are rejected; when a session key is present the MIC
    /// must match too.
    pub fn accepts_frame(&self, phy: &[u8], frame_fcnt: u16) -> Option<u32> {
        let full_fcnt = mic::full_fcnt_up(self.f_cnt_up, frame_fcnt);
        if full_fcnt <= self.f_cnt_up {
            return None;
        }
        if let Some(key) = &self.f_nwk_s_int_key {
            if !mic::validate_data_up(phy, self.dev_addr, full_fcnt, key, self.lorawan11) {
                return None;
            }
        }
        Some(full_fcnt)
    }
}

/// Absolute expiry for a new session: the peer's declared lifetime, capped by
/// the agreement's maximum.
pub fn clamped_lifetime(peer_lifetime: Duration, max: Duration) -> DateTime<Utc> {
    let effective = peer_lifetime.min(max);
    Utc::now() + TimeDelta::from_std(effective).unwrap_or(TimeDelta::zero())
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<Uuid, PassiveRoamingSession>,
    by_dev_addr: HashMap<DevAddr, HashSet<Uuid>>,
}

impl Inner {
    fn remove(&mut self, id: Uuid) -> Option<PassiveRoamingSession> {
        let session = self.by_id.remove(&id)?;
        if let Some(ids) = self.by_dev_addr.get_mut(&session.dev_addr) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_dev_addr.remove(&session.dev_addr);
            }
        }
        Some(session)
    }
}

/// Thread-safe store; the lock is only held across in-memory work.
#[derive(Default)]
pub struct SessionStore {
    inner: Mutex<Inner>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session, minting its id when unset. Returns the id.
    pub fn put(&self, mut session: PassiveRoamingSession) -> Uuid {
        if session.session_id.is_nil() {
            session.session_id = Uuid::new_v4();
        }
        let id = session.session_id;
        let mut inner = self.inner.lock().expect("session store lock");
        inner
            .by_dev_addr
            .entry(session.dev_addr)
            .or_default()
            .insert(id);
        inner.by_id.insert(id, session);
        id
    }

    /// All live sessions for a DevAddr; expired ones are evicted in place.
    pub fn get_by_dev_addr(&self, dev_addr: DevAddr) -> Vec<PassiveRoamingSession> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("session store lock");

        let ids: Vec<Uuid> = match inner.by_dev_addr.get(&dev_addr) {
            Some(ids) => ids.iter().copied().collect(),
            None => return Vec::new(),
        };

        let mut out = Vec::new();
        for id in ids {
            let expired = inner
                .by_id
                .get(&id)
                .map(|s| s.expired(now))
                .unwrap_or(true);
            if expired {
                inner.remove(id);
            } else if let Some(s) = inner.by_id.get(&id) {
                out.push(s.clone());
            }
        }
        out
    }

    /// One live session by id.
    pub fn get(&self, id: Uuid) -> Option<PassiveRoamingSession> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("session store lock");
        match inner.by_id.get(&id) {
            Some(s) if s.expired(now) => {
                inner.remove(id);
                None
            }
            Some(s) => Some(s.clone()),
            None => None,
        }
    }

    /// Advance the session's uplink counter; strictly increasing only.
    pub fn advance_f_cnt(&self, id: Uuid, f_cnt_up: u32) -> Result<(), Error> {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("session store lock");

        let expired = match inner.by_id.get(&id) {
            Some(s) => s.expired(now),
            None => return Err(Error::SessionExpired),
        };
        if expired {
            inner.remove(id);
            return Err(Error::SessionExpired);
        }

        let session = inner.by_id.get_mut(&id).expect("checked above");
        if f_cnt_up <= session.f_cnt_up {
            return Err(Error::FCntRegression {
                current: session.f_cnt_up,
                got: f_cnt_up,
            });
        }
        session.f_cnt_up = f_cnt_up;
        Ok(())
    }

    pub fn delete(&self, id: Uuid) -> bool {
        self.inner
            .lock()
            .expect("session store lock")
            .remove(id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session store lock").by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired session; returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut inner = self.inner.lock().expect("session store lock");
        let expired: Vec<Uuid> = inner
            .by_id
            .values()
            .filter(|s| s.expired(now))
            .map(|s| s.session_id)
            .collect();
        let count = expired.len();
        for id in expired {
            inner.remove(id);
        }
        count
    }

    /// Periodic eviction for sessions never consulted again.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = self;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let evicted = store.sweep();
                if evicted > 0 {
                    debug!(evicted, "evicted expired roaming sessions");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(dev_addr: DevAddr, lifetime: DateTime<Utc>) -> PassiveRoamingSession {
        PassiveRoamingSession {
            session_id: Uuid::nil(),
            net_id: NetId([6, 6, 6]),
            dev_addr,
            dev_eui: Some(Eui64([8, 7, 6, 5, 4, 3, 2, 1])),
            lifetime,
            lorawan11: false,
            f_nwk_s_int_key: None,
            s_nwk_s_int_key: None,
            nwk_s_enc_key: None,
            f_cnt_up: 0,
        }
    }

    fn in_one_minute() -> DateTime<Utc> {
        Utc::now() + TimeDelta::seconds(60)
    }

    #[test]
    fn test_put_and_get_by_dev_addr() {
        let store = SessionStore::new();
        let addr = DevAddr([1, 2, 3, 4]);
        let id = store.put(session(addr, in_one_minute()));
        assert!(!id.is_nil());

        let found = store.get_by_dev_addr(addr);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].session_id, id);

        assert!(store.get_by_dev_addr(DevAddr([9, 9, 9, 9])).is_empty());
    }

    #[test]
    fn test_multiple_sessions_per_dev_addr() {
        let store = SessionStore::new();
        let addr = DevAddr([1, 2, 3, 4]);
        let a = store.put(session(addr, in_one_minute()));
        let b = store.put(session(addr, in_one_minute()));
        assert_ne!(a, b);
        assert_eq!(store.get_by_dev_addr(addr).len(), 2);
    }

    #[test]
    fn test_expired_sessions_evicted_on_access() {
        let store = SessionStore::new();
        let addr = DevAddr([1, 2, 3, 4]);
        store.put(session(addr, Utc::now() - TimeDelta::seconds(1)));

        assert!(store.get_by_dev_addr(addr).is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_advance_f_cnt_monotonic() {
        let store = SessionStore::new();
        let id = store.put(session(DevAddr([1, 2, 3, 4]), in_one_minute()));

        store.advance_f_cnt(id, 10).unwrap();
        assert!(matches!(
            store.advance_f_cnt(id, 10),
            Err(Error::FCntRegression { current: 10, got: 10 })
        ));
        assert!(matches!(
            store.advance_f_cnt(id, 3),
            Err(Error::FCntRegression { .. })
        ));
        store.advance_f_cnt(id, 11).unwrap();
        assert_eq!(store.get(id).unwrap().f_cnt_up, 11);
    }

    #[test]
    fn test_advance_f_cnt_unknown_session() {
        let store = SessionStore::new();
        assert!(matches!(
            store.advance_f_cnt(Uuid::new_v4(), 1),
            Err(Error::SessionExpired)
        ));
    }

    #[test]
    fn test_delete() {
        let store = SessionStore::new();
        let addr = DevAddr([1, 2, 3, 4]);
        let id = store.put(session(addr, in_one_minute()));
        assert!(store.delete(id));
        assert!(!store.delete(id));
        assert!(store.get_by_dev_addr(addr).is_empty());
    }

    #[test]
    fn test_sweep() {
        let store = SessionStore::new();
        store.put(session(DevAddr([1, 2, 3, 4]), Utc::now() - TimeDelta::seconds(1)));
        store.put(session(DevAddr([1, 2, 3, 5]), in_one_minute()));
        assert_eq!(store.sweep(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clamped_lifetime() {
        let t = clamped_lifetime(Duration::from_secs(300), Duration::from_secs(3600));
        assert!(t > Utc::now() + TimeDelta::seconds(295));
        assert!(t <= Utc::now() + TimeDelta::seconds(300));

        let t = clamped_lifetime(Duration::from_secs(300), Duration::from_secs(60));
        assert!(t <= Utc::now() + TimeDelta::seconds(60));
    }

    #[test]
    fn test_accepts_frame_counter_only() {
        let mut s = session(DevAddr([1, 2, 3, 4]), in_one_minute());
        s.f_cnt_up = 33;
        // No key stored: counter decides alone.
        assert_eq!(s.accepts_frame(&[0u8; 12], 34), Some(34));
        assert_eq!(s.accepts_frame(&[0u8; 12], 33), None);
        // A lower 16-bit counter reads as a rollover candidate.
        assert_eq!(s.accepts_frame(&[0u8; 12], 10), Some(0x1000a));
    }

    #[test]
    fn test_accepts_frame_with_mic() {
        let key = Aes128Key([1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8]);
        let addr = DevAddr::from_u32(0x0d020304);
        let mut s = session(addr, in_one_minute());
        s.f_cnt_up = 9;
        s.f_nwk_s_int_key = Some(key);

        // Valid frame for counter 10.
        let mut phy: Vec<u8> = vec![0x40];
        phy.extend_from_slice(&addr.as_u32().to_le_bytes());
        phy.push(0x00);
        phy.extend_from_slice(&10u16.to_le_bytes());
        let m = mic::compute_data_up_mic(&key, addr, 10, &phy);
        phy.extend_from_slice(&m);

        assert_eq!(s.accepts_frame(&phy, 10), Some(10));

        // Wrong key in the session: candidate is rejected.
        s.f_nwk_s_int_key = Some(Aes128Key([0xff; 16]));
        assert_eq!(s.accepts_frame(&phy, 10), None);
    }
}
