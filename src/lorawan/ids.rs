//! LoRaWAN identifiers: NetID, EUI-64, DevAddr, AES-128 key.
//!
//! All of them render as lowercase hex without a 0x prefix, which is also how
//! they travel inside the backend-interfaces JSON envelopes.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// NwkID width in bits per NetID type (types 0..=7).
const NWK_ID_BITS: [u32; 8] = [6, 6, 9, 11, 12, 13, 15, 17];

/// Device-address bits left after the type prefix and the NwkID.
const ADDR_BITS: [u32; 8] = [25, 24, 20, 17, 15, 13, 10, 7];

/// 3-byte network identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NetId(pub [u8; 3]);

impl NetId {
    /// NetID type, encoded in the three most significant bits.
    pub fn type_prefix(&self) -> u8 {
        self.0[0] >> 5
    }

    /// NwkID bits of this NetID, right-aligned.
    pub fn nwk_id(&self) -> u32 {
        let v = u32::from_be_bytes([0, self.0[0], self.0[1], self.0[2]]);
        v & ((1 << NWK_ID_BITS[self.type_prefix() as usize]) - 1)
    }
}

impl fmt::Display for NetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for NetId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = hex::decode(s).map_err(|e| format!("invalid netid hex: {}", e))?;
        let b: [u8; 3] = b
            .try_into()
            .map_err(|_| format!("netid must be 3 bytes: {}", s))?;
        Ok(NetId(b))
    }
}

/// 8-byte extended unique identifier (DevEUI, JoinEUI, gateway ID).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub fn as_u64(&self) -> u64 {
        u64::from_be_bytes(self.0)
    }

    pub fn from_u64(v: u64) -> Self {
        Eui64(v.to_be_bytes())
    }

    /// Read from wire order (LoRaWAN transmits EUIs little-endian).
    pub fn from_le_slice(b: &[u8; 8]) -> Self {
        let mut out = *b;
        out.reverse();
        Eui64(out)
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Eui64 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = hex::decode(s).map_err(|e| format!("invalid eui64 hex: {}", e))?;
        let b: [u8; 8] = b
            .try_into()
            .map_err(|_| format!("eui64 must be 8 bytes: {}", s))?;
        Ok(Eui64(b))
    }
}

/// 4-byte device address. The most significant bits carry a type prefix and
/// the NwkID of the assigning network, which is how a forwarding network
/// recognizes frames that belong to a roaming partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DevAddr(pub [u8; 4]);

impl DevAddr {
    pub fn as_u32(&self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub fn from_u32(v: u32) -> Self {
        DevAddr(v.to_be_bytes())
    }

    /// Address type: the number of leading one-bits, capped at 7.
    pub fn type_prefix(&self) -> u8 {
        let v = self.as_u32();
        (v.leading_ones()).min(7) as u8
    }

    /// True when the address carries the prefix (type + NwkID) of `net_id`.
    pub fn is_net_id(&self, net_id: NetId) -> bool {
        let t = net_id.type_prefix();
        if self.type_prefix() != t {
            return false;
        }
        let addr_bits = ADDR_BITS[t as usize];
        let nwk_mask = (1u32 << NWK_ID_BITS[t as usize]) - 1;
        (self.as_u32() >> addr_bits) & nwk_mask == net_id.nwk_id()
    }

    /// Overwrite the type prefix and NwkID bits with those of `net_id`,
    /// keeping the low device bits.
    pub fn set_addr_prefix(&mut self, net_id: NetId) {
        let t = net_id.type_prefix() as u32;
        let addr_bits = ADDR_BITS[t as usize];
        let type_prefix = if t == 0 { 0 } else { !0u32 << (32 - t) };
        let addr_mask = (1u32 << addr_bits) - 1;
        let v = type_prefix | (net_id.nwk_id() << addr_bits) | (self.as_u32() & addr_mask);
        self.0 = v.to_be_bytes();
    }
}

impl fmt::Display for DevAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for DevAddr {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = hex::decode(s).map_err(|e| format!("invalid devaddr hex: {}", e))?;
        let b: [u8; 4] = b
            .try_into()
            .map_err(|_| format!("devaddr must be 4 bytes: {}", s))?;
        Ok(DevAddr(b))
    }
}

/// AES-128 session key.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Aes128Key(pub [u8; 16]);

impl fmt::Debug for Aes128Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys stay out of logs.
        write!(f, "Aes128Key(..)")
    }
}

impl fmt::Display for Aes128Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl FromStr for Aes128Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let b = hex::decode(s).map_err(|e| format!("invalid key hex: {}", e))?;
        let b: [u8; 16] = b
            .try_into()
            .map_err(|_| format!("aes key must be 16 bytes: {}", s))?;
        Ok(Aes128Key(b))
    }
}

macro_rules! hex_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

hex_serde!(NetId);
hex_serde!(Eui64);
hex_serde!(DevAddr);
hex_serde!(Aes128Key);
