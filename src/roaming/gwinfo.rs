//! Gateway metadata ↔ backend GWInfo conversion, including the uplink token.
//!
//! The uplink token is the linchpin of the downlink return: the home network
//! has no knowledge of our gateways, so each GWInfo element carries our own
//! serialized RX metadata as opaque bytes. When the peer later requests a
//! downlink it echoes the token back and we rebuild the gateway context from
//! it. The encoding is self-contained and versioned; nothing about it is
//! shared with peers.
//!
//! Layout (all multi-byte fields big-endian):
//!   version(1) | gateway id(8) | rssi i32 | snr f64 | board u32 |
//!   antenna u32 | flags u8 | [lat f64 lon f64 alt f64] | [time i64 micros] |
//!   context len u16 | context
//!
//! Trailing bytes after the context are tolerated.

use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};

use crate::backend::{GwInfoElement, HexBytes};
use crate::error::Error;
use crate::gateway::{Location, RxInfo};
use crate::lorawan::Eui64;

/// Token format version.
const TOKEN_VERSION: u8 = 0x01;

const FLAG_LOCATION: u8 = 0x01;
const FLAG_TIME: u8 = 0x02;

/// Serialize one gateway's RX metadata into an opaque uplink token.
pub fn pack_ul_token(rx: &RxInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + rx.context.len());
    buf.put_u8(TOKEN_VERSION);
    buf.put_slice(&rx.gateway_id.0);
    buf.put_i32(rx.rssi);
    buf.put_f64(rx.snr);
    buf.put_u32(rx.board);
    buf.put_u32(rx.antenna);

    let mut flags = 0u8;
    if rx.location.is_some() {
        flags |= FLAG_LOCATION;
    }
    if rx.time.is_some() {
        flags |= FLAG_TIME;
    }
    buf.put_u8(flags);

    if let Some(loc) = &rx.location {
        buf.put_f64(loc.latitude);
        buf.put_f64(loc.longitude);
        buf.put_f64(loc.altitude);
    }
    if let Some(t) = &rx.time {
        buf.put_i64(t.timestamp_micros());
    }

    buf.put_u16(rx.context.len() as u16);
    buf.put_slice(&rx.context);
    buf
}

/// Inverse of [`pack_ul_token`]. Trailing bytes are ignored; truncation or an
/// unknown version is `TokenInvalid`.
pub fn unpack_ul_token(token: &[u8]) -> Result<RxInfo, Error> {
    let mut buf = token;

    if buf.remaining() < 1 {
        return Err(Error::TokenInvalid("empty token"));
    }
    let version = buf.get_u8();
    if version != TOKEN_VERSION {
        return Err(Error::TokenInvalid("unknown token version"));
    }

    if buf.remaining() < 8 + 4 + 8 + 4 + 4 + 1 {
        return Err(Error::TokenInvalid("token truncated"));
    }
    let mut gateway_id = [0u8; 8];
    buf.copy_to_slice(&mut gateway_id);
    let rssi = buf.get_i32();
    let snr = buf.get_f64();
    let board = buf.get_u32();
    let antenna = buf.get_u32();
    let flags = buf.get_u8();

    let location = if flags & FLAG_LOCATION != 0 {
        if buf.remaining() < 24 {
            return Err(Error::TokenInvalid("token truncated in location"));
        }
        Some(Location {
            latitude: buf.get_f64(),
            longitude: buf.get_f64(),
            altitude: buf.get_f64(),
        })
    } else {
        None
    };

    let time = if flags & FLAG_TIME != 0 {
        if buf.remaining() < 8 {
            return Err(Error::TokenInvalid("token truncated in timestamp"));
        }
        DateTime::from_timestamp_micros(buf.get_i64())
    } else {
        None
    };

    if buf.remaining() < 2 {
        return Err(Error::TokenInvalid("token truncated before context"));
    }
    let context_len = buf.get_u16() as usize;
    if buf.remaining() < context_len {
        return Err(Error::TokenInvalid("token truncated in context"));
    }
    let context = buf[..context_len].to_vec();

    Ok(RxInfo {
        gateway_id: Eui64(gateway_id),
        rssi,
        snr,
        board,
        antenna,
        location,
        context,
        time,
    })
}

/// Convert the uplink's RX metadata set into backend GWInfo elements.
///
/// Location is only reported when present and non-degenerate. `dl_allowed`
/// marks gateways the peer may address a downlink through.
pub fn rx_info_to_gw_info(rx_set: &[RxInfo], dl_allowed: bool) -> Vec<GwInfoElement> {
    rx_set
        .iter()
        .map(|rx| {
            let loc = rx
                .location
                .filter(|l| l.latitude != 0.0 || l.longitude != 0.0);
            GwInfoElement {
                id: HexBytes(rx.gateway_id.0.to_vec()),
                rssi: Some(rx.rssi),
                snr: Some(rx.snr),
                lat: loc.map(|l| l.latitude),
                lon: loc.map(|l| l.longitude),
                ul_token: HexBytes(pack_ul_token(rx)),
                dl_allowed,
            }
        })
        .collect()
}

/// The earliest gateway receive time, falling back to the server clock.
pub fn recv_time_from_rx_info(rx_set: &[RxInfo]) -> DateTime<Utc> {
    rx_set
        .iter()
        .filter_map(|rx| rx.time)
        .min()
        .unwrap_or_else(Utc::now)
}
