//! GWMP framing for the Semtech UDP packet forwarder.
//!
//! Every datagram opens with a fixed header: protocol version, a random
//! token the gateway uses to pair acks with requests, and an identifier
//! byte. Uplink-bearing types follow with the gateway EUI and a JSON body.
//! Multi-byte integers are network byte order.
//!
//! Reference: https://github.com/Lora-net/packet_forwarder/blob/master/PROTOCOL.TXT

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// GWMP speaks protocol version 2.
pub const PROTOCOL_VERSION: u8 = 0x02;

/// Identifier byte of a GWMP datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    PushData = 0x00,
    PushAck = 0x01,
    PullData = 0x02,
    PullResp = 0x03,
    PullAck = 0x04,
    TxAck = 0x05,
}

impl PacketType {
    fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0x00 => PacketType::PushData,
            0x01 => PacketType::PushAck,
            0x02 => PacketType::PullData,
            0x03 => PacketType::PullResp,
            0x04 => PacketType::PullAck,
            0x05 => PacketType::TxAck,
            _ => return None,
        })
    }
}

/// Gateway identifier (EUI-64, 8 bytes)
pub type GatewayEui = [u8; 8];

/// A gateway-originated GWMP datagram after framing.
#[derive(Debug)]
pub enum GwmpPacket {
    PushData {
        token: u16,
        gateway_eui: GatewayEui,
        json: String,
    },
    PullData {
        token: u16,
        gateway_eui: GatewayEui,
    },
    TxAck {
        token: u16,
        gateway_eui: GatewayEui,
        json: Option<String>,
    },
}

/// Rxpk (received packet) from gateway JSON payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rxpk {
    /// UTC time of packet reception (ISO 8601)
    pub time: Option<String>,
    /// Concentrator counter at reception (microseconds)
    pub tmst: Option<u32>,
    /// GPS time (milliseconds since GPS epoch)
    pub tmms: Option<u64>,
    /// RF channel
    pub chan: Option<u8>,
    /// Concentrator IF channel
    pub rfch: Option<u8>,
    /// Frequency in MHz
    pub freq: f64,
    /// LoRa signal-to-noise ratio
    pub lsnr: Option<f64>,
    /// RSSI in dBm
    pub rssi: f64,
    /// Modulation (LORA or FSK)
    pub modu: Option<String>,
    /// LoRa datarate identifier (e.g., "SF7BW125")
    pub datr: String,
    /// LoRa coding rate (e.g., "4/5")
    pub codr: Option<String>,
    /// RF packet payload size in bytes
    pub size: u16,
    /// Base64 encoded RF packet payload
    pub data: String,
}

/// Txpk (packet to transmit) inside a PULL_RESP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txpk {
    /// Send immediately, ignoring tmst
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub imme: bool,
    /// Concentrator counter value to transmit at (microseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmst: Option<u32>,
    /// Frequency in MHz
    pub freq: f64,
    /// RF chain
    pub rfch: u8,
    /// TX power in dBm
    pub powe: i32,
    /// Modulation (LORA)
    pub modu: String,
    /// LoRa datarate identifier
    pub datr: String,
    /// LoRa coding rate
    pub codr: String,
    /// Polarization inversion
    pub ipol: bool,
    /// Payload size in bytes
    pub size: u16,
    /// Base64 encoded payload
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brd: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ant: Option<u32>,
}

/// Push data JSON wrapper
#[derive(Debug, Deserialize)]
pub struct PushDataPayload {
    pub rxpk: Option<Vec<Rxpk>>,
    pub stat: Option<serde_json::Value>,
}

/// Pull resp JSON wrapper
#[derive(Debug, Serialize)]
pub struct PullRespPayload {
    pub txpk: Txpk,
}

impl GwmpPacket {
    /// Frame a raw datagram. Only the gateway-originated types are accepted
    /// here; everything else is ours to send, not to receive.
    pub fn parse(datagram: &[u8]) -> anyhow::Result<Self> {
        anyhow::ensure!(
            datagram.len() >= 4,
            "GWMP datagram below minimum length ({} bytes)",
            datagram.len()
        );

        let mut buf = datagram;
        let version = buf.get_u8();
        anyhow::ensure!(
            version == PROTOCOL_VERSION,
            "GWMP version 0x{:02x} not understood",
            version
        );

        let token = buf.get_u16();
        let id = buf.get_u8();

        match PacketType::from_id(id) {
            Some(PacketType::PushData) => {
                let gateway_eui = take_gateway_eui(&mut buf, "PUSH_DATA")?;
                Ok(GwmpPacket::PushData {
                    token,
                    gateway_eui,
                    json: json_body(buf, "PUSH_DATA")?,
                })
            }
            Some(PacketType::PullData) => {
                let gateway_eui = take_gateway_eui(&mut buf, "PULL_DATA")?;
                Ok(GwmpPacket::PullData { token, gateway_eui })
            }
            Some(PacketType::TxAck) => {
                let gateway_eui = take_gateway_eui(&mut buf, "TX_ACK")?;
                let json = if buf.has_remaining() {
                    Some(json_body(buf, "TX_ACK")?)
                } else {
                    None
                };
                Ok(GwmpPacket::TxAck {
                    token,
                    gateway_eui,
                    json,
                })
            }
            Some(other) => anyhow::bail!("GWMP type {:?} is server-sent, refusing to parse", other),
            None => anyhow::bail!("GWMP identifier 0x{:02x} unknown", id),
        }
    }

    fn header(token: u16, packet_type: PacketType) -> Vec<u8> {
        let mut out = Vec::with_capacity(4);
        out.put_u8(PROTOCOL_VERSION);
        out.put_u16(token);
        out.put_u8(packet_type as u8);
        out
    }

    /// Build a PUSH_ACK for a received PUSH_DATA token
    pub fn push_ack(token: u16) -> Vec<u8> {
        Self::header(token, PacketType::PushAck)
    }

    /// Build a PULL_ACK for a received PULL_DATA token
    pub fn pull_ack(token: u16) -> Vec<u8> {
        Self::header(token, PacketType::PullAck)
    }

    /// Build a PULL_RESP carrying one txpk
    pub fn pull_resp(token: u16, txpk: &Txpk) -> anyhow::Result<Vec<u8>> {
        let mut out = Self::header(token, PacketType::PullResp);
        out.extend_from_slice(&serde_json::to_vec(&PullRespPayload { txpk: txpk.clone() })?);
        Ok(out)
    }
}

fn take_gateway_eui(buf: &mut &[u8], packet_name: &str) -> anyhow::Result<GatewayEui> {
    anyhow::ensure!(
        buf.remaining() >= 8,
        "{} ends before the gateway EUI",
        packet_name
    );
    let mut eui = GatewayEui::default();
    buf.copy_to_slice(&mut eui);
    Ok(eui)
}

fn json_body(buf: &[u8], packet_name: &str) -> anyhow::Result<String> {
    String::from_utf8(buf.to_vec())
        .map_err(|e| anyhow::anyhow!("{} JSON body is not UTF-8: {}", packet_name, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pull_data() {
        let mut data = vec![PROTOCOL_VERSION, 0x12, 0x34, 0x02];
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);

        match GwmpPacket::parse(&data).unwrap() {
            GwmpPacket::PullData { token, gateway_eui } => {
                assert_eq!(token, 0x1234);
                assert_eq!(gateway_eui, [1, 2, 3, 4, 5, 6, 7, 8]);
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_parse_push_data() {
        let mut data = vec![PROTOCOL_VERSION, 0x00, 0x01, 0x00];
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data.extend_from_slice(br#"{"rxpk":[]}"#);

        match GwmpPacket::parse(&data).unwrap() {
            GwmpPacket::PushData { json, .. } => {
                assert_eq!(json, r#"{"rxpk":[]}"#);
            }
            other => panic!("unexpected packet: {:?}", other),
        }
    }

    #[test]
    fn test_bad_version_rejected() {
        let data = vec![0x01, 0x00, 0x01, 0x00, 1, 2, 3, 4, 5, 6, 7, 8];
        assert!(GwmpPacket::parse(&data).is_err());
    }

    #[test]
    fn test_truncated_eui_rejected() {
        let data = vec![PROTOCOL_VERSION, 0x00, 0x01, 0x02, 1, 2, 3];
        assert!(GwmpPacket::parse(&data).is_err());
    }

    #[test]
    fn test_server_sent_types_rejected() {
        // PULL_RESP comes from us, never from a gateway.
        let mut data = vec![PROTOCOL_VERSION, 0x00, 0x01, 0x03];
        data.extend_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert!(GwmpPacket::parse(&data).is_err());
    }

    #[test]
    fn test_acks_echo_token() {
        assert_eq!(GwmpPacket::push_ack(0xabcd), vec![0x02, 0xab, 0xcd, 0x01]);
        assert_eq!(GwmpPacket::pull_ack(0xabcd), vec![0x02, 0xab, 0xcd, 0x04]);
    }

    #[test]
    fn test_pull_resp_roundtrip() {
        let txpk = Txpk {
            imme: false,
            tmst: Some(5_000_000),
            freq: 868.1,
            rfch: 0,
            powe: 14,
            modu: "LORA".into(),
            datr: "SF11BW125".into(),
            codr: "4/5".into(),
            ipol: true,
            size: 4,
            data: "AQIDBA==".into(),
            brd: None,
            ant: None,
        };

        let packet = GwmpPacket::pull_resp(0xbeef, &txpk).unwrap();
        assert_eq!(packet[0], PROTOCOL_VERSION);
        assert_eq!(&packet[1..3], &[0xbe, 0xef]);
        assert_eq!(packet[3], PacketType::PullResp as u8);

        let body: serde_json::Value = serde_json::from_slice(&packet[4..]).unwrap();
        assert_eq!(body["txpk"]["tmst"], 5_000_000);
        assert_eq!(body["txpk"]["datr"], "SF11BW125");
        assert_eq!(body["txpk"]["ipol"], true);
        assert!(body["txpk"].get("imme").is_none());
    }
}
