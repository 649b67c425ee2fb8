//! Minimal LoRaWAN PHY payload handling.
//!
//! The roaming core never owns a device session, so it only needs to read the
//! MAC header far enough to route a frame: join-requests are resolved through
//! the Join Server, data frames through the DevAddr's NetID prefix. The frame
//! is otherwise carried opaque to the peer network.

pub mod ids;
pub mod mic;

pub use ids::{Aes128Key, DevAddr, Eui64, NetId};

use std::fmt;

use crate::error::Error;

/// LoRaWAN MAC Header (MHDR) - Message Type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MType {
    JoinRequest,
    JoinAccept,
    UnconfirmedDataUp,
    UnconfirmedDataDown,
    ConfirmedDataUp,
    ConfirmedDataDown,
    RejoinRequest,
    Proprietary,
}

impl TryFrom<u8> for MType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Error> {
        match (value >> 5) & 0x07 {
            0b000 => Ok(MType::JoinRequest),
            0b001 => Ok(MType::JoinAccept),
            0b010 => Ok(MType::UnconfirmedDataUp),
            0b011 => Ok(MType::UnconfirmedDataDown),
            0b100 => Ok(MType::ConfirmedDataUp),
            0b101 => Ok(MType::ConfirmedDataDown),
            0b110 => Ok(MType::RejoinRequest),
            0b111 => Ok(MType::Proprietary),
            _ => unreachable!(),
        }
    }
}

impl MType {
    pub fn is_uplink_data(&self) -> bool {
        matches!(self, MType::UnconfirmedDataUp | MType::ConfirmedDataUp)
    }
}

impl fmt::Display for MType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MType::JoinRequest => "JoinRequest",
            MType::JoinAccept => "JoinAccept",
            MType::UnconfirmedDataUp => "UnconfirmedDataUp",
            MType::UnconfirmedDataDown => "UnconfirmedDataDown",
            MType::ConfirmedDataUp => "ConfirmedDataUp",
            MType::ConfirmedDataDown => "ConfirmedDataDown",
            MType::RejoinRequest => "RejoinRequest",
            MType::Proprietary => "Proprietary",
        };
        write!(f, "{}", s)
    }
}

/// Frame Control byte (FCtrl) for uplink
#[derive(Debug, Clone)]
pub struct FCtrl {
    pub adr: bool,
    pub adr_ack_req: bool,
    pub ack: bool,
    pub class_b: bool,
    pub f_opts_len: u8,
}

/// Decoded LoRaWAN MAC frame, as far as routing needs it.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Data frame (up or down)
    Data {
        mtype: MType,
        dev_addr: DevAddr,
        fctrl: FCtrl,
        fcnt: u16,
        f_opts: Vec<u8>,
        f_port: Option<u8>,
        frm_payload: Vec<u8>,
        mic: [u8; 4],
    },
    /// Join Request
    JoinRequest {
        join_eui: Eui64,
        dev_eui: Eui64,
        dev_nonce: u16,
        mic: [u8; 4],
    },
    /// Join Accept (encrypted, not decoded further without keys)
    JoinAccept { encrypted_payload: Vec<u8> },
    /// Proprietary frame
    Proprietary { payload: Vec<u8> },
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Data {
                mtype,
                dev_addr,
                fcnt,
                f_port,
                frm_payload,
                ..
            } => {
                write!(
                    f,
                    "{} DevAddr={} FCnt={} FPort={} Payload={} bytes",
                    mtype,
                    dev_addr,
                    fcnt,
                    f_port.map(|p| p.to_string()).unwrap_or("-".to_string()),
                    frm_payload.len(),
                )
            }
            Frame::JoinRequest {
                join_eui,
                dev_eui,
                dev_nonce,
                ..
            } => {
                write!(
                    f,
                    "JoinRequest JoinEUI={} DevEUI={} DevNonce={}",
                    join_eui, dev_eui, dev_nonce
                )
            }
            Frame::JoinAccept { encrypted_payload } => {
                write!(f, "JoinAccept (encrypted, {} bytes)", encrypted_payload.len())
            }
            Frame::Proprietary { payload } => {
                write!(f, "Proprietary ({} bytes)", payload.len())
            }
        }
    }
}

/// Decode a LoRaWAN PHY payload (raw bytes after base64 decode)
pub fn decode_phy_payload(data: &[u8]) -> Result<Frame, Error> {
    if data.is_empty() {
        return Err(Error::MalformedRequest("empty PHY payload".into()));
    }

    let mhdr = data[0];
    let mtype = MType::try_from(mhdr)?;

    match mtype {
        MType::JoinRequest => decode_join_request(data),
        MType::JoinAccept => Ok(Frame::JoinAccept {
            encrypted_payload: data[1..].to_vec(),
        }),
        MType::UnconfirmedDataUp
        | MType::UnconfirmedDataDown
        | MType::ConfirmedDataUp
        | MType::ConfirmedDataDown => decode_data_frame(mtype, data),
        MType::Proprietary => Ok(Frame::Proprietary {
            payload: data[1..].to_vec(),
        }),
        MType::RejoinRequest => Err(Error::MalformedRequest(
            "RejoinRequest not supported".into(),
        )),
    }
}

fn decode_join_request(data: &[u8]) -> Result<Frame, Error> {
    // MHDR(1) + JoinEUI(8) + DevEUI(8) + DevNonce(2) + MIC(4) = 23 bytes
    if data.len() != 23 {
        return Err(Error::MalformedRequest(format!(
            "JoinRequest must be 23 bytes, got {}",
            data.len()
        )));
    }

    let join_eui = Eui64::from_le_slice(data[1..9].try_into().expect("8-byte slice"));
    let dev_eui = Eui64::from_le_slice(data[9..17].try_into().expect("8-byte slice"));
    let dev_nonce = u16::from_le_bytes(data[17..19].try_into().expect("2-byte slice"));
    let mic = data[19..23].try_into().expect("4-byte slice");

    Ok(Frame::JoinRequest {
        join_eui,
        dev_eui,
        dev_nonce,
        mic,
    })
}

fn decode_data_frame(mtype: MType, data: &[u8]) -> Result<Frame, Error> {
    // Minimum: MHDR(1) + DevAddr(4) + FCtrl(1) + FCnt(2) + MIC(4) = 12 bytes
    if data.len() < 12 {
        return Err(Error::MalformedRequest(format!(
            "data frame too short: {} bytes (minimum 12)",
            data.len()
        )));
    }

    // DevAddr is little-endian on the wire
    let dev_addr = DevAddr::from_u32(u32::from_le_bytes(
        data[1..5].try_into().expect("4-byte slice"),
    ));

    let fctrl_byte = data[5];
    let fctrl = FCtrl {
        adr: (fctrl_byte & 0x80) != 0,
        adr_ack_req: (fctrl_byte & 0x40) != 0,
        ack: (fctrl_byte & 0x20) != 0,
        class_b: (fctrl_byte & 0x10) != 0,
        f_opts_len: fctrl_byte & 0x0f,
    };

    // FCnt (16-bit, little-endian)
    let fcnt = u16::from_le_bytes(data[6..8].try_into().expect("2-byte slice"));

    let f_opts_end = 8 + fctrl.f_opts_len as usize;
    if f_opts_end > data.len() - 4 {
        return Err(Error::MalformedRequest(format!(
            "FOpts length {} exceeds available data",
            fctrl.f_opts_len
        )));
    }
    let f_opts = data[8..f_opts_end].to_vec();

    // FPort + FRMPayload (optional, only present if there's data beyond FOpts + MIC)
    let mic_start = data.len() - 4;
    let (f_port, frm_payload) = if f_opts_end < mic_start {
        let f_port = Some(data[f_opts_end]);
        let frm_payload = data[f_opts_end + 1..mic_start].to_vec();
        (f_port, frm_payload)
    } else {
        (None, vec![])
    };

    let mic = data[mic_start..].try_into().expect("4-byte slice");

    Ok(Frame::Data {
        mtype,
        dev_addr,
        fctrl,
        fcnt,
        f_opts,
        f_port,
        frm_payload,
        mic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_unconfirmed_data_up() {
        // MHDR=0x40 (UnconfirmedDataUp, LoRaWAN R1)
        // DevAddr=0x01020304 (LE: 04 03 02 01)
        // FCtrl=0x00 (no ADR, no ACK, FOptsLen=0)
        // FCnt=0x0001 (LE: 01 00)
        // FPort=0x01
        // FRMPayload=0xAA 0xBB
        // MIC
        let data: Vec<u8> = vec![
            0x40, // MHDR
            0x04, 0x03, 0x02, 0x01, // DevAddr (LE)
            0x00, // FCtrl
            0x01, 0x00, // FCnt (LE)
            0x01, // FPort
            0xAA, 0xBB, // FRMPayload
            0xEF, 0xBE, 0xAD, 0xDE, // MIC
        ];

        let frame = decode_phy_payload(&data).unwrap();
        match frame {
            Frame::Data {
                mtype,
                dev_addr,
                fcnt,
                f_port,
                frm_payload,
                mic,
                ..
            } => {
                assert_eq!(mtype, MType::UnconfirmedDataUp);
                assert_eq!(dev_addr, DevAddr::from_u32(0x01020304));
                assert_eq!(fcnt, 1);
                assert_eq!(f_port, Some(1));
                assert_eq!(frm_payload, vec![0xAA, 0xBB]);
                assert_eq!(mic, [0xEF, 0xBE, 0xAD, 0xDE]);
            }
            _ => panic!("Expected Data frame"),
        }
    }

    #[test]
    fn test_decode_join_request() {
        // JoinRequest: MHDR=0x00
        // JoinEUI (8 bytes LE) + DevEUI (8 bytes LE) + DevNonce (2 bytes LE) + MIC (4 bytes)
        let data: Vec<u8> = vec![
            0x00, // MHDR (JoinRequest)
            0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // JoinEUI (LE)
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // DevEUI (LE)
            0x7b, 0x00, // DevNonce = 123
            0xEF, 0xBE, 0xAD, 0xDE, // MIC
        ];

        let frame = decode_phy_payload(&data).unwrap();
        match frame {
            Frame::JoinRequest {
                join_eui,
                dev_eui,
                dev_nonce,
                ..
            } => {
                assert_eq!(join_eui, Eui64([1, 2, 3, 4, 5, 6, 7, 8]));
                assert_eq!(dev_eui, Eui64([8, 7, 6, 5, 4, 3, 2, 1]));
                assert_eq!(dev_nonce, 123);
            }
            _ => panic!("Expected JoinRequest frame"),
        }
    }

    #[test]
    fn test_empty_payload_fails() {
        assert!(decode_phy_payload(&[]).is_err());
    }

    #[test]
    fn test_too_short_data_frame_fails() {
        let data: Vec<u8> = vec![0x40, 0x01, 0x02, 0x03, 0x04];
        assert!(decode_phy_payload(&data).is_err());
    }

    #[test]
    fn test_fopts_overrun_fails() {
        // FOptsLen=15 but no room before the MIC.
        let data: Vec<u8> = vec![
            0x40, 0x04, 0x03, 0x02, 0x01, 0x0f, 0x01, 0x00, 0xEF, 0xBE, 0xAD, 0xDE,
        ];
        assert!(decode_phy_payload(&data).is_err());
    }
}
