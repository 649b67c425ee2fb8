//! LoRaWAN Backend Interfaces 1.0 wire types.
//!
//! JSON envelopes exchanged between network servers and join servers. Field
//! names follow the specification document (PascalCase with protocol
//! initialisms); byte strings travel as lowercase hex without a 0x prefix.

pub mod client;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;
use crate::lorawan::{Aes128Key, DevAddr, Eui64, NetId};

/// Protocol version carried in every envelope.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Raw bytes rendered as lowercase hex on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HexBytes(pub Vec<u8>);

impl HexBytes {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for HexBytes {
    fn from(v: Vec<u8>) -> Self {
        HexBytes(v)
    }
}

impl fmt::Display for HexBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl Serialize for HexBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for HexBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map(HexBytes).map_err(D::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    HomeNSReq,
    HomeNSAns,
    PRStartReq,
    PRStartAns,
    XmitDataReq,
    XmitDataAns,
}

impl MessageType {
    /// Answer type for a request type (identity for answers).
    pub fn ans(self) -> MessageType {
        match self {
            MessageType::HomeNSReq | MessageType::HomeNSAns => MessageType::HomeNSAns,
            MessageType::PRStartReq | MessageType::PRStartAns => MessageType::PRStartAns,
            MessageType::XmitDataReq | MessageType::XmitDataAns => MessageType::XmitDataAns,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultCode {
    Success,
    NoAction,
    MICFailed,
    FrameSizeError,
    JoinReqFailed,
    NoRoamingAgreement,
    DevRoamingDisallowed,
    RoamingActDisallowed,
    ActivationDisallowed,
    UnknownDevEUI,
    UnknownDevAddr,
    UnknownSender,
    UnknownReceiver,
    Deferred,
    XmitFailed,
    InvalidFPort,
    InvalidProtocolVersion,
    StaleDeviceProfile,
    MalformedRequest,
    FrameReplayed,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasePayload {
    #[serde(rename = "ProtocolVersion")]
    pub protocol_version: String,
    #[serde(rename = "SenderID")]
    pub sender_id: String,
    #[serde(rename = "ReceiverID")]
    pub receiver_id: String,
    #[serde(rename = "TransactionID")]
    pub transaction_id: u32,
    #[serde(rename = "MessageType")]
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultPayload {
    #[serde(rename = "ResultCode")]
    pub result_code: ResultCode,
    #[serde(
        rename = "Description",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub description: String,
}

impl ResultPayload {
    pub fn new(result_code: ResultCode) -> Self {
        Self {
            result_code,
            description: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BasePayloadResult {
    #[serde(flatten)]
    pub base: BasePayload,
    #[serde(rename = "Result")]
    pub result: ResultPayload,
}

/// Session key, optionally wrapped under a pre-shared KEK.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct KeyEnvelope {
    #[serde(rename = "KEKLabel", default, skip_serializing_if = "String::is_empty")]
    pub kek_label: String,
    #[serde(rename = "AESKey")]
    pub aes_key: HexBytes,
}

impl KeyEnvelope {
    /// Recover the session key, unwrapping with the agreement's KEK when the
    /// peer labelled the envelope.
    pub fn unwrap_key(&self, kek: Option<(&str, &Aes128Key)>) -> Result<Aes128Key, Error> {
        if self.kek_label.is_empty() {
            let b: [u8; 16] = self
                .aes_key
                .as_slice()
                .try_into()
                .map_err(|_| Error::Resolve("key envelope is not 16 bytes".into()))?;
            return Ok(Aes128Key(b));
        }

        match kek {
            Some((label, key)) if label == self.kek_label => {
                let kek = aes_kw::KekAes128::from(key.0);
                let mut out = [0u8; 16];
                kek.unwrap(self.aes_key.as_slice(), &mut out)
                    .map_err(|e| Error::Resolve(format!("kek unwrap: {}", e)))?;
                Ok(Aes128Key(out))
            }
            _ => Err(Error::Resolve(format!(
                "no kek configured for label {}",
                self.kek_label
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GwInfoElement {
    #[serde(rename = "ID", default, skip_serializing_if = "HexBytes::is_empty")]
    pub id: HexBytes,
    #[serde(rename = "RSSI", default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    #[serde(rename = "SNR", default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
    #[serde(rename = "Lat", default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(rename = "Lon", default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(rename = "ULToken", default, skip_serializing_if = "HexBytes::is_empty")]
    pub ul_token: HexBytes,
    #[serde(rename = "DLAllowed", default, skip_serializing_if = "is_false")]
    pub dl_allowed: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UlMetaData {
    #[serde(rename = "DevEUI", default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<Eui64>,
    #[serde(rename = "DevAddr", default, skip_serializing_if = "Option::is_none")]
    pub dev_addr: Option<DevAddr>,
    #[serde(rename = "ULFreq", default, skip_serializing_if = "Option::is_none")]
    pub ul_freq: Option<f64>,
    #[serde(rename = "DataRate", default, skip_serializing_if = "Option::is_none")]
    pub data_rate: Option<u8>,
    #[serde(rename = "RecvTime")]
    pub recv_time: DateTime<Utc>,
    #[serde(rename = "RFRegion", default, skip_serializing_if = "String::is_empty")]
    pub rf_region: String,
    #[serde(rename = "GWCnt", default, skip_serializing_if = "Option::is_none")]
    pub gw_cnt: Option<usize>,
    #[serde(rename = "GWInfo", default, skip_serializing_if = "Vec::is_empty")]
    pub gw_info: Vec<GwInfoElement>,
}

impl Default for UlMetaData {
    fn default() -> Self {
        Self {
            dev_eui: None,
            dev_addr: None,
            ul_freq: None,
            data_rate: None,
            recv_time: Utc::now(),
            rf_region: String::new(),
            gw_cnt: None,
            gw_info: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DlMetaData {
    #[serde(rename = "DevEUI", default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<Eui64>,
    #[serde(rename = "DLFreq1", default, skip_serializing_if = "Option::is_none")]
    pub dl_freq_1: Option<f64>,
    #[serde(rename = "DLFreq2", default, skip_serializing_if = "Option::is_none")]
    pub dl_freq_2: Option<f64>,
    #[serde(rename = "RXDelay1", default, skip_serializing_if = "Option::is_none")]
    pub rx_delay_1: Option<u32>,
    #[serde(rename = "ClassMode", default, skip_serializing_if = "Option::is_none")]
    pub class_mode: Option<String>,
    #[serde(rename = "DataRate1", default, skip_serializing_if = "Option::is_none")]
    pub data_rate_1: Option<u8>,
    #[serde(rename = "DataRate2", default, skip_serializing_if = "Option::is_none")]
    pub data_rate_2: Option<u8>,
    #[serde(rename = "GWInfo", default, skip_serializing_if = "Vec::is_empty")]
    pub gw_info: Vec<GwInfoElement>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomeNsReqPayload {
    #[serde(flatten)]
    pub base: BasePayload,
    #[serde(rename = "DevEUI")]
    pub dev_eui: Eui64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HomeNsAnsPayload {
    #[serde(flatten)]
    pub base: BasePayloadResult,
    #[serde(rename = "HNetID", default)]
    pub h_net_id: NetId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrStartReqPayload {
    #[serde(flatten)]
    pub base: BasePayload,
    #[serde(rename = "PHYPayload")]
    pub phy_payload: HexBytes,
    #[serde(rename = "ULMetaData")]
    pub ul_meta_data: UlMetaData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrStartAnsPayload {
    #[serde(flatten)]
    pub base: BasePayloadResult,
    #[serde(
        rename = "PHYPayload",
        default,
        skip_serializing_if = "HexBytes::is_empty"
    )]
    pub phy_payload: HexBytes,
    #[serde(rename = "DevEUI", default, skip_serializing_if = "Option::is_none")]
    pub dev_eui: Option<Eui64>,
    /// Session lifetime in seconds; absent or zero means stateless.
    #[serde(rename = "Lifetime", default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u64>,
    #[serde(
        rename = "FNwkSIntKey",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub f_nwk_s_int_key: Option<KeyEnvelope>,
    #[serde(rename = "NwkSKey", default, skip_serializing_if = "Option::is_none")]
    pub nwk_s_key: Option<KeyEnvelope>,
    #[serde(rename = "FCntUp", default, skip_serializing_if = "Option::is_none")]
    pub f_cnt_up: Option<u32>,
    #[serde(rename = "DLMetaData", default, skip_serializing_if = "Option::is_none")]
    pub dl_meta_data: Option<DlMetaData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct XmitDataReqPayload {
    #[serde(flatten)]
    pub base: BasePayload,
    #[serde(
        rename = "PHYPayload",
        default,
        skip_serializing_if = "HexBytes::is_empty"
    )]
    pub phy_payload: HexBytes,
    #[serde(rename = "ULMetaData", default, skip_serializing_if = "Option::is_none")]
    pub ul_meta_data: Option<UlMetaData>,
    #[serde(rename = "DLMetaData", default, skip_serializing_if = "Option::is_none")]
    pub dl_meta_data: Option<DlMetaData>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct XmitDataAnsPayload {
    #[serde(flatten)]
    pub base: BasePayloadResult,
}
