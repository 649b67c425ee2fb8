//! Gateway-facing data types and the downlink publish handle.
//!
//! The radio side of the house: what a gateway reported about an uplink
//! (per-gateway RX metadata plus shared TX metadata) and what we hand back to
//! a gateway for transmission. The `context` bytes inside [`RxInfo`] are
//! owned by the gateway bridge and travel opaque through the whole roaming
//! round-trip so a later downlink can be timed against the uplink.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::lorawan::Eui64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
}

/// Per-gateway receive metadata for one uplink.
#[derive(Debug, Clone, PartialEq)]
pub struct RxInfo {
    pub gateway_id: Eui64,
    pub rssi: i32,
    pub snr: f64,
    pub board: u32,
    pub antenna: u32,
    pub location: Option<Location>,
    /// Gateway-bridge correlation bytes (concentrator counter for the UDP
    /// bridge). Echoed on any downlink that answers this uplink.
    pub context: Vec<u8>,
    pub time: Option<DateTime<Utc>>,
}

/// Transmit metadata shared by all receivers of one uplink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TxInfo {
    /// Frequency in Hz.
    pub frequency: u32,
    /// Region data-rate index.
    pub dr: u8,
}

/// One uplink as delivered by the gateway backend.
#[derive(Debug, Clone)]
pub struct UplinkFrame {
    pub rx_info: Vec<RxInfo>,
    pub tx_info: TxInfo,
    pub phy_payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownlinkTiming {
    /// Transmit `delay` after the uplink identified by the item context.
    Delay { delay: std::time::Duration },
    /// Class-C style immediate transmission.
    Immediate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoraModulationInfo {
    /// Bandwidth in kHz.
    pub bandwidth: u32,
    pub spreading_factor: u8,
    pub code_rate: String,
    pub polarization_inversion: bool,
}

/// One RX-window attempt within a downlink frame.
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkItem {
    pub phy_payload: Vec<u8>,
    /// Frequency in Hz.
    pub frequency: u32,
    /// TX power in dBm.
    pub power: i32,
    pub modulation: LoraModulationInfo,
    pub timing: DownlinkTiming,
    pub board: u32,
    pub antenna: u32,
    pub context: Vec<u8>,
}

/// A downlink addressed to one gateway; items are tried in order.
#[derive(Debug, Clone, PartialEq)]
pub struct DownlinkFrame {
    pub downlink_id: [u8; 16],
    pub gateway_id: Eui64,
    pub items: Vec<DownlinkItem>,
}

/// Cloneable handle for publishing downlinks to the gateway backend.
#[derive(Clone)]
pub struct DownlinkSender {
    tx: mpsc::Sender<DownlinkFrame>,
}

impl DownlinkSender {
    pub fn new(tx: mpsc::Sender<DownlinkFrame>) -> Self {
        Self { tx }
    }

    /// Channel-backed pair, for wiring and for tests.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<DownlinkFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub async fn send_downlink(&self, frame: DownlinkFrame) -> Result<(), Error> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| Error::DownlinkEmit("gateway backend closed".into()))
    }
}
