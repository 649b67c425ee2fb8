//! Downlink emission for passive roaming.
//!
//! Turns a peer's DLMetaData plus the gateway context recovered from the
//! echoed uplink token into a concrete gateway downlink frame: one item per
//! defined RX window, region modulation parameters, timing relative to the
//! uplink the context points at.

use std::time::Duration;

use tracing::info;

use crate::backend::DlMetaData;
use crate::band::{Band, DataRate, CODE_RATE};
use crate::error::Error;
use crate::gateway::{
    DownlinkFrame, DownlinkItem, DownlinkSender, DownlinkTiming, LoraModulationInfo, RxInfo,
};
use crate::roaming::gwinfo;

pub struct DownlinkEmitter {
    band: &'static Band,
    sender: DownlinkSender,
}

impl DownlinkEmitter {
    pub fn new(band: &'static Band, sender: DownlinkSender) -> Self {
        Self { band, sender }
    }

    /// Emit the peer's downlink through the gateway addressed by the first
    /// GWInfo element whose uplink token decodes.
    pub async fn emit(&self, dl: &DlMetaData, phy_payload: &[u8]) -> Result<(), Error> {
        let rx = dl
            .gw_info
            .iter()
            .find_map(|gw| gwinfo::unpack_ul_token(gw.ul_token.as_slice()).ok())
            .ok_or(Error::TokenInvalid("no decodable uplink token in gw info"))?;

        let frame = self.build_frame(&rx, phy_payload, dl)?;

        info!(
            gateway_id = %frame.gateway_id,
            items = frame.items.len(),
            "emitting passive-roaming downlink"
        );

        self.sender.send_downlink(frame).await
    }

    /// Build the gateway frame for a decoded uplink context.
    pub fn build_frame(
        &self,
        rx: &RxInfo,
        phy_payload: &[u8],
        dl: &DlMetaData,
    ) -> Result<DownlinkFrame, Error> {
        let class_c = dl.class_mode.as_deref() == Some("C");
        let rx_delay = dl.rx_delay_1.unwrap_or(1) as u64;

        let mut items = Vec::with_capacity(2);
        if let Some(freq) = dl.dl_freq_1 {
            let dr = dl
                .data_rate_1
                .ok_or(Error::InvalidDlMetaData("DLFreq1 without DataRate1"))?;
            items.push(self.item(rx, phy_payload, freq, dr, rx_delay, class_c)?);
        }
        if let Some(freq) = dl.dl_freq_2 {
            let dr = dl
                .data_rate_2
                .ok_or(Error::InvalidDlMetaData("DLFreq2 without DataRate2"))?;
            // The second window opens one second after the first.
            items.push(self.item(rx, phy_payload, freq, dr, rx_delay + 1, class_c)?);
        }

        if items.is_empty() {
            return Err(Error::InvalidDlMetaData("no downlink frequency set"));
        }

        Ok(DownlinkFrame {
            downlink_id: rand::random(),
            gateway_id: rx.gateway_id,
            items,
        })
    }

    fn item(
        &self,
        rx: &RxInfo,
        phy_payload: &[u8],
        freq_mhz: f64,
        dr: u8,
        delay_secs: u64,
        class_c: bool,
    ) -> Result<DownlinkItem, Error> {
        let (spreading_factor, bandwidth) = match self.band.data_rate(dr)? {
            DataRate::Lora {
                spreading_factor,
                bandwidth,
            } => (spreading_factor, bandwidth),
            DataRate::Fsk { .. } => {
                return Err(Error::InvalidDlMetaData("FSK downlink not supported"))
            }
        };

        let timing = if class_c {
            DownlinkTiming::Immediate
        } else {
            DownlinkTiming::Delay {
                delay: Duration::from_secs(delay_secs),
            }
        };

        Ok(DownlinkItem {
            phy_payload: phy_payload.to_vec(),
            frequency: (freq_mhz * 1_000_000.0).round() as u32,
            power: self.band.downlink_power(),
            modulation: LoraModulationInfo {
                bandwidth,
                spreading_factor,
                code_rate: CODE_RATE.into(),
                polarization_inversion: true,
            },
            timing,
            board: rx.board,
            antenna: rx.antenna,
            context: rx.context.clone(),
        })
    }
}
