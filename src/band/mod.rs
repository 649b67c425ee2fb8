//! Region parameters.
//!
//! Only the slice the roaming core needs: the data-rate table mapping DR
//! indices to LoRa modulation parameters (and back from packet-forwarder
//! `datr` strings), the RF-region name carried in ULMetaData, and the
//! region's default downlink TX power.

use crate::error::Error;

/// LoRa code rate used for all downlinks in this region.
pub const CODE_RATE: &str = "4/5";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataRate {
    Lora {
        spreading_factor: u8,
        /// Bandwidth in kHz.
        bandwidth: u32,
    },
    Fsk {
        bitrate: u32,
    },
}

#[derive(Debug)]
pub struct Band {
    name: &'static str,
    data_rates: &'static [DataRate],
    downlink_power: i32,
}

/// EU868 DR0..DR7.
const EU868_DATA_RATES: &[DataRate] = &[
    DataRate::Lora { spreading_factor: 12, bandwidth: 125 },
    DataRate::Lora { spreading_factor: 11, bandwidth: 125 },
    DataRate::Lora { spreading_factor: 10, bandwidth: 125 },
    DataRate::Lora { spreading_factor: 9, bandwidth: 125 },
    DataRate::Lora { spreading_factor: 8, bandwidth: 125 },
    DataRate::Lora { spreading_factor: 7, bandwidth: 125 },
    DataRate::Lora { spreading_factor: 7, bandwidth: 250 },
    DataRate::Fsk { bitrate: 50_000 },
];

static EU868: Band = Band {
    name: "EU868",
    data_rates: EU868_DATA_RATES,
    downlink_power: 14,
};

impl Band {
    /// Look a band up by its configured name.
    pub fn by_name(name: &str) -> Result<&'static Band, Error> {
        match name {
            "EU868" => Ok(&EU868),
            other => Err(Error::Config(format!("unsupported band: {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Default downlink TX power in dBm.
    pub fn downlink_power(&self) -> i32 {
        self.downlink_power
    }

    pub fn data_rate(&self, index: u8) -> Result<DataRate, Error> {
        self.data_rates
            .get(index as usize)
            .copied()
            .ok_or_else(|| Error::InvalidDlMetaData("data-rate index out of range"))
    }

    /// DR index for a packet-forwarder `datr` string such as "SF11BW125".
    pub fn data_rate_index(&self, datr: &str) -> Option<u8> {
        let parsed = parse_datr(datr)?;
        self.data_rates
            .iter()
            .position(|dr| *dr == parsed)
            .map(|i| i as u8)
    }

    /// `datr` string for a DR index, for PULL_RESP txpk.
    pub fn datr_string(&self, index: u8) -> Result<String, Error> {
        match self.data_rate(index)? {
            DataRate::Lora {
                spreading_factor,
                bandwidth,
            } => Ok(format!("SF{}BW{}", spreading_factor, bandwidth)),
            DataRate::Fsk { bitrate } => Ok(bitrate.to_string()),
        }
    }
}

fn parse_datr(datr: &str) -> Option<DataRate> {
    if let Some(rest) = datr.strip_prefix("SF") {
        let (sf, bw) = rest.split_once("BW")?;
        return Some(DataRate::Lora {
            spreading_factor: sf.parse().ok()?,
            bandwidth: bw.parse().ok()?,
        });
    }
    datr.parse().ok().map(|bitrate| DataRate::Fsk { bitrate })
}
