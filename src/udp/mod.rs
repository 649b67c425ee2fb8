//! Semtech UDP Packet Forwarder bridge.
//!
//! The concrete gateway backend: PUSH_DATA rxpks become [`UplinkFrame`]s fed
//! to the forwarding flow; PULL_DATA registers the gateway's return address;
//! downlink frames come back through the [`DownlinkSender`] handle and leave
//! as PULL_RESP. The concentrator counter (`tmst`) of the uplink rides along
//! as the RX context so a downlink can be timed against it.

pub mod protocol;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use base64::Engine;
use chrono::{DateTime, Utc};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::band::Band;
use crate::gateway::{DownlinkFrame, DownlinkSender, DownlinkTiming, RxInfo, TxInfo, UplinkFrame};
use crate::lorawan::Eui64;
use protocol::{GwmpPacket, PushDataPayload, Rxpk, Txpk};

type GatewayAddrs = Arc<Mutex<HashMap<Eui64, SocketAddr>>>;

/// Start the UDP server. Uplinks are pushed into `uplink_tx`; the returned
/// handle publishes downlinks back to their gateways.
pub async fn start_server(
    bind: &str,
    band: &'static Band,
    uplink_tx: mpsc::Sender<UplinkFrame>,
) -> anyhow::Result<DownlinkSender> {
    let socket = Arc::new(UdpSocket::bind(bind).await?);
    info!("UDP server listening on {}", bind);

    let gateways: GatewayAddrs = Arc::new(Mutex::new(HashMap::new()));
    let (downlink_tx, downlink_rx) = mpsc::channel::<DownlinkFrame>(16);

    {
        let socket = Arc::clone(&socket);
        let gateways = Arc::clone(&gateways);
        tokio::spawn(async move {
            if let Err(e) = recv_loop(socket, gateways, band, uplink_tx).await {
                error!("UDP receive loop failed: {}", e);
            }
        });
    }

    tokio::spawn(downlink_loop(socket, gateways, downlink_rx));

    Ok(DownlinkSender::new(downlink_tx))
}

async fn recv_loop(
    socket: Arc<UdpSocket>,
    gateways: GatewayAddrs,
    band: &'static Band,
    uplink_tx: mpsc::Sender<UplinkFrame>,
) -> anyhow::Result<()> {
    let mut buf = vec![0u8; 65535];

    loop {
        let (len, src) = socket.recv_from(&mut buf).await?;
        debug!("Received {} bytes from {}", len, src);

        match GwmpPacket::parse(&buf[..len]) {
            Ok(packet) => handle_packet(&socket, &gateways, band, &uplink_tx, src, packet).await,
            Err(e) => warn!("Failed to parse GWMP packet from {}: {}", src, e),
        }
    }
}

async fn handle_packet(
    socket: &UdpSocket,
    gateways: &GatewayAddrs,
    band: &'static Band,
    uplink_tx: &mpsc::Sender<UplinkFrame>,
    src: SocketAddr,
    packet: GwmpPacket,
) {
    match packet {
        GwmpPacket::PushData {
            token,
            gateway_eui,
            json,
        } => {
            let gateway_id = Eui64(gateway_eui);
            debug!(
                "PUSH_DATA from gateway {} (token: 0x{:04x})",
                gateway_id, token
            );

            // Send ACK immediately
            let ack = GwmpPacket::push_ack(token);
            if let Err(e) = socket.send_to(&ack, src).await {
                error!("Failed to send PUSH_ACK to {}: {}", src, e);
            }
            gateways
                .lock()
                .expect("gateway table lock")
                .insert(gateway_id, src);

            let payload: PushDataPayload = match serde_json::from_str(&json) {
                Ok(p) => p,
                Err(e) => {
                    warn!("Failed to parse PUSH_DATA JSON: {}", e);
                    return;
                }
            };

            for rxpk in payload.rxpk.unwrap_or_default() {
                match uplink_frame_from_rxpk(gateway_id, band, &rxpk) {
                    Ok(frame) => {
                        if uplink_tx.send(frame).await.is_err() {
                            warn!("uplink channel closed, dropping frame");
                        }
                    }
                    Err(e) => warn!("  Skipping rxpk: {}", e),
                }
            }

            if let Some(stat) = payload.stat {
                debug!("  Gateway status: {}", stat);
            }
        }
        GwmpPacket::PullData { token, gateway_eui } => {
            let gateway_id = Eui64(gateway_eui);
            debug!(
                "PULL_DATA from gateway {} (token: 0x{:04x})",
                gateway_id, token
            );

            let ack = GwmpPacket::pull_ack(token);
            if let Err(e) = socket.send_to(&ack, src).await {
                error!("Failed to send PULL_ACK to {}: {}", src, e);
            }
            gateways
                .lock()
                .expect("gateway table lock")
                .insert(gateway_id, src);
        }
        GwmpPacket::TxAck {
            token,
            gateway_eui,
            json,
        } => {
            debug!(
                "TX_ACK from gateway {} (token: 0x{:04x}): {:?}",
                Eui64(gateway_eui),
                token,
                json
            );
        }
    }
}

/// One rxpk becomes one uplink frame with a single-element RX set.
fn uplink_frame_from_rxpk(
    gateway_id: Eui64,
    band: &'static Band,
    rxpk: &Rxpk,
) -> anyhow::Result<UplinkFrame> {
    let phy_payload = base64::engine::general_purpose::STANDARD
        .decode(&rxpk.data)
        .map_err(|e| anyhow::anyhow!("Base64 decode error: {}", e))?;

    let dr = band
        .data_rate_index(&rxpk.datr)
        .ok_or_else(|| anyhow::anyhow!("unknown datr {}", rxpk.datr))?;

    let time = rxpk
        .time
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(UplinkFrame {
        rx_info: vec![RxInfo {
            gateway_id,
            rssi: rxpk.rssi as i32,
            snr: rxpk.lsnr.unwrap_or(0.0),
            board: 0,
            antenna: rxpk.rfch.unwrap_or(0) as u32,
            location: None,
            context: rxpk
                .tmst
                .map(|t| t.to_be_bytes().to_vec())
                .unwrap_or_default(),
            time,
        }],
        tx_info: TxInfo {
            frequency: (rxpk.freq * 1_000_000.0).round() as u32,
            dr,
        },
        phy_payload,
    })
}

async fn downlink_loop(
    socket: Arc<UdpSocket>,
    gateways: GatewayAddrs,
    mut downlink_rx: mpsc::Receiver<DownlinkFrame>,
) {
    while let Some(frame) = downlink_rx.recv().await {
        let addr = gateways
            .lock()
            .expect("gateway table lock")
            .get(&frame.gateway_id)
            .copied();

        let Some(addr) = addr else {
            warn!(
                "No known address for gateway {}, dropping downlink",
                frame.gateway_id
            );
            continue;
        };

        // GWMP carries one txpk per PULL_RESP; transmit the first window and
        // leave retries on the later windows to the sender of the next frame.
        let Some(item) = frame.items.first() else {
            warn!("Downlink frame without items for {}", frame.gateway_id);
            continue;
        };

        let txpk = match txpk_from_item(item) {
            Ok(t) => t,
            Err(e) => {
                warn!("Cannot build txpk: {}", e);
                continue;
            }
        };

        let token = u16::from_be_bytes([frame.downlink_id[0], frame.downlink_id[1]]);
        match GwmpPacket::pull_resp(token, &txpk) {
            Ok(packet) => {
                if let Err(e) = socket.send_to(&packet, addr).await {
                    error!("Failed to send PULL_RESP to {}: {}", addr, e);
                } else {
                    info!(
                        "PULL_RESP sent to gateway {} ({} bytes)",
                        frame.gateway_id, txpk.size
                    );
                }
            }
            Err(e) => error!("Failed to encode PULL_RESP: {}", e),
        }
    }
}

fn txpk_from_item(item: &crate::gateway::DownlinkItem) -> anyhow::Result<Txpk> {
    let (imme, tmst) = match &item.timing {
        DownlinkTiming::Immediate => (true, None),
        DownlinkTiming::Delay { delay } => {
            let context: [u8; 4] = item
                .context
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("missing uplink counter context"))?;
            let uplink_tmst = u32::from_be_bytes(context);
            (
                false,
                Some(uplink_tmst.wrapping_add(delay.as_micros() as u32)),
            )
        }
    };

    Ok(Txpk {
        imme,
        tmst,
        freq: item.frequency as f64 / 1_000_000.0,
        rfch: 0,
        powe: item.power,
        modu: "LORA".into(),
        datr: format!(
            "SF{}BW{}",
            item.modulation.spreading_factor, item.modulation.bandwidth
        ),
        codr: item.modulation.code_rate.clone(),
        ipol: item.modulation.polarization_inversion,
        size: item.phy_payload.len() as u16,
        data: base64::engine::general_purpose::STANDARD.encode(&item.phy_payload),
        brd: Some(item.board),
        ant: Some(item.antenna),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::LoraModulationInfo;
    use std::time::Duration;

    #[test]
    fn test_uplink_frame_from_rxpk() {
        let band = Band::by_name("EU868").unwrap();
        let rxpk = Rxpk {
            time: Some("2024-05-01T12:00:00Z".into()),
            tmst: Some(1_000_000),
            tmms: None,
            chan: None,
            rfch: Some(1),
            freq: 868.1,
            lsnr: Some(7.0),
            rssi: -60.0,
            modu: Some("LORA".into()),
            datr: "SF11BW125".into(),
            codr: Some("4/5".into()),
            size: 3,
            data: base64::engine::general_purpose::STANDARD.encode([1u8, 2, 3]),
        };

        let frame = uplink_frame_from_rxpk(Eui64([1; 8]), band, &rxpk).unwrap();
        assert_eq!(frame.phy_payload, vec![1, 2, 3]);
        assert_eq!(frame.tx_info.frequency, 868_100_000);
        assert_eq!(frame.tx_info.dr, 1);
        assert_eq!(frame.rx_info[0].rssi, -60);
        assert_eq!(frame.rx_info[0].snr, 7.0);
        assert_eq!(frame.rx_info[0].antenna, 1);
        assert_eq!(frame.rx_info[0].context, 1_000_000u32.to_be_bytes().to_vec());
        assert!(frame.rx_info[0].time.is_some());
    }

    #[test]
    fn test_unknown_datr_rejected() {
        let band = Band::by_name("EU868").unwrap();
        let rxpk = Rxpk {
            time: None,
            tmst: None,
            tmms: None,
            chan: None,
            rfch: None,
            freq: 868.1,
            lsnr: None,
            rssi: -60.0,
            modu: None,
            datr: "SF42BW125".into(),
            codr: None,
            size: 0,
            data: String::new(),
        };
        assert!(uplink_frame_from_rxpk(Eui64([1; 8]), band, &rxpk).is_err());
    }

    #[test]
    fn test_txpk_delay_timing() {
        let item = crate::gateway::DownlinkItem {
            phy_payload: vec![1, 2, 3, 4],
            frequency: 868_100_000,
            power: 14,
            modulation: LoraModulationInfo {
                bandwidth: 125,
                spreading_factor: 11,
                code_rate: "4/5".into(),
                polarization_inversion: true,
            },
            timing: DownlinkTiming::Delay {
                delay: Duration::from_secs(5),
            },
            board: 0,
            antenna: 0,
            context: 1_000_000u32.to_be_bytes().to_vec(),
        };

        let txpk = txpk_from_item(&item).unwrap();
        assert!(!txpk.imme);
        assert_eq!(txpk.tmst, Some(6_000_000));
        assert_eq!(txpk.datr, "SF11BW125");
        assert_eq!(txpk.freq, 868.1);
        assert_eq!(txpk.powe, 14);
        assert!(txpk.ipol);
    }

    #[test]
    fn test_txpk_immediate() {
        let item = crate::gateway::DownlinkItem {
            phy_payload: vec![1],
            frequency: 869_525_000,
            power: 14,
            modulation: LoraModulationInfo {
                bandwidth: 125,
                spreading_factor: 9,
                code_rate: "4/5".into(),
                polarization_inversion: true,
            },
            timing: DownlinkTiming::Immediate,
            board: 0,
            antenna: 0,
            context: vec![],
        };

        let txpk = txpk_from_item(&item).unwrap();
        assert!(txpk.imme);
        assert_eq!(txpk.tmst, None);
    }
}
