//! Gateway Simulator
//!
//! Plays the gateway side of the Semtech UDP protocol against a running
//! lora-roam server: registers for downlinks with PULL_DATA, then pushes a
//! join-request and a roaming data uplink. Useful for testing without
//! hardware.
//!
//! Usage: cargo run --bin gateway-sim [server_addr]

use base64::Engine;
use std::env;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::{sleep, Duration};

const PROTOCOL_VERSION: u8 = 0x02;
const PUSH_DATA: u8 = 0x00;
const PUSH_ACK: u8 = 0x01;
const PULL_DATA: u8 = 0x02;
const PULL_RESP: u8 = 0x03;

/// Fake gateway EUI
const GATEWAY_EUI: [u8; 8] = [0x01, 0x02, 0x01, 0x02, 0x01, 0x02, 0x01, 0x02];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let server_addr: SocketAddr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:1680".to_string())
        .parse()?;

    println!("lora-roam Gateway Simulator");
    println!("  Target: {}", server_addr);
    println!("  Gateway EUI: {}", hex::encode(GATEWAY_EUI));
    println!();

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let mut token: u16 = 0;

    // Register for downlinks first, as a real packet forwarder would.
    token = token.wrapping_add(1);
    socket
        .send_to(&datagram(token, PULL_DATA, &[]), server_addr)
        .await?;
    println!("Sent PULL_DATA (downlink registration)");

    let scenarios = [
        (
            "Join Request (roaming device)",
            rxpk_json(&join_request_phy(), 1_000_000, -90, 2.0),
            Some("JoinRequest DevEUI=0807060504030201"),
        ),
        (
            "Unconfirmed Data Up (roaming DevAddr)",
            rxpk_json(&data_up_phy(), 2_000_000, -65, 7.5),
            Some("DevAddr=0d020304 FCnt=10 (roaming)"),
        ),
        ("Gateway Status", status_json(), None),
    ];

    for (desc, json, phy_note) in &scenarios {
        token = token.wrapping_add(1);

        let packet = datagram(token, PUSH_DATA, json.as_bytes());

        println!("Sending: {}", desc);
        if let Some(note) = phy_note {
            println!("   PHY: {}", note);
        }
        println!("   Size: {} bytes", packet.len());

        socket.send_to(&packet, server_addr).await?;

        // Wait for ACK
        let mut ack_buf = [0u8; 1024];
        match tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut ack_buf)).await {
            Ok(Ok((len, from))) => {
                if len >= 4 && ack_buf[3] == PUSH_ACK {
                    println!("   PUSH_ACK received from {}", from);
                } else if len >= 4 && ack_buf[3] == PULL_RESP {
                    println!(
                        "   PULL_RESP received ({} bytes): {}",
                        len,
                        String::from_utf8_lossy(&ack_buf[4..len])
                    );
                } else {
                    println!("   Unexpected response ({} bytes) from {}", len, from);
                }
            }
            Ok(Err(e)) => println!("   Recv error: {}", e),
            Err(_) => println!("   No ACK (timeout)"),
        }
        println!();

        sleep(Duration::from_secs(2)).await;
    }

    println!("Simulation complete.");
    Ok(())
}

/// Header + gateway EUI + body, ready to send.
fn datagram(token: u16, packet_type: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(12 + body.len());
    out.push(PROTOCOL_VERSION);
    out.extend_from_slice(&token.to_be_bytes());
    out.push(packet_type);
    out.extend_from_slice(&GATEWAY_EUI);
    out.extend_from_slice(body);
    out
}

/// One-rxpk PUSH_DATA body on the 868.1 MHz channel, SF11.
fn rxpk_json(phy: &[u8], tmst: u32, rssi: i32, lsnr: f64) -> String {
    let data = base64::engine::general_purpose::STANDARD.encode(phy);
    format!(
        r#"{{"rxpk":[{{"tmst":{tmst},"freq":868.1,"rssi":{rssi},"lsnr":{lsnr},"datr":"SF11BW125","codr":"4/5","size":{size},"data":"{data}"}}]}}"#,
        size = phy.len(),
    )
}

/// Join Request from a device homed on a roaming partner
fn join_request_phy() -> Vec<u8> {
    // MHDR=0x00 (JoinRequest)
    // JoinEUI (LE) + DevEUI (LE) + DevNonce + MIC = 23 bytes
    vec![
        0x00, // MHDR
        0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // JoinEUI 0102030405060708 (LE)
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // DevEUI 0807060504030201 (LE)
        0x7b, 0x00, // DevNonce = 123
        0xEF, 0xBE, 0xAD, 0xDE, // MIC
    ]
}

/// Unconfirmed Data Up with a NetID 060606 address prefix
fn data_up_phy() -> Vec<u8> {
    // DevAddr=0x0D020304 (prefix of NetID 060606), FCnt=10, no payload
    vec![
        0x40, // MHDR (UnconfirmedDataUp)
        0x04, 0x03, 0x02, 0x0D, // DevAddr (LE)
        0x00, // FCtrl
        0x0A, 0x00, // FCnt (LE)
        0x12, 0x34, 0x56, 0x78, // MIC
    ]
}

/// Gateway status report (no rxpk)
fn status_json() -> String {
    concat!(
        r#"{"stat":{"time":"2026-08-02 10:41:12 UTC","#,
        r#""lati":52.2297,"long":21.0122,"alti":110,"#,
        r#""rxnb":12,"rxok":11,"rxfw":11,"ackr":91.7,"dwnb":1,"txnb":1}}"#,
    )
    .to_string()
}
