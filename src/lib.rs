//! Passive-roaming LoRaWAN network server core.
//!
//! As a forwarding network server (fNS) this crate relays uplinks of foreign
//! devices to the network that owns them (resolved via Join Server and a local
//! roaming-agreement table) and transmits any returned downlink through the
//! gateway that heard the uplink. As a home/serving network server it accepts
//! PRStart/XmitData requests from peers and addresses downlinks to gateways it
//! only knows through an opaque uplink token.

pub mod api;
pub mod backend;
pub mod band;
pub mod config;
pub mod downlink;
pub mod error;
pub mod gateway;
pub mod joinserver;
pub mod lorawan;
pub mod roaming;
pub mod udp;
pub mod uplink;
