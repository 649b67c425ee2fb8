//! Forwarding flows (fNS side).
//!
//! One task per uplink. Join-requests are resolved to a home NetID through
//! the Join Server and opened with PRStartReq; data uplinks are matched
//! against stored sessions first (XmitDataReq) and otherwise against the
//! DevAddr's NetID prefix (PRStartReq, stateless or stateful depending on
//! the answered lifetime). A frame that is not ours to forward ends the flow
//! quietly.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::UlMetaData;
use crate::band::Band;
use crate::downlink::DownlinkEmitter;
use crate::error::Error;
use crate::gateway::UplinkFrame;
use crate::joinserver::JoinServerDirectory;
use crate::lorawan::{self, DevAddr, Eui64, Frame, NetId};
use crate::roaming::session::{clamped_lifetime, PassiveRoamingSession, SessionStore};
use crate::roaming::{gwinfo, RoamingDirectory};

pub struct ForwardingFlow {
    join_servers: Arc<JoinServerDirectory>,
    roaming: Arc<RoamingDirectory>,
    sessions: Arc<SessionStore>,
    band: &'static Band,
    emitter: DownlinkEmitter,
}

impl ForwardingFlow {
    pub fn new(
        join_servers: Arc<JoinServerDirectory>,
        roaming: Arc<RoamingDirectory>,
        sessions: Arc<SessionStore>,
        band: &'static Band,
        emitter: DownlinkEmitter,
    ) -> Self {
        Self {
            join_servers,
            roaming,
            sessions,
            band,
            emitter,
        }
    }

    /// Entry point for one uplink. Errors terminate the flow for this frame
    /// and are logged here; nothing propagates past the flow boundary.
    pub async fn handle_uplink(&self, frame: UplinkFrame) {
        let ctx_id = Uuid::new_v4();

        let decoded = match lorawan::decode_phy_payload(&frame.phy_payload) {
            Ok(f) => f,
            Err(e) => {
                warn!(ctx_id = %ctx_id, error = %e, "undecodable uplink");
                return;
            }
        };

        let result = match &decoded {
            Frame::JoinRequest {
                join_eui, dev_eui, ..
            } => self.handle_join(ctx_id, &frame, *join_eui, *dev_eui).await,
            Frame::Data {
                mtype,
                dev_addr,
                fcnt,
                ..
            } if mtype.is_uplink_data() => {
                self.handle_data(ctx_id, &frame, *dev_addr, *fcnt).await
            }
            other => {
                debug!(ctx_id = %ctx_id, frame = %other, "frame type not forwarded");
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(ctx_id = %ctx_id, error = %e, "uplink forwarding failed");
        }
    }

    /// Join path: JoinEUI → Join Server → home NetID → peer → downlink.
    async fn handle_join(
        &self,
        ctx_id: Uuid,
        frame: &UplinkFrame,
        join_eui: Eui64,
        dev_eui: Eui64,
    ) -> Result<(), Error> {
        let js = self.join_servers.client_for(join_eui)?;
        let ans = js.home_ns_req(dev_eui).await?;
        let h_net_id = ans.h_net_id;

        info!(
            ctx_id = %ctx_id,
            join_eui = %join_eui,
            dev_eui = %dev_eui,
            net_id = %h_net_id,
            "resolved joineui to netid"
        );

        let (client, agreement) = match self.roaming.client_for(h_net_id) {
            Ok(v) => v,
            Err(e) if e.is_abort() => {
                warn!(
                    ctx_id = %ctx_id,
                    dev_eui = %dev_eui,
                    net_id = %h_net_id,
                    "no roaming agreement for netid"
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let ul = self.ul_meta_data(Some(dev_eui), frame, agreement.check_mic);
        let ans = client.pr_start_req(frame.phy_payload.clone(), ul).await?;

        let dl = ans
            .dl_meta_data
            .ok_or(Error::ProtocolViolation("PRStartAns without DLMetaData"))?;
        self.emitter.emit(&dl, ans.phy_payload.as_slice()).await
    }

    /// Data path: session-candidate forwarding, else PRStart per matching
    /// agreement.
    async fn handle_data(
        &self,
        ctx_id: Uuid,
        frame: &UplinkFrame,
        dev_addr: DevAddr,
        fcnt: u16,
    ) -> Result<(), Error> {
        for session in self.sessions.get_by_dev_addr(dev_addr) {
            if let Some(full_fcnt) = session.accepts_frame(&frame.phy_payload, fcnt) {
                return self.forward_in_session(ctx_id, frame, session, full_fcnt).await;
            }
        }

        let peers: Vec<NetId> = self
            .roaming
            .agreements()
            .iter()
            .filter(|a| a.passive_roaming && dev_addr.is_net_id(a.net_id))
            .map(|a| a.net_id)
            .collect();

        if peers.is_empty() {
            debug!(
                ctx_id = %ctx_id,
                dev_addr = %dev_addr,
                "devaddr does not match a roaming agreement"
            );
            return Ok(());
        }

        for net_id in peers {
            self.start_data_roaming(ctx_id, frame, dev_addr, fcnt, net_id)
                .await?;
        }
        Ok(())
    }

    /// Forward a frame within an established session via XmitDataReq.
    async fn forward_in_session(
        &self,
        ctx_id: Uuid,
        frame: &UplinkFrame,
        session: PassiveRoamingSession,
        full_fcnt: u32,
    ) -> Result<(), Error> {
        let (client, agreement) = match self.roaming.client_for(session.net_id) {
            Ok(v) => v,
            Err(e) if e.is_abort() => {
                // Agreement removed since the session was created.
                warn!(
                    ctx_id = %ctx_id,
                    net_id = %session.net_id,
                    dev_addr = %session.dev_addr,
                    "session peer no longer has an agreement"
                );
                self.sessions.delete(session.session_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let ul = self.ul_meta_data(session.dev_eui, frame, agreement.check_mic);
        client
            .xmit_data_req(frame.phy_payload.clone(), Some(ul), None)
            .await?;
        self.sessions.advance_f_cnt(session.session_id, full_fcnt)?;

        info!(
            ctx_id = %ctx_id,
            dev_addr = %session.dev_addr,
            net_id = %session.net_id,
            f_cnt_up = full_fcnt,
            "forwarded uplink in roaming session"
        );
        Ok(())
    }

    /// Open a roaming relationship for a data uplink; persist a session when
    /// the peer declares a lifetime, stay stateless otherwise.
    async fn start_data_roaming(
        &self,
        ctx_id: Uuid,
        frame: &UplinkFrame,
        dev_addr: DevAddr,
        fcnt: u16,
        net_id: NetId,
    ) -> Result<(), Error> {
        let (client, agreement) = self.roaming.client_for(net_id)?;

        let ul = self.ul_meta_data(None, frame, agreement.check_mic);
        let ans = client.pr_start_req(frame.phy_payload.clone(), ul).await?;

        let lifetime_secs = ans.lifetime.unwrap_or(0);
        if lifetime_secs > 0 {
            let (lorawan11, f_nwk_s_int_key) = if let Some(env) = &ans.f_nwk_s_int_key {
                (true, Some(env.unwrap_key(agreement.kek_ref())?))
            } else if let Some(env) = &ans.nwk_s_key {
                (false, Some(env.unwrap_key(agreement.kek_ref())?))
            } else {
                (false, None)
            };

            let session = PassiveRoamingSession {
                session_id: Uuid::nil(),
                net_id,
                dev_addr,
                dev_eui: ans.dev_eui,
                lifetime: clamped_lifetime(
                    Duration::from_secs(lifetime_secs),
                    agreement.passive_roaming_lifetime,
                ),
                lorawan11,
                f_nwk_s_int_key,
                s_nwk_s_int_key: None,
                nwk_s_enc_key: None,
                // The answered counter covers the frame just forwarded.
                f_cnt_up: ans.f_cnt_up.unwrap_or(fcnt as u32) + 1,
            };
            let session_id = self.sessions.put(session);

            info!(
                ctx_id = %ctx_id,
                dev_addr = %dev_addr,
                net_id = %net_id,
                session_id = %session_id,
                lifetime_secs,
                "stored passive-roaming session"
            );
        }

        if let Some(dl) = &ans.dl_meta_data {
            self.emitter.emit(dl, ans.phy_payload.as_slice()).await?;
        }
        Ok(())
    }

    /// `dl_allowed` follows the agreement's checkMIC flag: only a peer that
    /// verifies the frame may ask for a downlink through our gateways.
    fn ul_meta_data(
        &self,
        dev_eui: Option<Eui64>,
        frame: &UplinkFrame,
        dl_allowed: bool,
    ) -> UlMetaData {
        UlMetaData {
            dev_eui,
            dev_addr: None,
            ul_freq: Some(frame.tx_info.frequency as f64 / 1_000_000.0),
            data_rate: Some(frame.tx_info.dr),
            recv_time: gwinfo::recv_time_from_rx_info(&frame.rx_info),
            rf_region: self.band.name().into(),
            gw_cnt: Some(frame.rx_info.len()),
            gw_info: gwinfo::rx_info_to_gw_info(&frame.rx_info, dl_allowed),
        }
    }
}
