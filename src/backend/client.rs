//! Typed HTTP client for backend-interfaces peer operations.
//!
//! One JSON envelope per POST to the peer endpoint. Every request carries a
//! fresh non-zero transaction id; answers echo it so an async-capable peer
//! can correlate out-of-band replies later.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{
    BasePayload, DlMetaData, HomeNsAnsPayload, HomeNsReqPayload, MessageType, PrStartAnsPayload,
    PrStartReqPayload, ResultCode, UlMetaData, XmitDataAnsPayload, XmitDataReqPayload,
    PROTOCOL_VERSION,
};
use crate::error::Error;
use crate::lorawan::Eui64;

/// Per-call timeout for peer requests.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

static TRANSACTION_ID: AtomicU32 = AtomicU32::new(1);

/// Mint a fresh non-zero 32-bit transaction id.
pub fn next_transaction_id() -> u32 {
    loop {
        let id = TRANSACTION_ID.fetch_add(1, Ordering::Relaxed);
        if id != 0 {
            return id;
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Our id, hex (NetID for NS-to-NS, also NetID toward a Join Server).
    pub sender_id: String,
    /// Peer id, hex (NetID, or JoinEUI for HomeNSReq).
    pub receiver_id: String,
    /// Peer endpoint URL.
    pub server: String,
}

/// Typed client for one peer endpoint.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    config: ClientConfig,
}

impl Client {
    pub fn new(http: reqwest::Client, config: ClientConfig) -> Self {
        Self { http, config }
    }

    pub fn server(&self) -> &str {
        &self.config.server
    }

    pub fn receiver_id(&self) -> &str {
        &self.config.receiver_id
    }

    fn base(&self, message_type: MessageType) -> BasePayload {
        BasePayload {
            protocol_version: PROTOCOL_VERSION.into(),
            sender_id: self.config.sender_id.clone(),
            receiver_id: self.config.receiver_id.clone(),
            transaction_id: next_transaction_id(),
            message_type,
        }
    }

    /// Resolve a DevEUI to its home NetID via the Join Server.
    pub async fn home_ns_req(&self, dev_eui: Eui64) -> Result<HomeNsAnsPayload, Error> {
        let req = HomeNsReqPayload {
            base: self.base(MessageType::HomeNSReq),
            dev_eui,
        };
        let ans: HomeNsAnsPayload = self.post("HomeNSReq", &req).await?;
        if ans.base.result.result_code != ResultCode::Success {
            return Err(Error::Resolve(format!(
                "HomeNSReq answered {:?}: {}",
                ans.base.result.result_code, ans.base.result.description
            )));
        }
        Ok(ans)
    }

    /// Open a passive-roaming relationship for one frame or session.
    pub async fn pr_start_req(
        &self,
        phy_payload: Vec<u8>,
        ul_meta_data: UlMetaData,
    ) -> Result<PrStartAnsPayload, Error> {
        let req = PrStartReqPayload {
            base: self.base(MessageType::PRStartReq),
            phy_payload: phy_payload.into(),
            ul_meta_data,
        };
        let ans: PrStartAnsPayload = self.post("PRStartReq", &req).await?;
        self.check_result("PRStartReq", &ans.base.result)?;
        Ok(ans)
    }

    /// Forward a frame within an established roaming session.
    pub async fn xmit_data_req(
        &self,
        phy_payload: Vec<u8>,
        ul_meta_data: Option<UlMetaData>,
        dl_meta_data: Option<DlMetaData>,
    ) -> Result<XmitDataAnsPayload, Error> {
        let req = XmitDataReqPayload {
            base: self.base(MessageType::XmitDataReq),
            phy_payload: phy_payload.into(),
            ul_meta_data,
            dl_meta_data,
        };
        let ans: XmitDataAnsPayload = self.post("XmitDataReq", &req).await?;
        self.check_result("XmitDataReq", &ans.base.result)?;
        Ok(ans)
    }

    fn check_result(
        &self,
        op: &'static str,
        result: &super::ResultPayload,
    ) -> Result<(), Error> {
        if result.result_code != ResultCode::Success {
            return Err(Error::PeerRejected {
                op,
                code: result.result_code,
                description: result.description.clone(),
            });
        }
        Ok(())
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        op: &'static str,
        body: &B,
    ) -> Result<R, Error> {
        debug!(server = %self.config.server, op, "backend request");

        let resp = self
            .http
            .post(&self.config.server)
            .timeout(REQUEST_TIMEOUT)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::PeerTimeout {
                        server: self.config.server.clone(),
                        op,
                    }
                } else {
                    Error::PeerUnreachable {
                        server: self.config.server.clone(),
                        op,
                        source: e,
                    }
                }
            })?;

        let resp = resp.error_for_status().map_err(|e| Error::PeerUnreachable {
            server: self.config.server.clone(),
            op,
            source: e,
        })?;

        resp.json::<R>().await.map_err(|e| Error::PeerUnreachable {
            server: self.config.server.clone(),
            op,
            source: e,
        })
    }
}
