//! Error types for the roaming core.

use crate::backend::ResultCode;
use crate::lorawan::{DevAddr, Eui64, NetId};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No roaming agreement exists for the NetID. The frame is simply not
    /// ours to forward; callers abort the flow without raising an error.
    #[error("no roaming agreement for netid {0}")]
    NoAgreement(NetId),

    /// The DevAddr does not carry the prefix of any configured network.
    #[error("devaddr {0} does not belong to a configured netid")]
    NotOurNetId(DevAddr),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("invalid uplink token: {0}")]
    TokenInvalid(&'static str),

    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("invalid dl meta-data: {0}")]
    InvalidDlMetaData(&'static str),

    #[error("peer {server} unreachable during {op}: {source}")]
    PeerUnreachable {
        server: String,
        op: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("peer {server} timed out during {op}")]
    PeerTimeout { server: String, op: &'static str },

    #[error("peer rejected {op}: {code:?} ({description})")]
    PeerRejected {
        op: &'static str,
        code: ResultCode,
        description: String,
    },

    #[error("no join server for joineui {0}")]
    JsNotFound(Eui64),

    #[error("resolve error: {0}")]
    Resolve(String),

    #[error("frame counter regression: session has {current}, got {got}")]
    FCntRegression { current: u32, got: u32 },

    #[error("session expired or unknown")]
    SessionExpired,

    #[error("downlink emit failed: {0}")]
    DownlinkEmit(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// Aborts end the flow for this frame without being an error condition.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::NoAgreement(_) | Error::NotOurNetId(_))
    }
}
