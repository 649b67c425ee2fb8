//! Inbound roaming API (hNS/sNS side).
//!
//! A single POST endpoint accepting backend-interfaces JSON envelopes from
//! peers. Internal failures are translated to a result code in the answer;
//! the only transport-level error is an unparseable envelope.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{info, warn};

use crate::backend::{
    BasePayload, BasePayloadResult, MessageType, PrStartAnsPayload, ResultCode, ResultPayload,
    XmitDataAnsPayload, XmitDataReqPayload, PROTOCOL_VERSION,
};
use crate::downlink::DownlinkEmitter;
use crate::error::Error;
use crate::lorawan::NetId;
use crate::roaming::RoamingDirectory;

pub struct ApiState {
    pub net_id: NetId,
    pub roaming: Arc<RoamingDirectory>,
    pub emitter: Arc<DownlinkEmitter>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", post(handle)).with_state(state)
}

async fn handle(State(state): State<Arc<ApiState>>, body: Bytes) -> Response {
    let base: BasePayload = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(e) => {
            warn!(error = %e, "unparseable request envelope");
            return (StatusCode::BAD_REQUEST, "invalid json envelope").into_response();
        }
    };

    let result = dispatch(&state, &base, &body).await;

    info!(
        sender_id = %base.sender_id,
        message_type = ?base.message_type,
        transaction_id = base.transaction_id,
        result_code = ?result.result_code,
        "roaming api request"
    );

    let ans_base = BasePayloadResult {
        base: BasePayload {
            protocol_version: PROTOCOL_VERSION.into(),
            sender_id: state.net_id.to_string(),
            receiver_id: base.sender_id.clone(),
            transaction_id: base.transaction_id,
            message_type: base.message_type.ans(),
        },
        result,
    };

    let body = match base.message_type {
        MessageType::PRStartReq => serde_json::to_value(PrStartAnsPayload {
            base: ans_base,
            phy_payload: Default::default(),
            dev_eui: None,
            lifetime: None,
            f_nwk_s_int_key: None,
            nwk_s_key: None,
            f_cnt_up: None,
            dl_meta_data: None,
        }),
        MessageType::XmitDataReq => serde_json::to_value(XmitDataAnsPayload { base: ans_base }),
        _ => serde_json::to_value(ans_base),
    }
    .expect("serialize answer payload");

    (StatusCode::OK, Json(body)).into_response()
}

async fn dispatch(state: &ApiState, base: &BasePayload, body: &[u8]) -> ResultPayload {
    if !state.roaming.is_known_sender(&base.sender_id) {
        return ResultPayload {
            result_code: ResultCode::UnknownSender,
            description: format!("no agreement for sender {}", base.sender_id),
        };
    }

    match base.message_type {
        MessageType::XmitDataReq => handle_xmit_data(state, body).await,
        // Accepted for a roaming partner; session establishment as a serving
        // network lives in the activation pipeline, not in this endpoint.
        MessageType::PRStartReq => ResultPayload::new(ResultCode::Success),
        other => ResultPayload {
            result_code: ResultCode::MalformedRequest,
            description: format!("unsupported message type {:?}", other),
        },
    }
}

/// XmitDataReq from a peer. The downlink-return case carries DLMetaData whose
/// GWInfo echoes one of our uplink tokens; the first one that decodes selects
/// the gateway.
async fn handle_xmit_data(state: &ApiState, body: &[u8]) -> ResultPayload {
    let req: XmitDataReqPayload = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return ResultPayload {
                result_code: ResultCode::MalformedRequest,
                description: e.to_string(),
            }
        }
    };

    if let Some(dl) = &req.dl_meta_data {
        if dl.gw_info.iter().all(|gw| gw.ul_token.is_empty()) {
            return ResultPayload {
                result_code: ResultCode::MalformedRequest,
                description: "DLMetaData without uplink token".into(),
            };
        }
        return match state.emitter.emit(dl, req.phy_payload.as_slice()).await {
            Ok(()) => ResultPayload::new(ResultCode::Success),
            Err(e) => ResultPayload {
                result_code: result_code_for(&e),
                description: e.to_string(),
            },
        };
    }

    if req.ul_meta_data.is_some() {
        // Uplink toward us as home network: acknowledged; delivery to the
        // application layer is outside the roaming core.
        return ResultPayload::new(ResultCode::Success);
    }

    ResultPayload {
        result_code: ResultCode::MalformedRequest,
        description: "XmitDataReq without ULMetaData or DLMetaData".into(),
    }
}

fn result_code_for(e: &Error) -> ResultCode {
    match e {
        Error::TokenInvalid(_) => ResultCode::Other,
        Error::InvalidDlMetaData(_) | Error::MalformedRequest(_) => ResultCode::MalformedRequest,
        Error::DownlinkEmit(_) => ResultCode::XmitFailed,
        _ => ResultCode::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::Band;
    use crate::config::RoamingServer;
    use crate::gateway::{DownlinkSender, RxInfo};
    use crate::lorawan::Eui64;
    use crate::roaming::gwinfo;

    fn state() -> (Arc<ApiState>, tokio::sync::mpsc::Receiver<crate::gateway::DownlinkFrame>) {
        let roaming = RoamingDirectory::from_config(
            &[RoamingServer {
                net_id: "060606".into(),
                server: "http://peer.example".into(),
                sender_id: None,
                receiver_id: None,
                passive_roaming: true,
                check_mic: true,
                passive_roaming_lifetime_secs: 60,
                async_interface: false,
                kek_label: None,
                kek_key: None,
            }],
            NetId([3, 2, 1]),
        )
        .unwrap();

        let (sender, rx) = DownlinkSender::channel(8);
        let emitter = DownlinkEmitter::new(Band::by_name("EU868").unwrap(), sender);
        (
            Arc::new(ApiState {
                net_id: NetId([3, 2, 1]),
                roaming: Arc::new(roaming),
                emitter: Arc::new(emitter),
            }),
            rx,
        )
    }

    fn ul_token() -> Vec<u8> {
        gwinfo::pack_ul_token(&RxInfo {
            gateway_id: Eui64([1, 2, 1, 2, 1, 2, 1, 2]),
            rssi: -10,
            snr: 3.0,
            board: 1,
            antenna: 0,
            location: None,
            context: vec![1, 2, 3],
            time: None,
        })
    }

    async fn post(state: Arc<ApiState>, body: serde_json::Value) -> serde_json::Value {
        let resp = handle(State(state), Bytes::from(body.to_string())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_xmit_data_downlink_return() {
        let (state, mut dl_rx) = state();
        let ans = post(
            state,
            serde_json::json!({
                "ProtocolVersion": "1.0",
                "SenderID": "060606",
                "ReceiverID": "030201",
                "TransactionID": 17,
                "MessageType": "XmitDataReq",
                "PHYPayload": "010203",
                "DLMetaData": {
                    "DLFreq1": 868.1,
                    "DLFreq2": 868.2,
                    "RXDelay1": 1,
                    "DataRate1": 3,
                    "DataRate2": 2,
                    "ClassMode": "A",
                    "GWInfo": [{"ULToken": hex::encode(ul_token())}]
                }
            }),
        )
        .await;

        assert_eq!(ans["Result"]["ResultCode"], "Success");
        assert_eq!(ans["MessageType"], "XmitDataAns");
        assert_eq!(ans["TransactionID"], 17);
        assert_eq!(ans["SenderID"], "030201");
        assert_eq!(ans["ReceiverID"], "060606");

        let frame = dl_rx.recv().await.unwrap();
        assert_eq!(frame.gateway_id, Eui64([1, 2, 1, 2, 1, 2, 1, 2]));
        assert_eq!(frame.items.len(), 2);
        assert_eq!(frame.items[0].phy_payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_unknown_sender_rejected() {
        let (state, _dl_rx) = state();
        let ans = post(
            state,
            serde_json::json!({
                "ProtocolVersion": "1.0",
                "SenderID": "070707",
                "ReceiverID": "030201",
                "TransactionID": 1,
                "MessageType": "XmitDataReq",
            }),
        )
        .await;
        assert_eq!(ans["Result"]["ResultCode"], "UnknownSender");
    }

    #[tokio::test]
    async fn test_unsupported_type_is_malformed() {
        let (state, _dl_rx) = state();
        let ans = post(
            state,
            serde_json::json!({
                "ProtocolVersion": "1.0",
                "SenderID": "060606",
                "ReceiverID": "030201",
                "TransactionID": 2,
                "MessageType": "HomeNSReq",
                "DevEUI": "0807060504030201",
            }),
        )
        .await;
        assert_eq!(ans["Result"]["ResultCode"], "MalformedRequest");
    }

    #[tokio::test]
    async fn test_pr_start_acknowledged() {
        let (state, _dl_rx) = state();
        let ans = post(
            state,
            serde_json::json!({
                "ProtocolVersion": "1.0",
                "SenderID": "060606",
                "ReceiverID": "030201",
                "TransactionID": 3,
                "MessageType": "PRStartReq",
                "PHYPayload": "00",
                "ULMetaData": {"RecvTime": "2024-05-01T12:00:00Z"},
            }),
        )
        .await;
        assert_eq!(ans["Result"]["ResultCode"], "Success");
        assert_eq!(ans["MessageType"], "PRStartAns");
    }

    #[tokio::test]
    async fn test_undecodable_token_is_other() {
        let (state, _dl_rx) = state();
        let ans = post(
            state,
            serde_json::json!({
                "ProtocolVersion": "1.0",
                "SenderID": "060606",
                "ReceiverID": "030201",
                "TransactionID": 4,
                "MessageType": "XmitDataReq",
                "PHYPayload": "01",
                "DLMetaData": {
                    "DLFreq1": 868.1,
                    "DataRate1": 1,
                    "GWInfo": [{"ULToken": "ff00"}]
                }
            }),
        )
        .await;
        assert_eq!(ans["Result"]["ResultCode"], "Other");
    }

    #[tokio::test]
    async fn test_envelope_parse_failure_is_transport_error() {
        let (state, _dl_rx) = state();
        let resp = handle(State(state), Bytes::from_static(b"not json")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
