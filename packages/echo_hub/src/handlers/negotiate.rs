use axum::{
    Json,
    extract::{Query, State},
};
use hub_protocol::TransferFormat;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::registry::ConnectionId;

/// Highest negotiate protocol version the server speaks.
pub const NEGOTIATE_VERSION: u32 = 1;

#[derive(Debug, Default, Deserialize)]
pub struct NegotiateQuery {
    #[serde(rename = "negotiateVersion")]
    pub negotiate_version: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub negotiate_version: u32,
    pub connection_id: String,
    /// Only sent from version 1 on; older clients reuse the connection id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_token: Option<String>,
    pub available_transports: Vec<AvailableTransport>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    pub transfer_formats: Vec<TransferFormat>,
}

/// `POST {hub}/negotiate`: hand out a connection token and the transports
/// the hub accepts. Only WebSockets is offered.
pub async fn negotiate_handler(
    State(state): State<AppState>,
    Query(query): Query<NegotiateQuery>,
) -> Json<NegotiateResponse> {
    let version = query.negotiate_version.unwrap_or(0).min(NEGOTIATE_VERSION);
    let id = ConnectionId::generate().to_string();

    Json(NegotiateResponse {
        negotiate_version: version,
        connection_token: (version >= 1).then(|| id.clone()),
        connection_id: id,
        available_transports: vec![AvailableTransport {
            transport: "WebSockets".to_string(),
            transfer_formats: vec![state.hub.config.encoding.transfer_format()],
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use axum::{Router, body::Body, http::Request, http::StatusCode, routing::post};
    use hub_protocol::Encoding;
    use tower::ServiceExt;

    async fn negotiate(config: HubConfig, uri: &str) -> serde_json::Value {
        let state = crate::test_helpers::test_app_state_with(config);
        let app = Router::new()
            .route("/TestHub/negotiate", post(negotiate_handler))
            .with_state(state);
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_negotiate_v1() {
        let json = negotiate(
            crate::test_helpers::test_hub_config(),
            "/TestHub/negotiate?negotiateVersion=1",
        )
        .await;

        assert_eq!(json["negotiateVersion"], 1);
        assert!(!json["connectionId"].as_str().unwrap().is_empty());
        assert_eq!(json["connectionToken"], json["connectionId"]);
        assert_eq!(json["availableTransports"][0]["transport"], "WebSockets");
        assert_eq!(
            json["availableTransports"][0]["transferFormats"],
            serde_json::json!(["Text"])
        );
    }

    #[tokio::test]
    async fn test_negotiate_without_version_omits_token() {
        let json = negotiate(crate::test_helpers::test_hub_config(), "/TestHub/negotiate").await;
        assert_eq!(json["negotiateVersion"], 0);
        assert!(json.get("connectionToken").is_none());
    }

    #[tokio::test]
    async fn test_negotiate_messagepack_offers_binary() {
        let config = HubConfig {
            encoding: Encoding::MessagePack,
            ..crate::test_helpers::test_hub_config()
        };
        let json = negotiate(config, "/TestHub/negotiate?negotiateVersion=5").await;
        assert_eq!(json["negotiateVersion"], 1);
        assert_eq!(
            json["availableTransports"][0]["transferFormats"],
            serde_json::json!(["Binary"])
        );
    }

    #[tokio::test]
    async fn test_each_negotiate_gets_a_fresh_id() {
        let a = negotiate(crate::test_helpers::test_hub_config(), "/TestHub/negotiate?negotiateVersion=1").await;
        let b = negotiate(crate::test_helpers::test_hub_config(), "/TestHub/negotiate?negotiateVersion=1").await;
        assert_ne!(a["connectionId"], b["connectionId"]);
    }
}
