use std::{sync::Arc, time::Duration};

use axum::{
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer};

use wag_core::{config::Config, handler::MessageHandler};

use crate::handlers;

/// Webhook payloads are small JSON documents.
const MAX_BODY_SIZE: usize = 1024 * 1024;
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub handler: Arc<MessageHandler>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::health::root))
        .route("/health", get(handlers::health::health))
        .route(
            "/meta-whatsapp",
            get(handlers::webhook::verify).post(handlers::webhook::receive),
        )
        .route(
            "/progress-callback",
            post(handlers::progress::progress_callback),
        )
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ))
}

/// Serve the gateway on `BIND_ADDR` until ctrl-c.
pub async fn run_server(cfg: Arc<Config>, handler: Arc<MessageHandler>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(cfg.bind_addr).await?;
    tracing::info!("whatsapp gateway listening on {}", listener.local_addr()?);
    if cfg.progress_callback_url().is_none() {
        tracing::info!("GATEWAY_PUBLIC_URL not set, progress callbacks disabled");
    }

    let app = app(AppState { cfg, handler });
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {e}");
            }
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use hmac::{Hmac, Mac};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use sha2::Sha256;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tower::ServiceExt;
    use wag_core::{
        domain::{MediaId, MessageId, UserId},
        engine::{
            port::EnginePort,
            types::{ChatResponse, ProgressOptions, UserPreferences},
        },
        handler::HandlerSettings,
        messaging::port::MessagingPort,
        Result,
    };

    #[derive(Default)]
    struct FakeMessenger {
        texts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl MessagingPort for FakeMessenger {
        async fn send_text(&self, user_id: &UserId, text: &str) -> bool {
            self.texts
                .lock()
                .unwrap()
                .push((user_id.0.clone(), text.to_string()));
            true
        }

        async fn send_audio(&self, _user_id: &UserId, _audio_base64: &str) -> bool {
            true
        }

        async fn send_typing_indicator(&self, _message_id: &MessageId) -> bool {
            true
        }

        async fn download_media(&self, _media_id: &MediaId) -> Option<Vec<u8>> {
            None
        }
    }

    /// Reports every text it receives on a channel.
    struct FakeEngine {
        seen: mpsc::UnboundedSender<(String, String)>,
    }

    #[async_trait]
    impl EnginePort for FakeEngine {
        async fn send_text(
            &self,
            user_id: &UserId,
            message: &str,
            _progress: Option<&ProgressOptions>,
        ) -> Result<ChatResponse> {
            let _ = self.seen.send((user_id.0.clone(), message.to_string()));
            Ok(ChatResponse {
                responses: vec![format!("echo: {message}")],
                response_language: "en".to_string(),
                voice_audio_base64: None,
            })
        }

        async fn send_audio(
            &self,
            _user_id: &UserId,
            _audio: &[u8],
            _audio_format: &str,
            _progress: Option<&ProgressOptions>,
        ) -> Result<ChatResponse> {
            Err(wag_core::Error::External("unused".to_string()))
        }

        async fn get_user_preferences(&self, _user_id: &UserId) -> Result<UserPreferences> {
            Ok(UserPreferences::default())
        }

        async fn update_user_preferences(
            &self,
            _user_id: &UserId,
            preferences: &UserPreferences,
        ) -> Result<UserPreferences> {
            Ok(preferences.clone())
        }
    }

    struct Harness {
        app: Router,
        messenger: Arc<FakeMessenger>,
        seen: mpsc::UnboundedReceiver<(String, String)>,
    }

    fn test_config(extra_env: &[(&str, &str)]) -> Arc<Config> {
        let mut env = std::collections::HashMap::from([
            ("META_VERIFY_TOKEN", "verify"),
            ("META_WHATSAPP_TOKEN", "wa-token"),
            ("META_PHONE_NUMBER_ID", "123456789"),
            ("META_APP_SECRET", "app-secret"),
            ("ENGINE_BASE_URL", "http://localhost:8000"),
            ("ENGINE_API_KEY", "engine-key"),
        ]);
        env.extend(extra_env.iter().copied());
        Arc::new(Config::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap())
    }

    fn harness(extra_env: &[(&str, &str)]) -> Harness {
        let cfg = test_config(extra_env);

        let (tx, rx) = mpsc::unbounded_channel();
        let messenger = Arc::new(FakeMessenger::default());
        let engine = Arc::new(FakeEngine { seen: tx });
        let handler = Arc::new(MessageHandler::new(
            messenger.clone(),
            engine,
            HandlerSettings::from_config(&cfg),
        ));

        Harness {
            app: app(AppState { cfg, handler }),
            messenger,
            seen: rx,
        }
    }

    fn sign(body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(b"app-secret").unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn webhook_payload(from: &str, messages: Vec<Value>) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "object": "whatsapp_business_account",
            "entry": [{
                "changes": [{
                    "value": {
                        "contacts": [{"wa_id": from}],
                        "messages": messages,
                    }
                }]
            }]
        }))
        .unwrap()
    }

    fn text(id: &str, body: &str) -> Value {
        json!({
            "id": id,
            "type": "text",
            "timestamp": now_secs().to_string(),
            "text": {"body": body},
        })
    }

    fn now_secs() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    fn signed_post(body: Vec<u8>, user_agent: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/meta-whatsapp")
            .header("content-type", "application/json")
            .header("user-agent", user_agent)
            .header("x-hub-signature-256", sign(&body))
            .body(Body::from(body))
            .unwrap()
    }

    async fn read_body(resp: axum::response::Response) -> Vec<u8> {
        resp.into_body().collect().await.unwrap().to_bytes().to_vec()
    }

    async fn call(app: &Router, req: Request<Body>) -> axum::response::Response {
        app.clone().oneshot(req).await.unwrap()
    }

    #[tokio::test]
    async fn health_and_root() {
        let h = harness(&[]);

        let resp = call(&h.app, Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let v: Value = serde_json::from_slice(&read_body(resp).await).unwrap();
        assert_eq!(v, json!({"status": "healthy"}));

        let resp = call(&h.app, Request::get("/").body(Body::empty()).unwrap()).await;
        let v: Value = serde_json::from_slice(&read_body(resp).await).unwrap();
        assert_eq!(v, json!({"service": "whatsapp-gateway", "status": "running"}));
    }

    #[tokio::test]
    async fn verification_echoes_challenge() {
        let h = harness(&[]);
        let uri = "/meta-whatsapp?hub.mode=subscribe&hub.verify_token=verify&hub.challenge=12345";
        let resp = call(&h.app, Request::get(uri).body(Body::empty()).unwrap()).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "text/plain");
        assert_eq!(read_body(resp).await, b"12345");
    }

    #[tokio::test]
    async fn verification_rejects_wrong_token_or_mode() {
        let h = harness(&[]);
        for uri in [
            "/meta-whatsapp?hub.mode=subscribe&hub.verify_token=nope&hub.challenge=1",
            "/meta-whatsapp?hub.mode=unsubscribe&hub.verify_token=verify&hub.challenge=1",
            "/meta-whatsapp",
        ] {
            let resp = call(&h.app, Request::get(uri).body(Body::empty()).unwrap()).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{uri}");
        }
    }

    #[tokio::test]
    async fn text_message_is_dispatched_and_answered() {
        let mut h = harness(&[]);
        let body = webhook_payload("15551234", vec![text("wamid.1", "hello")]);

        let resp = call(&h.app, signed_post(body, "facebookexternalua")).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let seen = tokio::time::timeout(Duration::from_secs(5), h.seen.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, ("15551234".to_string(), "hello".to_string()));

        // The reply is sent after the engine call returns.
        for _ in 0..100 {
            if !h.messenger.texts.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(
            *h.messenger.texts.lock().unwrap(),
            vec![("15551234".to_string(), "echo: hello".to_string())]
        );
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let h = harness(&[]);
        let body = webhook_payload("15551234", vec![text("wamid.1", "hello")]);
        let req = Request::builder()
            .method("POST")
            .uri("/meta-whatsapp")
            .header("user-agent", "facebookexternalua")
            .header("x-hub-signature-256", "sha256=deadbeef")
            .body(Body::from(body))
            .unwrap();

        let resp = call(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let v: Value = serde_json::from_slice(&read_body(resp).await).unwrap();
        assert_eq!(v["detail"], "Invalid signature");
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let h = harness(&[]);
        let req = Request::builder()
            .method("POST")
            .uri("/meta-whatsapp")
            .header("user-agent", "facebookexternalua")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(call(&h.app, req).await.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_user_agent_is_rejected() {
        let h = harness(&[]);
        let body = webhook_payload("15551234", vec![]);

        let resp = call(&h.app, signed_post(body.clone(), "curl/8.0")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let v: Value = serde_json::from_slice(&read_body(resp).await).unwrap();
        assert_eq!(v["detail"], "Invalid User Agent");

        // Surrounding whitespace is tolerated.
        let resp = call(&h.app, signed_post(body, " facebookexternalua ")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn invalid_json_is_bad_request() {
        let h = harness(&[]);
        let resp = call(&h.app, signed_post(b"not json".to_vec(), "facebookexternalua")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let v: Value = serde_json::from_slice(&read_body(resp).await).unwrap();
        assert_eq!(v, json!({"error": "Invalid JSON"}));
    }

    #[test]
    fn filters_unsupported_old_and_sandboxed_messages() {
        let cfg = test_config(&[
            ("IN_META_SANDBOX_MODE", "true"),
            ("META_SANDBOX_PHONE_NUMBER", "15551234"),
        ]);

        let stale = json!({
            "id": "old", "type": "text", "timestamp": "1000", "text": {"body": "hi"}
        });
        let image = json!({
            "id": "img", "type": "image", "timestamp": now_secs().to_string()
        });
        let payload: Value =
            serde_json::from_slice(&webhook_payload("15551234", vec![text("ok", "hi"), stale, image]))
                .unwrap();
        let accepted = handlers::webhook::accepted_messages(&payload, &cfg);
        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].message_id.0, "ok");

        let stranger: Value =
            serde_json::from_slice(&webhook_payload("9999", vec![text("x", "hi")])).unwrap();
        assert!(handlers::webhook::accepted_messages(&stranger, &cfg).is_empty());
    }

    #[test]
    fn iterates_every_entry_and_change() {
        let payload = json!({
            "entry": [
                {"changes": [
                    {"value": {"contacts": [{"wa_id": "a"}], "messages": [{"id": "1"}, {"id": "2"}]}},
                    {"value": {"statuses": [{"id": "s"}]}}
                ]},
                {"changes": [
                    {"value": {"contacts": [{"wa_id": "b"}], "messages": [{"id": "3"}]}}
                ]}
            ]
        });
        let found: Vec<(String, String)> = handlers::webhook::iter_messages(&payload)
            .into_iter()
            .map(|(user, m)| (user, m["id"].as_str().unwrap().to_string()))
            .collect();
        assert_eq!(
            found,
            vec![
                ("a".to_string(), "1".to_string()),
                ("a".to_string(), "2".to_string()),
                ("b".to_string(), "3".to_string()),
            ]
        );
        assert!(handlers::webhook::iter_messages(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn progress_callback_forwards_text() {
        let h = harness(&[("PROGRESS_CALLBACK_TOKEN", "cb-token")]);
        let body = json!({
            "user_id": "15551234",
            "message_key": "k1",
            "text": "Still thinking...",
            "timestamp": 1700000000.5
        });
        let req = Request::builder()
            .method("POST")
            .uri("/progress-callback")
            .header("authorization", "Bearer cb-token")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap();

        let resp = call(&h.app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let v: Value = serde_json::from_slice(&read_body(resp).await).unwrap();
        assert_eq!(v, json!({"status": "ok"}));
        assert_eq!(
            *h.messenger.texts.lock().unwrap(),
            vec![("15551234".to_string(), "Still thinking...".to_string())]
        );
    }

    #[tokio::test]
    async fn progress_callback_requires_token() {
        let h = harness(&[]);
        for auth in [None, Some("Bearer wrong"), Some("engine-key")] {
            let mut req = Request::builder().method("POST").uri("/progress-callback");
            if let Some(a) = auth {
                req = req.header("authorization", a);
            }
            let resp = call(&h.app, req.body(Body::from("{}")).unwrap()).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{auth:?}");
        }
        assert!(h.messenger.texts.lock().unwrap().is_empty());

        // Without PROGRESS_CALLBACK_TOKEN the engine API key is accepted.
        let req = Request::builder()
            .method("POST")
            .uri("/progress-callback")
            .header("authorization", "Bearer engine-key")
            .body(Body::from("{\"broken\""))
            .unwrap();
        assert_eq!(call(&h.app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}
