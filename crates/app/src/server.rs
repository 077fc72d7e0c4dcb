use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};
use viseme_core::{AnimationTrack, MouthShapeService, ServerConfig, VisemeError};

use crate::chat::ChatRelay;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MouthShapeService>,
    pub chat: Option<Arc<ChatRelay>>,
}

/// API routes plus the configured front-end files.
pub fn router(state: AppState, server: &ServerConfig) -> Router {
    let mut router = Router::new()
        .route("/api/get_mouth_shape_data", get(mouth_shape_data))
        .route("/api/get_mouth_y", get(mouth_y))
        .route("/api/tts", post(tts))
        .route("/api/ask", post(ask))
        .route("/health", get(health));

    if let Some(dir) = &server.assets_dir {
        router = router.nest_service("/live2d_assets", ServeDir::new(dir));
    }
    if let Some(index) = &server.index_file {
        router = router.route_service("/", ServeFile::new(index));
    }

    router.with_state(state)
}

/// Error payload `{ "error": ... }` with 400 for bad input and 500 otherwise.
pub struct ApiError(VisemeError);

impl From<VisemeError> for ApiError {
    fn from(value: VisemeError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            tracing::error!(error = %self.0, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct TextQuery {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TextBody {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AskBody {
    message: Option<String>,
}

async fn mouth_shape_data(
    State(state): State<AppState>,
    Query(query): Query<TextQuery>,
) -> Result<Json<AnimationTrack>, ApiError> {
    let text = query.text.unwrap_or_default();
    let track = state.service.mouth_shape(&text).await?;
    Ok(Json(track))
}

async fn mouth_y(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "y": state.service.live_state().current().to_string() }))
}

async fn tts(
    State(state): State<AppState>,
    Json(body): Json<TextBody>,
) -> Result<Response, ApiError> {
    let text = body.text.unwrap_or_default();
    let audio = state.service.synthesize(&text).await?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], audio).into_response())
}

async fn ask(
    State(state): State<AppState>,
    Json(body): Json<AskBody>,
) -> Result<impl IntoResponse, ApiError> {
    let chat = state
        .chat
        .as_ref()
        .ok_or_else(|| VisemeError::Chat("no chat api key configured".into()))?;
    let reply = chat.ask(body.message.as_deref().unwrap_or_default()).await?;

    match state.service.speak(&reply) {
        Ok(_) => {}
        Err(VisemeError::EmptyInput) => tracing::debug!("empty reply, nothing to speak"),
        Err(err) => tracing::warn!(error = %err, "could not start live speech"),
    }

    Ok(Json(json!({ "reply": reply })))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use std::{
        io::Cursor,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use axum::body::{Body, Bytes};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use viseme_core::{AnalysisConfig, LiveConfig, LivePublisher, LiveState, SpeechSynthesizer};

    use super::*;
    use crate::chat::tests::EchoBackend;

    struct FakeSynthesizer {
        audio: Option<Vec<u8>>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SpeechSynthesizer for FakeSynthesizer {
        async fn synthesize(&self, _text: &str) -> viseme_core::Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.audio
                .clone()
                .ok_or_else(|| VisemeError::TtsUnavailable("status 500".into()))
        }
    }

    fn wav(seconds: f32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..(16_000.0 * seconds) as usize {
                let sample = (i as f32 * 0.03).sin() * 12_000.0;
                writer.write_sample(sample as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn app(audio: Option<Vec<u8>>) -> (Router, Arc<FakeSynthesizer>, AppState) {
        let synthesizer = Arc::new(FakeSynthesizer {
            audio,
            calls: AtomicUsize::new(0),
        });
        let publisher = LivePublisher::new(LiveState::new(), &LiveConfig::default());
        let service = Arc::new(MouthShapeService::new(
            synthesizer.clone(),
            &AnalysisConfig::default(),
            publisher,
        ));
        let chat = Arc::new(ChatRelay::new(
            Arc::new(EchoBackend {
                fail: false,
                silent: false,
            }),
            "be nice",
        ));
        let state = AppState {
            service,
            chat: Some(chat),
        };
        (
            router(state.clone(), &ServerConfig::default()),
            synthesizer,
            state,
        )
    }

    async fn send(router: Router, request: axum::http::Request<Body>) -> (StatusCode, Bytes) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
        axum::http::Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn mouth_shape_data_returns_a_track() {
        let (router, _, _) = app(Some(wav(1.0)));
        let (status, body) = send(router, get("/api/get_mouth_shape_data?text=hello")).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!((json["duration"].as_f64().unwrap() - 1.0).abs() < 1e-6);
        let frames = json["mouth_shape_data"].as_array().unwrap();
        assert_eq!(frames.len(), 31);
        assert!(frames.iter().all(|f| f.as_f64().unwrap() >= 0.0));
    }

    #[tokio::test]
    async fn empty_text_is_rejected_without_calling_tts() {
        let (router, synthesizer, _) = app(Some(wav(0.2)));
        let (status, body) = send(router, get("/api/get_mouth_shape_data?text=")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].is_string());
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tts_failure_maps_to_server_error() {
        let (router, _, state) = app(None);

        let (status, body) = send(router.clone(), get("/api/get_mouth_shape_data?text=hi")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["error"].is_string());

        let (status, body) = send(router, post_json("/api/tts", json!({ "text": "hi" }))).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["error"].is_string());

        assert_eq!(state.service.live_state().current(), 0.0);
    }

    #[tokio::test]
    async fn tts_passes_audio_through() {
        let audio = wav(0.1);
        let (router, _, _) = app(Some(audio.clone()));
        let response = router
            .oneshot(post_json("/api/tts", json!({ "text": "hi" })))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/wav");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), audio.as_slice());
    }

    #[tokio::test]
    async fn mouth_y_reads_the_live_state() {
        let (router, _, state) = app(None);

        let (_, body) = send(router.clone(), get("/api/get_mouth_y")).await;
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["y"], "0");

        let writer = state.service.live_state().begin_run().unwrap();
        writer.publish(0.5).await.unwrap();
        let (_, body) = send(router, get("/api/get_mouth_y")).await;
        assert_eq!(serde_json::from_slice::<serde_json::Value>(&body).unwrap()["y"], "0.5");
    }

    #[tokio::test]
    async fn ask_replies_and_starts_live_speech() {
        let (router, synthesizer, _) = app(Some(wav(0.2)));
        let (status, body) = send(router, post_json("/api/ask", json!({ "message": "hi" }))).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["reply"], "you said: hi");

        for _ in 0..50 {
            if synthesizer.calls.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(synthesizer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ask_without_chat_backend_fails() {
        let (_, _, state) = app(None);
        let router = router(
            AppState {
                chat: None,
                ..state
            },
            &ServerConfig::default(),
        );
        let (status, _) = send(router, post_json("/api/ask", json!({ "message": "hi" }))).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn serves_front_end_files_when_configured() {
        let dir = std::env::temp_dir().join(format!("viseme-assets-{}", std::process::id()));
        std::fs::create_dir_all(dir.join("model")).unwrap();
        std::fs::write(dir.join("model").join("avatar.model3.json"), r#"{"Version":3}"#).unwrap();
        std::fs::write(dir.join("index.html"), "<html>avatar</html>").unwrap();

        let (_, _, state) = app(None);
        let server = ServerConfig {
            assets_dir: Some(dir.clone()),
            index_file: Some(dir.join("index.html")),
            ..ServerConfig::default()
        };
        let router = router(state, &server);

        let (status, body) =
            send(router.clone(), get("/live2d_assets/model/avatar.model3.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), br#"{"Version":3}"#);

        let (status, _) = send(router.clone(), get("/live2d_assets/missing.png")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(router, get("/")).await;
        std::fs::remove_dir_all(&dir).ok();
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_ref(), b"<html>avatar</html>");
    }

    #[tokio::test]
    async fn front_end_is_not_served_by_default() {
        let (router, _, _) = app(None);
        let (status, _) = send(router.clone(), get("/")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(router, get("/live2d_assets/index.js")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
