use crate::{
    api::{error::ApiResponseError, extractor::Json, AppState},
    config::{Config, SharedConfig},
};
use axum::{
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::IntoResponse,
    BoxError,
    Router,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tone_system::{ToneSystem, ToneSystemHandle};
use tower::load_shed::error::Overloaded;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

pub struct Application {
    pub tcp: TcpListener,
    pub config: SharedConfig,
    pub system: ToneSystemHandle,
}

impl Application {
    #[tracing::instrument(name = "Create application", skip(config), fields(addr = config.app.host, port = config.app.port))]
    pub async fn new(config: Config) -> eyre::Result<Self> {
        let tcp = TcpListener::bind(config.app.bind_address()).await?;
        let config = Arc::new(config);

        let system_config = Arc::new(config.system.clone());
        let system = tokio::task::spawn_blocking(move || ToneSystem::new(system_config)).await??;

        Ok(Application {
            tcp,
            config,
            system: Arc::new(system),
        })
    }

    /// Start running the Axum server, consuming `Application`.
    /// The future completes when the Tokio-Runtime has been shut down (due to f.e a SIGINT).
    ///
    /// # Arguments
    ///
    /// * `quitter` - A way to inform the spawned runtime to shut down. Especially useful for tests
    /// where we won't provide a signal for shutdown.
    pub async fn run(self, quitter: Arc<tokio::sync::Notify>) -> eyre::Result<()> {
        tracing::info!("Setup complete, starting server...");

        let app = construct_server(self.config.clone(), self.system.clone());

        tracing::info!("Listening on {:?}", self.tcp.local_addr()?);

        let server = axum::serve(self.tcp, app.into_make_service());

        let result = tokio::select! {
            _ = quitter.notified() => Ok(()),
            res = tokio::signal::ctrl_c() => {
                tracing::trace!("Received CTRL-C notification, exiting...");
                // Should notify all dependant sub-processes.
                quitter.notify_waiters();
                res.map_err(|e| eyre::eyre!(e))
            },
            res = server => res.map_err(|e| eyre::eyre!(e))
        };

        self.system.shutdown().await?;

        result
    }

    pub fn port(&self) -> &TcpListener {
        &self.tcp
    }
}

/// Build the full router, with all middleware applied.
pub fn construct_server(config: SharedConfig, system: ToneSystemHandle) -> Router {
    let upload_limit = DefaultBodyLimit::max(config.app.max_upload_bytes);
    let state = AppState::new(config, system);

    let app_layers = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new().br(true).gzip(true).deflate(true));

    let app = crate::api::config().layer(upload_limit).layer(app_layers).with_state(state);

    apply_security_middleware(app)
}

fn apply_security_middleware(router: Router) -> Router {
    let security = ServiceBuilder::new()
        .layer(HandleErrorLayer::new(generic_error_handler))
        .load_shed()
        .concurrency_limit(512)
        .layer(tower_http::timeout::TimeoutLayer::new(Duration::from_secs(120)));

    router.layer(security)
}

async fn generic_error_handler(error: BoxError) -> impl IntoResponse {
    let (status, message) = if error.is::<Overloaded>() {
        (StatusCode::SERVICE_UNAVAILABLE, "The server is busy, try again later")
    } else {
        tracing::trace!(?error, "Error occurred in normal response handler");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
    };

    let body = ApiResponseError {
        error: message.to_string(),
    };

    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use axum::body::Body;
    use axum::http::{Request, Response};
    use tone_ml::audio::AudioClip;
    use tone_ml::emotion_classifier::backbone::BackboneConfig;
    use tone_ml::emotion_classifier::model::EmotionModelConfig;
    use tone_ml::emotion_classifier::{EmotionClassifier, LabelSet};
    use tone_ml::CpuBackend;
    use tone_system::config::ToneSystemConfig;
    use tone_system::emotion::EmotionBackend;
    use tone_system::Analysis;
    use tower::ServiceExt;

    const BOUNDARY: &str = "tone-test-boundary";

    fn test_app() -> (Router, ToneSystemHandle) {
        let device = Default::default();
        let backbone = BackboneConfig::new()
            .with_conv_dim(vec![8; 7])
            .with_hidden_size(16)
            .with_num_layers(4)
            .with_num_heads(2)
            .with_intermediate_size(32)
            .with_pos_conv_kernel(4)
            .with_pos_conv_groups(2);
        let model = EmotionModelConfig::new(2)
            .with_backbone(backbone)
            .with_hidden_sizes(vec![16, 8, 8])
            .init::<CpuBackend>(&device);
        let classifier = EmotionClassifier::from_parts(model, LabelSet::from_resolved(["angry", "happy"]), device).unwrap();

        let config = Arc::new(Config {
            app: ServerConfig {
                max_upload_bytes: 1024 * 1024,
                ..Default::default()
            },
            system: ToneSystemConfig {
                ffmpeg: "/definitely/not/ffmpeg".into(),
                ..Default::default()
            },
        });
        let system = Arc::new(ToneSystem::from_parts(
            Arc::new(config.system.clone()),
            EmotionBackend::from_classifier(classifier),
        ));

        (construct_server(config, system.clone()), system)
    }

    fn wav_bytes() -> Vec<u8> {
        clip_bytes(AudioClip {
            samples: (0..8_000).map(|i| (i as f32 * 0.02).sin() * 0.5).collect(),
            n_channels: 1,
            sample_rate: 16_000,
        })
    }

    fn clip_bytes(clip: AudioClip) -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("answer.wav");
        clip.write_to_wav_file(&path).unwrap();

        std::fs::read(path).unwrap()
    }

    fn multipart_request(field: &str, content: &[u8]) -> Request<Body> {
        let mut body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"answer.wav\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/emotion/predict")
            .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body<T: serde::de::DeserializeOwned>(response: Response<Body>) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn predicts_uploaded_wav() {
        let (app, _) = test_app();

        let response = app.oneshot(multipart_request("audio", &wav_bytes())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let analysis: Analysis = json_body(response).await;
        assert!(["angry", "happy"].contains(&analysis.predicted_label.as_str()));
        assert!((0.0..=1.0).contains(&analysis.confidence));
        assert_eq!(analysis.scores.len(), 2);
    }

    #[tokio::test]
    async fn missing_audio_field_is_a_bad_request() {
        let (app, _) = test_app();

        let response = app.oneshot(multipart_request("resume", &wav_bytes())).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ApiResponseError = json_body(response).await;
        assert!(error.error.contains("audio"));
    }

    #[tokio::test]
    async fn undecodable_audio_is_a_bad_request() {
        let (app, _) = test_app();

        let response = app.oneshot(multipart_request("audio", b"not audio at all")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ApiResponseError = json_body(response).await;
        assert!(!error.error.is_empty());
    }

    #[tokio::test]
    async fn non_finite_audio_is_a_bad_request() {
        let (app, _) = test_app();
        let upload = clip_bytes(AudioClip {
            samples: vec![0.5, f32::NAN, 0.2, -0.3],
            n_channels: 1,
            sample_rate: 16_000,
        });

        let response = app.oneshot(multipart_request("audio", &upload)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ApiResponseError = json_body(response).await;
        assert!(error.error.contains("non-finite"));
    }

    #[tokio::test]
    async fn middleware_errors_use_the_error_body() {
        let response = generic_error_handler(Box::new(Overloaded::new())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let error: ApiResponseError = json_body(response).await;
        assert!(!error.error.is_empty());

        let response = generic_error_handler("broken".into()).await.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let error: ApiResponseError = json_body(response).await;
        assert_eq!(error.error, "Internal error");
    }

    #[tokio::test]
    async fn unloaded_model_is_unavailable() {
        let (app, system) = test_app();
        system.shutdown().await.unwrap();

        let response = app.oneshot(multipart_request("audio", &wav_bytes())).await.unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let error: ApiResponseError = json_body(response).await;
        assert_eq!(error.error, "No emotion model is loaded");
    }

    #[tokio::test]
    async fn lists_labels() {
        let (app, _) = test_app();

        let request = Request::builder().uri("/api/emotion/labels").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let labels: Vec<String> = json_body(response).await;
        assert_eq!(labels, ["angry", "happy"]);
    }

    #[tokio::test]
    async fn serves_openapi_document() {
        let (app, _) = test_app();

        let request = Request::builder().uri("/api/docs/api.json").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let document: serde_json::Value = json_body(response).await;
        assert!(document["paths"].get("/api/emotion/predict").is_some());
    }
}
