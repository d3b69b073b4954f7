use crate::api::error::{ApiError, ApiResponseError};
use crate::api::extractor::Json;
use crate::config::SharedConfig;
use aide::axum::IntoApiResponse;
use aide::axum::routing::{get, get_with};
use aide::openapi::OpenApi;
use aide::scalar::Scalar;
use aide::transform::TransformOpenApi;
use axum::response::IntoResponse;
use axum::{Extension, Router};
use std::sync::Arc;
use tone_system::ToneSystemHandle;

pub mod emotion;
pub mod error;
pub mod extractor;

pub type ApiRouter<S = ()> = aide::axum::ApiRouter<S>;
pub type ApiResult<T, E = ApiError> = Result<T, E>;

#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub system: ToneSystemHandle,
}

impl AppState {
    pub fn new(config: SharedConfig, system: ToneSystemHandle) -> Self {
        Self { config, system }
    }
}

/// All routes of the API, including the OpenAPI documentation.
pub fn config() -> Router<AppState> {
    aide::r#gen::on_error(|error| {
        tracing::error!(?error, "Aide Error");
    });

    aide::r#gen::extract_schemas(true);
    let mut api = OpenApi::default();

    let base_router = ApiRouter::new()
        .nest_api_service("/docs", docs_routes())
        .merge(emotion::routes::config());

    ApiRouter::new()
        .nest("/api", base_router)
        .finish_api_with(&mut api, api_docs)
        .layer(Extension(Arc::new(api)))
}

pub fn docs_routes() -> ApiRouter {
    aide::r#gen::infer_responses(true);

    let router: ApiRouter = ApiRouter::new()
        .api_route(
            "/",
            get_with(
                Scalar::new("/api/docs/api.json").with_title("Tone").axum_handler(),
                |op| op.description("This documentation page."),
            ),
        )
        .route("/api.json", get(serve_docs));

    aide::r#gen::infer_responses(false);

    router
}

async fn serve_docs(Extension(api): Extension<Arc<OpenApi>>) -> impl IntoApiResponse {
    Json(api).into_response()
}

fn api_docs(api: TransformOpenApi) -> TransformOpenApi {
    api.title("Tone")
        .summary("Speech tone analysis for interview practice")
        .description(include_str!("../../../README.md"))
        .default_response_with::<Json<ApiResponseError>, _>(|res| {
            res.example(ApiResponseError {
                error: "An error occurred".to_string(),
            })
        })
}
