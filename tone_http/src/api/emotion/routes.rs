use crate::api::extractor::{AudioUpload, Json};
use crate::api::error::ApiResponseError;
use crate::api::{ApiResult, ApiRouter, AppState};
use aide::axum::routing::{get_with, post_with};
use aide::transform::TransformOperation;
use axum::extract::State;
use tone_system::Analysis;

pub fn config() -> ApiRouter<AppState> {
    ApiRouter::new()
        .nest(
            "/emotion",
            ApiRouter::new()
                .api_route("/predict", post_with(predict, predict_docs))
                .api_route("/labels", get_with(labels, labels_docs)),
        )
        .with_path_items(|t| t.tag("Emotion").description("Classifying the tone of recorded answers"))
}

#[tracing::instrument(skip_all, fields(file_name = ?upload.file_name, bytes = upload.bytes.len()))]
pub async fn predict(state: State<AppState>, upload: AudioUpload) -> ApiResult<Json<Analysis>> {
    let analysis = state.system.analyse(&upload.bytes).await?;

    Ok(Json(analysis))
}

fn predict_docs(op: TransformOperation) -> TransformOperation {
    op.description("Predict the emotional tone of a recorded answer, optionally with its transcription")
        .response::<200, Json<Analysis>>()
        .response_with::<400, Json<ApiResponseError>, _>(|res| {
            res.description("The upload could not be decoded, or was too quiet to analyse")
        })
        .response_with::<503, Json<ApiResponseError>, _>(|res| res.description("No emotion model is loaded"))
}

pub async fn labels(state: State<AppState>) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.system.labels()?))
}

fn labels_docs(op: TransformOperation) -> TransformOperation {
    op.description("All labels the loaded model can predict, in class index order")
        .response::<200, Json<Vec<String>>>()
}
