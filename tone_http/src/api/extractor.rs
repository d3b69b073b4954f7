use crate::api::error::ApiError;
use aide::openapi::{MediaType, Operation, ReferenceOr, RequestBody};
use aide::operation::{OperationInput, OperationIo};
use aide::r#gen::GenContext;
use axum::body::Bytes;
use axum::extract::{FromRequest, Multipart, Request};
use axum::response::IntoResponse;
use serde::Serialize;

/// The multipart field carrying the recorded answer.
pub const AUDIO_FIELD: &str = "audio";

#[derive(OperationIo)]
#[aide(output_with = "axum_jsonschema::Json<T>", json_schema)]
pub struct Json<T>(pub T);

impl<T> IntoResponse for Json<T>
where
    T: Serialize,
{
    fn into_response(self) -> axum::response::Response {
        axum::Json(self.0).into_response()
    }
}

/// The [AUDIO_FIELD] of a `multipart/form-data` request, other fields are ignored.
#[derive(Debug)]
pub struct AudioUpload {
    pub file_name: Option<String>,
    pub bytes: Bytes,
}

#[axum::async_trait]
impl<S: Send + Sync> FromRequest<S> for AudioUpload {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let mut multipart = Multipart::from_request(req, state).await?;

        while let Some(field) = multipart.next_field().await? {
            if field.name() == Some(AUDIO_FIELD) {
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;

                return Ok(Self { file_name, bytes });
            }
        }

        Err(ApiError::MissingAudio)
    }
}

impl OperationInput for AudioUpload {
    fn operation_input(_ctx: &mut GenContext, operation: &mut Operation) {
        let mut body = RequestBody {
            description: Some(format!("Recorded answer in the `{AUDIO_FIELD}` field, WAV or anything ffmpeg can read")),
            required: true,
            ..Default::default()
        };
        body.content.insert("multipart/form-data".to_string(), MediaType::default());

        operation.request_body = Some(ReferenceOr::Item(body));
    }
}
