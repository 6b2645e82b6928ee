use axum::body::Bytes;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use forkchat_agent::GenerationError;
use forkchat_orchestrator::BranchError;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::json;

use crate::conversation_store::ConversationError;

#[derive(Debug)]
pub(crate) struct ApiError {
    pub(crate) status: StatusCode,
    pub(crate) code: &'static str,
    pub(crate) message: String,
}

impl ApiError {
    pub(crate) fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub(crate) fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub(crate) fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub(crate) fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, "input_too_large", message)
    }

    pub(crate) fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let error_type = if self.status.is_client_error() {
            "invalid_request_error"
        } else {
            "server_error"
        };
        (
            self.status,
            Json(json!({
                "error": {
                    "type": error_type,
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

impl From<ConversationError> for ApiError {
    fn from(error: ConversationError) -> Self {
        match &error {
            ConversationError::Conflict(_) => Self::conflict("conflict", error.to_string()),
            ConversationError::NotFound(_) => Self::not_found("not_found", error.to_string()),
            ConversationError::Unavailable(_) => Self::unavailable(error.to_string()),
        }
    }
}

impl From<GenerationError> for ApiError {
    fn from(error: GenerationError) -> Self {
        match &error {
            GenerationError::Timeout { .. } => {
                Self::new(StatusCode::GATEWAY_TIMEOUT, "generation_timeout", error.to_string())
            }
            GenerationError::Checkpoint(_) => Self::unavailable(error.to_string()),
            GenerationError::ThreadOccupied { .. } => {
                Self::conflict("thread_id_conflict", error.to_string())
            }
            GenerationError::EmptyHistory => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "empty_history", error.to_string())
            }
            GenerationError::Ai(_) | GenerationError::MaxTurnsExceeded(_) => {
                Self::new(StatusCode::BAD_GATEWAY, "generation_failed", error.to_string())
            }
        }
    }
}

impl From<BranchError> for ApiError {
    fn from(error: BranchError) -> Self {
        match error {
            BranchError::SourceNotFound { .. } => {
                Self::not_found("source_not_found", error.to_string())
            }
            BranchError::ThreadIdConflict { .. } => {
                Self::conflict("thread_id_conflict", error.to_string())
            }
            BranchError::EmptyBranchSource { .. } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "empty_branch_source",
                error.to_string(),
            ),
            BranchError::InvalidEdit(_) => Self::bad_request("invalid_edit", error.to_string()),
            BranchError::GenerationFailure(inner) => inner.into(),
            BranchError::StoreUnavailable(_) => Self::unavailable(error.to_string()),
        }
    }
}

pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice::<T>(body).map_err(|error| {
        ApiError::bad_request(
            "malformed_json",
            format!("failed to parse request body: {error}"),
        )
    })
}

pub(crate) fn parse_path_id(raw: &str, what: &'static str) -> Result<u64, ApiError> {
    raw.trim().parse::<u64>().map_err(|_| {
        ApiError::bad_request("invalid_id", format!("{what} '{raw}' is not a numeric id"))
    })
}

/// Accepts `7` or `"7"`.
pub(crate) fn deserialize_numeric_id<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(u64),
        Text(String),
    }

    match RawId::deserialize(deserializer)? {
        RawId::Number(value) => Ok(value),
        RawId::Text(text) => text
            .trim()
            .parse::<u64>()
            .map_err(|_| de::Error::custom(format!("'{text}' is not a numeric id"))),
    }
}

fn deserialize_optional_numeric_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_numeric_id")] u64);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(value)| value))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateUserRequest {
    pub(crate) username: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateThreadRequest {
    #[serde(deserialize_with = "deserialize_numeric_id")]
    pub(crate) user_id: u64,
    #[serde(default)]
    pub(crate) title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatRequestBody {
    pub(crate) message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EditMessageRequest {
    pub(crate) content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReplaceMessage {
    pub(crate) old: String,
    pub(crate) new: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchRequestBody {
    #[serde(deserialize_with = "deserialize_numeric_id")]
    pub(crate) old_thread: u64,
    #[serde(default, deserialize_with = "deserialize_optional_numeric_id")]
    pub(crate) new_thread: Option<u64>,
    #[serde(default)]
    pub(crate) replace_msg: Option<ReplaceMessage>,
    #[serde(default, deserialize_with = "deserialize_optional_numeric_id")]
    pub(crate) user_id: Option<u64>,
}
