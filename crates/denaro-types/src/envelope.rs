//! The `{ ok, result?, error? }` response envelope used by every endpoint.

use crate::errors::NodeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    pub fn ok(result: T) -> Self {
        ApiResponse {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(err: &NodeError) -> Self {
        ApiResponse {
            ok: false,
            result: None,
            error: Some(ApiError {
                code: err.code().to_string(),
                message: err.to_string(),
            }),
        }
    }
}
