use axum::{http::StatusCode, response::Json as ResponseJson};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// `GET /health`. No principal required — used by load balancers.
pub async fn health_check() -> (StatusCode, ResponseJson<HealthResponse>) {
    (
        StatusCode::OK,
        ResponseJson(HealthResponse {
            status: "ok".to_string(),
            version: option_env!("CARGO_PKG_VERSION").map(|v| v.to_string()),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_ok() {
        let (status, ResponseJson(response)) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.status, "ok");
    }
}
