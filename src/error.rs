//! Errors raised when talking to the answer service.

use thiserror::Error;

fn detail_suffix(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|d| format!(": {}", d))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (DNS, connect, TLS, timeout).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Any non-2xx status other than 404.
    #[error("HTTP error! status: {status}{}", detail_suffix(.detail))]
    Http { status: u16, detail: Option<String> },

    /// 404: the task was deleted or has expired.
    #[error("not found{}", detail_suffix(.detail))]
    NotFound { detail: Option<String> },

    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            ApiError::Http { status, .. } => Some(*status),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Decode(_) => None,
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Http { detail, .. } | ApiError::NotFound { detail } => detail.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_message_includes_detail() {
        let err = ApiError::Http {
            status: 500,
            detail: Some("Referenced task t failed.".to_string()),
        };
        assert_eq!(err.to_string(), "HTTP error! status: 500: Referenced task t failed.");
        assert_eq!(err.status(), Some(500));
    }

    #[test]
    fn not_found_reports_404() {
        let err = ApiError::NotFound { detail: None };
        assert_eq!(err.status(), Some(404));
        assert_eq!(err.to_string(), "not found");
        assert!(err.detail().is_none());
    }
}
