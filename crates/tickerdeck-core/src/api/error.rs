use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unauthorized - session token missing or expired")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited by the terminal API")]
    RateLimited,

    #[error("request timed out")]
    Timeout,

    #[error("server error ({status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("network error: {0}")]
    Network(reqwest::Error),

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Longest response-body snippet carried inside an error message
const MAX_BODY_SNIPPET: usize = 400;

impl ApiError {
    fn snippet(body: &str) -> String {
        if body.len() <= MAX_BODY_SNIPPET {
            return body.to_string();
        }
        let mut end = MAX_BODY_SNIPPET;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}… ({} bytes total)", &body[..end], body.len())
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            403 => ApiError::Forbidden(Self::snippet(body)),
            404 => ApiError::NotFound(Self::snippet(body)),
            429 => ApiError::RateLimited,
            code @ 500..=599 => ApiError::ServerError {
                status: code,
                body: Self::snippet(body),
            },
            code => ApiError::UnexpectedResponse(format!("status {}: {}", code, Self::snippet(body))),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else {
            ApiError::Network(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_common_codes() {
        assert!(matches!(
            ApiError::from_status(reqwest::StatusCode::UNAUTHORIZED, ""),
            ApiError::Unauthorized
        ));
        assert!(matches!(
            ApiError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            ApiError::RateLimited
        ));
        assert!(matches!(
            ApiError::from_status(reqwest::StatusCode::BAD_GATEWAY, "upstream down"),
            ApiError::ServerError { status: 502, .. }
        ));
    }

    #[test]
    fn test_snippet_truncates_long_bodies() {
        let body = "x".repeat(2000);
        let err = ApiError::from_status(reqwest::StatusCode::NOT_FOUND, &body);
        let msg = err.to_string();
        assert!(msg.len() < 600);
        assert!(msg.contains("2000 bytes total"));
    }
}
