//! 업스트림 에러 타입.

use thiserror::Error;

/// 업스트림 API 관련 에러.
#[derive(Debug, Error, Clone)]
pub enum ExchangeError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    NetworkError(String),

    /// 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 2xx가 아닌 HTTP 응답
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// JSON이 아닌 응답
    #[error("Invalid content type: {0}")]
    ContentType(String),

    /// 파싱/역직렬화 에러 (형식이 깨진 응답 포함)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// HTTP 200이지만 retCode != 0
    #[error("API error {code}: {message}")]
    ApiError { code: i64, message: String },

    /// 재시도 한도 소진
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    /// 취소 토큰에 의해 중단됨
    #[error("Cancelled")]
    Cancelled,
}

impl ExchangeError {
    /// 재시도 가능한 에러인지 확인.
    ///
    /// 네트워크 계열과 애플리케이션 계열(retCode, 깨진 응답)을 동일하게 취급합니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExchangeError::NetworkError(_)
                | ExchangeError::Timeout(_)
                | ExchangeError::HttpStatus { .. }
                | ExchangeError::ContentType(_)
                | ExchangeError::ParseError(_)
                | ExchangeError::ApiError { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExchangeError::Cancelled)
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, ExchangeError::RetryExhausted { .. })
    }
}

impl From<reqwest::Error> for ExchangeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExchangeError::Timeout(err.to_string())
        } else if err.is_decode() {
            ExchangeError::ParseError(err.to_string())
        } else {
            ExchangeError::NetworkError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ExchangeError {
    fn from(err: serde_json::Error) -> Self {
        ExchangeError::ParseError(err.to_string())
    }
}

/// 업스트림 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;
