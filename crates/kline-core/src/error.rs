//! 핵심 도메인 에러 타입.

use thiserror::Error;

/// 도메인 값 생성/검증 에러.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// 빈 구간 또는 역전된 구간
    #[error("잘못된 시간 구간: {0}")]
    InvalidRange(String),

    /// 허용되지 않는 심볼 이름
    #[error("잘못된 심볼: {0}")]
    InvalidSymbol(String),

    /// 허용되지 않는 스키마 이름
    #[error("잘못된 스키마 이름: {0}")]
    InvalidSchema(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),
}

/// 도메인 작업을 위한 Result 타입.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::InvalidSymbol("BTC-USDT".to_string());
        assert_eq!(err.to_string(), "잘못된 심볼: BTC-USDT");
    }
}
