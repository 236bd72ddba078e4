//! 에러 타입 정의.

use kline_core::CoreError;
use kline_data::DataError;
use kline_exchange::ExchangeError;
use thiserror::Error;

/// Collector 에러 타입.
///
/// `LoadCoordinator::run`에서는 실행 자체를 시작할 수 없는 경우
/// (설정 오류, 스키마 생성 실패 등)에만 반환됩니다. 심볼 단위 실패는
/// 실행 보고서에 기록됩니다.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// 설정 에러
    #[error("Configuration error: {0}")]
    Config(String),

    /// 입력 값 에러
    #[error(transparent)]
    Core(#[from] CoreError),

    /// 업스트림 에러
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// 저장소 에러
    #[error(transparent)]
    Data(#[from] DataError),

    /// 백그라운드 태스크 실패
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<config::ConfigError> for CollectorError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<tokio::task::JoinError> for CollectorError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, CollectorError>;
