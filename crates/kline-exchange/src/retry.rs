//! 고정 간격 재시도.
//!
//! 재시도 가능한 에러가 나면 `delay`만큼 기다린 뒤 다시 시도하며,
//! 총 `max_attempts`회 실패하면 `RetryExhausted`를 반환합니다.
//! 대기 중이든 요청 중이든 취소 토큰이 울리면 즉시 `Cancelled`로 끝납니다.

use crate::{ExchangeError, ExchangeResult};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// 재시도 설정.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// 최초 시도를 포함한 총 시도 횟수
    pub max_attempts: u32,
    /// 시도 사이 고정 대기 시간
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// 대기 없는 설정 (테스트용).
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO)
    }
}

/// `operation`을 재시도 정책에 따라 실행합니다.
///
/// 클로저는 1부터 시작하는 시도 번호를 받습니다.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    label: &str,
    mut operation: F,
) -> ExchangeResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = ExchangeResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut last_error: Option<ExchangeError> = None;

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(ExchangeError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
            result = operation(attempt) => result,
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                warn!(
                    target_op = label,
                    attempt,
                    max_attempts,
                    error = %e,
                    "업스트림 요청 실패"
                );
                last_error = Some(e);

                if attempt < max_attempts {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ExchangeError::Cancelled),
                        _ = tokio::time::sleep(config.delay) => {}
                    }
                }
            }
        }
    }

    Err(ExchangeError::RetryExhausted {
        attempts: max_attempts,
        last_error: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    })
}
