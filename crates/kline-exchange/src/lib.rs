//! 업스트림 시장 데이터 연결.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - `CandleSource` trait: 윈도우 단위 1분봉 조회 인터페이스
//! - Bybit v5 현물 REST 커넥터 (응답 검증 포함)
//! - 고정 간격 재시도 (취소 토큰 연동)
//! - 테스트용 시뮬레이션 소스

pub mod connector;
pub mod error;
pub mod retry;
pub mod simulated;
pub mod traits;

pub use connector::bybit::{BybitClient, BybitConfig};
pub use error::*;
pub use retry::{with_retry, RetryConfig};
pub use simulated::SimulatedCandleSource;
pub use traits::*;
