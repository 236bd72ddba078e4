//! # Kline Core
//!
//! 1분봉 증분 로더의 핵심 도메인 모델 및 타입을 제공합니다.
//!
//! 이 크레이트는 워크스페이스 전반에서 사용되는 기본 타입을 제공합니다:
//! - 반열린 시간 구간 (`TimeRange`) 및 월 단위 분할
//! - 캔들 및 티커 데이터 구조체
//! - 저장소 식별자로 안전하게 쓸 수 있는 심볼/스키마 이름
//! - 로깅 인프라

pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;
