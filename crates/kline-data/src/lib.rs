//! 캔들 저장소.
//!
//! 이 crate는 다음을 제공합니다:
//! - `CandleStore` trait: 테이블 준비, 존재 시각 조회, 멱등 일괄 삽입
//! - PostgreSQL 저장소 (심볼별 테이블, `ON CONFLICT DO NOTHING`)
//! - 인메모리 저장소 (테스트 및 오프라인 검증용)

pub mod error;
pub mod storage;

pub use error::{DataError, Result};
pub use storage::memory::MemoryCandleStore;
pub use storage::postgres::{DatabaseConfig, PostgresCandleStore};
pub use storage::CandleStore;
