//! 저장소 인터페이스와 구현체.

pub mod memory;
pub mod postgres;

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::{Candle, SymbolName, TimeRange};
use std::collections::BTreeSet;

/// 심볼별 1분봉 저장소.
///
/// 모든 구현체는 타임스탬프를 유일 키로 사용하며, 같은 타임스탬프의
/// 재삽입은 조용히 무시합니다 (최초 기록 유지).
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// 대상 스키마를 생성합니다 (이미 있으면 무시).
    async fn ensure_schema(&self) -> Result<()>;

    /// 심볼 테이블 존재 여부.
    async fn table_exists(&self, symbol: &SymbolName) -> Result<bool>;

    /// 심볼 테이블을 생성합니다 (이미 있으면 무시).
    async fn ensure_table(&self, symbol: &SymbolName) -> Result<()>;

    /// `range` 안에 이미 저장된 타임스탬프 집합.
    async fn existing_timestamps(
        &self,
        symbol: &SymbolName,
        range: TimeRange,
    ) -> Result<BTreeSet<DateTime<Utc>>>;

    /// 캔들을 일괄 삽입하고 실제로 추가된 행 수를 반환합니다.
    async fn upsert(&self, symbol: &SymbolName, candles: &[Candle]) -> Result<u64>;

    /// 연결을 해제합니다. 이후 호출은 `DataError::Closed`로 실패할 수 있습니다.
    async fn close(&self);
}
