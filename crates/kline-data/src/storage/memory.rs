//! 인메모리 캔들 저장소.
//!
//! PostgreSQL 저장소와 같은 의미론(타임스탬프 유일 키, 최초 기록 유지)을
//! 프로세스 메모리에서 제공합니다. 파이프라인 테스트와 오프라인 검증에 사용합니다.

use super::CandleStore;
use crate::error::{DataError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::{Candle, SymbolName, TimeRange};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

type Table = BTreeMap<DateTime<Utc>, Candle>;

/// 인메모리 `CandleStore`.
#[derive(Debug, Default)]
pub struct MemoryCandleStore {
    tables: RwLock<HashMap<SymbolName, Table>>,
    failing: RwLock<HashSet<SymbolName>>,
    schema_ready: AtomicBool,
    closed: AtomicBool,
    upsert_calls: AtomicUsize,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 테이블을 만들고 캔들을 미리 채워 둡니다.
    pub async fn seed(&self, symbol: &SymbolName, candles: impl IntoIterator<Item = Candle>) {
        let mut tables = self.tables.write().await;
        let table = tables.entry(symbol.clone()).or_default();
        for candle in candles {
            table.entry(candle.timestamp).or_insert(candle);
        }
    }

    /// 빈 테이블만 생성합니다.
    pub async fn create_empty(&self, symbol: &SymbolName) {
        self.tables.write().await.entry(symbol.clone()).or_default();
    }

    /// 이후 `symbol`에 대한 모든 조회/쓰기를 실패시킵니다.
    pub async fn fail_symbol(&self, symbol: &SymbolName) {
        self.failing.write().await.insert(symbol.clone());
    }

    /// 저장된 캔들 (오름차순).
    pub async fn candles(&self, symbol: &SymbolName) -> Vec<Candle> {
        self.tables
            .read()
            .await
            .get(symbol)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn row_count(&self, symbol: &SymbolName) -> usize {
        self.tables.read().await.get(symbol).map_or(0, BTreeMap::len)
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn check(&self, symbol: &SymbolName) -> Result<()> {
        if self.is_closed() {
            return Err(DataError::Closed);
        }
        if self.failing.read().await.contains(symbol) {
            return Err(DataError::QueryError(format!(
                "injected failure for {symbol}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn ensure_schema(&self) -> Result<()> {
        if self.is_closed() {
            return Err(DataError::Closed);
        }
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn table_exists(&self, symbol: &SymbolName) -> Result<bool> {
        self.check(symbol).await?;
        Ok(self.tables.read().await.contains_key(symbol))
    }

    async fn ensure_table(&self, symbol: &SymbolName) -> Result<()> {
        self.check(symbol).await?;
        self.create_empty(symbol).await;
        Ok(())
    }

    async fn existing_timestamps(
        &self,
        symbol: &SymbolName,
        range: TimeRange,
    ) -> Result<BTreeSet<DateTime<Utc>>> {
        self.check(symbol).await?;
        let tables = self.tables.read().await;
        let table = tables
            .get(symbol)
            .ok_or_else(|| DataError::QueryError(format!("table for {symbol} does not exist")))?;

        Ok(table
            .range(range.start()..range.end())
            .map(|(ts, _)| *ts)
            .collect())
    }

    async fn upsert(&self, symbol: &SymbolName, candles: &[Candle]) -> Result<u64> {
        self.check(symbol).await?;
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write().await;
        let table = tables
            .get_mut(symbol)
            .ok_or_else(|| DataError::InsertError(format!("table for {symbol} does not exist")))?;

        let mut inserted = 0;
        for candle in candles {
            if !table.contains_key(&candle.timestamp) {
                table.insert(candle.timestamp, candle.clone());
                inserted += 1;
            }
        }

        debug!(symbol = %symbol, inserted, "메모리 저장");
        Ok(inserted)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn symbol() -> SymbolName {
        SymbolName::new("ETHUSDT").unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn candle(ts: DateTime<Utc>, close: rust_decimal::Decimal) -> Candle {
        Candle::new(ts, dec!(10), dec!(11), dec!(9), close, dec!(1), dec!(10))
    }

    #[tokio::test]
    async fn test_upsert_keeps_first_write() {
        let store = MemoryCandleStore::new();
        store.ensure_table(&symbol()).await.unwrap();

        let first = vec![candle(at(0, 0), dec!(10.5)), candle(at(0, 1), dec!(10.6))];
        assert_eq!(store.upsert(&symbol(), &first).await.unwrap(), 2);

        let second = vec![candle(at(0, 1), dec!(99)), candle(at(0, 2), dec!(10.7))];
        assert_eq!(store.upsert(&symbol(), &second).await.unwrap(), 1);

        let stored = store.candles(&symbol()).await;
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].close, dec!(10.6));
    }

    #[tokio::test]
    async fn test_existing_timestamps_half_open() {
        let store = MemoryCandleStore::new();
        store
            .seed(&symbol(), (0..5).map(|m| candle(at(0, m), dec!(1))))
            .await;

        let range = TimeRange::new(at(0, 1), at(0, 4)).unwrap();
        let present = store.existing_timestamps(&symbol(), range).await.unwrap();

        assert_eq!(present.len(), 3);
        assert!(present.contains(&at(0, 1)));
        assert!(!present.contains(&at(0, 4)));
    }

    #[tokio::test]
    async fn test_missing_table_and_injected_failure() {
        let store = MemoryCandleStore::new();
        assert!(!store.table_exists(&symbol()).await.unwrap());

        store.fail_symbol(&symbol()).await;
        assert!(store.table_exists(&symbol()).await.is_err());
    }

    #[tokio::test]
    async fn test_closed_store_rejects_calls() {
        let store = MemoryCandleStore::new();
        store.close().await;
        assert!(store.is_closed());
        assert!(matches!(store.ensure_schema().await, Err(DataError::Closed)));
    }
}
