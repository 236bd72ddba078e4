//! 누락 구간 탐지.
//!
//! 저장소에 이미 있는 분 시각과 요청 구간을 비교해 다운로드가 필요한
//! 구간 목록을 만듭니다.
//!
//! - 테이블이 없으면 전체 구간이 누락이며, 30일을 넘으면 달력 월 단위로 자릅니다.
//! - 테이블이 있으면 월 단위로 조회해 연속된 누락 분을 하나의 구간으로 묶고,
//!   가까운 구간끼리 병합합니다.

use chrono::{DateTime, Duration, Utc};
use kline_core::{SymbolName, TimeRange};
use kline_data::{CandleStore, Result};
use std::collections::BTreeSet;
use tracing::debug;

/// 병합 기준 기본값 (분).
pub const DEFAULT_MERGE_GAP_MINUTES: i64 = 10;

/// 한 심볼의 다운로드 작업.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolJob {
    pub symbol: SymbolName,
    /// 오름차순, 서로 겹치지 않음
    pub intervals: Vec<TimeRange>,
}

impl SymbolJob {
    pub fn new(symbol: SymbolName, intervals: Vec<TimeRange>) -> Self {
        Self { symbol, intervals }
    }

    /// 다운로드할 총 분 수.
    pub fn total_minutes(&self) -> i64 {
        self.intervals.iter().map(TimeRange::minutes).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }
}

/// `symbol`의 `range` 중 저장소에 없는 구간을 오름차순으로 반환합니다.
pub async fn detect_missing<S>(
    store: &S,
    symbol: &SymbolName,
    range: TimeRange,
    merge_gap: Duration,
) -> Result<Vec<TimeRange>>
where
    S: CandleStore + ?Sized,
{
    if !store.table_exists(symbol).await? {
        let intervals = if range.exceeds_month_split_threshold() {
            range.split_by_month()
        } else {
            vec![range]
        };
        debug!(symbol = %symbol, chunks = intervals.len(), "테이블 없음 - 전체 구간 누락");
        return Ok(intervals);
    }

    let mut missing = Vec::new();
    for segment in range.split_by_month() {
        let present = store.existing_timestamps(symbol, segment).await?;
        missing.extend(coalesce_missing(segment, &present));
    }

    let merged = merge_close(missing, merge_gap);
    debug!(
        symbol = %symbol,
        intervals = merged.len(),
        minutes = merged.iter().map(TimeRange::minutes).sum::<i64>(),
        "누락 구간 탐지"
    );
    Ok(merged)
}

/// `expected` 안에서 `present`에 없는 분들을 연속 구간으로 묶습니다.
///
/// `present` 중 `expected` 밖의 시각은 무시합니다.
pub fn coalesce_missing(expected: TimeRange, present: &BTreeSet<DateTime<Utc>>) -> Vec<TimeRange> {
    let mut gaps = Vec::new();
    let mut cursor = expected.start();

    for &ts in present.range(expected.start()..expected.end()) {
        if ts > cursor {
            if let Ok(gap) = TimeRange::new(cursor, ts) {
                gaps.push(gap);
            }
        }
        cursor = cursor.max(ts + Duration::minutes(1));
    }

    if let Ok(tail) = TimeRange::new(cursor, expected.end()) {
        gaps.push(tail);
    }
    gaps
}

/// 간격이 `max_gap` 이하인 인접 구간을 병합합니다.
///
/// 입력은 시작 시각 오름차순이어야 합니다.
pub fn merge_close(intervals: Vec<TimeRange>, max_gap: Duration) -> Vec<TimeRange> {
    let mut merged: Vec<TimeRange> = Vec::with_capacity(intervals.len());

    for interval in intervals {
        match merged.last_mut() {
            Some(prev) if interval.start() - prev.end() <= max_gap => {
                if interval.end() > prev.end() {
                    if let Ok(joined) = TimeRange::new(prev.start(), interval.end()) {
                        *prev = joined;
                    }
                }
            }
            _ => merged.push(interval),
        }
    }

    merged
}
