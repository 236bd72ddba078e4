//! 분 해상도 반열린 시간 구간.
//!
//! 모든 구간은 `[start, end)` 형태이며 생성 이후 비어 있을 수 없습니다.
//! 달력 월 경계 계산도 이 모듈에서 제공합니다.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::Serialize;
use std::fmt;

/// 1분을 밀리초로 표현한 값.
pub const MINUTE_MS: i64 = 60_000;

/// 월 단위 분할이 시작되는 최소 구간 길이 (일).
pub const MONTH_SPLIT_THRESHOLD_DAYS: i64 = 30;

/// 분 단위로 내림한 시각을 반환합니다.
pub fn floor_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(ts)
}

/// 초와 밀리초 이하가 모두 0인지 확인합니다.
pub fn is_minute_aligned(ts: DateTime<Utc>) -> bool {
    ts.timestamp_millis().rem_euclid(MINUTE_MS) == 0
}

/// `ts`가 속한 달의 1일 00:00 UTC.
pub fn month_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    first_of_month(ts.year(), ts.month()).unwrap_or(ts)
}

/// `ts` 다음 달의 1일 00:00 UTC.
pub fn next_month_start(ts: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if ts.month() == 12 {
        (ts.year() + 1, 1)
    } else {
        (ts.year(), ts.month() + 1)
    };
    first_of_month(year, month).unwrap_or(ts + Duration::days(31))
}

fn first_of_month(year: i32, month: u32) -> Option<DateTime<Utc>> {
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// 반열린 시간 구간 `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// 새 구간을 생성합니다.
    ///
    /// 양 끝이 분 경계가 아니거나 `start < end`가 아니면 에러를 반환합니다.
    /// 임의 시각에서 시작하려면 [`TimeRange::aligned`]를 사용합니다.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        for ts in [start, end] {
            if !is_minute_aligned(ts) {
                return Err(CoreError::InvalidRange(format!(
                    "{ts}는 분 경계가 아닙니다"
                )));
            }
        }
        if start >= end {
            return Err(CoreError::InvalidRange(format!(
                "start({start})가 end({end})보다 앞서야 합니다"
            )));
        }
        Ok(Self { start, end })
    }

    /// 양 끝을 분 단위로 내림하여 구간을 생성합니다.
    ///
    /// 내림 결과 구간이 비면 에러입니다.
    pub fn aligned(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        Self::new(floor_to_minute(start), floor_to_minute(end))
    }

    /// `start`부터 `minutes`분 길이의 구간.
    pub fn from_minutes(start: DateTime<Utc>, minutes: i64) -> CoreResult<Self> {
        Self::new(start, start + Duration::minutes(minutes))
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// 구간 길이 (분).
    pub fn minutes(&self) -> i64 {
        self.duration().num_minutes()
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    /// 두 구간의 교집합. 겹치지 않으면 `None`.
    pub fn intersect(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        TimeRange::new(start, end).ok()
    }

    /// 구간을 달력 월 경계에서 자릅니다.
    ///
    /// 첫 조각은 `start`부터 다음 월 경계까지, 마지막 조각은 마지막 월 경계부터
    /// `end`까지입니다. 조각들은 연속이며 합치면 원래 구간과 같습니다.
    pub fn split_by_month(&self) -> Vec<TimeRange> {
        let mut chunks = Vec::new();
        let mut cursor = self.start;

        while cursor < self.end {
            let chunk_end = next_month_start(cursor).min(self.end);
            chunks.push(TimeRange {
                start: cursor,
                end: chunk_end,
            });
            cursor = chunk_end;
        }

        chunks
    }

    /// 구간이 월 분할 기준(30일)보다 긴지 확인합니다.
    pub fn exceeds_month_split_threshold(&self) -> bool {
        self.duration() > Duration::days(MONTH_SPLIT_THRESHOLD_DAYS)
    }

    /// 구간 안의 모든 분 시각을 오름차순으로 순회합니다.
    pub fn iter_minutes(&self) -> impl Iterator<Item = DateTime<Utc>> {
        let start = self.start;
        (0..self.minutes()).map(move |i| start + Duration::minutes(i))
    }

    /// `end`를 포함 구간의 마지막 밀리초로 표현한 값 (업스트림 요청용).
    pub fn inclusive_end_ms(&self) -> i64 {
        self.end.timestamp_millis() - 1
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}
