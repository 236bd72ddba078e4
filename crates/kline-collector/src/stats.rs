//! 수집 통계와 실행 보고서.

use kline_core::{SymbolName, TimeRange};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// 적재 작업 통계
#[derive(Debug, Clone, Default, Serialize)]
pub struct CollectionStats {
    /// 대상 심볼 수
    pub symbols_total: usize,
    /// 다운로드를 끝낸 심볼 수
    pub succeeded: usize,
    /// 탐지 또는 저장 실패로 중단된 심볼 수
    pub failed: usize,
    /// 건너뛴 심볼 수 (이미 모두 저장됨)
    pub skipped: usize,
    /// 취소로 중단된 심볼 수
    pub interrupted: usize,
    /// 성공한 페이지 요청 수
    pub pages_fetched: usize,
    /// 새로 저장된 캔들 수
    pub candles_inserted: u64,
    /// 재시도 소진으로 건너뛴 윈도우 수
    pub windows_skipped: usize,
    /// 소요 시간
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CollectionStats {
    /// 새 통계 객체 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 성공률 계산 (%). 이미 최신인 심볼도 성공으로 셉니다.
    pub fn success_rate(&self) -> f64 {
        if self.symbols_total == 0 {
            0.0
        } else {
            ((self.succeeded + self.skipped) as f64 / self.symbols_total as f64) * 100.0
        }
    }

    /// 통계 요약 로그 출력
    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation = operation,
            symbols = self.symbols_total,
            succeeded = self.succeeded,
            failed = self.failed,
            skipped = self.skipped,
            interrupted = self.interrupted,
            pages = self.pages_fetched,
            candles = self.candles_inserted,
            windows_skipped = self.windows_skipped,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "적재 완료"
        );
    }
}

/// 재시도를 모두 소진해 데이터 없이 지나간 윈도우.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedWindow {
    pub symbol: SymbolName,
    pub window: TimeRange,
    pub error: String,
}

/// 심볼이 실패한 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Detect,
    Download,
}

/// 심볼 단위 실패.
#[derive(Debug, Clone, Serialize)]
pub struct SymbolFailure {
    pub symbol: SymbolName,
    pub stage: FailureStage,
    pub error: String,
}

/// 실행 결과 분류.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// 모든 심볼 완료
    Completed,
    /// 일부 심볼 실패
    PartialSuccess { failed: Vec<SymbolName> },
    /// 사용자가 취소
    Cancelled,
    /// 완료된 심볼 없이 모두 실패
    Failed { failed: Vec<SymbolName> },
}

impl RunOutcome {
    /// 집계 결과로 실행 결과를 결정합니다.
    ///
    /// 취소로 중단된 심볼이 하나라도 있으면 `Cancelled`입니다.
    pub fn classify(stats: &CollectionStats, failures: &[SymbolFailure]) -> Self {
        if stats.interrupted > 0 {
            return Self::Cancelled;
        }
        if failures.is_empty() {
            return Self::Completed;
        }

        let failed: Vec<SymbolName> = failures.iter().map(|f| f.symbol.clone()).collect();
        if stats.succeeded + stats.skipped > 0 {
            Self::PartialSuccess { failed }
        } else {
            Self::Failed { failed }
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::PartialSuccess { failed } => {
                write!(f, "partial success ({} symbol(s) failed)", failed.len())
            }
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed { failed } => write!(f, "failed ({} symbol(s))", failed.len()),
        }
    }
}

/// 한 번의 적재 실행 보고서.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub stats: CollectionStats,
    pub skipped_windows: Vec<SkippedWindow>,
    pub failures: Vec<SymbolFailure>,
}

impl RunReport {
    /// 실행 전체가 실패했는지. 부분 성공과 취소는 포함하지 않습니다.
    pub fn is_fatal(&self) -> bool {
        matches!(self.outcome, RunOutcome::Failed { .. })
    }

    /// 요약과 경고를 로그로 남깁니다.
    pub fn log(&self) {
        self.stats.log_summary("1분봉 적재");

        for skipped in &self.skipped_windows {
            tracing::warn!(
                symbol = %skipped.symbol,
                window = %skipped.window,
                error = %skipped.error,
                "데이터 없이 건너뛴 구간"
            );
        }
        for failure in &self.failures {
            tracing::error!(
                symbol = %failure.symbol,
                stage = ?failure.stage,
                error = %failure.error,
                "심볼 적재 실패"
            );
        }

        tracing::info!(outcome = %self.outcome, "실행 결과");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(symbol: &str) -> SymbolFailure {
        SymbolFailure {
            symbol: SymbolName::new(symbol).unwrap(),
            stage: FailureStage::Download,
            error: "boom".to_string(),
        }
    }

    #[test]
    fn test_success_rate_counts_up_to_date_symbols() {
        let stats = CollectionStats {
            symbols_total: 4,
            succeeded: 2,
            skipped: 1,
            failed: 1,
            ..Default::default()
        };
        assert!((stats.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(CollectionStats::new().success_rate(), 0.0);
    }

    #[test]
    fn test_outcome_classification() {
        let mut stats = CollectionStats {
            symbols_total: 2,
            succeeded: 1,
            failed: 1,
            ..Default::default()
        };
        let failures = vec![failure("ETHUSDT")];

        assert!(matches!(
            RunOutcome::classify(&stats, &failures),
            RunOutcome::PartialSuccess { ref failed } if failed.len() == 1
        ));

        stats.succeeded = 0;
        assert!(matches!(
            RunOutcome::classify(&stats, &failures),
            RunOutcome::Failed { .. }
        ));

        stats.interrupted = 1;
        assert_eq!(RunOutcome::classify(&stats, &failures), RunOutcome::Cancelled);

        let clean = CollectionStats {
            symbols_total: 1,
            succeeded: 1,
            ..Default::default()
        };
        assert_eq!(RunOutcome::classify(&clean, &[]), RunOutcome::Completed);
    }
}
