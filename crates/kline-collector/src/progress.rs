//! 실행 단위 진행률 집계.
//!
//! `RunProgress`는 코디네이터가 소유하고 워커들이 `Arc`로 공유합니다.
//! 외부에서는 `snapshot()`으로 언제든 일관된 사본을 읽어 갈 수 있습니다.
//!
//! 전체 분 수는 심볼별 탐지가 끝날 때마다 누적됩니다. 따라서 실행 초반의
//! 전체 진행률은 아직 탐지되지 않은 심볼을 포함하지 않습니다.

use chrono::{DateTime, Utc};
use kline_core::SymbolName;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// 완료 전 심볼 진행률 상한.
const MAX_PERCENT_BEFORE_COMPLETE: u8 = 99;

/// 심볼별 진행 상태.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEntry {
    /// 0..=100, 단조 증가
    pub percent_done: u8,
    pub completed_minutes: f64,
    pub total_minutes: i64,
    /// 마지막으로 저장된 캔들 시각
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl ProgressEntry {
    fn new(total_minutes: i64) -> Self {
        Self {
            percent_done: if total_minutes == 0 { 100 } else { 0 },
            completed_minutes: 0.0,
            total_minutes,
            last_timestamp: None,
        }
    }

    /// 탐지에 실패해 0%에 고정된 항목.
    fn failed() -> Self {
        Self {
            percent_done: 0,
            completed_minutes: 0.0,
            total_minutes: 0,
            last_timestamp: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.percent_done == 100
    }
}

/// 진행률 사본.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressSnapshot {
    pub symbols: BTreeMap<SymbolName, ProgressEntry>,
    pub completed_minutes: f64,
    pub total_minutes: i64,
    pub percent_done: u8,
    pub symbols_total: usize,
    pub symbols_detected: usize,
    pub symbols_failed: usize,
    /// 현재 심볼을 처리 중인 워커 수
    pub active_workers: usize,
}

impl ProgressSnapshot {
    pub fn entry(&self, symbol: &SymbolName) -> Option<&ProgressEntry> {
        self.symbols.get(symbol)
    }

    pub fn detection_done(&self) -> bool {
        self.symbols_detected >= self.symbols_total
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    symbols_total: usize,
    symbols_detected: usize,
    symbols_failed: usize,
    completed_minutes: f64,
    total_minutes: i64,
    entries: BTreeMap<SymbolName, ProgressEntry>,
}

impl ProgressState {
    fn percent_done(&self) -> u8 {
        if self.total_minutes <= 0 {
            return if self.symbols_detected >= self.symbols_total {
                100
            } else {
                0
            };
        }
        let ratio = self.completed_minutes / self.total_minutes as f64;
        (ratio * 100.0).floor().clamp(0.0, 100.0) as u8
    }
}

/// 실행 단위 진행률 집계기.
#[derive(Debug, Default)]
pub struct RunProgress {
    state: RwLock<ProgressState>,
    active_workers: AtomicUsize,
}

impl RunProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// 새 실행을 위해 모든 상태를 초기화합니다.
    pub fn reset(&self, symbols_total: usize) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *state = ProgressState {
            symbols_total,
            ..Default::default()
        };
        self.active_workers.store(0, Ordering::SeqCst);
    }

    /// 탐지를 마친 심볼을 등록하고 전체 분 수에 더합니다.
    pub fn register(&self, symbol: &SymbolName, total_minutes: i64) {
        let total_minutes = total_minutes.max(0);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.total_minutes += total_minutes;
        state.symbols_detected += 1;
        state
            .entries
            .insert(symbol.clone(), ProgressEntry::new(total_minutes));
    }

    /// 처리한 분 수만큼 진행률을 올립니다.
    ///
    /// 등록되지 않은 심볼은 무시합니다. 완료 전에는 99%를 넘지 않습니다.
    pub fn advance(&self, symbol: &SymbolName, minutes: i64, last_timestamp: Option<DateTime<Utc>>) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = state.entries.get_mut(symbol) else {
            return;
        };

        let before = entry.completed_minutes;
        let total = entry.total_minutes as f64;
        entry.completed_minutes = (before + minutes.max(0) as f64).min(total);
        let delta = entry.completed_minutes - before;

        if entry.total_minutes > 0 && !entry.is_complete() {
            let percent = ((entry.completed_minutes / total) * 100.0).floor() as u8;
            entry.percent_done = entry
                .percent_done
                .max(percent.min(MAX_PERCENT_BEFORE_COMPLETE));
        }
        if let Some(ts) = last_timestamp {
            entry.last_timestamp = Some(entry.last_timestamp.map_or(ts, |prev| prev.max(ts)));
        }

        state.completed_minutes += delta;
    }

    /// 심볼을 완료 처리합니다 (100%, completed = total).
    pub fn complete(&self, symbol: &SymbolName) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = state.entries.get_mut(symbol) else {
            return;
        };

        let delta = entry.total_minutes as f64 - entry.completed_minutes;
        entry.completed_minutes = entry.total_minutes as f64;
        entry.percent_done = 100;
        state.completed_minutes += delta;
    }

    /// 탐지에 실패한 심볼을 기록합니다. 항목은 0%에 고정됩니다.
    pub fn mark_failed(&self, symbol: &SymbolName) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.symbols_detected += 1;
        state.symbols_failed += 1;
        state
            .entries
            .entry(symbol.clone())
            .or_insert_with(ProgressEntry::failed);
    }

    /// 워커가 작업을 잡고 있는 동안 활성 워커 수를 올려 둡니다.
    pub fn track_worker(&self) -> ActiveWorker<'_> {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
        ActiveWorker {
            counter: &self.active_workers,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        ProgressSnapshot {
            symbols: state.entries.clone(),
            completed_minutes: state.completed_minutes,
            total_minutes: state.total_minutes,
            percent_done: state.percent_done(),
            symbols_total: state.symbols_total,
            symbols_detected: state.symbols_detected,
            symbols_failed: state.symbols_failed,
            active_workers: self.active_workers.load(Ordering::SeqCst),
        }
    }

    /// 현재 진행률을 한 줄 로그로 남깁니다.
    pub fn log_line(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            percent = snapshot.percent_done,
            completed = snapshot.completed_minutes as i64,
            total = snapshot.total_minutes,
            detected = format!("{}/{}", snapshot.symbols_detected, snapshot.symbols_total),
            active_workers = snapshot.active_workers,
            "진행률"
        );

        for (symbol, entry) in snapshot.symbols.iter().filter(|(_, e)| !e.is_complete()) {
            tracing::debug!(
                symbol = %symbol,
                percent = entry.percent_done,
                completed = entry.completed_minutes as i64,
                total = entry.total_minutes,
                last_timestamp = ?entry.last_timestamp,
                "심볼 진행률"
            );
        }
    }
}

/// `track_worker`가 돌려주는 가드. drop 시 활성 워커 수를 내립니다.
pub struct ActiveWorker<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for ActiveWorker<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
