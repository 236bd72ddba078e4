//! 적재 실행 코디네이터.
//!
//! 구성:
//! - 심볼마다 탐지 태스크 하나 (개수 제한 없음)
//! - 용량 N의 작업 큐 (`mpsc`)
//! - 큐를 공유하는 다운로드 워커 N개
//!
//! 모든 탐지 태스크가 끝나면 송신측이 모두 drop되어 큐가 닫히고,
//! 워커는 남은 작업을 비운 뒤 종료합니다.

use crate::error::{CollectorError, Result};
use crate::modules::download::{download_symbol, DownloadSettings, SymbolDownload};
use crate::modules::gap_detect::{detect_missing, SymbolJob, DEFAULT_MERGE_GAP_MINUTES};
use crate::progress::RunProgress;
use crate::stats::{CollectionStats, FailureStage, RunOutcome, RunReport, SkippedWindow, SymbolFailure};
use chrono::Duration;
use kline_core::{SymbolName, TimeRange};
use kline_data::CandleStore;
use kline_exchange::{CandleSource, MAX_PAGE_MINUTES};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 코디네이터 설정.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// 동시 다운로드 워커 수 (N)
    pub concurrency: usize,
    /// 누락 구간 병합 기준
    pub merge_gap: Duration,
    /// 페이지 윈도우 길이 (분)
    pub page_minutes: i64,
    /// 페이지 요청 간 딜레이
    pub page_delay: std::time::Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            merge_gap: Duration::minutes(DEFAULT_MERGE_GAP_MINUTES),
            page_minutes: MAX_PAGE_MINUTES,
            page_delay: std::time::Duration::from_millis(100),
        }
    }
}

impl CoordinatorConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_page_delay(mut self, page_delay: std::time::Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    fn download_settings(&self) -> DownloadSettings {
        DownloadSettings {
            page_minutes: self.page_minutes,
            page_delay: self.page_delay,
        }
    }
}

/// 탐지 태스크 결과.
enum Detection {
    Queued,
    UpToDate,
    Failed(SymbolFailure),
    Cancelled,
}

/// 워커가 처리한 심볼 하나의 결과.
struct WorkerResult {
    symbol: SymbolName,
    result: Result<SymbolDownload>,
}

/// 적재 실행 코디네이터.
pub struct LoadCoordinator {
    source: Arc<dyn CandleSource>,
    store: Arc<dyn CandleStore>,
    config: CoordinatorConfig,
    progress: Arc<RunProgress>,
}

impl LoadCoordinator {
    pub fn new(
        source: Arc<dyn CandleSource>,
        store: Arc<dyn CandleStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
            progress: Arc::new(RunProgress::new()),
        }
    }

    /// 진행률 핸들. 실행 중 외부에서 `snapshot()`으로 폴링합니다.
    pub fn progress(&self) -> Arc<RunProgress> {
        Arc::clone(&self.progress)
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// 실행 후 결과와 관계없이 저장소를 닫습니다.
    pub async fn run_and_close(
        &self,
        symbols: Vec<SymbolName>,
        range: TimeRange,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let result = self.run(symbols, range, cancel).await;
        self.store.close().await;
        result
    }

    /// 한 번의 적재를 실행합니다.
    ///
    /// 실행을 시작할 수 없는 경우에만 `Err`를 반환하고, 심볼 단위 실패와
    /// 취소는 `RunReport`의 결과로 보고합니다.
    pub async fn run(
        &self,
        symbols: Vec<SymbolName>,
        range: TimeRange,
        cancel: CancellationToken,
    ) -> Result<RunReport> {
        let started = Instant::now();
        let concurrency = self.config.concurrency;
        if concurrency == 0 {
            return Err(CollectorError::Config(
                "concurrency는 1 이상이어야 합니다".to_string(),
            ));
        }

        let mut unique: Vec<SymbolName> = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if !unique.contains(&symbol) {
                unique.push(symbol);
            }
        }

        self.progress.reset(unique.len());
        self.store.ensure_schema().await?;

        info!(
            source = self.source.name(),
            symbols = unique.len(),
            range = %range,
            concurrency,
            "적재 시작"
        );

        let (tx, rx) = mpsc::channel::<SymbolJob>(concurrency);
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for worker_id in 0..concurrency {
            workers.spawn(worker_loop(
                worker_id,
                Arc::clone(&rx),
                Arc::clone(&self.source),
                Arc::clone(&self.store),
                Arc::clone(&self.progress),
                self.config.download_settings(),
                cancel.clone(),
            ));
        }

        let mut detections = JoinSet::new();
        for symbol in &unique {
            detections.spawn(detect_and_enqueue(
                symbol.clone(),
                range,
                self.config.merge_gap,
                Arc::clone(&self.store),
                Arc::clone(&self.progress),
                tx.clone(),
                cancel.clone(),
            ));
        }
        drop(tx);

        let mut stats = CollectionStats {
            symbols_total: unique.len(),
            ..Default::default()
        };
        let mut failures: Vec<SymbolFailure> = Vec::new();
        let mut skipped_windows: Vec<SkippedWindow> = Vec::new();

        while let Some(joined) = detections.join_next().await {
            match joined? {
                Detection::Queued => {}
                Detection::UpToDate => stats.skipped += 1,
                Detection::Failed(failure) => failures.push(failure),
                Detection::Cancelled => stats.interrupted += 1,
            }
        }

        while let Some(joined) = workers.join_next().await {
            for WorkerResult { symbol, result } in joined? {
                match result {
                    Ok(download) => {
                        stats.pages_fetched += download.pages_fetched;
                        stats.candles_inserted += download.candles_inserted;
                        stats.windows_skipped += download.skipped.len();
                        skipped_windows.extend(download.skipped);
                        if download.cancelled {
                            stats.interrupted += 1;
                        } else {
                            stats.succeeded += 1;
                        }
                    }
                    Err(e) => failures.push(SymbolFailure {
                        symbol,
                        stage: FailureStage::Download,
                        error: e.to_string(),
                    }),
                }
            }
        }

        // 큐에 남아 있다가 취소로 처리되지 못한 작업
        let accounted = stats.succeeded + stats.skipped + stats.interrupted + failures.len();
        stats.interrupted += stats.symbols_total.saturating_sub(accounted);

        stats.failed = failures.len();
        stats.elapsed = started.elapsed();
        skipped_windows.sort_by_key(|w| (w.symbol.clone(), w.window.start()));

        let outcome = RunOutcome::classify(&stats, &failures);
        Ok(RunReport {
            outcome,
            stats,
            skipped_windows,
            failures,
        })
    }
}

/// 심볼 하나의 누락 구간을 탐지하고 작업 큐에 넣습니다.
async fn detect_and_enqueue(
    symbol: SymbolName,
    range: TimeRange,
    merge_gap: Duration,
    store: Arc<dyn CandleStore>,
    progress: Arc<RunProgress>,
    tx: mpsc::Sender<SymbolJob>,
    cancel: CancellationToken,
) -> Detection {
    if cancel.is_cancelled() {
        return Detection::Cancelled;
    }

    let intervals = match detect_missing(store.as_ref(), &symbol, range, merge_gap).await {
        Ok(intervals) => intervals,
        Err(e) => {
            error!(symbol = %symbol, error = %e, "누락 구간 탐지 실패");
            progress.mark_failed(&symbol);
            return Detection::Failed(SymbolFailure {
                symbol,
                stage: FailureStage::Detect,
                error: e.to_string(),
            });
        }
    };

    let job = SymbolJob::new(symbol, intervals);
    progress.register(&job.symbol, job.total_minutes());

    if job.is_empty() {
        progress.complete(&job.symbol);
        debug!(symbol = %job.symbol, "이미 모두 저장됨");
        return Detection::UpToDate;
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Detection::Cancelled,
        sent = tx.send(job) => match sent {
            Ok(()) => Detection::Queued,
            // 워커가 모두 종료됨 (취소 후)
            Err(_) => Detection::Cancelled,
        },
    }
}

/// 큐가 닫힐 때까지 작업을 하나씩 꺼내 처리합니다.
async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<SymbolJob>>>,
    source: Arc<dyn CandleSource>,
    store: Arc<dyn CandleStore>,
    progress: Arc<RunProgress>,
    settings: DownloadSettings,
    cancel: CancellationToken,
) -> Vec<WorkerResult> {
    let mut results = Vec::new();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let job = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        let _active = progress.track_worker();
        debug!(worker_id, symbol = %job.symbol, intervals = job.intervals.len(), "작업 시작");

        let result = download_symbol(
            source.as_ref(),
            store.as_ref(),
            &progress,
            &job,
            settings,
            &cancel,
        )
        .await;

        if let Err(e) = &result {
            warn!(worker_id, symbol = %job.symbol, error = %e, "심볼 다운로드 실패");
        }
        results.push(WorkerResult {
            symbol: job.symbol,
            result,
        });
    }

    debug!(worker_id, processed = results.len(), "워커 종료");
    results
}
