//! 심볼 단위 다운로드 루프.
//!
//! 워커 하나가 `SymbolJob` 하나를 처리합니다. 구간은 순서대로, 구간 안의
//! 페이지는 시간 순으로 요청하고 저장합니다.

use crate::error::Result;
use crate::modules::gap_detect::SymbolJob;
use crate::progress::RunProgress;
use crate::stats::SkippedWindow;
use chrono::{DateTime, Duration, Utc};
use kline_core::{Candle, TimeRange};
use kline_data::CandleStore;
use kline_exchange::{CandleSource, MAX_PAGE_MINUTES};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// 다운로드 루프 설정.
#[derive(Debug, Clone, Copy)]
pub struct DownloadSettings {
    /// 한 페이지 윈도우 길이 (분)
    pub page_minutes: i64,
    /// 페이지 요청 간 딜레이
    pub page_delay: std::time::Duration,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            page_minutes: MAX_PAGE_MINUTES,
            page_delay: std::time::Duration::from_millis(100),
        }
    }
}

/// 심볼 하나의 다운로드 결과.
#[derive(Debug, Default)]
pub struct SymbolDownload {
    pub pages_fetched: usize,
    pub candles_inserted: u64,
    pub skipped: Vec<SkippedWindow>,
    /// 취소로 중단됨
    pub cancelled: bool,
}

impl SymbolDownload {
    fn interrupted(mut self) -> Self {
        self.cancelled = true;
        self
    }
}

/// 작업의 모든 구간을 다운로드합니다.
///
/// 저장소 에러는 즉시 반환되어 이 심볼만 실패합니다. 재시도를 소진한
/// 윈도우는 건너뛰고 `skipped`에 기록합니다. 완료되면 진행률을 100%로 맞춥니다.
pub async fn download_symbol(
    source: &dyn CandleSource,
    store: &dyn CandleStore,
    progress: &RunProgress,
    job: &SymbolJob,
    settings: DownloadSettings,
    cancel: &CancellationToken,
) -> Result<SymbolDownload> {
    let symbol = &job.symbol;
    let page = Duration::minutes(settings.page_minutes.clamp(1, MAX_PAGE_MINUTES));
    let mut outcome = SymbolDownload::default();
    let mut paced = false;

    if cancel.is_cancelled() {
        return Ok(outcome.interrupted());
    }
    store.ensure_table(symbol).await?;

    for interval in &job.intervals {
        let mut cursor = interval.start();

        while cursor < interval.end() {
            // 구간 경계를 넘어가도 연속한 두 요청 사이에는 항상 딜레이를 둔다
            if paced && !settings.page_delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(outcome.interrupted()),
                    _ = tokio::time::sleep(settings.page_delay) => {}
                }
            }
            if cancel.is_cancelled() {
                return Ok(outcome.interrupted());
            }
            paced = true;

            let window = TimeRange::new(cursor, (cursor + page).min(interval.end()))?;
            let mut newest: Option<DateTime<Utc>> = None;

            let next_cursor = match source.fetch_page(symbol, window, cancel).await {
                Ok(candles) => {
                    outcome.pages_fetched += 1;
                    let candles: Vec<Candle> = candles
                        .into_iter()
                        .filter(|c| window.contains(c.timestamp))
                        .collect();

                    match candles.last().map(|c| c.timestamp) {
                        // 이 윈도우에는 업스트림 데이터가 없다
                        None => window.end(),
                        Some(latest) => {
                            if cancel.is_cancelled() {
                                return Ok(outcome.interrupted());
                            }
                            outcome.candles_inserted += store.upsert(symbol, &candles).await?;
                            newest = Some(latest);
                            latest + Duration::minutes(1)
                        }
                    }
                }
                Err(e) if e.is_cancelled() => return Ok(outcome.interrupted()),
                Err(e) => {
                    warn!(
                        symbol = %symbol,
                        window = %window,
                        error = %e,
                        "재시도 소진 - 구간을 건너뜁니다"
                    );
                    outcome.skipped.push(SkippedWindow {
                        symbol: symbol.clone(),
                        window,
                        error: e.to_string(),
                    });
                    window.end()
                }
            };

            progress.advance(symbol, (next_cursor - cursor).num_minutes(), newest);
            cursor = next_cursor;
        }

        debug!(symbol = %symbol, interval = %interval, "구간 완료");
    }

    progress.complete(symbol);
    info!(
        symbol = %symbol,
        pages = outcome.pages_fetched,
        inserted = outcome.candles_inserted,
        skipped_windows = outcome.skipped.len(),
        "심볼 적재 완료"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use kline_core::SymbolName;
    use kline_data::MemoryCandleStore;
    use kline_exchange::SimulatedCandleSource;

    fn btc() -> SymbolName {
        SymbolName::new("BTCUSDT").unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn settings() -> DownloadSettings {
        DownloadSettings {
            page_delay: std::time::Duration::ZERO,
            ..Default::default()
        }
    }

    fn registered(job: &SymbolJob) -> RunProgress {
        let progress = RunProgress::new();
        progress.reset(1);
        progress.register(&job.symbol, job.total_minutes());
        progress
    }

    #[tokio::test]
    async fn test_long_interval_is_paged_in_order() {
        let source = SimulatedCandleSource::new();
        let store = MemoryCandleStore::new();
        let job = SymbolJob::new(btc(), vec![TimeRange::from_minutes(at(0, 0), 1500).unwrap()]);
        let progress = registered(&job);

        let result = download_symbol(&source, &store, &progress, &job, settings(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.pages_fetched, 3);
        assert_eq!(result.candles_inserted, 1500);
        let windows: Vec<i64> = source.requests().iter().map(|(_, w)| w.minutes()).collect();
        assert_eq!(windows, vec![600, 600, 300]);
        assert_eq!(progress.snapshot().entry(&btc()).unwrap().percent_done, 100);
    }

    #[tokio::test]
    async fn test_partial_page_advances_past_newest() {
        // 데이터는 00:30부터 01:00까지만 존재
        let listing = TimeRange::new(at(0, 30), at(1, 0)).unwrap();
        let source = SimulatedCandleSource::new().with_listing(btc(), listing);
        let store = MemoryCandleStore::new();
        let job = SymbolJob::new(btc(), vec![TimeRange::new(at(0, 0), at(2, 0)).unwrap()]);
        let progress = registered(&job);

        let result = download_symbol(&source, &store, &progress, &job, settings(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.candles_inserted, 30);
        let requests = source.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].1.start(), at(1, 0));

        let entry = progress.snapshot().entry(&btc()).cloned().unwrap();
        assert_eq!(entry.percent_done, 100);
        assert_eq!(entry.last_timestamp, Some(at(0, 59)));
    }

    #[tokio::test]
    async fn test_exhausted_window_is_skipped() {
        let source = SimulatedCandleSource::new().with_failures(btc(), at(0, 0), 3);
        let store = MemoryCandleStore::new();
        let job = SymbolJob::new(btc(), vec![TimeRange::from_minutes(at(0, 0), 700).unwrap()]);
        let progress = registered(&job);

        let result = download_symbol(&source, &store, &progress, &job, settings(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.skipped.len(), 1);
        assert_eq!(result.skipped[0].window.minutes(), 600);
        assert_eq!(result.candles_inserted, 100);
        assert_eq!(store.row_count(&btc()).await, 100);
        assert_eq!(progress.snapshot().entry(&btc()).unwrap().percent_done, 100);
    }

    #[tokio::test]
    async fn test_storage_error_fails_symbol() {
        let source = SimulatedCandleSource::new();
        let store = MemoryCandleStore::new();
        store.fail_symbol(&btc()).await;
        let job = SymbolJob::new(btc(), vec![TimeRange::from_minutes(at(0, 0), 10).unwrap()]);
        let progress = registered(&job);

        let result =
            download_symbol(&source, &store, &progress, &job, settings(), &CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_applies_across_interval_boundaries() {
        let source = SimulatedCandleSource::new();
        let store = MemoryCandleStore::new();
        // 병합되지 않은 짧은 구간 5개, 각각 한 페이지
        let intervals: Vec<TimeRange> = (0..5)
            .map(|i| TimeRange::from_minutes(at(i, 0), 10).unwrap())
            .collect();
        let job = SymbolJob::new(btc(), intervals);
        let progress = registered(&job);

        let started = tokio::time::Instant::now();
        let result = download_symbol(&source, &store, &progress, &job, DownloadSettings::default(), &CancellationToken::new())
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result.pages_fetched, 5);
        assert_eq!(result.candles_inserted, 50);
        let pacing = DownloadSettings::default().page_delay;
        assert!(elapsed >= pacing * 4, "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pacing_stops_loop() {
        let token = CancellationToken::new();
        let source = SimulatedCandleSource::new().cancel_after(2, token.clone());
        let store = MemoryCandleStore::new();
        let job = SymbolJob::new(btc(), vec![TimeRange::from_minutes(at(0, 0), 3000).unwrap()]);
        let progress = registered(&job);

        let result = download_symbol(&source, &store, &progress, &job, DownloadSettings::default(), &token)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(source.calls(), 2);
        let entry = progress.snapshot().entry(&btc()).cloned().unwrap();
        assert!(entry.percent_done < 100);
    }
}
