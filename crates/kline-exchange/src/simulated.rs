//! 시뮬레이션 캔들 소스.
//!
//! 네트워크 없이 결정적인 1분봉을 생성합니다. 파이프라인 테스트에서
//! 업스트림 대신 사용하며 다음을 지원합니다:
//! - 심볼별 데이터 제공 구간 제한 (구간 밖은 "데이터 없음")
//! - 특정 윈도우에 대한 연속 실패 주입
//! - 동시 요청 수 계측 (현재/최대)
//! - N번째 호출 시 취소 토큰 발동

use crate::retry::{with_retry, RetryConfig};
use crate::traits::CandleSource;
use crate::{ExchangeError, ExchangeResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::{Candle, MarketTicker, SymbolName, TimeRange, MINUTE_MS};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// 실패 주입 키: (심볼, 윈도우 시작).
type FailureKey = (SymbolName, DateTime<Utc>);

/// 결정적 캔들 생성기.
#[derive(Debug)]
pub struct SimulatedCandleSource {
    retry: RetryConfig,
    latency: Duration,
    page_limit: usize,
    listings: HashMap<SymbolName, TimeRange>,
    failures: Mutex<HashMap<FailureKey, u32>>,
    cancel_trigger: Option<(usize, CancellationToken)>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    requests: Mutex<Vec<(SymbolName, TimeRange)>>,
}

impl Default for SimulatedCandleSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedCandleSource {
    /// 모든 심볼, 모든 시각에 데이터가 있는 소스.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::immediate(3),
            latency: Duration::ZERO,
            page_limit: 600,
            listings: HashMap::new(),
            failures: Mutex::new(HashMap::new()),
            cancel_trigger: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 요청마다 지연을 추가합니다 (동시성 계측용).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    /// `symbol`의 데이터가 `range` 안에만 존재하도록 제한합니다.
    pub fn with_listing(mut self, symbol: SymbolName, range: TimeRange) -> Self {
        self.listings.insert(symbol, range);
        self
    }

    /// `window_start`로 시작하는 윈도우 요청을 `times`번 실패시킵니다.
    pub fn with_failures(self, symbol: SymbolName, window_start: DateTime<Utc>, times: u32) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert((symbol, window_start), times);
        }
        self
    }

    /// `calls`번째 요청이 시작될 때 `token`을 취소합니다.
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_trigger = Some((calls, token));
        self
    }

    /// 업스트림 요청 수 (재시도 포함).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 관측된 최대 동시 요청 수.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// 지금까지의 요청 기록 (심볼, 윈도우).
    pub fn requests(&self) -> Vec<(SymbolName, TimeRange)> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// `ts`에 대한 결정적 캔들.
    pub fn candle_at(ts: DateTime<Utc>) -> Candle {
        let minute = ts.timestamp_millis() / MINUTE_MS;
        let base = Decimal::from(100 + minute.rem_euclid(50));
        Candle::new(
            ts,
            base,
            base + Decimal::ONE,
            base - Decimal::ONE,
            base + Decimal::new(5, 1),
            Decimal::from(minute.rem_euclid(7) + 1),
            base * Decimal::from(minute.rem_euclid(7) + 1),
        )
    }

    async fn request_once(
        &self,
        symbol: &SymbolName,
        window: TimeRange,
    ) -> ExchangeResult<Vec<Candle>> {
        let call_no = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((at, token)) = &self.cancel_trigger {
            if call_no >= *at {
                token.cancel();
            }
        }

        let _guard = InFlightGuard::enter(&self.in_flight, &self.peak_in_flight);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((symbol.clone(), window));
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.generate(symbol, window)
    }

    fn generate(&self, symbol: &SymbolName, window: TimeRange) -> ExchangeResult<Vec<Candle>> {
        let key = (symbol.clone(), window.start());
        if let Ok(mut failures) = self.failures.lock() {
            if let Some(remaining) = failures.get_mut(&key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ExchangeError::ApiError {
                        code: 10016,
                        message: "simulated failure".to_string(),
                    });
                }
            }
        }

        let available = match self.listings.get(symbol) {
            Some(listing) => match window.intersect(listing) {
                Some(range) => range,
                None => return Ok(Vec::new()),
            },
            None => window,
        };

        // 업스트림처럼 limit을 넘으면 최신 캔들만 남긴다
        let candles: Vec<Candle> = available.iter_minutes().map(Self::candle_at).collect();
        let skip = candles.len().saturating_sub(self.page_limit);
        Ok(candles.into_iter().skip(skip).collect())
    }
}

/// 요청 중 취소(future drop)되어도 카운터가 복구되도록 하는 가드.
struct InFlightGuard<'a> {
    in_flight: &'a AtomicUsize,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(current, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CandleSource for SimulatedCandleSource {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn fetch_page(
        &self,
        symbol: &SymbolName,
        window: TimeRange,
        cancel: &CancellationToken,
    ) -> ExchangeResult<Vec<Candle>> {
        with_retry(&self.retry, cancel, "simulated-kline", |_| {
            self.request_once(symbol, window)
        })
        .await
    }

    async fn fetch_tickers(&self, _cancel: &CancellationToken) -> ExchangeResult<Vec<MarketTicker>> {
        let mut symbols: Vec<&SymbolName> = self.listings.keys().collect();
        symbols.sort();

        Ok(symbols
            .into_iter()
            .enumerate()
            .map(|(i, symbol)| MarketTicker {
                symbol: symbol.to_string(),
                last_price: Decimal::from(100 + i as i64),
                volume_24h: Decimal::from(1000 * (i as i64 + 1)),
                price_24h_pcnt: Decimal::new(i as i64, 2),
                turnover_24h: Decimal::from(100_000 * (i as i64 + 1)),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn symbol() -> SymbolName {
        SymbolName::new("BTCUSDT").unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[tokio::test]
    async fn test_generates_full_window_ascending() {
        let source = SimulatedCandleSource::new();
        let window = TimeRange::from_minutes(at(0, 0), 130).unwrap();
        let candles = source
            .fetch_page(&symbol(), window, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(candles.len(), 130);
        assert_eq!(candles[0].timestamp, at(0, 0));
        assert_eq!(candles[129].timestamp, at(2, 9));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_listing_limits_data() {
        let listing = TimeRange::new(at(1, 0), at(3, 0)).unwrap();
        let source = SimulatedCandleSource::new().with_listing(symbol(), listing);

        let before = TimeRange::from_minutes(at(0, 0), 60).unwrap();
        let overlap = TimeRange::from_minutes(at(0, 30), 60).unwrap();
        let token = CancellationToken::new();

        assert!(source.fetch_page(&symbol(), before, &token).await.unwrap().is_empty());
        let candles = source.fetch_page(&symbol(), overlap, &token).await.unwrap();
        assert_eq!(candles.len(), 30);
        assert_eq!(candles[0].timestamp, at(1, 0));
    }

    #[tokio::test]
    async fn test_injected_failures_are_retried() {
        let source = SimulatedCandleSource::new().with_failures(symbol(), at(0, 0), 2);
        let window = TimeRange::from_minutes(at(0, 0), 10).unwrap();

        let candles = source
            .fetch_page(&symbol(), window, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(candles.len(), 10);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_page_limit_keeps_newest() {
        let source = SimulatedCandleSource::new().with_page_limit(5);
        let window = TimeRange::from_minutes(at(0, 0), 10).unwrap();
        let candles = source
            .fetch_page(&symbol(), window, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(candles.len(), 5);
        assert_eq!(candles[0].timestamp, at(0, 5));
    }
}
