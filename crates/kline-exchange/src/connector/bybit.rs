//! Bybit v5 현물 REST 커넥터.
//!
//! 인증이 필요 없는 공개 시장 데이터 엔드포인트만 사용합니다:
//! - `GET /v5/market/kline` - 1분봉 (최신순, 최대 600개)
//! - `GET /v5/market/tickers` - 현물 티커 목록
//!
//! 모든 응답은 `{retCode, retMsg, result}` 봉투로 감싸져 있으며
//! HTTP 200이어도 `retCode != 0`이면 에러로 취급합니다.

use crate::retry::{with_retry, RetryConfig};
use crate::traits::{CandleSource, MAX_PAGE_MINUTES};
use crate::{ExchangeError, ExchangeResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kline_core::{Candle, MarketTicker, SymbolName, TimeRange};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// 에러 메시지에 포함할 응답 본문 최대 길이.
const MAX_ERROR_BODY: usize = 256;

// ============================================================================
// 설정
// ============================================================================

/// Bybit 클라이언트 설정.
#[derive(Debug, Clone)]
pub struct BybitConfig {
    /// REST API 기본 URL
    pub base_url: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 페이지당 최대 캔들 수
    pub page_limit: u32,
    /// 재시도 정책
    pub retry: RetryConfig,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.bybit.com".to_string(),
            timeout_secs: 30,
            page_limit: MAX_PAGE_MINUTES as u32,
            retry: RetryConfig::default(),
        }
    }
}

impl BybitConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

// ============================================================================
// API 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitEnvelope {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct BybitListResult<T> {
    list: Vec<T>,
}

/// `[startTime, open, high, low, close, volume, turnover]`
#[derive(Debug, Deserialize)]
struct BybitKlineRow(String, String, String, String, String, String, String);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BybitTickerRow {
    symbol: String,
    #[serde(default)]
    last_price: String,
    #[serde(default)]
    volume_24h: String,
    #[serde(default)]
    price_24h_pcnt: String,
    #[serde(default)]
    turnover_24h: String,
}

impl BybitKlineRow {
    fn into_candle(self) -> ExchangeResult<Candle> {
        let millis = i64::from_str(&self.0)
            .map_err(|e| ExchangeError::ParseError(format!("timestamp {:?}: {}", self.0, e)))?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| ExchangeError::ParseError(format!("timestamp out of range: {millis}")))?;

        Ok(Candle::new(
            timestamp,
            parse_decimal("open", &self.1)?,
            parse_decimal("high", &self.2)?,
            parse_decimal("low", &self.3)?,
            parse_decimal("close", &self.4)?,
            parse_decimal("volume", &self.5)?,
            parse_decimal("turnover", &self.6)?,
        ))
    }
}

impl BybitTickerRow {
    fn into_ticker(self) -> ExchangeResult<MarketTicker> {
        Ok(MarketTicker {
            last_price: parse_decimal_or_zero("lastPrice", &self.last_price)?,
            volume_24h: parse_decimal_or_zero("volume24h", &self.volume_24h)?,
            price_24h_pcnt: parse_decimal_or_zero("price24hPcnt", &self.price_24h_pcnt)?,
            turnover_24h: parse_decimal_or_zero("turnover24h", &self.turnover_24h)?,
            symbol: self.symbol,
        })
    }
}

fn parse_decimal(field: &str, raw: &str) -> ExchangeResult<Decimal> {
    Decimal::from_str(raw)
        .or_else(|_| Decimal::from_scientific(raw))
        .map_err(|e| ExchangeError::ParseError(format!("{field} {raw:?}: {e}")))
}

/// 티커의 빈 문자열 필드(거래 없음)는 0으로 취급합니다.
fn parse_decimal_or_zero(field: &str, raw: &str) -> ExchangeResult<Decimal> {
    if raw.is_empty() {
        Ok(Decimal::ZERO)
    } else {
        parse_decimal(field, raw)
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

// ============================================================================
// Bybit 클라이언트
// ============================================================================

/// Bybit 공개 시장 데이터 클라이언트.
#[derive(Debug, Clone)]
pub struct BybitClient {
    config: BybitConfig,
    client: Client,
}

impl BybitClient {
    /// 새 클라이언트를 생성합니다.
    pub fn new(config: BybitConfig) -> ExchangeResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("kline-loader/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BybitConfig {
        &self.config
    }

    /// GET 요청 한 번을 보내고 봉투를 검증한 뒤 `result.list`를 반환합니다.
    async fn get_list<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ExchangeResult<Vec<T>> {
        let response = self
            .client
            .get(self.config.endpoint(path))
            .query(query)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::HttpStatus {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.contains("application/json") {
            let body = response.text().await.unwrap_or_default();
            return Err(ExchangeError::ContentType(format!(
                "{content_type:?}, body: {}",
                truncate_body(&body)
            )));
        }

        let body = response.text().await?;
        let envelope: BybitEnvelope = serde_json::from_str(&body)?;

        if envelope.ret_code != 0 {
            return Err(ExchangeError::ApiError {
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }

        let result = envelope
            .result
            .ok_or_else(|| ExchangeError::ParseError("missing result".to_string()))?;
        let parsed: BybitListResult<T> = serde_json::from_value(result)
            .map_err(|e| ExchangeError::ParseError(format!("invalid result.list: {e}")))?;

        Ok(parsed.list)
    }

    /// 1분봉 한 페이지를 재시도 없이 요청합니다.
    async fn request_klines(
        &self,
        symbol: &SymbolName,
        window: TimeRange,
    ) -> ExchangeResult<Vec<Candle>> {
        let query = [
            ("category", "spot".to_string()),
            ("symbol", symbol.to_string()),
            ("interval", "1".to_string()),
            ("limit", self.config.page_limit.to_string()),
            ("start", window.start().timestamp_millis().to_string()),
            ("end", window.inclusive_end_ms().to_string()),
        ];

        let rows: Vec<BybitKlineRow> = self.get_list("/v5/market/kline", &query).await?;

        // 업스트림은 최신순 - 오름차순으로 정렬해 돌려준다
        let mut candles = rows
            .into_iter()
            .map(BybitKlineRow::into_candle)
            .collect::<ExchangeResult<Vec<_>>>()?;
        candles.sort_by_key(|c| c.timestamp);
        candles.dedup_by_key(|c| c.timestamp);

        Ok(candles)
    }

    async fn request_tickers(&self) -> ExchangeResult<Vec<MarketTicker>> {
        let query = [("category", "spot".to_string())];
        let rows: Vec<BybitTickerRow> = self.get_list("/v5/market/tickers", &query).await?;
        rows.into_iter().map(BybitTickerRow::into_ticker).collect()
    }
}

#[async_trait]
impl CandleSource for BybitClient {
    fn name(&self) -> &str {
        "bybit"
    }

    #[instrument(skip_all, fields(symbol = %symbol, window = %window))]
    async fn fetch_page(
        &self,
        symbol: &SymbolName,
        window: TimeRange,
        cancel: &CancellationToken,
    ) -> ExchangeResult<Vec<Candle>> {
        let candles = with_retry(&self.config.retry, cancel, "kline", |_| {
            self.request_klines(symbol, window)
        })
        .await?;

        debug!(count = candles.len(), "kline 페이지 수신");
        Ok(candles)
    }

    async fn fetch_tickers(&self, cancel: &CancellationToken) -> ExchangeResult<Vec<MarketTicker>> {
        with_retry(&self.config.retry, cancel, "tickers", |_| self.request_tickers()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kline_row_parsing() {
        let row: BybitKlineRow = serde_json::from_str(
            r#"["1704067200000","42283.58","42300","42261.02","42289.6","1.234","52180.5"]"#,
        )
        .unwrap();
        let candle = row.into_candle().unwrap();

        assert_eq!(candle.timestamp.timestamp_millis(), 1_704_067_200_000);
        assert_eq!(candle.open, dec!(42283.58));
        assert_eq!(candle.turnover, dec!(52180.5));
    }

    #[test]
    fn test_kline_row_rejects_garbage() {
        let row: BybitKlineRow =
            serde_json::from_str(r#"["abc","1","1","1","1","1","1"]"#).unwrap();
        assert!(matches!(row.into_candle(), Err(ExchangeError::ParseError(_))));

        let short = serde_json::from_str::<BybitKlineRow>(r#"["1","1","1"]"#);
        assert!(short.is_err());
    }

    #[test]
    fn test_ticker_row_empty_fields() {
        let row: BybitTickerRow = serde_json::from_str(
            r#"{"symbol":"NEWUSDT","lastPrice":"","volume24h":"0","price24hPcnt":"","turnover24h":"12.5"}"#,
        )
        .unwrap();
        let ticker = row.into_ticker().unwrap();
        assert_eq!(ticker.symbol, "NEWUSDT");
        assert_eq!(ticker.last_price, Decimal::ZERO);
        assert_eq!(ticker.turnover_24h, dec!(12.5));
    }

    #[test]
    fn test_endpoint_trims_slash() {
        let config = BybitConfig::new("http://localhost:1234/");
        assert_eq!(
            config.endpoint("/v5/market/kline"),
            "http://localhost:1234/v5/market/kline"
        );
    }
}
