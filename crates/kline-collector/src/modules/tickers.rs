//! 현물 티커 목록 조회.

use crate::error::{CollectorError, Result};
use kline_core::MarketTicker;
use kline_exchange::CandleSource;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// 정렬 기준 (항상 내림차순).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickerSort {
    /// 24시간 거래대금
    #[default]
    Turnover,
    /// 24시간 거래량
    Volume,
    /// 24시간 등락률
    Change,
}

impl FromStr for TickerSort {
    type Err = CollectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "turnover" => Ok(Self::Turnover),
            "volume" => Ok(Self::Volume),
            "change" => Ok(Self::Change),
            other => Err(CollectorError::Config(format!(
                "알 수 없는 정렬 기준: {other} (turnover, volume, change)"
            ))),
        }
    }
}

impl TickerSort {
    fn key(&self, ticker: &MarketTicker) -> Decimal {
        match self {
            Self::Turnover => ticker.turnover_24h,
            Self::Volume => ticker.volume_24h,
            Self::Change => ticker.price_24h_pcnt,
        }
    }
}

/// 티커 조회 조건.
#[derive(Debug, Clone, Default)]
pub struct TickerQuery {
    pub sort: TickerSort,
    /// 심볼 부분 문자열 (대소문자 무시)
    pub filter: Option<String>,
    pub limit: Option<usize>,
}

/// 조건에 맞게 거르고 정렬합니다.
pub fn select_tickers(mut tickers: Vec<MarketTicker>, query: &TickerQuery) -> Vec<MarketTicker> {
    if let Some(filter) = query.filter.as_deref().map(str::to_ascii_uppercase) {
        if !filter.is_empty() {
            tickers.retain(|t| t.symbol.to_ascii_uppercase().contains(&filter));
        }
    }

    tickers.sort_by_key(|t| (Reverse(query.sort.key(t)), t.symbol.clone()));

    if let Some(limit) = query.limit {
        tickers.truncate(limit);
    }
    tickers
}

/// 업스트림에서 티커 목록을 받아 조건에 맞게 돌려줍니다.
pub async fn list_tickers(
    source: &dyn CandleSource,
    query: &TickerQuery,
    cancel: &CancellationToken,
) -> Result<Vec<MarketTicker>> {
    let tickers = source.fetch_tickers(cancel).await?;
    tracing::debug!(count = tickers.len(), "티커 목록 수신");
    Ok(select_tickers(tickers, query))
}
