//! 시장 데이터 타입 및 구조체.
//!
//! - `Candle` - 1분 OHLCV 캔들 (타임스탬프가 자연 키)
//! - `MarketTicker` - 현물 티커 목록의 24시간 요약

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 1분 OHLCV 캔들.
///
/// 한 번 수신된 캔들은 변경되지 않습니다. 저장 시에도 최초 기록이 유지됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// 캔들 시작 시간
    pub timestamp: DateTime<Utc>,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량 (기준 자산 단위)
    pub volume: Decimal,
    /// 거래대금 (호가 자산 단위)
    pub turnover: Decimal,
}

impl Candle {
    /// 새 캔들을 생성합니다.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        turnover: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            turnover,
        }
    }

    /// 캔들 범위(고가 - 저가)를 반환합니다.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

/// 현물 티커 24시간 요약.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTicker {
    /// 거래소 심볼 (검증 전 원본)
    pub symbol: String,
    /// 최근 체결가
    pub last_price: Decimal,
    /// 24시간 거래량
    pub volume_24h: Decimal,
    /// 24시간 변동률 (0.0123 = 1.23%)
    pub price_24h_pcnt: Decimal,
    /// 24시간 거래대금
    pub turnover_24h: Decimal,
}

impl MarketTicker {
    /// 24시간 변동률을 백분율로 반환합니다.
    pub fn change_percent(&self) -> Decimal {
        self.price_24h_pcnt * Decimal::from(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_candle_range() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candle = Candle::new(
            ts,
            dec!(100),
            dec!(110),
            dec!(95),
            dec!(105),
            dec!(1.5),
            dec!(157.5),
        );
        assert_eq!(candle.range(), dec!(15));
    }

    #[test]
    fn test_ticker_change_percent() {
        let ticker = MarketTicker {
            symbol: "BTCUSDT".to_string(),
            last_price: dec!(43000),
            volume_24h: dec!(1200),
            price_24h_pcnt: dec!(0.0123),
            turnover_24h: dec!(51600000),
        };
        assert_eq!(ticker.change_percent(), dec!(1.23));
    }
}
