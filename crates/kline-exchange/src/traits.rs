//! 업스트림 데이터 소스 인터페이스.

use crate::ExchangeResult;
use async_trait::async_trait;
use kline_core::{Candle, MarketTicker, SymbolName, TimeRange};
use tokio_util::sync::CancellationToken;

/// 한 번의 요청으로 조회할 수 있는 최대 분 수.
pub const MAX_PAGE_MINUTES: i64 = 600;

/// 1분봉 데이터 소스.
///
/// 구현체는 재시도 정책을 내부에서 적용하고, 재시도를 모두 소진하면
/// `ExchangeError::RetryExhausted`를 반환해야 합니다.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// 소스 이름 (로그용).
    fn name(&self) -> &str;

    /// `window` 안의 캔들을 타임스탬프 오름차순으로 반환합니다.
    ///
    /// `window`는 `MAX_PAGE_MINUTES`를 넘지 않아야 합니다. 반환 목록이
    /// 윈도우보다 짧으면 나머지 구간은 업스트림에 데이터가 없는 것입니다.
    async fn fetch_page(
        &self,
        symbol: &SymbolName,
        window: TimeRange,
        cancel: &CancellationToken,
    ) -> ExchangeResult<Vec<Candle>>;

    /// 현물 티커 목록을 조회합니다.
    async fn fetch_tickers(&self, cancel: &CancellationToken) -> ExchangeResult<Vec<MarketTicker>>;
}
