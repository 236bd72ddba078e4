//! Bybit 커넥터 통합 테스트 (mockito HTTP 서버 사용).

use chrono::{TimeZone, Utc};
use kline_core::{SymbolName, TimeRange};
use kline_exchange::{BybitClient, BybitConfig, CandleSource, ExchangeError, RetryConfig};
use mockito::Matcher;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

fn client_for(server: &mockito::ServerGuard) -> BybitClient {
    let config = BybitConfig::new(server.url())
        .with_retry(RetryConfig::immediate(3))
        .with_timeout_secs(5);
    BybitClient::new(config).unwrap()
}

fn btc() -> SymbolName {
    SymbolName::new("BTCUSDT").unwrap()
}

fn window() -> TimeRange {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    TimeRange::from_minutes(start, 600).unwrap()
}

#[tokio::test]
async fn test_kline_page_is_returned_ascending() {
    let mut server = mockito::Server::new_async().await;
    let w = window();

    let mock = server
        .mock("GET", "/v5/market/kline")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("category".into(), "spot".into()),
            Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
            Matcher::UrlEncoded("interval".into(), "1".into()),
            Matcher::UrlEncoded("limit".into(), "600".into()),
            Matcher::UrlEncoded("start".into(), w.start().timestamp_millis().to_string()),
            Matcher::UrlEncoded("end".into(), (w.end().timestamp_millis() - 1).to_string()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"retCode":0,"retMsg":"OK","result":{"category":"spot","symbol":"BTCUSDT","list":[
                ["1704067320000","42010","42020","42000","42015","0.5","21007.5"],
                ["1704067260000","42005","42012","41990","42010","0.7","29407"],
                ["1704067200000","42000","42008","41980","42005","1.1","46205.5"]
            ]},"time":1704067400000}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let client = client_for(&server);
    let candles = client
        .fetch_page(&btc(), w, &CancellationToken::new())
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(candles.len(), 3);
    assert_eq!(candles[0].timestamp.timestamp_millis(), 1_704_067_200_000);
    assert_eq!(candles[2].timestamp.timestamp_millis(), 1_704_067_320_000);
    assert_eq!(candles[0].open, dec!(42000));
    assert_eq!(candles[2].turnover, dec!(21007.5));
}

#[tokio::test]
async fn test_empty_list_is_not_an_error() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v5/market/kline")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json; charset=utf-8")
        .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"list":[]}}"#)
        .create_async()
        .await;

    let candles = client_for(&server)
        .fetch_page(&btc(), window(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(candles.is_empty());
}

#[tokio::test]
async fn test_ret_code_error_is_retried_until_exhausted() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v5/market/kline")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"retCode":10006,"retMsg":"Too many visits!","result":{}}"#)
        .expect(3)
        .create_async()
        .await;

    let result = client_for(&server)
        .fetch_page(&btc(), window(), &CancellationToken::new())
        .await;

    mock.assert_async().await;
    match result {
        Err(ExchangeError::RetryExhausted {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("Too many visits"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_http_error_status_is_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v5/market/kline")
        .match_query(Matcher::Any)
        .with_status(503)
        .with_body("upstream unavailable")
        .expect(3)
        .create_async()
        .await;

    let result = client_for(&server)
        .fetch_page(&btc(), window(), &CancellationToken::new())
        .await;

    mock.assert_async().await;
    assert!(matches!(result, Err(ExchangeError::RetryExhausted { .. })));
}

#[tokio::test]
async fn test_html_response_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v5/market/kline")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>blocked</html>")
        .expect(3)
        .create_async()
        .await;

    let result = client_for(&server)
        .fetch_page(&btc(), window(), &CancellationToken::new())
        .await;

    mock.assert_async().await;
    match result {
        Err(ExchangeError::RetryExhausted { last_error, .. }) => {
            assert!(last_error.contains("content type"));
        }
        other => panic!("unexpected result: {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_row_is_rejected() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v5/market/kline")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"retCode":0,"retMsg":"OK","result":{"list":[["1704067200000","1"]]}}"#)
        .create_async()
        .await;

    let result = client_for(&server)
        .fetch_page(&btc(), window(), &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(ExchangeError::RetryExhausted { .. })));
}

#[tokio::test]
async fn test_cancelled_token_skips_request() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/v5/market/kline")
        .match_query(Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let token = CancellationToken::new();
    token.cancel();

    let result = client_for(&server).fetch_page(&btc(), window(), &token).await;

    mock.assert_async().await;
    assert!(matches!(result, Err(ExchangeError::Cancelled)));
}

#[tokio::test]
async fn test_tickers() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/v5/market/tickers")
        .match_query(Matcher::UrlEncoded("category".into(), "spot".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"retCode":0,"retMsg":"OK","result":{"category":"spot","list":[
                {"symbol":"BTCUSDT","lastPrice":"42000","volume24h":"1500.5","price24hPcnt":"0.0125","turnover24h":"63021000"},
                {"symbol":"ETHUSDT","lastPrice":"2300","volume24h":"9000","price24hPcnt":"-0.004","turnover24h":"20700000"}
            ]}}"#,
        )
        .create_async()
        .await;

    let tickers = client_for(&server)
        .fetch_tickers(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tickers.len(), 2);
    assert_eq!(tickers[0].symbol, "BTCUSDT");
    assert_eq!(tickers[0].volume_24h, dec!(1500.5));
    assert_eq!(tickers[1].change_percent(), dec!(-0.4));
}
