//! 로더 설정.
//!
//! 우선순위 (낮음 → 높음):
//! 1. 기본값
//! 2. TOML 파일 (`config/loader.toml` 또는 `--config`)
//! 3. `DATABASE_URL` 환경변수
//! 4. `LOADER__` 접두사 환경변수 (예: `LOADER__LOAD__CONCURRENCY=8`)
//!
//! CLI 플래그는 로드 후 `main`에서 덮어씁니다.

use crate::error::CollectorError;
use crate::modules::coordinator::CoordinatorConfig;
use crate::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use kline_core::{SchemaName, SymbolName, TimeRange};
use kline_data::DatabaseConfig;
use kline_exchange::{BybitConfig, RetryConfig, MAX_PAGE_MINUTES};
use serde::Deserialize;
use std::path::Path;

/// 설정 파일 기본 경로.
pub const DEFAULT_CONFIG_PATH: &str = "config/loader.toml";

/// 로더 전체 설정
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoaderConfig {
    /// 업스트림 API 설정
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// 저장소 연결 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 적재 작업 설정
    #[serde(default)]
    pub load: LoadConfig,
}

/// 업스트림 API 설정
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// REST API 기본 URL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 요청 타임아웃 (초)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// 페이지당 최대 캔들 수
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// 윈도우당 최대 시도 횟수
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 재시도 간 대기 (밀리초)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// 페이지 요청 간 딜레이 (밀리초)
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
}

/// 적재 작업 설정
#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    /// 대상 스키마
    #[serde(default = "default_schema")]
    pub schema: String,
    /// 적재할 심볼 목록
    #[serde(default)]
    pub symbols: Vec<String>,
    /// 시작 시각 (RFC3339 또는 YYYY-MM-DD, 기본: 하루 전)
    #[serde(default)]
    pub from: Option<String>,
    /// 종료 시각 (배타적, 기본: 현재 시각)
    #[serde(default)]
    pub to: Option<String>,
    /// 동시 다운로드 수
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 이 간격(분) 이하로 떨어진 누락 구간은 하나로 합침
    #[serde(default = "default_merge_gap_minutes")]
    pub merge_gap_minutes: i64,
    /// CLI 진행률 출력 주기 (초)
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

fn default_base_url() -> String {
    "https://api.bybit.com".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_page_limit() -> u32 {
    MAX_PAGE_MINUTES as u32
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_page_delay_ms() -> u64 {
    100
}
fn default_schema() -> String {
    SchemaName::default().to_string()
}
fn default_concurrency() -> usize {
    4
}
fn default_merge_gap_minutes() -> i64 {
    10
}
fn default_progress_interval_secs() -> u64 {
    2
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            page_limit: default_page_limit(),
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            page_delay_ms: default_page_delay_ms(),
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            symbols: Vec::new(),
            from: None,
            to: None,
            concurrency: default_concurrency(),
            merge_gap_minutes: default_merge_gap_minutes(),
            progress_interval_secs: default_progress_interval_secs(),
        }
    }
}

impl UpstreamConfig {
    /// 재시도 정책
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.max_attempts,
            std::time::Duration::from_millis(self.retry_delay_ms),
        )
    }

    /// Bybit 클라이언트 설정으로 변환
    pub fn bybit(&self) -> BybitConfig {
        let mut config = BybitConfig::new(self.base_url.clone())
            .with_retry(self.retry())
            .with_timeout_secs(self.timeout_secs);
        config.page_limit = self.page_limit.clamp(1, MAX_PAGE_MINUTES as u32);
        config
    }
}

/// 검증을 마친 적재 계획.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub symbols: Vec<SymbolName>,
    pub schema: SchemaName,
    pub range: TimeRange,
    pub coordinator: CoordinatorConfig,
}

impl LoaderConfig {
    /// 기본 경로(선택적)와 환경변수에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self> {
        Self::load(None)
    }

    /// 설정을 로드합니다. `path`가 주어지면 해당 파일이 반드시 있어야 합니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        let built = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("LOADER")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("load.symbols")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: LoaderConfig = built.try_deserialize()?;

        // DATABASE_URL은 파일보다 우선하고 LOADER__DATABASE__URL보다는 뒤진다
        if std::env::var("LOADER__DATABASE__URL").is_err() {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                config.database.url = url;
            }
        }

        Ok(config)
    }

    /// 설정을 검증하고 적재 계획을 만듭니다.
    ///
    /// `now`는 `to`가 비어 있을 때 종료 시각으로 쓰입니다.
    pub fn plan(&self, now: DateTime<Utc>) -> Result<LoadPlan> {
        if self.load.concurrency == 0 {
            return Err(CollectorError::Config(
                "load.concurrency는 1 이상이어야 합니다".to_string(),
            ));
        }
        if self.load.merge_gap_minutes < 0 {
            return Err(CollectorError::Config(
                "load.merge_gap_minutes는 음수일 수 없습니다".to_string(),
            ));
        }

        let symbols = self.symbols()?;
        if symbols.is_empty() {
            return Err(CollectorError::Config(
                "적재할 심볼이 없습니다 (load.symbols)".to_string(),
            ));
        }

        Ok(LoadPlan {
            symbols,
            schema: SchemaName::new(&self.load.schema)?,
            range: self.range(now)?,
            coordinator: self.coordinator_config(),
        })
    }

    /// 심볼 목록 (대문자 정규화, 중복 제거).
    pub fn symbols(&self) -> Result<Vec<SymbolName>> {
        Ok(SymbolName::parse_list(&self.load.symbols.join(","))?)
    }

    /// 요청 구간 `[from, to)`, 분 단위 내림.
    pub fn range(&self, now: DateTime<Utc>) -> Result<TimeRange> {
        let to = match &self.load.to {
            Some(raw) => parse_time_arg(raw)?,
            None => now,
        };
        let from = match &self.load.from {
            Some(raw) => parse_time_arg(raw)?,
            None => to - Duration::days(1),
        };
        Ok(TimeRange::aligned(from, to)?)
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            concurrency: self.load.concurrency,
            merge_gap: Duration::minutes(self.load.merge_gap_minutes),
            page_minutes: i64::from(self.upstream.page_limit).clamp(1, MAX_PAGE_MINUTES),
            page_delay: std::time::Duration::from_millis(self.upstream.page_delay_ms),
        }
    }

    /// 동시성에 맞춰 풀 크기를 보정한 데이터베이스 설정.
    pub fn database_for_load(&self) -> DatabaseConfig {
        self.database.clone().sized_for(self.load.concurrency)
    }
}

/// RFC3339 또는 `YYYY-MM-DD`(UTC 자정) 시각을 파싱합니다.
pub fn parse_time_arg(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
        .ok_or_else(|| {
            CollectorError::Config(format!(
                "시각 형식이 올바르지 않습니다: {raw:?} (RFC3339 또는 YYYY-MM-DD)"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config_with(symbols: &[&str], from: &str, to: &str) -> LoaderConfig {
        let mut config = LoaderConfig::default();
        config.load.symbols = symbols.iter().map(|s| s.to_string()).collect();
        config.load.from = Some(from.to_string());
        config.load.to = Some(to.to_string());
        config
    }

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert_eq!(config.load.schema, "bybit_data");
        assert_eq!(config.load.concurrency, 4);
        assert_eq!(config.load.merge_gap_minutes, 10);
        assert_eq!(config.upstream.max_attempts, 3);
        assert_eq!(config.upstream.retry_delay_ms, 2000);
        assert_eq!(config.upstream.page_delay_ms, 100);
    }

    #[test]
    fn test_parse_time_arg() {
        assert_eq!(
            parse_time_arg("2024-02-01").unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_time_arg("2024-02-01T09:30:00+09:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 30, 0).unwrap()
        );
        assert!(parse_time_arg("02/01/2024").is_err());
    }

    #[test]
    fn test_plan_normalizes_symbols_and_range() {
        let config = config_with(
            &["btcusdt", "ETHUSDT", "BTCUSDT"],
            "2024-01-01T00:00:30Z",
            "2024-01-01T02:10:59Z",
        );
        let plan = config.plan(Utc::now()).unwrap();

        assert_eq!(plan.symbols.len(), 2);
        assert_eq!(plan.symbols[0].as_str(), "BTCUSDT");
        assert_eq!(plan.range.minutes(), 130);
        assert_eq!(plan.coordinator.concurrency, 4);
    }

    #[test]
    fn test_plan_rejects_invalid_input() {
        let mut zero = config_with(&["BTCUSDT"], "2024-01-01", "2024-01-02");
        zero.load.concurrency = 0;
        assert!(matches!(zero.plan(Utc::now()), Err(CollectorError::Config(_))));

        let empty = config_with(&[], "2024-01-01", "2024-01-02");
        assert!(empty.plan(Utc::now()).is_err());

        let reversed = config_with(&["BTCUSDT"], "2024-01-02", "2024-01-01");
        assert!(matches!(reversed.plan(Utc::now()), Err(CollectorError::Core(_))));

        let injected = config_with(&["BTC\"; DROP"], "2024-01-01", "2024-01-02");
        assert!(injected.plan(Utc::now()).is_err());

        let mut bad_schema = config_with(&["BTCUSDT"], "2024-01-01", "2024-01-02");
        bad_schema.load.schema = "Bybit-Data".to_string();
        assert!(bad_schema.plan(Utc::now()).is_err());
    }

    #[test]
    fn test_default_range_is_last_day() {
        let mut config = LoaderConfig::default();
        config.load.symbols = vec!["BTCUSDT".to_string()];
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 45).unwrap();

        let range = config.range(now).unwrap();
        assert_eq!(range.end(), Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap());
        assert_eq!(range.minutes(), 24 * 60);
    }

    #[test]
    fn test_upstream_clamps_page_limit() {
        let mut config = LoaderConfig::default();
        config.upstream.page_limit = 5000;
        assert_eq!(config.upstream.bybit().page_limit, 600);
        assert_eq!(config.coordinator_config().page_minutes, 600);
    }

    #[test]
    fn test_database_pool_follows_concurrency() {
        let mut config = LoaderConfig::default();
        config.load.concurrency = 12;
        assert_eq!(config.database_for_load().max_connections, 13);
    }
}
