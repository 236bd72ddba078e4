//! 1분봉 증분 로더 CLI.

use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use kline_collector::modules::{detect_missing, list_tickers, LoadCoordinator, TickerQuery, TickerSort};
use kline_collector::{LoadPlan, LoaderConfig, RunProgress};
use kline_core::{init_logging, LogConfig, LogFormat};
use kline_data::{CandleStore, PostgresCandleStore};
use kline_exchange::BybitClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "kline-loader")]
#[command(about = "Incremental 1-minute kline loader for Bybit spot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 설정 파일 경로 (기본: config/loader.toml, 없으면 무시)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

/// 적재 대상 지정 옵션
#[derive(Args, Clone, Default)]
struct TargetArgs {
    /// 심볼 목록 (쉼표로 구분, 예: "BTCUSDT,ETHUSDT")
    #[arg(long)]
    symbols: Option<String>,

    /// 시작 시각 (RFC3339 또는 YYYY-MM-DD)
    #[arg(long)]
    from: Option<String>,

    /// 종료 시각, 배타적 (RFC3339 또는 YYYY-MM-DD)
    #[arg(long)]
    to: Option<String>,

    /// 대상 스키마
    #[arg(long)]
    schema: Option<String>,
}

impl TargetArgs {
    fn apply(self, config: &mut LoaderConfig) {
        if let Some(symbols) = self.symbols {
            config.load.symbols = symbols.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Some(from) = self.from {
            config.load.from = Some(from);
        }
        if let Some(to) = self.to {
            config.load.to = Some(to);
        }
        if let Some(schema) = self.schema {
            config.load.schema = schema;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// 누락 구간을 탐지하고 다운로드하여 저장
    Load {
        #[command(flatten)]
        target: TargetArgs,

        /// 동시 다운로드 수
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// 누락 구간만 탐지하여 출력 (다운로드 없음)
    Gaps {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// 현물 티커 목록 조회
    Tickers {
        /// 정렬 기준 (turnover, volume, change)
        #[arg(long, default_value = "turnover")]
        sort: TickerSort,

        /// 심볼 부분 문자열 필터
        #[arg(long)]
        filter: Option<String>,

        /// 최대 출력 개수
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // 로깅 초기화
    let mut log_config = LogConfig::new(format!(
        "kline_collector={0},kline_exchange={0},kline_data={0},kline_core={0}",
        cli.log_level
    ))
    .with_env_format();
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format);
    }
    init_logging(log_config).map_err(|e| anyhow::anyhow!(e))?;

    let mut config = LoaderConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;
    tracing::debug!(base_url = %config.upstream.base_url, "설정 로드 완료");

    match cli.command {
        Commands::Load {
            target,
            concurrency,
        } => {
            target.apply(&mut config);
            if let Some(concurrency) = concurrency {
                config.load.concurrency = concurrency;
            }
            run_load(&config).await
        }
        Commands::Gaps { target } => {
            target.apply(&mut config);
            run_gaps(&config).await
        }
        Commands::Tickers {
            sort,
            filter,
            limit,
        } => {
            let query = TickerQuery {
                sort,
                filter,
                limit,
            };
            run_tickers(&config, &query).await
        }
    }
}

async fn run_load(config: &LoaderConfig) -> anyhow::Result<ExitCode> {
    let plan = config.plan(Utc::now())?;
    tracing::info!(
        symbols = plan.symbols.len(),
        range = %plan.range,
        schema = %plan.schema,
        concurrency = plan.coordinator.concurrency,
        "1분봉 적재 시작"
    );

    let source = Arc::new(BybitClient::new(config.upstream.bybit())?);
    let store = Arc::new(
        PostgresCandleStore::connect(&config.database_for_load(), plan.schema.clone()).await?,
    );
    let coordinator = LoadCoordinator::new(source, store, plan.coordinator.clone());

    let cancel = cancel_on_ctrl_c();
    let stop_reporter = CancellationToken::new();
    let reporter = spawn_progress_reporter(
        coordinator.progress(),
        Duration::from_secs(config.load.progress_interval_secs.max(1)),
        stop_reporter.clone(),
    );

    let result = coordinator
        .run_and_close(plan.symbols, plan.range, cancel)
        .await;

    shutdown_reporter(reporter, &stop_reporter).await;

    let report = result?;
    coordinator.progress().log_line();
    report.log();

    Ok(if report.is_fatal() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_gaps(config: &LoaderConfig) -> anyhow::Result<ExitCode> {
    let plan = config.plan(Utc::now())?;
    let store = PostgresCandleStore::connect(&config.database, plan.schema.clone()).await?;

    let failed = print_gaps(&store, &plan).await;
    store.close().await;

    Ok(if failed == plan.symbols.len() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// 심볼별 누락 구간을 출력하고 실패한 심볼 수를 반환합니다.
async fn print_gaps(store: &dyn CandleStore, plan: &LoadPlan) -> usize {
    let mut failed = 0;

    for symbol in &plan.symbols {
        match detect_missing(store, symbol, plan.range, plan.coordinator.merge_gap).await {
            Ok(intervals) => {
                let minutes: i64 = intervals.iter().map(|i| i.minutes()).sum();
                println!(
                    "{symbol}: {} interval(s), {minutes} minute(s) missing",
                    intervals.len()
                );
                for interval in intervals {
                    println!("  {interval}  ({} min)", interval.minutes());
                }
            }
            Err(e) => {
                failed += 1;
                tracing::error!(symbol = %symbol, error = %e, "누락 구간 탐지 실패");
            }
        }
    }

    failed
}

async fn run_tickers(config: &LoaderConfig, query: &TickerQuery) -> anyhow::Result<ExitCode> {
    let client = BybitClient::new(config.upstream.bybit())?;
    let tickers = list_tickers(&client, query, &cancel_on_ctrl_c()).await?;

    println!(
        "{:<16} {:>16} {:>20} {:>10} {:>22}",
        "SYMBOL", "LAST", "VOLUME 24H", "CHANGE %", "TURNOVER 24H"
    );
    for ticker in &tickers {
        println!(
            "{:<16} {:>16} {:>20} {:>10} {:>22}",
            ticker.symbol,
            ticker.last_price,
            ticker.volume_24h.round_dp(4),
            ticker.change_percent().round_dp(2),
            ticker.turnover_24h.round_dp(2),
        );
    }
    tracing::info!(count = tickers.len(), "티커 조회 완료");

    Ok(ExitCode::SUCCESS)
}

/// Ctrl-C 수신 시 취소되는 토큰.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("종료 신호 수신, 진행 중인 요청을 정리합니다");
            trigger.cancel();
        }
    });

    token
}

/// 주기적으로 진행률을 로그로 남기는 태스크.
fn spawn_progress_reporter(
    progress: Arc<RunProgress>,
    every: Duration,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // 첫 tick은 즉시 끝난다
        interval.tick().await;

        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = interval.tick() => progress.log_line(),
            }
        }
    })
}

/// 리포터를 멈추고 종료를 기다립니다. 태스크가 비정상 종료했으면 `false`.
async fn shutdown_reporter(reporter: JoinHandle<()>, stop: &CancellationToken) -> bool {
    stop.cancel();
    match reporter.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "진행률 리포터 태스크 비정상 종료");
            false
        }
    }
}
