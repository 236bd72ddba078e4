//! 1분봉 증분 로더.
//!
//! 이 crate는 저장소와 업스트림 사이의 적재 파이프라인을 제공합니다:
//! - 누락 구간 탐지 (심볼별 독립 태스크)
//! - 제한된 작업 큐와 N개의 다운로드 워커
//! - 실행 단위 진행률 집계와 실행 보고서
//! - 설정 로드 및 `kline-loader` CLI

pub mod config;
pub mod error;
pub mod modules;
pub mod progress;
pub mod stats;

pub use config::{LoadPlan, LoaderConfig};
pub use error::{CollectorError, Result};
pub use progress::{ProgressEntry, ProgressSnapshot, RunProgress};
pub use stats::{CollectionStats, FailureStage, RunOutcome, RunReport, SkippedWindow, SymbolFailure};
