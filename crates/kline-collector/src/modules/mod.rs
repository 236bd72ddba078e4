//! 적재 파이프라인 모듈.

pub mod coordinator;
pub mod download;
pub mod gap_detect;
pub mod tickers;

pub use coordinator::{CoordinatorConfig, LoadCoordinator};
pub use download::{download_symbol, DownloadSettings, SymbolDownload};
pub use gap_detect::{coalesce_missing, detect_missing, merge_close, SymbolJob};
pub use tickers::{list_tickers, select_tickers, TickerQuery, TickerSort};
