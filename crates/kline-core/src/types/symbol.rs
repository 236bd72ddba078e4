//! 심볼 및 스키마 이름.
//!
//! 두 타입 모두 저장소 식별자(테이블/스키마 이름)에 그대로 들어가므로
//! 허용 목록 방식으로 검증된 값만 생성됩니다.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 심볼 최대 길이.
const MAX_SYMBOL_LEN: usize = 32;

/// PostgreSQL 식별자 최대 길이.
const MAX_IDENT_LEN: usize = 63;

/// 심볼별 테이블 접두사.
pub const TABLE_PREFIX: &str = "klines_";

/// 검증된 거래 심볼 (예: `BTCUSDT`).
///
/// ASCII 영숫자 1~32자만 허용하며 대문자로 정규화됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SymbolName(String);

impl SymbolName {
    /// 심볼을 검증하고 생성합니다.
    pub fn new(raw: impl AsRef<str>) -> CoreResult<Self> {
        let trimmed = raw.as_ref().trim();

        if trimmed.is_empty() || trimmed.len() > MAX_SYMBOL_LEN {
            return Err(CoreError::InvalidSymbol(format!(
                "{trimmed:?}: 길이는 1~{MAX_SYMBOL_LEN}자여야 합니다"
            )));
        }
        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidSymbol(format!(
                "{trimmed:?}: 영문자와 숫자만 허용됩니다"
            )));
        }

        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 이 심볼의 테이블 이름 (`klines_btcusdt`).
    pub fn table_name(&self) -> String {
        format!("{TABLE_PREFIX}{}", self.0.to_ascii_lowercase())
    }

    /// 쉼표로 구분된 심볼 목록을 파싱합니다. 중복은 제거하고 순서는 유지합니다.
    pub fn parse_list(raw: &str) -> CoreResult<Vec<SymbolName>> {
        let mut symbols: Vec<SymbolName> = Vec::new();
        for part in raw.split(',').filter(|s| !s.trim().is_empty()) {
            let symbol = SymbolName::new(part)?;
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        Ok(symbols)
    }
}

impl fmt::Display for SymbolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SymbolName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SymbolName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SymbolName> for String {
    fn from(value: SymbolName) -> Self {
        value.0
    }
}

impl AsRef<str> for SymbolName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 검증된 스키마 이름 (`[a-z_][a-z0-9_]*`, 최대 63자).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaName(String);

impl SchemaName {
    pub fn new(raw: impl AsRef<str>) -> CoreResult<Self> {
        let name = raw.as_ref().trim();
        let mut chars = name.chars();

        let valid_head = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
        let valid_tail = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

        if !valid_head || !valid_tail || name.len() > MAX_IDENT_LEN {
            return Err(CoreError::InvalidSchema(name.to_string()));
        }

        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SchemaName {
    fn default() -> Self {
        Self("bybit_data".to_string())
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SchemaName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SchemaName {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SchemaName> for String {
    fn from(value: SchemaName) -> Self {
        value.0
    }
}
