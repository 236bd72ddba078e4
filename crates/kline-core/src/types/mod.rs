//! 워크스페이스 전반에서 사용되는 공통 타입.

mod symbol;
mod time_range;

pub use symbol::*;
pub use time_range::*;
