//! 서명 HTTP 요청 실행.

mod executor;

pub use executor::{sign, ApiVersion, RateBudget, Security, SignedRequestExecutor};
