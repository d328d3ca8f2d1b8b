//! 커넥터 전반에서 사용되는 공통 타입.

mod credentials;
mod interval;

pub use credentials::*;
pub use interval::*;
