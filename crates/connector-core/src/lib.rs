//! # Connector Core
//!
//! 거래소 연결 계층 전반에서 공유하는 기반 타입을 제공합니다.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - 설정 관리 (REST / 스트림 / 로깅)
//! - 로깅 인프라 및 외부 로거 싱크
//! - 캔들 간격, 통계 기간 등 공통 타입
//! - API 자격증명

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::*;
pub use types::*;
