//! Binance USDⓈ-M 선물 연결 계층.
//!
//! 이 크레이트는 다음을 제공합니다:
//! - WebSocket 스트림 세션과 공유 이벤트 루프 위의 세션 풀
//! - 푸시 이벤트 캐시와 타임아웃 폴링 읽기 (스트림 매니저)
//! - HMAC 서명과 가중치 기반 대기를 수행하는 REST 실행기
//! - TTL 메타데이터 캐시와 과거 데이터 페이지네이션

pub mod error;
pub mod events;
pub mod http;
pub mod metadata;
pub mod models;
pub mod rest;
pub mod stream_manager;
pub mod websocket;

pub use error::*;
pub use events::{
    Candlestick, EventAccountUpdate, EventBalanceUpdate, EventCandlestick, EventHeader,
    EventOrderUpdate, EventTickPrice, StreamEvent,
};
pub use http::{ApiVersion, RateBudget, Security, SignedRequestExecutor};
pub use metadata::{MetadataCache, MetadataSnapshot, MetadataSource};
pub use models::*;
pub use rest::RestClient;
pub use stream_manager::{EventCache, StreamManager};
pub use websocket::{MessageHandler, SessionPool, SessionState, StreamSession};
