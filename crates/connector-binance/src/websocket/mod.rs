//! WebSocket 스트림 세션과 세션 풀.

mod pool;
mod session;

pub use pool::{SessionPool, PARTIAL_BOOK_DEPTHS};
pub use session::{is_api_error, MessageHandler, SessionState, StreamSession};
