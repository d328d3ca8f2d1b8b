//! 여러 스트림 세션을 하나의 공유 이벤트 루프 위에서 관리하는 풀.
//!
//! 풀은 current-thread `tokio` 런타임 하나와 그 런타임을 구동하는 백그라운드
//! 스레드를 소유합니다. 세션은 `Weak` 참조로만 보관하며, 죽은 참조는
//! 새 세션을 만들기 전에 정리합니다.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use connector_core::{CandleInterval, LogSink, SinkLogger, StreamConfig};
use parking_lot::Mutex;
use tokio::runtime::{Builder, Runtime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::session::{MessageHandler, StreamSession};
use crate::error::{ExchangeError, ExchangeResult};

/// 부분 호가 스트림이 허용하는 깊이.
pub const PARTIAL_BOOK_DEPTHS: [u32; 3] = [5, 10, 20];

/// 스트림 세션 풀.
pub struct SessionPool {
    config: StreamConfig,
    logger: SinkLogger,
    runtime: Option<Arc<Runtime>>,
    shutdown: CancellationToken,
    running: Arc<AtomicBool>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
    sessions: Mutex<Vec<Weak<StreamSession>>>,
}

impl SessionPool {
    /// 새 풀을 생성합니다. 이벤트 루프는 [`SessionPool::run`]을 호출할 때 시작됩니다.
    pub fn new(config: StreamConfig) -> ExchangeResult<Self> {
        Self::with_logger(config, SinkLogger::new())
    }

    /// 외부 로거를 공유하는 풀을 생성합니다.
    pub fn with_logger(config: StreamConfig, logger: SinkLogger) -> ExchangeResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ExchangeError::Unknown(format!("stream runtime build failed: {}", e)))?;

        Ok(Self {
            config,
            logger,
            runtime: Some(Arc::new(runtime)),
            shutdown: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
            io_thread: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
        })
    }

    /// 스트림 이름을 생성합니다.
    ///
    /// `"/ws/" + 소문자 심볼 + "@" + 채널`. 심볼이 `!`이면 그대로 두고,
    /// 비어 있으면 심볼 구간을 생략합니다.
    pub fn compose_stream_name(symbol: &str, channel: &str) -> String {
        let mut name = String::from("/ws/");
        if !symbol.is_empty() {
            if symbol == "!" {
                name.push_str(symbol);
            } else {
                name.push_str(&symbol.to_lowercase());
            }
            name.push('@');
        }
        name.push_str(channel);
        name
    }

    /// 백그라운드 스레드에서 이벤트 루프를 구동합니다. 이미 실행 중이면 아무 일도 하지 않습니다.
    ///
    /// 세션 콜백의 패닉은 tokio가 태스크 경계에서 잡으므로 그 세션만 끝나고 루프는 계속 돕니다.
    /// 루프를 구동하는 `block_on` 자체가 패닉하면 로그를 남기고 다시 구동합니다.
    pub fn run(&self) -> ExchangeResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let Some(runtime) = self.runtime.as_ref().map(Arc::clone) else {
            self.running.store(false, Ordering::SeqCst);
            return Err(ExchangeError::Unknown("stream runtime already shut down".to_string()));
        };

        let shutdown = self.shutdown.clone();
        let logger = self.logger.clone();
        let running = Arc::clone(&self.running);

        let spawned = std::thread::Builder::new()
            .name("stream-io".to_string())
            .spawn(move || {
                loop {
                    let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        runtime.block_on(shutdown.cancelled());
                    }));
                    match result {
                        Ok(()) => break,
                        Err(_) if shutdown.is_cancelled() => break,
                        Err(panic) => {
                            let reason = panic
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| panic.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "unknown panic".to_string());
                            error!(reason = %reason, "Stream event loop panicked, restarting");
                            logger.error(&format!("stream event loop panicked: {}", reason));
                        }
                    }
                }
                running.store(false, Ordering::SeqCst);
                debug!("Stream event loop stopped");
            });

        match spawned {
            Ok(handle) => {
                *self.io_thread.lock() = Some(handle);
                info!("Stream event loop started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(ExchangeError::Unknown(format!("stream thread spawn failed: {}", e)))
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 외부 로거를 교체합니다. 이미 만들어진 세션에도 반영됩니다.
    pub fn set_logger_callback(&self, sink: Option<LogSink>) {
        self.logger.set_sink(sink);
    }

    pub fn logger(&self) -> &SinkLogger {
        &self.logger
    }

    /// 주어진 이름의 살아 있는 세션이 있는지 확인합니다.
    pub fn find_stream(&self, stream_name: &str) -> bool {
        self.sessions
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .any(|session| session.target() == stream_name)
    }

    /// 살아 있는 세션들의 스트림 이름.
    pub fn active_streams(&self) -> Vec<String> {
        self.sessions
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|session| session.target().to_string())
            .collect()
    }

    /// 주어진 이름의 세션을 정상 종료합니다. 닫은 세션이 있으면 true.
    pub fn close_stream(&self, stream_name: &str) -> bool {
        let mut sessions = self.sessions.lock();
        let mut closed = false;
        sessions.retain(|weak| match weak.upgrade() {
            Some(session) if session.target() == stream_name => {
                session.close();
                closed = true;
                false
            }
            Some(_) => true,
            None => false,
        });
        closed
    }

    /// 최우선 호가 스트림 구독.
    pub fn book_ticker(&self, symbol: &str, cb: MessageHandler, force: bool) -> ExchangeResult<bool> {
        let name = Self::compose_stream_name(symbol, "bookTicker");
        self.subscribe(&name, cb, force)
    }

    /// 캔들 스트림 구독.
    pub fn candlestick(
        &self,
        symbol: &str,
        interval: CandleInterval,
        cb: MessageHandler,
        force: bool,
    ) -> ExchangeResult<bool> {
        let name = Self::compose_stream_name(symbol, &format!("kline_{}", interval));
        self.subscribe(&name, cb, force)
    }

    /// 부분 호가 스트림 구독. 깊이는 5, 10, 20만 허용합니다.
    pub fn partial_book_depth_stream(
        &self,
        symbol: &str,
        depth: u32,
        cb: MessageHandler,
        force: bool,
    ) -> ExchangeResult<bool> {
        if !PARTIAL_BOOK_DEPTHS.contains(&depth) {
            return Err(ExchangeError::InvalidParameter(format!(
                "invalid depth parameter, must be 5, 10 or 20, is {}",
                depth
            )));
        }
        let name = Self::compose_stream_name(symbol, &format!("depth{}", depth));
        self.subscribe(&name, cb, force)
    }

    /// 임의 스트림 구독.
    ///
    /// 같은 이름의 세션이 살아 있으면 `force`가 아닐 때 건너뛰고(false 반환),
    /// `force`면 기존 세션을 닫고 새로 만듭니다.
    pub fn subscribe(&self, stream_name: &str, cb: MessageHandler, force: bool) -> ExchangeResult<bool> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Err(ExchangeError::Unknown("stream runtime already shut down".to_string()));
        };

        let session = {
            let mut sessions = self.sessions.lock();
            sessions.retain(|weak| weak.strong_count() > 0);

            let existing: Vec<Arc<StreamSession>> = sessions
                .iter()
                .filter_map(Weak::upgrade)
                .filter(|session| session.target() == stream_name)
                .collect();

            if !existing.is_empty() {
                if !force {
                    debug!(stream = %stream_name, "Stream already subscribed");
                    return Ok(false);
                }
                for old in &existing {
                    old.close();
                }
                sessions.retain(|weak| {
                    weak.upgrade()
                        .map(|session| session.target() != stream_name)
                        .unwrap_or(false)
                });
            }

            let session = StreamSession::new(
                runtime.handle().clone(),
                self.config.clone(),
                self.logger.clone(),
            );
            sessions.push(Arc::downgrade(&session));
            session
        };

        session.run(&self.config.host, self.config.port, stream_name, cb)?;
        Ok(true)
    }
}

impl Drop for SessionPool {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.io_thread.lock().take() {
            let _ = handle.join();
        }
        // 남은 세션 태스크는 종료 핸드셰이크 없이 버린다
        if let Some(runtime) = self.runtime.take() {
            if let Ok(runtime) = Arc::try_unwrap(runtime) {
                runtime.shutdown_background();
            }
        }
    }
}
