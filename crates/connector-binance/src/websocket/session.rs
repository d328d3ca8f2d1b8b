//! 단일 WebSocket 스트림 세션.
//!
//! 세션 하나가 물리 연결 하나를 담당하며 다음 상태를 순서대로 거칩니다:
//!
//! ```text
//! Idle → Resolving → Connecting → TlsHandshaking → ProtocolHandshaking → Streaming → Closing → Terminated
//! ```
//!
//! 어느 단계에서든 복구 불가능한 에러나 명시적 종료 요청이 오면 `Terminated`로 갑니다.
//! 세션 안에서 재연결하지 않습니다.
//!
//! 세션은 [`StreamSession::run`]이 띄운 태스크가 단독 소유합니다.
//! 풀은 `Weak` 참조만 보관하므로 태스크가 끝나면 세션도 사라집니다.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use connector_core::{SinkLogger, StreamConfig};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, USER_AGENT};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{client_async_with_config, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ExchangeError, ExchangeResult};

/// 스트림 메시지 콜백.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const USER_AGENT_VALUE: &str = concat!("connector-binance/", env!("CARGO_PKG_VERSION"));

/// 종료 핸드셰이크에서 상대 응답을 기다리는 최대 시간.
const CLOSE_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// 세션 연결 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Resolving,
    Connecting,
    TlsHandshaking,
    ProtocolHandshaking,
    Streaming,
    Closing,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Resolving => "resolving",
            SessionState::Connecting => "connecting",
            SessionState::TlsHandshaking => "tls_handshaking",
            SessionState::ProtocolHandshaking => "protocol_handshaking",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// 읽기 루프 한 번의 결과.
enum FrameOutcome {
    Continue,
    /// 정상 종료 핸드셰이크 후 종료
    Close,
    /// 즉시 종료
    Terminate,
}

/// 단일 WebSocket 스트림 세션.
pub struct StreamSession {
    handle: Handle,
    config: StreamConfig,
    logger: SinkLogger,
    target: OnceLock<String>,
    state: Mutex<SessionState>,
    last_ping: Mutex<Option<Instant>>,
    last_pong: Mutex<Option<Instant>>,
    shutdown: CancellationToken,
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("target", &self.target.get())
            .field("state", &self.state())
            .finish()
    }
}

impl StreamSession {
    /// 주어진 런타임 핸들 위에서 동작할 세션을 생성합니다.
    pub fn new(handle: Handle, config: StreamConfig, logger: SinkLogger) -> Arc<Self> {
        Arc::new(Self {
            handle,
            config,
            logger,
            target: OnceLock::new(),
            state: Mutex::new(SessionState::Idle),
            last_ping: Mutex::new(None),
            last_pong: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// 세션을 시작합니다.
    ///
    /// 연결, 핸드셰이크, 읽기 루프는 런타임 태스크에서 진행되며 이 함수는 즉시 반환합니다.
    /// 태스크가 세션의 강한 참조를 소유합니다.
    ///
    /// # Errors
    /// 이미 시작된 세션이면 `ExchangeError::AlreadyStarted`를 반환합니다.
    pub fn run(
        self: Arc<Self>,
        host: &str,
        port: u16,
        target: &str,
        on_message: MessageHandler,
    ) -> ExchangeResult<()> {
        if self.target.set(target.to_string()).is_err() {
            return Err(ExchangeError::AlreadyStarted(target.to_string()));
        }

        let host = host.to_string();
        let handle = self.handle.clone();
        handle.spawn(async move {
            self.drive(host, port, on_message).await;
        });

        Ok(())
    }

    /// 정상 종료를 요청합니다. 이미 종료된 세션에서는 아무 일도 하지 않습니다.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Terminated | SessionState::Closing => return,
                // 시작 전이면 바로 종료
                SessionState::Idle => *state = SessionState::Terminated,
                _ => *state = SessionState::Closing,
            }
        }
        self.shutdown.cancel();
    }

    /// 세션이 시작된 스트림 이름. 시작 전에는 빈 문자열입니다.
    pub fn target(&self) -> &str {
        self.target.get().map(String::as_str).unwrap_or_default()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// 마지막으로 Ping을 보낸 시각.
    pub fn last_ping(&self) -> Option<Instant> {
        *self.last_ping.lock()
    }

    /// 마지막으로 Pong을 받은 시각.
    pub fn last_pong(&self) -> Option<Instant> {
        *self.last_pong.lock()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        // close()가 먼저 상태를 바꿨다면 연결 단계 전이로 되돌리지 않는다
        match *state {
            SessionState::Terminated => {}
            SessionState::Closing if next != SessionState::Terminated => {}
            _ => *state = next,
        }
    }

    async fn drive(&self, host: String, port: u16, on_message: MessageHandler) {
        let target = self.target().to_string();

        let connect = tokio::time::timeout(
            self.config.connect_timeout(),
            self.connect(&host, port, &target),
        );

        let ws = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => {
                debug!(stream = %target, "Session closed before streaming");
                self.set_state(SessionState::Terminated);
                return;
            }
            result = connect => match result {
                Ok(Ok(ws)) => ws,
                Ok(Err(e)) => {
                    self.fail(&target, &e);
                    return;
                }
                Err(_) => {
                    let e = ExchangeError::Timeout(format!(
                        "connect deadline of {:?} elapsed",
                        self.config.connect_timeout()
                    ));
                    self.fail(&target, &e);
                    return;
                }
            }
        };

        self.set_state(SessionState::Streaming);
        info!(stream = %target, "Stream connected");
        self.logger.info(&format!("stream connected: {}", target));

        self.stream(ws, &target, &on_message).await;

        self.set_state(SessionState::Terminated);
        debug!(stream = %target, "Session terminated");
    }

    fn fail(&self, target: &str, err: &ExchangeError) {
        error!(stream = %target, error = %err, "Stream session failed");
        self.logger
            .error(&format!("stream {} failed: {}", target, err));
        self.set_state(SessionState::Terminated);
    }

    /// DNS 조회, TCP 연결, TLS 핸드셰이크, WebSocket 핸드셰이크.
    async fn connect(&self, host: &str, port: u16, target: &str) -> ExchangeResult<WsStream> {
        self.set_state(SessionState::Resolving);
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("resolve {}: {}", host, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(ExchangeError::NetworkError(format!(
                "resolve {}: no addresses",
                host
            )));
        }

        self.set_state(SessionState::Connecting);
        let tcp = TcpStream::connect(&addrs[..])
            .await
            .map_err(|e| ExchangeError::NetworkError(format!("connect {}:{}: {}", host, port, e)))?;
        tcp.set_nodelay(true)
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        let stream = if self.config.secure {
            self.set_state(SessionState::TlsHandshaking);
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|e| ExchangeError::Tls(format!("invalid SNI host name {}: {}", host, e)))?;
            let tls = tls_connector()?
                .connect(server_name, tcp)
                .await
                .map_err(|e| ExchangeError::Tls(format!("handshake with {}: {}", host, e)))?;
            MaybeTlsStream::Rustls(tls)
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        self.set_state(SessionState::ProtocolHandshaking);
        let scheme = if self.config.secure { "wss" } else { "ws" };
        let mut request = format!("{}://{}:{}{}", scheme, host, port, target).into_client_request()?;
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        let (ws, _response) = client_async_with_config(request, stream, None).await?;
        Ok(ws)
    }

    /// Ping 타이머와 읽기 루프.
    async fn stream(&self, ws: WsStream, target: &str, on_message: &MessageHandler) {
        let (mut write, mut read) = ws.split();

        let period = self.config.ping_interval();
        let started = Instant::now();
        let mut ping = tokio::time::interval_at(started + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break FrameOutcome::Close,
                _ = ping.tick() => {
                    self.check_pong(target, started, period);
                    let sent = write.send(Message::Ping(vec![].into())).await;
                    self.on_ping_sent(target, sent);
                }
                frame = read.next() => {
                    let outcome = match frame {
                        Some(Ok(Message::Text(text))) => self.on_payload(target, text.as_bytes(), on_message),
                        Some(Ok(Message::Binary(data))) => self.on_payload(target, &data, on_message),
                        Some(Ok(Message::Pong(_))) => {
                            *self.last_pong.lock() = Some(Instant::now());
                            FrameOutcome::Continue
                        }
                        Some(Ok(Message::Close(frame))) => {
                            info!(stream = %target, frame = ?frame, "Server closed stream");
                            self.logger.info(&format!("stream closed by server: {}", target));
                            FrameOutcome::Terminate
                        }
                        // Pong 응답은 tungstenite가 처리
                        Some(Ok(_)) => FrameOutcome::Continue,
                        Some(Err(e)) => {
                            error!(stream = %target, error = %e, "Stream read failed");
                            self.logger.error(&format!("read failed on {}: {}", target, e));
                            FrameOutcome::Terminate
                        }
                        None => {
                            info!(stream = %target, "Stream ended");
                            FrameOutcome::Terminate
                        }
                    };
                    if !matches!(outcome, FrameOutcome::Continue) {
                        break outcome;
                    }
                }
            }
        };

        if let FrameOutcome::Close = outcome {
            self.set_state(SessionState::Closing);
            if let Err(e) = write.send(Message::Close(None)).await {
                debug!(stream = %target, error = %e, "Close frame not sent");
                return;
            }
            // 상대의 Close 응답까지 읽고 버린다
            let drain = async { while let Some(Ok(_)) = read.next().await {} };
            let _ = tokio::time::timeout(CLOSE_DRAIN_TIMEOUT, drain).await;
        }
    }

    /// 프레임 본문을 해석해 콜백으로 전달합니다.
    fn on_payload(&self, target: &str, payload: &[u8], on_message: &MessageHandler) -> FrameOutcome {
        let value: Value = match serde_json::from_slice(payload) {
            Ok(value) => value,
            Err(e) => {
                error!(stream = %target, error = %e, "Malformed stream payload");
                self.logger
                    .error(&format!("malformed payload on {}: {}", target, e));
                return FrameOutcome::Close;
            }
        };

        if is_api_error(&value) {
            warn!(stream = %target, payload = %value, "Stream API error");
            self.logger
                .error(&format!("API error on {}: {}", target, value));
            return FrameOutcome::Continue;
        }

        on_message(value);
        FrameOutcome::Continue
    }

    /// Ping 전송 실패는 기록만 한다. 끊긴 연결은 읽기 루프가 드러낸다.
    fn on_ping_sent(&self, target: &str, sent: Result<(), WsError>) {
        match sent {
            Ok(()) => *self.last_ping.lock() = Some(Instant::now()),
            Err(e) => {
                error!(stream = %target, error = %e, "Ping failed");
                self.logger.error(&format!("ping failed on {}: {}", target, e));
            }
        }
    }

    /// 마지막 Pong 이후 Ping 간격보다 오래 지났으면 경고만 남깁니다.
    fn check_pong(&self, target: &str, started: Instant, period: Duration) {
        let Some(last_ping) = self.last_ping() else {
            return;
        };
        let last_pong = self.last_pong().unwrap_or(started);
        if last_ping.saturating_duration_since(last_pong) > period {
            warn!(stream = %target, "ping expired");
            self.logger.warning(&format!("ping expired: {}", target));
        }
    }
}

/// `code`와 `msg` 필드를 모두 가진 객체는 거래소 에러 응답이다.
pub fn is_api_error(value: &Value) -> bool {
    value.get("code").is_some() && value.get("msg").is_some()
}

fn tls_connector() -> ExchangeResult<TlsConnector> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ExchangeError::Tls(e.to_string()))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}
