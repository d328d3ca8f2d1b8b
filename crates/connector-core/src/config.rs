//! 설정 관리.
//!
//! 이 모듈은 REST 실행기, 스트림 세션, 로깅 설정을 정의하고 관리합니다.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::CoreResult;

/// 커넥터 전체 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConnectorConfig {
    /// REST 실행기 설정
    #[serde(default)]
    pub rest: RestConfig,
    /// WebSocket 스트림 설정
    #[serde(default)]
    pub stream: StreamConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// REST 실행기 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RestConfig {
    /// REST API 기본 URL
    #[serde(default = "default_rest_base_url")]
    pub base_url: String,
    /// 요청 타임아웃 (초)
    #[serde(default = "default_rest_timeout")]
    pub timeout_secs: u64,
    /// 수신 윈도우 (밀리초)
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
    /// 분당 요청 가중치 한도 (거래소 공시값)
    #[serde(default = "default_weight_limit")]
    pub weight_limit: u32,
}

fn default_rest_base_url() -> String {
    "https://fapi.binance.com".to_string()
}
fn default_rest_timeout() -> u64 {
    30
}
fn default_recv_window() -> u64 {
    60_000
}
fn default_weight_limit() -> u32 {
    2400
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: default_rest_base_url(),
            timeout_secs: default_rest_timeout(),
            recv_window_ms: default_recv_window(),
            weight_limit: default_weight_limit(),
        }
    }
}

impl RestConfig {
    /// 기본 URL을 변경합니다.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 요청 타임아웃 반환.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// WebSocket 스트림 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// 스트림 호스트 (TLS SNI에도 사용)
    #[serde(default = "default_stream_host")]
    pub host: String,
    /// 스트림 포트
    #[serde(default = "default_stream_port")]
    pub port: u16,
    /// TLS 사용 여부 (로컬 엔드포인트는 false)
    #[serde(default = "default_secure")]
    pub secure: bool,
    /// 연결 단계 제한 시간 (초)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Ping 주기 (초)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    /// 스트림 매니저 폴링 읽기 제한 시간 (초)
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

fn default_stream_host() -> String {
    "fstream.binance.com".to_string()
}
fn default_stream_port() -> u16 {
    443
}
fn default_secure() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_ping_interval() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    5
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: default_stream_host(),
            port: default_stream_port(),
            secure: default_secure(),
            connect_timeout_secs: default_connect_timeout(),
            ping_interval_secs: default_ping_interval(),
            read_timeout_secs: default_read_timeout(),
        }
    }
}

impl StreamConfig {
    /// 평문 TCP 로컬 엔드포인트 설정을 생성합니다.
    pub fn local(port: u16) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port,
            secure: false,
            ..Default::default()
        }
    }

    /// 연결 단계 제한 시간 반환.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Ping 주기 반환.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// 폴링 읽기 제한 시간 반환.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl ConnectorConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 환경 변수는 `CONNECTOR__REST__WEIGHT_LIMIT=1200` 형식으로 파일 값을 덮어씁니다.
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("CONNECTOR")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> CoreResult<Self> {
        Self::load("config/connector.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConnectorConfig::default();
        assert_eq!(config.rest.base_url, "https://fapi.binance.com");
        assert_eq!(config.rest.recv_window_ms, 60_000);
        assert_eq!(config.rest.weight_limit, 2400);
        assert_eq!(config.stream.host, "fstream.binance.com");
        assert_eq!(config.stream.port, 443);
        assert!(config.stream.secure);
        assert_eq!(config.stream.ping_interval(), Duration::from_secs(10));
        assert_eq!(config.stream.connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = ConnectorConfig::load("does/not/exist.toml").unwrap();
        assert_eq!(config.stream.read_timeout_secs, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_deserialize() {
        let json = r#"{ "stream": { "host": "localhost", "port": 9000, "secure": false } }"#;
        let config: ConnectorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.stream.host, "localhost");
        assert_eq!(config.stream.port, 9000);
        assert!(!config.stream.secure);
        assert_eq!(config.stream.ping_interval_secs, 10);
        assert_eq!(config.rest.timeout_secs, 30);
    }

    #[test]
    fn test_local_stream_config() {
        let config = StreamConfig::local(18080);
        assert_eq!(config.host, "127.0.0.1");
        assert!(!config.secure);
    }
}
