//! tracing을 사용한 로깅 인프라.
//!
//! 두 가지 경로를 제공합니다:
//! - [`init_logging`]: `tracing-subscriber` 기반 구조화 로깅 (pretty / json / compact, stderr 출력)
//! - [`SinkLogger`]: 라이브러리 사용자가 주입하는 외부 로거 콜백 (세션, 풀, 스트림 매니저가 사용)

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing_subscriber::{
    fmt::{self as tracing_fmt, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;
use crate::error::{CoreError, CoreResult};

/// 로그 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// 색상이 포함된 사람이 읽기 쉬운 형식 (개발용)
    #[default]
    Pretty,
    /// 로그 집계용 JSON 형식 (운영용)
    Json,
    /// 간결한 한 줄 형식
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            "compact" => Ok(Self::Compact),
            _ => Err(CoreError::InvalidInput(format!("Unknown log format: {}", s))),
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 로그 레벨 필터 (예: "info", "connector_binance=debug")
    pub level: String,
    /// 출력 형식
    pub format: LogFormat,
    /// span 이벤트 포함 여부 (진입/종료)
    pub with_span_events: bool,
    /// 파일명과 줄 번호 포함 여부
    pub with_file: bool,
    /// 스레드 ID 포함 여부
    pub with_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            with_span_events: false,
            with_file: false,
            // 세션은 공유 I/O 스레드에서 돌기 때문에 스레드 구분이 유용하다
            with_thread_ids: true,
        }
    }
}

impl LogConfig {
    /// 새 로그 설정을 생성합니다.
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Default::default()
        }
    }

    /// 로그 형식을 설정합니다.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// span 이벤트를 활성화합니다.
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// 환경 변수에서 설정을 생성합니다.
    pub fn from_env() -> Self {
        let level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
        let format = std::env::var("LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default();

        Self {
            level,
            format,
            ..Default::default()
        }
    }
}

impl From<&LoggingConfig> for LogConfig {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            level: config.level.clone(),
            format: config.format.parse().unwrap_or_default(),
            ..Default::default()
        }
    }
}

/// 주어진 설정으로 로깅 시스템을 초기화합니다.
///
/// 모든 형식은 표준 에러로 출력됩니다.
///
/// # 예제
///
/// ```no_run
/// use connector_core::logging::{init_logging, LogConfig, LogFormat};
///
/// let config = LogConfig::new("connector_binance=debug").with_format(LogFormat::Json);
/// init_logging(config).unwrap();
/// ```
pub fn init_logging(config: LogConfig) -> CoreResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| CoreError::Logging(e.to_string()))?;

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(config.with_file)
        .with_line_number(config.with_file)
        .with_thread_ids(config.with_thread_ids)
        .with_span_events(span_events);

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Pretty => registry.with(base.pretty()).try_init(),
        LogFormat::Json => registry.with(base.json()).try_init(),
        LogFormat::Compact => registry.with(base.compact()).try_init(),
    };
    result.map_err(|e| CoreError::Logging(e.to_string()))?;

    tracing::info!(
        format = ?config.format,
        level = %config.level,
        "Logging initialized"
    );

    Ok(())
}

/// 환경 변수에서 로깅을 초기화합니다.
///
/// 레벨에는 `RUST_LOG`를, 형식에는 `LOG_FORMAT`을 사용합니다.
pub fn init_logging_from_env() -> CoreResult<()> {
    init_logging(LogConfig::from_env())
}

/// 외부 로거에 전달되는 심각도.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogSeverity {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogSeverity::Trace => "trace",
            LogSeverity::Debug => "debug",
            LogSeverity::Info => "info",
            LogSeverity::Warning => "warning",
            LogSeverity::Error => "error",
            LogSeverity::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// 외부 로거 콜백.
pub type LogSink = Arc<dyn Fn(LogSeverity, &str) + Send + Sync>;

/// 교체 가능한 외부 로거.
///
/// 싱크가 설정되어 있으면 모든 메시지를 싱크로 전달합니다.
/// 설정되어 있지 않으면 `Error`/`Critical` 메시지만 `tracing::error!`로 내보냅니다.
/// 복제본은 같은 싱크 슬롯을 공유하므로 풀에서 한 번 교체하면 모든 세션에 반영됩니다.
#[derive(Clone, Default)]
pub struct SinkLogger {
    sink: Arc<RwLock<Option<LogSink>>>,
}

impl fmt::Debug for SinkLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkLogger")
            .field("has_sink", &self.has_sink())
            .finish()
    }
}

impl SinkLogger {
    /// 싱크 없이 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 주어진 싱크로 생성합니다.
    pub fn with_sink(sink: LogSink) -> Self {
        let logger = Self::new();
        logger.set_sink(Some(sink));
        logger
    }

    /// 싱크를 교체합니다. `None`이면 기본 동작으로 돌아갑니다.
    pub fn set_sink(&self, sink: Option<LogSink>) {
        *self.sink.write() = sink;
    }

    pub fn has_sink(&self) -> bool {
        self.sink.read().is_some()
    }

    /// 메시지를 기록합니다.
    pub fn log(&self, severity: LogSeverity, message: &str) {
        // 콜백 호출 중에 set_sink가 막히지 않도록 복제 후 잠금 해제
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => sink(severity, message),
            None => {
                if severity >= LogSeverity::Error {
                    tracing::error!(severity = %severity, "{}", message);
                }
            }
        }
    }

    pub fn trace(&self, message: &str) {
        self.log(LogSeverity::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogSeverity::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogSeverity::Info, message);
    }

    pub fn warning(&self, message: &str) {
        self.log(LogSeverity::Warning, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogSeverity::Error, message);
    }

    pub fn critical(&self, message: &str) {
        self.log(LogSeverity::Critical, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn capture() -> (LogSink, Arc<Mutex<Vec<(LogSeverity, String)>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let sink: LogSink = Arc::new(move |severity, msg: &str| {
            sink_lines.lock().push((severity, msg.to_string()));
        });
        (sink, lines)
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("PRETTY".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_config_builder() {
        let config = LogConfig::new("debug")
            .with_format(LogFormat::Json)
            .with_span_events(true);

        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.with_span_events);
    }

    #[test]
    fn test_log_config_from_logging_config() {
        let config = LogConfig::from(&LoggingConfig {
            level: "warn".to_string(),
            format: "compact".to_string(),
        });
        assert_eq!(config.level, "warn");
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    fn test_severity_order() {
        assert!(LogSeverity::Trace < LogSeverity::Warning);
        assert!(LogSeverity::Error < LogSeverity::Critical);
        assert_eq!(LogSeverity::Warning.to_string(), "warning");
    }

    #[test]
    fn test_sink_receives_all_severities() {
        let (sink, lines) = capture();
        let logger = SinkLogger::with_sink(sink);

        logger.trace("t");
        logger.info("i");
        logger.critical("c");

        let lines = lines.lock();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], (LogSeverity::Trace, "t".to_string()));
        assert_eq!(lines[2], (LogSeverity::Critical, "c".to_string()));
    }

    #[test]
    fn test_sink_shared_between_clones() {
        let logger = SinkLogger::new();
        let clone = logger.clone();
        assert!(!clone.has_sink());

        let (sink, lines) = capture();
        logger.set_sink(Some(sink));
        clone.warning("from clone");

        assert_eq!(lines.lock().len(), 1);

        logger.set_sink(None);
        clone.warning("dropped");
        assert_eq!(lines.lock().len(), 1);
    }
}
