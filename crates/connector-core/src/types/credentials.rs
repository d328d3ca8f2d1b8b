//! API 자격증명.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use crate::error::{CoreError, CoreResult};

/// API 키와 비밀 키.
///
/// 비밀 키는 `SecretString`으로 보관되며 `Debug` 출력에서 마스킹됩니다.
/// 공개 엔드포인트만 사용할 때는 [`Credentials::anonymous`]를 사용합니다.
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: SecretString,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: SecretString::from(api_secret.into()),
        }
    }

    /// 서명 요청을 하지 않는 빈 자격증명.
    pub fn anonymous() -> Self {
        Self::new("", "")
    }

    /// `BINANCE_API_KEY` / `BINANCE_API_SECRET` 환경 변수에서 로드합니다.
    ///
    /// `.env` 파일이 있으면 먼저 읽습니다.
    pub fn from_env() -> CoreResult<Self> {
        dotenvy::dotenv().ok();

        let api_key = std::env::var("BINANCE_API_KEY")
            .map_err(|_| CoreError::Credentials("BINANCE_API_KEY not set".to_string()))?;
        let api_secret = std::env::var("BINANCE_API_SECRET")
            .map_err(|_| CoreError::Credentials("BINANCE_API_SECRET not set".to_string()))?;

        Ok(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// 서명에 사용할 비밀 키를 노출합니다.
    pub fn api_secret(&self) -> &str {
        self.api_secret.expose_secret()
    }

    pub fn is_anonymous(&self) -> bool {
        self.api_key.is_empty()
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let masked_key = if self.api_key.len() > 8 {
            format!(
                "{}...{}",
                &self.api_key[..4],
                &self.api_key[self.api_key.len() - 4..]
            )
        } else {
            "***REDACTED***".to_string()
        };

        f.debug_struct("Credentials")
            .field("api_key", &masked_key)
            .field("api_secret", &"***REDACTED***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_masks_secret() {
        let creds = Credentials::new("abcdefghijklmnop", "very-secret-value");
        let debug = format!("{:?}", creds);

        assert!(debug.contains("abcd...mnop"));
        assert!(!debug.contains("very-secret-value"));
        assert!(!debug.contains("efghijkl"));
    }

    #[test]
    fn test_short_key_fully_masked() {
        let debug = format!("{:?}", Credentials::new("key", "s"));
        assert!(!debug.contains("\"key\""));
        assert!(debug.contains("***REDACTED***"));
    }

    #[test]
    fn test_anonymous() {
        let creds = Credentials::default();
        assert!(creds.is_anonymous());
        assert_eq!(creds.api_secret(), "");
    }
}
