use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use session_http::{DEFAULT_USER_AGENT, HttpClientConfig, TransportSecurity};
use url::Url;

use crate::endpoint::CredentialPlacement;
use crate::error::ConfigError;

/// Environment prefix used by [`SessionClientConfig::load`] callers.
pub const DEFAULT_ENV_PREFIX: &str = "SESSION_";

/// Configuration of an [`AuthenticatedClient`](crate::AuthenticatedClient)
/// backed by a real [`HttpClient`](session_http::HttpClient).
///
/// Durations are humantime strings (`"2s"`, `"1m 30s"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionClientConfig {
    /// Base for relative request URLs (`/children` → `<base_url>/children`).
    #[serde(default)]
    pub base_url: Option<Url>,

    /// Refresh endpoint. Requests to this URL bypass recovery.
    pub refresh_url: Url,

    /// How the refresh credential is sent (default: `refreshToken` cookie).
    #[serde(default)]
    pub credential: CredentialPlacement,

    /// Response statuses that trigger a refresh (default: `[401]`).
    #[serde(default = "default_unauthorized_statuses")]
    pub unauthorized_statuses: Vec<u16>,

    /// Upper bound on one token store lookup (default: 2s).
    #[serde(default = "default_token_lookup_timeout", with = "humantime_duration")]
    pub token_lookup_timeout: Duration,

    /// Per-request transport timeout (default: 30s).
    #[serde(default = "default_request_timeout", with = "humantime_duration")]
    pub request_timeout: Duration,

    /// Permit `http://` URLs (local backends and mock servers only).
    #[serde(default)]
    pub allow_insecure_http: bool,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_unauthorized_statuses() -> Vec<u16> {
    vec![StatusCode::UNAUTHORIZED.as_u16()]
}

fn default_token_lookup_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_owned()
}

impl SessionClientConfig {
    /// Defaults for everything except the refresh endpoint.
    #[must_use]
    pub fn new(refresh_url: Url) -> Self {
        Self {
            base_url: None,
            refresh_url,
            credential: CredentialPlacement::default(),
            unauthorized_statuses: default_unauthorized_statuses(),
            token_lookup_timeout: default_token_lookup_timeout(),
            request_timeout: default_request_timeout(),
            allow_insecure_http: false,
            user_agent: default_user_agent(),
        }
    }

    /// Layer an optional YAML file and `<env_prefix>*` variables over the
    /// defaults, then validate.
    ///
    /// Nested keys use `__` in variable names, e.g.
    /// `SESSION_CREDENTIAL__KIND=header`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file is missing, a value does not
    /// parse, or validation fails.
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.is_file() {
                return Err(ConfigError::Invalid(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }
        figment = figment.merge(Env::prefixed(env_prefix).split("__"));

        Self::from_figment(&figment)
    }

    /// Extract and validate from an already-assembled figment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if extraction or validation fails.
    pub fn from_figment(figment: &Figment) -> Result<Self, ConfigError> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if:
    /// - `unauthorized_statuses` is empty or holds a status outside 400..=499
    /// - `token_lookup_timeout` or `request_timeout` is zero
    /// - `refresh_url` or `base_url` is not http(s)
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.unauthorized_statuses.is_empty() {
            return Err(ConfigError::Invalid(
                "unauthorized_statuses must not be empty".into(),
            ));
        }
        if let Some(bad) = self
            .unauthorized_statuses
            .iter()
            .find(|code| !(400..=499).contains(*code))
        {
            return Err(ConfigError::Invalid(format!(
                "unauthorized status {bad} is not a 4xx status"
            )));
        }
        if self.token_lookup_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "token_lookup_timeout must be greater than zero".into(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be greater than zero".into(),
            ));
        }
        check_scheme("refresh_url", &self.refresh_url)?;
        if let Some(base) = &self.base_url {
            check_scheme("base_url", base)?;
        }
        Ok(())
    }

    /// Validated statuses as [`StatusCode`]s; out-of-range entries are skipped.
    #[must_use]
    pub fn unauthorized_status_codes(&self) -> Vec<StatusCode> {
        self.unauthorized_statuses
            .iter()
            .filter_map(|code| StatusCode::from_u16(*code).ok())
            .collect()
    }

    #[must_use]
    pub fn transport_security(&self) -> TransportSecurity {
        if self.allow_insecure_http {
            TransportSecurity::AllowInsecureHttp
        } else {
            TransportSecurity::TlsOnly
        }
    }

    /// Transport settings for application requests.
    #[must_use]
    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            request_timeout: self.request_timeout,
            user_agent: self.user_agent.clone(),
            transport: self.transport_security(),
            ..HttpClientConfig::default()
        }
    }

    /// Transport settings for the refresh endpoint client.
    #[must_use]
    pub fn refresh_http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            user_agent: self.user_agent.clone(),
            transport: self.transport_security(),
            ..HttpClientConfig::refresh_endpoint()
        }
    }
}

fn check_scheme(field: &str, url: &Url) -> Result<(), ConfigError> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{field} must use http or https, got '{other}'"
        ))),
    }
}

/// Serde adapter for humantime duration strings.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use figment::Jail;
    use figment::providers::Serialized;

    fn refresh_url() -> Url {
        Url::parse("https://api.example.com/auth/refresh").unwrap()
    }

    #[test]
    fn new_uses_defaults() {
        let cfg = SessionClientConfig::new(refresh_url());
        assert_eq!(cfg.unauthorized_statuses, vec![401]);
        assert_eq!(cfg.token_lookup_timeout, Duration::from_secs(2));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.credential, CredentialPlacement::default());
        assert_eq!(cfg.transport_security(), TransportSecurity::TlsOnly);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn figment_fills_defaults() {
        let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
            "refresh_url": "https://api.example.com/auth/refresh",
            "token_lookup_timeout": "500ms",
        })));

        let cfg = SessionClientConfig::from_figment(&figment).unwrap();
        assert_eq!(cfg.token_lookup_timeout, Duration::from_millis(500));
        assert_eq!(cfg.unauthorized_statuses, vec![401]);
        assert!(cfg.base_url.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let figment = Figment::new().merge(Serialized::defaults(serde_json::json!({
            "refresh_url": "https://api.example.com/auth/refresh",
            "refresh_retries": 3,
        })));
        assert!(matches!(
            SessionClientConfig::from_figment(&figment),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn validate_rejects_empty_statuses() {
        let cfg = SessionClientConfig {
            unauthorized_statuses: vec![],
            ..SessionClientConfig::new(refresh_url())
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn validate_rejects_non_4xx_status() {
        let cfg = SessionClientConfig {
            unauthorized_statuses: vec![401, 503],
            ..SessionClientConfig::new(refresh_url())
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn validate_rejects_zero_lookup_timeout() {
        let cfg = SessionClientConfig {
            token_lookup_timeout: Duration::ZERO,
            ..SessionClientConfig::new(refresh_url())
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_http_refresh_url() {
        let cfg = SessionClientConfig::new(Url::parse("ftp://files.example.com/refresh").unwrap());
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("refresh_url"));
    }

    #[test]
    fn multiple_statuses_convert() {
        let cfg = SessionClientConfig {
            unauthorized_statuses: vec![401, 419],
            ..SessionClientConfig::new(refresh_url())
        };
        let codes = cfg.unauthorized_status_codes();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0], StatusCode::UNAUTHORIZED);
        assert_eq!(codes[1].as_u16(), 419);
    }

    #[test]
    fn load_layers_yaml_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "session.yaml",
                r"
base_url: https://api.example.com/
refresh_url: https://api.example.com/auth/refresh
credential:
  kind: header
  name: x-refresh-token
token_lookup_timeout: 1s
",
            )?;
            jail.set_env("SESSION_TOKEN_LOOKUP_TIMEOUT", "250ms");
            jail.set_env("SESSION_ALLOW_INSECURE_HTTP", "true");

            let cfg = SessionClientConfig::load(Some(Path::new("session.yaml")), DEFAULT_ENV_PREFIX)
                .map_err(|e| e.to_string())?;

            assert_eq!(
                cfg.base_url.as_ref().map(Url::as_str),
                Some("https://api.example.com/")
            );
            assert_eq!(
                cfg.credential,
                CredentialPlacement::Header {
                    name: "x-refresh-token".into()
                }
            );
            assert_eq!(cfg.token_lookup_timeout, Duration::from_millis(250));
            assert!(cfg.allow_insecure_http);
            Ok(())
        });
    }

    #[test]
    fn load_reads_nested_env_keys() {
        Jail::expect_with(|jail| {
            jail.set_env("SESSION_REFRESH_URL", "https://api.example.com/auth/refresh");
            jail.set_env("SESSION_CREDENTIAL__KIND", "cookie");
            jail.set_env("SESSION_CREDENTIAL__NAME", "rt");

            let cfg = SessionClientConfig::load(None, DEFAULT_ENV_PREFIX).map_err(|e| e.to_string())?;
            assert_eq!(
                cfg.credential,
                CredentialPlacement::Cookie { name: "rt".into() }
            );
            Ok(())
        });
    }

    #[test]
    fn load_fails_for_missing_file() {
        let err = SessionClientConfig::load(Some(Path::new("/nonexistent/session.yaml")), "SESSION_TEST_UNUSED_")
            .unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }
}
