use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationServiceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub jwt: JwtConfig,
    pub invitation: InvitationConfig,
    pub access_context: AccessContextConfig,
    pub alerts: AlertConfig,
    pub smtp: SmtpConfig,
    pub security: SecurityConfig,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Session tokens are minted by the platform's auth service; we only verify.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub public_key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationConfig {
    pub expiry_days: i64,
    pub max_active_per_email: u32,
    pub pending_token_ttl_seconds: u64,
    /// Base URL the acceptance link in invitation mail points to.
    pub accept_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccessContextConfig {
    pub secret: Option<String>,
    pub global_partnership_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    pub window_minutes: i64,
    pub unauthorized_access_threshold: i64,
    pub rate_limit_threshold: i64,
    pub token_failure_threshold: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub acceptance_attempts: u32,
    pub acceptance_window_seconds: u64,
}

impl InvitationServiceConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = InvitationServiceConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("invitation-service"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: get_optional_env("OTEL_EXPORTER_OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", false)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", false)?,
            },
            redis: RedisConfig {
                url: get_env("REDIS_URL", Some("redis://127.0.0.1:6379"), is_prod)?,
            },
            jwt: JwtConfig {
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
            },
            invitation: InvitationConfig {
                expiry_days: parse_env("INVITATION_EXPIRY_DAYS", "7", false)?,
                max_active_per_email: parse_env("INVITATION_MAX_ACTIVE", "3", false)?,
                pending_token_ttl_seconds: parse_env(
                    "INVITATION_PENDING_TOKEN_TTL_SECONDS",
                    "86400",
                    false,
                )?,
                accept_url: get_env(
                    "INVITATION_ACCEPT_URL",
                    Some("http://localhost:3000/invitations/accept"),
                    is_prod,
                )?,
            },
            access_context: AccessContextConfig {
                secret: get_optional_env("ACCESS_CONTEXT_SECRET"),
                global_partnership_id: get_optional_env("GLOBAL_PARTNERSHIP_ID")
                    .map(|v| v.parse())
                    .transpose()
                    .map_err(|e: std::num::ParseIntError| {
                        AppError::ConfigError(anyhow::anyhow!(
                            "GLOBAL_PARTNERSHIP_ID: {}",
                            e
                        ))
                    })?,
            },
            alerts: AlertConfig {
                window_minutes: parse_env("SECURITY_ALERT_WINDOW_MINUTES", "60", false)?,
                unauthorized_access_threshold: parse_env(
                    "SECURITY_ALERT_UNAUTHORIZED_ACCESS_THRESHOLD",
                    "5",
                    false,
                )?,
                rate_limit_threshold: parse_env("SECURITY_ALERT_RATE_LIMIT_THRESHOLD", "10", false)?,
                token_failure_threshold: parse_env(
                    "SECURITY_ALERT_TOKEN_FAILURE_THRESHOLD",
                    "20",
                    false,
                )?,
            },
            smtp: SmtpConfig {
                host: get_optional_env("SMTP_HOST"),
                port: parse_env("SMTP_PORT", "587", false)?,
                username: get_optional_env("SMTP_USERNAME"),
                password: get_optional_env("SMTP_PASSWORD"),
                from: get_env("SMTP_FROM", Some("no-reply@localhost"), is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:3000"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            rate_limit: RateLimitConfig {
                acceptance_attempts: parse_env("RATE_LIMIT_ACCEPTANCE_ATTEMPTS", "10", false)?,
                acceptance_window_seconds: parse_env(
                    "RATE_LIMIT_ACCEPTANCE_WINDOW_SECONDS",
                    "60",
                    false,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.invitation.expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITATION_EXPIRY_DAYS must be positive"
            )));
        }

        if self.invitation.max_active_per_email == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "INVITATION_MAX_ACTIVE must be at least 1"
            )));
        }

        if self.alerts.window_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "SECURITY_ALERT_WINDOW_MINUTES must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.access_context.secret.is_none() {
                tracing::warn!(
                    "ACCESS_CONTEXT_SECRET not set - request contexts from the gateway will be rejected"
                );
            }

            if self.smtp.host.is_none() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SMTP_HOST is required in production"
                )));
            }
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
