use std::{collections::HashSet, env, str::FromStr};

use jsonwebtoken::Algorithm;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use thiserror::Error;

use crate::models::MAX_PAGE_SIZE;

/// Extensions accepted for issue attachments. Not configurable.
pub const ALLOWED_IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// ConfigError
///
/// Raised while resolving the environment at startup. Any of these is fatal:
/// the binary refuses to serve traffic with an incomplete configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    Missing(&'static str),
    #[error("environment variable {name} has an invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Env
///
/// Runtime context. Only `Development` creates the schema at startup and
/// exposes failure details from the health endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Development,
    Testing,
    Production,
}

impl FromStr for Env {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Env::Development),
            "testing" | "test" => Ok(Env::Testing),
            "production" | "prod" => Ok(Env::Production),
            other => Err(format!("unknown environment {other:?}")),
        }
    }
}

impl Env {
    pub fn as_str(&self) -> &'static str {
        match self {
            Env::Development => "development",
            Env::Testing => "testing",
            Env::Production => "production",
        }
    }
}

/// DatabaseConfig
///
/// Connection parameters for the MySQL server. The password is kept raw and
/// only percent-encoded when the URL is composed.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Composes the `mysql://` connection string, URL-encoding the credentials.
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            utf8_percent_encode(&self.user, NON_ALPHANUMERIC),
            utf8_percent_encode(&self.password, NON_ALPHANUMERIC),
            self.host,
            self.port,
            self.name
        )
    }
}

/// JwtConfig
///
/// Signing parameters for access and refresh tokens.
#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: String,
    pub algorithm: Algorithm,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
}

/// UploadConfig
#[derive(Clone, Debug)]
pub struct UploadConfig {
    pub dir: String,
    pub max_image_size_kb: u64,
    pub allowed_extensions: HashSet<String>,
}

impl UploadConfig {
    pub fn max_bytes(&self) -> u64 {
        self.max_image_size_kb * 1024
    }

    pub fn is_allowed(&self, extension: &str) -> bool {
        self.allowed_extensions
            .contains(&extension.to_ascii_lowercase())
    }
}

/// AppMetadata
///
/// Surfaced on the root endpoint and in the OpenAPI document.
#[derive(Clone, Debug)]
pub struct AppMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
}

/// Credentials of the administrator created at startup when none exists yet.
#[derive(Clone, Debug)]
pub struct BootstrapAdmin {
    pub email: String,
    pub password: String,
}

/// AppConfig
///
/// The complete, immutable configuration of the service. It is loaded once in
/// `main`, then shared with every request through `AppState`.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub env: Env,
    pub debug: bool,
    pub log_level: String,
    pub host: String,
    pub port: u16,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub upload: UploadConfig,
    pub app: AppMetadata,
    pub default_page: u32,
    pub default_page_size: u32,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Default for AppConfig {
    /// default
    ///
    /// Non-panicking values used to scaffold state in tests. Nothing here is
    /// read from the environment.
    fn default() -> Self {
        Self {
            env: Env::Development,
            debug: false,
            log_level: "info".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            database: DatabaseConfig {
                user: "issues".to_string(),
                password: "issues".to_string(),
                host: "localhost".to_string(),
                port: 3306,
                name: "issues_test".to_string(),
                max_connections: 5,
            },
            jwt: JwtConfig {
                secret: "issue-desk-test-secret-value".to_string(),
                algorithm: Algorithm::HS256,
                access_ttl_minutes: 60,
                refresh_ttl_days: 7,
            },
            upload: UploadConfig {
                dir: "uploads/images".to_string(),
                max_image_size_kb: 5120,
                allowed_extensions: default_extensions(),
            },
            app: AppMetadata {
                name: "Issue Reporting API".to_string(),
                version: "1.0.0".to_string(),
                description: "API for managing issue reporting and tracking.".to_string(),
            },
            default_page: 1,
            default_page_size: 50,
            bootstrap_admin: None,
        }
    }
}

fn default_extensions() -> HashSet<String> {
    ALLOWED_IMAGE_EXTENSIONS
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl AppConfig {
    /// load
    ///
    /// Reads the environment-specific `.env.<ENV>` file (if any) and then the
    /// process environment. Variables already present in the process win over
    /// the file.
    pub fn load() -> Result<Self, ConfigError> {
        let env_name = env::var("ENV").unwrap_or_else(|_| "development".to_string());
        dotenv::from_filename(format!(".env.{env_name}")).ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// from_lookup
    ///
    /// Resolves every setting through `lookup`. Required variables fail with
    /// `ConfigError::Missing`; optional ones fall back to their documented
    /// defaults; anything present but unparsable is `ConfigError::Invalid`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Lookup(&lookup);

        let env = vars.parsed("ENV", Env::Development)?;

        let database = DatabaseConfig {
            user: vars.required("DB_USER")?,
            password: vars.required("DB_PASSWORD")?,
            host: vars.required("DB_HOST")?,
            port: vars.parsed("DB_PORT", 3306)?,
            name: vars.required("DB_NAME")?,
            max_connections: vars.parsed("DB_MAX_CONNECTIONS", 10)?,
        };

        let algorithm = vars.parsed("JWT_ALGORITHM", Algorithm::HS256)?;
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            return Err(ConfigError::Invalid {
                name: "JWT_ALGORITHM",
                value: format!("{algorithm:?}"),
                reason: "only HMAC algorithms (HS256, HS384, HS512) work with a shared secret"
                    .to_string(),
            });
        }

        let jwt = JwtConfig {
            secret: vars.required("JWT_SECRET_KEY")?,
            algorithm,
            access_ttl_minutes: vars.positive("JWT_EXPIRATION_TIME_MINUTES", 60)?,
            refresh_ttl_days: vars.positive("JWT_REFRESH_TOKEN_EXPIRE_DAYS", 7)?,
        };

        let upload = UploadConfig {
            dir: vars.or("UPLOAD_DIR", "uploads/images"),
            max_image_size_kb: vars.parsed("MAX_IMAGE_SIZE_KB", 5120)?,
            allowed_extensions: default_extensions(),
        };

        let app = AppMetadata {
            name: vars.or("APP_NAME", "Issue Reporting API"),
            version: vars.or("APP_VERSION", "1.0.0"),
            description: vars.or(
                "APP_DESCRIPTION",
                "API for managing issue reporting and tracking.",
            ),
        };

        let default_page: u32 = vars.parsed("DEFAULT_PAGE", 1)?;
        if default_page == 0 {
            return Err(ConfigError::Invalid {
                name: "DEFAULT_PAGE",
                value: "0".to_string(),
                reason: "pages start at 1".to_string(),
            });
        }
        let default_page_size: u32 = vars.parsed("DEFAULT_PAGE_SIZE", 50)?;
        if default_page_size == 0 {
            return Err(ConfigError::Invalid {
                name: "DEFAULT_PAGE_SIZE",
                value: "0".to_string(),
                reason: "page size must be positive".to_string(),
            });
        }
        if default_page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid {
                name: "DEFAULT_PAGE_SIZE",
                value: default_page_size.to_string(),
                reason: format!("page size is capped at {MAX_PAGE_SIZE}"),
            });
        }

        let bootstrap_admin = match (vars.get("ADMIN_EMAIL"), vars.get("ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(BootstrapAdmin { email, password }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("ADMIN_PASSWORD")),
            (None, Some(_)) => return Err(ConfigError::Missing("ADMIN_EMAIL")),
        };

        Ok(Self {
            env,
            debug: vars.flag("DEBUG")?,
            log_level: vars.or("LOG_LEVEL", "INFO").to_ascii_lowercase(),
            host: vars.or("HOST", "0.0.0.0"),
            port: vars.parsed("PORT", 8000)?,
            database,
            jwt,
            upload,
            app,
            default_page,
            default_page_size,
            bootstrap_admin,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct Lookup<'a, F>(&'a F);

impl<F> Lookup<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|value| !value.trim().is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                value: raw,
                reason: e.to_string(),
            }),
        }
    }

    fn positive(&self, name: &'static str, default: i64) -> Result<i64, ConfigError> {
        let value = self.parsed(name, default)?;
        if value <= 0 {
            return Err(ConfigError::Invalid {
                name,
                value: value.to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(value)
    }

    fn flag(&self, name: &'static str) -> Result<bool, ConfigError> {
        match self.get(name) {
            None => Ok(false),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    name,
                    value: raw,
                    reason: "expected a boolean".to_string(),
                }),
            },
        }
    }
}
