//! Process-wide configuration, read once at startup from environment
//! variables.

use std::path::PathBuf;
use std::time::Duration;

use lettre::message::Mailbox;
use serde::Deserialize;
use strum::{Display, EnumString};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error(
        "Missing required environment variables: {0}. \
         Please set these variables in the service environment."
    )]
    MissingVars(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("failed to read configuration: {0}")]
    Source(#[from] config_rs::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from_email: Option<String>,
    pub smtp_use_tls: bool,
    pub job_storage_path: PathBuf,
    pub upload_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<String>,
    pub script_timeout: u64,
    pub api_fetch_timeout: u64,
    pub server_port: u16,
    pub max_concurrent_runs: Option<usize>,
}

/// The SMTP subset of the configuration, present once validated.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: Mailbox,
    pub use_tls: bool,
}

impl Config {
    /// Read configuration from the process environment with defaults.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let config = config_rs::Config::builder()
            .set_default("smtp_port", 587)?
            .set_default("smtp_use_tls", true)?
            .set_default("job_storage_path", "./data/jobs.json")?
            .set_default("upload_dir", "./data/uploads")?
            .set_default("log_level", "info")?
            .set_default("script_timeout", 300)?
            .set_default("api_fetch_timeout", 30)?
            .set_default("server_port", 8000)?
            .add_source(config_rs::Environment::default())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Check startup requirements. The SMTP variables are mandatory
    /// outside the test environment.
    pub fn validate(&self, environment: Environment) -> Result<(), ConfigurationError> {
        if environment != Environment::Test {
            self.smtp()?;
        }

        if self.script_timeout == 0 {
            return Err(ConfigurationError::Invalid(
                "SCRIPT_TIMEOUT must be a positive integer".to_string(),
            ));
        }
        if self.api_fetch_timeout == 0 {
            return Err(ConfigurationError::Invalid(
                "API_FETCH_TIMEOUT must be a positive integer".to_string(),
            ));
        }
        if self.max_concurrent_runs == Some(0) {
            return Err(ConfigurationError::Invalid(
                "MAX_CONCURRENT_RUNS must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }

    /// The validated SMTP settings, or the list of missing variables.
    pub fn smtp(&self) -> Result<SmtpSettings, ConfigurationError> {
        let mut missing = Vec::new();
        if self.smtp_host.as_deref().unwrap_or_default().is_empty() {
            missing.push("SMTP_HOST");
        }
        if self.smtp_user.as_deref().unwrap_or_default().is_empty() {
            missing.push("SMTP_USER");
        }
        if self.smtp_password.as_deref().unwrap_or_default().is_empty() {
            missing.push("SMTP_PASSWORD");
        }
        if self.smtp_from_email.as_deref().unwrap_or_default().is_empty() {
            missing.push("SMTP_FROM_EMAIL");
        }
        if !missing.is_empty() {
            return Err(ConfigurationError::MissingVars(missing.join(", ")));
        }

        let from_email: Mailbox = self
            .smtp_from_email
            .as_deref()
            .expect("checked above")
            .parse()
            .map_err(|e| {
                ConfigurationError::Invalid(format!("SMTP_FROM_EMAIL is not a valid address: {e}"))
            })?;

        Ok(SmtpSettings {
            host: self.smtp_host.clone().expect("checked above"),
            port: self.smtp_port,
            user: self.smtp_user.clone().expect("checked above"),
            password: self.smtp_password.clone().expect("checked above"),
            from_email,
            use_tls: self.smtp_use_tls,
        })
    }

    /// Sender mailbox for outgoing mail; the test environment falls
    /// back to a placeholder.
    pub fn sender(&self) -> Mailbox {
        self.smtp_from_email
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| "noreply@example.com".parse().expect("static address"))
    }

    pub fn script_deadline(&self) -> Duration {
        Duration::from_secs(self.script_timeout)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.api_fetch_timeout)
    }

    /// Worker pool size: configured, or the host's parallelism.
    pub fn run_pool_size(&self) -> usize {
        self.max_concurrent_runs.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
        })
    }
}

#[cfg(test)]
pub fn test_config(storage_path: PathBuf, upload_dir: PathBuf) -> Config {
    Config {
        smtp_host: None,
        smtp_port: 587,
        smtp_user: None,
        smtp_password: None,
        smtp_from_email: None,
        smtp_use_tls: true,
        job_storage_path: storage_path,
        upload_dir,
        log_level: "info".to_string(),
        log_file: None,
        script_timeout: 10,
        api_fetch_timeout: 5,
        server_port: 0,
        max_concurrent_runs: Some(2),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_smtp_vars_listed() {
        let config = test_config(PathBuf::from("jobs.json"), PathBuf::from("uploads"));
        let err = config.smtp().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("SMTP_HOST"));
        assert!(message.contains("SMTP_FROM_EMAIL"));
    }

    #[test]
    fn test_validate_skips_smtp_in_test_environment() {
        let config = test_config(PathBuf::from("jobs.json"), PathBuf::from("uploads"));
        assert!(config.validate(Environment::Test).is_ok());
        assert!(config.validate(Environment::Production).is_err());
    }

    #[test]
    fn test_smtp_settings_complete() {
        let mut config = test_config(PathBuf::from("jobs.json"), PathBuf::from("uploads"));
        config.smtp_host = Some("mail.example.com".to_string());
        config.smtp_user = Some("mailer".to_string());
        config.smtp_password = Some("secret".to_string());
        config.smtp_from_email = Some("jobs@example.com".to_string());

        let smtp = config.smtp().unwrap();
        assert_eq!(smtp.host, "mail.example.com");
        assert_eq!(smtp.port, 587);
        assert!(smtp.use_tls);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = test_config(PathBuf::from("jobs.json"), PathBuf::from("uploads"));
        config.script_timeout = 0;
        assert!(config.validate(Environment::Test).is_err());
    }

    #[test]
    fn test_environment_parsing() {
        use std::str::FromStr;
        assert_eq!(Environment::from_str("test").unwrap(), Environment::Test);
        assert_eq!(
            Environment::from_str("production").unwrap(),
            Environment::Production
        );
        assert!(Environment::from_str("staging").is_err());
    }
}
