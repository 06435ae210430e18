use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use arxiv_messaging_notifications::SmtpSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVariable(&'static str),

    #[error("invalid value '{value}' for {variable}: {message}")]
    InvalidValue {
        variable: &'static str,
        value: String,
        message: String,
    },
}

impl ConfigError {
    fn invalid(variable: &'static str, value: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            variable,
            value: value.to_string(),
            message: message.into(),
        }
    }
}

/// Which activities this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceMode {
    /// Bus consumer and digest scheduler together
    #[default]
    Combined,
    IngestOnly,
    SchedulerOnly,
}

impl ServiceMode {
    pub fn runs_ingest(&self) -> bool {
        matches!(self, Self::Combined | Self::IngestOnly)
    }

    pub fn runs_scheduler(&self) -> bool {
        matches!(self, Self::Combined | Self::SchedulerOnly)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::IngestOnly => "ingest-only",
            Self::SchedulerOnly => "scheduler-only",
        }
    }
}

impl fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "combined" => Ok(Self::Combined),
            "ingest-only" => Ok(Self::IngestOnly),
            "scheduler-only" => Ok(Self::SchedulerOnly),
            other => Err(format!(
                "'{other}' is not one of combined, ingest-only, scheduler-only"
            )),
        }
    }
}

/// Process configuration, read once from the environment at startup and
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub project_id: String,
    pub subscription_name: String,
    pub database_id: String,
    /// Port the (externally provided) administrative surface binds to.
    pub api_port: u16,
    pub service_mode: ServiceMode,
    pub smtp: SmtpSettings,
}

fn env_or(variable: &str, default: &str) -> String {
    std::env::var(variable).unwrap_or_else(|_| default.to_string())
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let project_id = std::env::var("GCP_PROJECT_ID")
            .ok()
            .filter(|v| !v.is_empty())
            .ok_or(ConfigError::MissingVariable("GCP_PROJECT_ID"))?;

        let api_port_raw = env_or("PORT", "8080");
        let api_port = api_port_raw
            .parse::<u16>()
            .map_err(|e| ConfigError::invalid("PORT", &api_port_raw, e.to_string()))?;

        let smtp_port_raw = env_or("SMTP_PORT", "465");
        let smtp_port = smtp_port_raw
            .parse::<u16>()
            .map_err(|e| ConfigError::invalid("SMTP_PORT", &smtp_port_raw, e.to_string()))?;

        let mode_raw = env_or("SERVICE_MODE", "combined");
        let service_mode = mode_raw
            .parse::<ServiceMode>()
            .map_err(|e| ConfigError::invalid("SERVICE_MODE", &mode_raw, e))?;

        let defaults = SmtpSettings::default();
        let smtp = SmtpSettings {
            server: env_or("SMTP_SERVER", &defaults.server),
            port: smtp_port,
            user: env_or("SMTP_USER", &defaults.user),
            password: env_or("SMTP_PASSWORD", ""),
            use_ssl: env_or("SMTP_USE_SSL", "true").to_ascii_lowercase() == "true",
            default_sender: env_or("DEFAULT_EMAIL_SENDER", &defaults.default_sender),
        };

        Ok(Self {
            project_id,
            subscription_name: env_or("PUBSUB_SUBSCRIPTION_NAME", "event-subscription"),
            database_id: env_or("FIRESTORE_DATABASE_ID", "messaging"),
            api_port,
            service_mode,
            smtp,
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.api_port == 0 {
            return Err("PORT must be > 0".into());
        }
        if self.smtp.port == 0 {
            return Err("SMTP_PORT must be > 0".into());
        }
        if self.smtp.server.is_empty() {
            return Err("SMTP_SERVER must not be empty".into());
        }
        if self.smtp.default_sender.is_empty() {
            return Err("DEFAULT_EMAIL_SENDER must not be empty".into());
        }
        if self.subscription_name.is_empty() {
            return Err("PUBSUB_SUBSCRIPTION_NAME must not be empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_mode_parsing() {
        assert_eq!(
            "combined".parse::<ServiceMode>().unwrap(),
            ServiceMode::Combined
        );
        assert_eq!(
            "ingest-only".parse::<ServiceMode>().unwrap(),
            ServiceMode::IngestOnly
        );
        assert_eq!(
            "scheduler-only".parse::<ServiceMode>().unwrap(),
            ServiceMode::SchedulerOnly
        );
        assert!("api-only".parse::<ServiceMode>().is_err());
    }

    #[test]
    fn test_service_mode_activities() {
        assert!(ServiceMode::Combined.runs_ingest());
        assert!(ServiceMode::Combined.runs_scheduler());
        assert!(ServiceMode::IngestOnly.runs_ingest());
        assert!(!ServiceMode::IngestOnly.runs_scheduler());
        assert!(!ServiceMode::SchedulerOnly.runs_ingest());
        assert!(ServiceMode::SchedulerOnly.runs_scheduler());
    }

    #[test]
    fn test_validate_rejects_empty_smtp_server() {
        let config = AppConfig {
            project_id: "p".into(),
            subscription_name: "event-subscription".into(),
            database_id: "messaging".into(),
            api_port: 8080,
            service_mode: ServiceMode::Combined,
            smtp: SmtpSettings {
                server: String::new(),
                ..SmtpSettings::default()
            },
        };
        assert!(config.validate().is_err());
    }
}
