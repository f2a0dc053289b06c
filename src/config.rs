use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(Error::IllegalArgument(format!(
                "Illegal output format specified '{other}'. Valid formats: json, csv"
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

/// Everything one run needs to know. Built once, never changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Configuration {
    pub email: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub mac_address: Option<String>,
    pub temperature: Option<f64>,
    pub skip_authorization: bool,
    pub dump: bool,
    pub format: OutputFormat,
    pub message_log: Option<PathBuf>,
    pub debug: bool,
}

impl Configuration {
    /// Without a portal email the thermostat is reached on the local network.
    pub fn is_local(&self) -> bool {
        non_blank(&self.email).is_none()
    }

    /// Portal mode needs both credentials.
    pub fn validate(&self) -> Result<()> {
        if !self.is_local() && non_blank(&self.password).is_none() {
            return Err(Error::IllegalArgument(
                "Username and password are both required".into(),
            ));
        }
        if let Some(t) = self.temperature
            && !t.is_finite()
        {
            return Err(Error::IllegalArgument(
                "Temperature has to be a numeric value".into(),
            ));
        }
        Ok(())
    }

    pub fn email(&self) -> Option<&str> {
        non_blank(&self.email)
    }

    pub fn password(&self) -> Option<&str> {
        non_blank(&self.password)
    }

    pub fn host(&self) -> Option<&str> {
        non_blank(&self.host)
    }

    pub fn mac_address(&self) -> Option<&str> {
        non_blank(&self.mac_address)
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
