use tracing::debug;

use crate::config::Configuration;
use crate::local::LocalConnector;
use crate::remote::RemoteConnector;
use crate::types::DiagnosticsSnapshot;
use crate::{Error, Result};

/// One thermostat session, either on the local network or through the portal.
pub enum Connector {
    Local(LocalConnector),
    Remote(RemoteConnector),
}

impl Connector {
    /// Portal credentials select the remote connector, anything else the local one.
    pub fn from_config(config: &Configuration) -> Result<Self> {
        config.validate()?;

        if config.is_local() {
            debug!("no portal email configured, using the local network");
            let mut builder = LocalConnector::builder().skip_authorization(config.skip_authorization);
            if let Some(host) = config.host() {
                builder = builder.host(host);
            }
            if let Some(mac) = config.mac_address() {
                builder = builder.mac_address(mac);
            }
            if let Some(path) = &config.message_log {
                builder = builder.message_log(path.clone());
            }
            return Ok(Connector::Local(builder.build()?));
        }

        let (Some(email), Some(password)) = (config.email(), config.password()) else {
            return Err(Error::IllegalArgument(
                "Username and password are both required".into(),
            ));
        };
        debug!(%email, "using the portal");
        let mut builder = RemoteConnector::builder(email, password);
        if let Some(path) = &config.message_log {
            builder = builder.message_log(path.clone());
        }
        Ok(Connector::Remote(builder.build()?))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Connector::Local(_))
    }

    pub async fn login(&mut self) -> Result<String> {
        match self {
            Connector::Local(c) => c.login().await,
            Connector::Remote(c) => c.login().await,
        }
    }

    pub async fn get_diagnostics(&mut self) -> Result<DiagnosticsSnapshot> {
        match self {
            Connector::Local(c) => c.get_diagnostics().await,
            Connector::Remote(c) => c.get_diagnostics().await,
        }
    }

    pub async fn set_temperature(&mut self, target: f64) -> Result<f64> {
        match self {
            Connector::Local(c) => c.set_temperature(target).await,
            Connector::Remote(c) => c.set_temperature(target).await,
        }
    }

    pub async fn dump(&mut self) -> Result<String> {
        match self {
            Connector::Local(c) => c.dump().await,
            Connector::Remote(c) => c.dump().await,
        }
    }
}

impl From<LocalConnector> for Connector {
    fn from(c: LocalConnector) -> Self {
        Connector::Local(c)
    }
}

impl From<RemoteConnector> for Connector {
    fn from(c: RemoteConnector) -> Self {
        Connector::Remote(c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_selects_portal() {
        let config = Configuration {
            email: Some("user@example.nl".into()),
            password: Some("secret".into()),
            ..Default::default()
        };
        assert!(!Connector::from_config(&config).unwrap().is_local());
    }

    #[test]
    fn no_email_selects_local() {
        let config = Configuration {
            host: Some("192.168.1.20".into()),
            mac_address: Some("6C-40-08-B6-E2-80".into()),
            ..Default::default()
        };
        assert!(Connector::from_config(&config).unwrap().is_local());
    }

    #[test]
    fn portal_without_password_is_rejected() {
        let config = Configuration {
            email: Some("user@example.nl".into()),
            ..Default::default()
        };
        assert!(matches!(
            Connector::from_config(&config),
            Err(Error::IllegalArgument(_))
        ));
    }
}
