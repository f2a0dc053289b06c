use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::codec::{
    extract_device_id, extract_verification_token, json_decimal, json_field, labeled_html_field,
};
use crate::transport::{RetryPolicy, SleepFn, Transport, TransportOptions};
use crate::types::{DiagnosticsSnapshot, FieldKind, FieldValue, TemperatureBounds};
use crate::{Error, Result};

pub const DEFAULT_PORTAL_URL: &str = "https://portal.atag-one.com";

const TOKEN_FIELD: &str = "__RequestVerificationToken";

/// Snapshot key, value type, and the label it sits under on Dutch and English pages.
const PORTAL_FIELDS: &[(&str, FieldKind, &[&str])] = &[
    ("deviceAlias", FieldKind::Text, &["Apparaat alias", "Device alias"]),
    ("latestReportTime", FieldKind::Text, &["Laatste rapportagetijd", "Latest report time"]),
    ("connectedTo", FieldKind::Text, &["Verbonden met", "Connected to"]),
    ("burningHours", FieldKind::Decimal, &["Branduren", "Burning hours"]),
    ("boilerHeatingFor", FieldKind::Text, &["Ketel in bedrijf voor", "Boiler heating for"]),
    ("flameStatus", FieldKind::Flag, &["Brander status", "Flame status"]),
    ("roomTemperature", FieldKind::Decimal, &["Kamertemperatuur", "Room temperature"]),
    ("outsideTemperature", FieldKind::Decimal, &["Buitentemperatuur", "Outside temperature"]),
    ("dhwSetpoint", FieldKind::Decimal, &["Setpoint warmwater", "DHW setpoint"]),
    ("dhwWaterTemperature", FieldKind::Decimal, &["Warmwatertemperatuur", "DHW water temperature"]),
    ("chSetpoint", FieldKind::Decimal, &["Setpoint cv", "CH setpoint"]),
    ("chWaterTemperature", FieldKind::Decimal, &["CV-aanvoertemperatuur", "CH water temperature"]),
    ("chWaterPressure", FieldKind::Decimal, &["CV-waterdruk", "CH water pressure"]),
    ("chReturnTemperature", FieldKind::Decimal, &["CV retourtemperatuur", "CH return temperature"]),
];

/// Live values only the device-control endpoint knows.
const CONTROL_FIELDS: &[(&str, &str, FieldKind)] = &[
    ("targetTemperature", "targetTemp", FieldKind::Decimal),
    ("currentMode", "currentMode", FieldKind::Text),
    ("vacationPlanned", "vacationPlanned", FieldKind::Flag),
];

pub struct RemoteConnectorBuilder {
    email: String,
    password: String,
    base_url: String,
    bounds: TemperatureBounds,
    transport: TransportOptions,
}

impl RemoteConnectorBuilder {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            base_url: DEFAULT_PORTAL_URL.to_string(),
            bounds: TemperatureBounds::PORTAL,
            transport: TransportOptions::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn bounds(mut self, bounds: TemperatureBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Applies to page fetches only; form posts are never repeated.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.transport.retry = policy;
        self
    }

    pub fn sleeper(mut self, sleep: SleepFn) -> Self {
        self.transport.sleep = sleep;
        self
    }

    pub fn timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.transport.connect_timeout = connect;
        self.transport.read_timeout = read;
        self
    }

    pub fn message_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.transport.message_log = Some(path.into());
        self
    }

    pub fn build(self) -> Result<RemoteConnector> {
        Ok(RemoteConnector {
            transport: Transport::new(self.transport)?,
            base_url: self.base_url,
            email: self.email,
            password: self.password,
            bounds: self.bounds,
            device_id: None,
        })
    }
}

/// Scrapes the vendor portal. The session lives in this connector's own cookie jar.
pub struct RemoteConnector {
    transport: Transport,
    base_url: String,
    email: String,
    password: String,
    bounds: TemperatureBounds,
    device_id: Option<String>,
}

impl RemoteConnector {
    pub fn builder(email: impl Into<String>, password: impl Into<String>) -> RemoteConnectorBuilder {
        RemoteConnectorBuilder::new(email, password)
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    pub async fn login(&mut self) -> Result<String> {
        let login_url = format!("{}/Account/Login", self.base_url);
        let token = self.verification_token(&login_url).await?;

        debug!(url = %login_url, "posting credentials");
        let html = self
            .transport
            .post_form(
                &login_url,
                &[
                    (TOKEN_FIELD, token.as_str()),
                    ("Email", self.email.as_str()),
                    ("Password", self.password.as_str()),
                    ("RememberMe", "false"),
                ],
            )
            .await?;

        let device_id = extract_device_id(&html).ok_or_else(|| {
            Error::IllegalState("No device id found on the portal after login".into())
        })?;
        debug!(%device_id, "portal login complete");
        self.device_id = Some(device_id.clone());
        Ok(device_id)
    }

    pub async fn get_diagnostics(&mut self) -> Result<DiagnosticsSnapshot> {
        let device_id = self.selected()?.to_string();
        let html = self.fetch(&self.report_url(&device_id)).await?;

        let mut snapshot = DiagnosticsSnapshot::new();
        snapshot.insert("deviceId", Some(FieldValue::Text(device_id.clone())));
        for (key, kind, labels) in PORTAL_FIELDS {
            snapshot.insert(*key, labeled_html_field(&html, *kind, labels)?);
        }

        let control_url = format!(
            "{}/Home/UpdateDeviceControl/?deviceId={}",
            self.base_url,
            urlencoding::encode(&device_id)
        );
        let control = self.fetch(&control_url).await?;
        for (key, field, kind) in CONTROL_FIELDS {
            snapshot.insert(*key, json_field(&control, field, *kind));
        }
        Ok(snapshot)
    }

    /// Post a new setpoint and return the room temperature the portal answers with.
    pub async fn set_temperature(&mut self, target: f64) -> Result<f64> {
        let setpoint = self.bounds.setpoint(target)?;
        let device_id = self.selected()?.to_string();

        // Tokens are scoped to the page that issued them.
        let home_url = format!("{}/Home/Index/{}", self.base_url, device_id);
        let token = self.verification_token(&home_url).await?;

        let url = format!(
            "{}/Home/DeviceSetSetpoint/{}?temperature={:.1}",
            self.base_url, device_id, setpoint
        );
        debug!(%url, setpoint, "posting setpoint");
        let body = self
            .transport
            .post_form(&url, &[(TOKEN_FIELD, token.as_str())])
            .await?;

        json_decimal(&body, "room_temp").ok_or_else(|| {
            Error::IllegalState("Portal did not report the room temperature".into())
        })
    }

    /// Raw diagnostics page.
    pub async fn dump(&mut self) -> Result<String> {
        let device_id = self.selected()?.to_string();
        self.fetch(&self.report_url(&device_id)).await
    }

    fn selected(&self) -> Result<&str> {
        self.device_id
            .as_deref()
            .ok_or_else(|| Error::IllegalState("No device selected, call login first".into()))
    }

    fn report_url(&self, device_id: &str) -> String {
        format!(
            "{}/Device/LatestReport?deviceId={}",
            self.base_url,
            urlencoding::encode(device_id)
        )
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let transport = &self.transport;
        transport.retry("portal page", move || transport.get(url)).await
    }

    async fn verification_token(&self, url: &str) -> Result<String> {
        let html = self.fetch(url).await?;
        extract_verification_token(&html).ok_or_else(|| {
            Error::IllegalState(format!("No request verification token found on {url}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_portal_field_has_both_languages() {
        for (key, _, labels) in PORTAL_FIELDS {
            assert_eq!(labels.len(), 2, "{key}");
        }
    }

    #[test]
    fn base_url_drops_trailing_slash() {
        let connector = RemoteConnector::builder("a@b.nl", "secret")
            .base_url("http://127.0.0.1:8080/")
            .build()
            .unwrap();
        assert_eq!(connector.base_url, "http://127.0.0.1:8080");
        assert_eq!(
            connector.report_url("6808-1401-3109_15-30-001-544"),
            "http://127.0.0.1:8080/Device/LatestReport?deviceId=6808-1401-3109_15-30-001-544"
        );
    }

    #[tokio::test]
    async fn requires_login_before_use() {
        let mut connector = RemoteConnector::builder("a@b.nl", "secret").build().unwrap();
        assert!(matches!(connector.get_diagnostics().await, Err(Error::IllegalState(_))));
        assert!(matches!(connector.dump().await, Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn portal_bounds_allow_thirty_degrees() {
        let mut connector = RemoteConnector::builder("a@b.nl", "secret").build().unwrap();
        // Bounds pass, so the failure is the missing login rather than the value.
        assert!(matches!(connector.set_temperature(30.0).await, Err(Error::IllegalState(_))));
        assert!(matches!(
            connector.set_temperature(30.5).await,
            Err(Error::IllegalArgument(_))
        ));
    }
}
