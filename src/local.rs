use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info};

use crate::clock::{format_canonical, to_calendar_time};
use crate::codec::{json_field, json_integer, json_text};
use crate::protocol::{
    pair_message, parse_announcement, retrieve_message, update_setpoint_message, ANNOUNCEMENT_LEN,
    ANNOUNCEMENT_TAG, DEVICE_PORT, DISCOVERY_PORT, INFO_DIAGNOSTICS, INFO_DUMP, INFO_STATUS,
    PATH_PAIR, PATH_RETRIEVE, PATH_UPDATE,
};
use crate::transport::{non_empty, RetryPolicy, SleepFn, Transport, TransportOptions};
use crate::types::{
    AuthorizationStatus, DeviceDescriptor, DiagnosticsSnapshot, FieldKind, FieldValue,
    LocalPeerIdentity, TemperatureBounds,
};
use crate::{Error, Result};

pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_DISCOVERY_ATTEMPTS: u32 = 3;

type PromptCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Snapshot key, reply field, and type for everything the thermostat reports
/// besides its id and report time.
const LOCAL_FIELDS: &[(&str, &str, FieldKind)] = &[
    ("burningHours", "burning_hours", FieldKind::Decimal),
    ("roomTemperature", "room_temp", FieldKind::Decimal),
    ("outsideTemperature", "outside_temp", FieldKind::Decimal),
    ("dhwSetpoint", "dhw_temp_setp", FieldKind::Decimal),
    ("dhwWaterTemperature", "dhw_water_temp", FieldKind::Decimal),
    ("chSetpoint", "ch_setpoint", FieldKind::Decimal),
    ("chWaterTemperature", "ch_water_temp", FieldKind::Decimal),
    ("chWaterPressure", "ch_water_pres", FieldKind::Decimal),
    ("chReturnTemperature", "ch_return_temp", FieldKind::Decimal),
    ("targetTemperature", "shown_set_temp", FieldKind::Decimal),
    ("deviceStatus", "device_status", FieldKind::Integer),
    ("connectionStatus", "connection_status", FieldKind::Integer),
    ("deviceErrors", "device_errors", FieldKind::Text),
    ("boilerErrors", "boiler_errors", FieldKind::Text),
    ("dbgOutsideTemp", "dbg_outside_temp", FieldKind::Decimal),
    ("pcbTemp", "pcb_temp", FieldKind::Decimal),
    ("dhwWaterPres", "dhw_water_pres", FieldKind::Decimal),
    ("boilerStatus", "boiler_status", FieldKind::Integer),
    ("boilerConfig", "boiler_config", FieldKind::Integer),
    ("chTimeToTemp", "ch_time_to_temp", FieldKind::Integer),
    ("powerCons", "power_cons", FieldKind::Integer),
    ("rssi", "rssi", FieldKind::Integer),
    ("current", "current", FieldKind::Integer),
    ("voltage", "voltage", FieldKind::Integer),
    ("resets", "resets", FieldKind::Integer),
    ("memoryAllocation", "memory_allocation", FieldKind::Integer),
    ("chStatus", "ch_status", FieldKind::Integer),
    ("chControlMode", "ch_control_mode", FieldKind::Integer),
    ("chMode", "ch_mode", FieldKind::Integer),
    ("chModeDuration", "ch_mode_duration", FieldKind::Decimal),
    ("chModeTemp", "ch_mode_temp", FieldKind::Decimal),
    ("dhwStatus", "dhw_status", FieldKind::Integer),
    ("dhwMode", "dhw_mode", FieldKind::Integer),
    ("dhwModeTemp", "dhw_mode_temp", FieldKind::Decimal),
    ("weatherTemp", "weather_temp", FieldKind::Decimal),
    ("weatherStatus", "weather_status", FieldKind::Integer),
    ("vacationDuration", "vacation_duration", FieldKind::Integer),
    ("extendDuration", "extend_duration", FieldKind::Integer),
    ("fireplaceDuration", "fireplace_duration", FieldKind::Integer),
];

/// How long to wait for someone to approve this client on the thermostat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingPolicy {
    pub max_polls: u32,
    pub interval: Duration,
}

impl Default for PairingPolicy {
    fn default() -> Self {
        Self {
            max_polls: 15,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalState {
    Unresolved,
    Discovered(DeviceDescriptor),
    Authorizing(DeviceDescriptor),
    Ready(DeviceDescriptor),
}

pub struct LocalConnectorBuilder {
    host: Option<String>,
    device_port: u16,
    discovery_bind: SocketAddr,
    discovery_timeout: Duration,
    discovery_attempts: u32,
    skip_authorization: bool,
    pairing: PairingPolicy,
    bounds: TemperatureBounds,
    peer: Option<LocalPeerIdentity>,
    mac_address: Option<String>,
    prompt_callbacks: Vec<PromptCallback>,
    transport: TransportOptions,
}

impl LocalConnectorBuilder {
    pub fn new() -> Self {
        Self {
            host: None,
            device_port: DEVICE_PORT,
            discovery_bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DISCOVERY_PORT),
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            discovery_attempts: DEFAULT_DISCOVERY_ATTEMPTS,
            skip_authorization: false,
            pairing: PairingPolicy::default(),
            bounds: TemperatureBounds::LOCAL,
            peer: None,
            mac_address: None,
            prompt_callbacks: Vec::new(),
            transport: TransportOptions::default(),
        }
    }

    /// Skip discovery and talk to this address or host name directly.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn device_port(mut self, port: u16) -> Self {
        self.device_port = port;
        self
    }

    pub fn discovery_bind(mut self, addr: SocketAddr) -> Self {
        self.discovery_bind = addr;
        self
    }

    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    pub fn discovery_attempts(mut self, attempts: u32) -> Self {
        self.discovery_attempts = attempts;
        self
    }

    pub fn skip_authorization(mut self, skip: bool) -> Self {
        self.skip_authorization = skip;
        self
    }

    pub fn pairing(mut self, policy: PairingPolicy) -> Self {
        self.pairing = policy;
        self
    }

    pub fn bounds(mut self, bounds: TemperatureBounds) -> Self {
        self.bounds = bounds;
        self
    }

    /// Present this identity instead of the one detected from the host.
    pub fn peer_identity(mut self, peer: LocalPeerIdentity) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn mac_address(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    /// Called with the instructions to show while the thermostat waits for approval.
    pub fn on_prompt(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.prompt_callbacks.push(Box::new(f));
        self
    }

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

    pub fn build(self) -> Result<LocalConnector> {
        let mut peer = match self.peer {
            Some(peer) => peer,
            None => detect_peer_identity(self.mac_address.as_deref())?,
        };
        if let Some(mac) = self.mac_address.as_deref() {
            peer.hardware_address = normalize_mac(mac);
        }
        debug!(host = %peer.host_name, ip = %peer.local_ip, mac = %peer.hardware_address, "local peer identity");

        Ok(LocalConnector {
            transport: Transport::new(self.transport)?,
            peer,
            host: self.host,
            device_port: self.device_port,
            discovery_bind: self.discovery_bind,
            discovery_timeout: self.discovery_timeout,
            discovery_attempts: self.discovery_attempts,
            skip_authorization: self.skip_authorization,
            pairing: self.pairing,
            bounds: self.bounds,
            prompt_callbacks: self.prompt_callbacks,
            state: LocalState::Unresolved,
        })
    }
}

impl Default for LocalConnectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Talks to a thermostat on the local network over its JSON protocol on port 10000.
pub struct LocalConnector {
    transport: Transport,
    peer: LocalPeerIdentity,
    host: Option<String>,
    device_port: u16,
    discovery_bind: SocketAddr,
    discovery_timeout: Duration,
    discovery_attempts: u32,
    skip_authorization: bool,
    pairing: PairingPolicy,
    bounds: TemperatureBounds,
    prompt_callbacks: Vec<PromptCallback>,
    state: LocalState,
}

impl LocalConnector {
    pub fn builder() -> LocalConnectorBuilder {
        LocalConnectorBuilder::new()
    }

    pub fn state(&self) -> &LocalState {
        &self.state
    }

    pub fn peer(&self) -> &LocalPeerIdentity {
        &self.peer
    }

    /// Locate the thermostat, pair with it, and return its device id.
    pub async fn login(&mut self) -> Result<String> {
        let mut device = self.locate().await?;
        self.state = LocalState::Discovered(device.clone());

        if self.skip_authorization {
            debug!("skipping authorization request");
        } else {
            self.state = LocalState::Authorizing(device.clone());
            self.pair(&device).await?;
        }

        let device_id = match device.device_id.clone() {
            Some(id) => id,
            None => {
                let body = self.retrieve(&device, INFO_STATUS).await?;
                json_text(&body, "device_id")
                    .filter(|id| !id.is_empty())
                    .ok_or_else(|| Error::Protocol("Reply does not name the device id".into()))?
            }
        };
        device.device_id = Some(device_id.clone());
        debug!(address = %device.address, device_id = %device_id, "thermostat ready");
        self.state = LocalState::Ready(device);
        Ok(device_id)
    }

    pub async fn get_diagnostics(&mut self) -> Result<DiagnosticsSnapshot> {
        let device = self.ready_device()?.clone();
        let device_id = device
            .device_id
            .as_deref()
            .ok_or_else(|| Error::IllegalState("No device id known, call login first".into()))?;
        let body = self.retrieve(&device, INFO_DIAGNOSTICS).await?;
        Ok(local_snapshot(device_id, &body))
    }

    /// Send a new setpoint and return the room temperature read back afterwards.
    pub async fn set_temperature(&mut self, target: f64) -> Result<f64> {
        let setpoint = self.bounds.setpoint(target)?;
        let device = self.ready_device()?.clone();
        let device_id = device
            .device_id
            .as_deref()
            .ok_or_else(|| Error::IllegalState("No device selected, cannot set temperature".into()))?;
        debug!(requested = target, setpoint, "setting target temperature");

        let url = self.url(&device, PATH_UPDATE);
        let message = update_setpoint_message(&self.peer, device_id, setpoint);
        let body = self.post("update", &url, &message).await?;
        check_authorization(&body)?;

        let snapshot = self.get_diagnostics().await?;
        snapshot
            .decimal("roomTemperature")
            .ok_or_else(|| Error::IllegalState("Room temperature missing from report".into()))
    }

    /// Raw reply to a retrieve of every information category except the Wi-Fi scan.
    pub async fn dump(&mut self) -> Result<String> {
        let device = self.ready_device()?.clone();
        self.retrieve(&device, INFO_DUMP).await
    }

    fn ready_device(&self) -> Result<&DeviceDescriptor> {
        match &self.state {
            LocalState::Ready(device) => Ok(device),
            _ => Err(Error::IllegalState(
                "No device selected to connect to, call login first".into(),
            )),
        }
    }

    async fn locate(&self) -> Result<DeviceDescriptor> {
        if let Some(host) = &self.host {
            let address = resolve_host(host, self.device_port).await?;
            debug!(%host, %address, "using configured thermostat address");
            return Ok(DeviceDescriptor {
                address,
                device_id: None,
            });
        }

        let found = self
            .transport
            .udp_broadcast_listen(
                self.discovery_bind,
                self.discovery_timeout,
                ANNOUNCEMENT_TAG,
                ANNOUNCEMENT_LEN,
                self.discovery_attempts,
            )
            .await?;
        let Some(announcement) = found else {
            return Err(Error::SearchError(
                "Cannot find ATAG One thermostat in local network".into(),
            ));
        };
        let device_id = parse_announcement(&announcement.message).ok_or_else(|| {
            Error::Protocol(format!("Malformed announcement: {:?}", announcement.message))
        })?;
        debug!(sender = %announcement.sender, %device_id, "thermostat announced itself");
        Ok(DeviceDescriptor {
            address: announcement.sender.ip(),
            device_id: Some(device_id),
        })
    }

    async fn pair(&self, device: &DeviceDescriptor) -> Result<()> {
        let url = self.url(device, PATH_PAIR);
        let message = pair_message(&self.peer);

        for poll in 1..=self.pairing.max_polls {
            let body = self.post("pair", &url, &message).await?;
            let code = json_integer(&body, "acc_status")
                .ok_or_else(|| Error::Protocol("Pair reply without acc_status".into()))?;
            match AuthorizationStatus::from_code(code)? {
                AuthorizationStatus::Accepted => {
                    debug!(poll, "pairing accepted");
                    return Ok(());
                }
                AuthorizationStatus::Denied => {
                    return Err(Error::AccessDenied(
                        "Access to the ATAG One thermostat is denied".into(),
                    ));
                }
                AuthorizationStatus::Pending => {
                    debug!(poll, max_polls = self.pairing.max_polls, "pairing pending");
                    if poll < self.pairing.max_polls {
                        self.prompt();
                        self.transport.pause(self.pairing.interval).await;
                    }
                }
            }
        }

        Err(Error::NotAuthorized(
            "Please grant access on the ATAG One thermostat. This is a one time action per client"
                .into(),
        ))
    }

    async fn retrieve(&self, device: &DeviceDescriptor, info: u32) -> Result<String> {
        let url = self.url(device, PATH_RETRIEVE);
        let message = retrieve_message(&self.peer, info);
        let body = self.post("retrieve", &url, &message).await?;
        check_authorization(&body)?;
        Ok(body)
    }

    /// POST through the retry policy. The thermostat sometimes answers with
    /// an empty body, which counts as a failed attempt.
    async fn post(&self, what: &str, url: &str, message: &Value) -> Result<String> {
        let transport = &self.transport;
        transport
            .retry(what, move || async move {
                non_empty(transport.post_json(url, message).await?)
            })
            .await
    }

    fn url(&self, device: &DeviceDescriptor, path: &str) -> String {
        format!(
            "http://{}{}",
            SocketAddr::new(device.address, self.device_port),
            path
        )
    }

    fn prompt(&self) {
        let message = format!(
            "Access not yet granted. Please press the Ok button on the thermostat to grant access to '{}'. \
             This proves physical access and is only needed once per client.",
            self.peer.device_name()
        );
        if self.prompt_callbacks.is_empty() {
            info!("{message}");
        }
        for cb in &self.prompt_callbacks {
            cb(&message);
        }
    }
}

/// Every reply carries the current authorization, which can be revoked at any time.
fn check_authorization(body: &str) -> Result<()> {
    let Some(code) = json_integer(body, "acc_status") else {
        return Ok(());
    };
    match AuthorizationStatus::from_code(code)? {
        AuthorizationStatus::Accepted => Ok(()),
        AuthorizationStatus::Pending => Err(Error::NotAuthorized(
            "Thermostat has not authorized this client".into(),
        )),
        AuthorizationStatus::Denied => Err(Error::AccessDenied(
            "Access to the ATAG One thermostat is denied".into(),
        )),
    }
}

fn local_snapshot(device_id: &str, body: &str) -> DiagnosticsSnapshot {
    let mut snapshot = DiagnosticsSnapshot::new();
    snapshot.insert("deviceId", Some(FieldValue::Text(device_id.to_string())));

    let report_time = json_integer(body, "report_time")
        .and_then(to_calendar_time)
        .map(|t| FieldValue::Text(format_canonical(&t)));
    snapshot.insert("latestReportTime", report_time);

    for (key, field, kind) in LOCAL_FIELDS {
        snapshot.insert(*key, json_field(body, field, *kind));
    }
    snapshot
}

async fn resolve_host(host: &str, port: u16) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::SearchError(format!("Cannot resolve thermostat host '{host}'")))
}

/// Host name, outward-facing address, and hardware address of this machine.
pub fn detect_peer_identity(mac_override: Option<&str>) -> Result<LocalPeerIdentity> {
    let host_name = gethostname::gethostname().to_string_lossy().into_owned();
    let local_ip = outbound_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let hardware_address = match mac_override {
        Some(mac) => normalize_mac(mac),
        None => {
            let mac = mac_address::get_mac_address()
                .map_err(|e| Error::IllegalState(format!("Cannot read hardware address: {e}")))?
                .ok_or_else(|| {
                    Error::IllegalState("No hardware address found, configure one explicitly".into())
                })?;
            mac.bytes()
                .iter()
                .map(|b| format!("{b:02X}"))
                .collect::<Vec<_>>()
                .join("-")
        }
    };

    Ok(LocalPeerIdentity {
        host_name,
        local_ip,
        hardware_address,
    })
}

/// Address of the interface that routes outward. Connecting a UDP socket sends nothing.
fn outbound_ip() -> Option<IpAddr> {
    let socket = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

fn normalize_mac(mac: &str) -> String {
    mac.trim().replace(':', "-").to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = r#"{ "retrieve_reply":{ "seqnr":0,
        "status":{"device_id":"6808-1401-3109_15-30-001-544","device_status":16385,"connection_status":23,"date_time":503187998},
        "report":{"report_time":503187998,"burning_hours":257.09,"device_errors":"","boiler_errors":"",
            "room_temp":20.6,"outside_temp":5.1,"dbg_outside_temp":22.3,"pcb_temp":25.0,"ch_setpoint":28.1,
            "dhw_water_temp":33.6,"ch_water_temp":32.8,"dhw_water_pres":0.0,"ch_water_pres":1.5,
            "ch_return_temp":33.2,"boiler_status":770,"boiler_config":772,"ch_time_to_temp":0,
            "shown_set_temp":20.5,"power_cons":0,"rssi":26,"current":-155,"voltage":3846,"resets":11,
            "memory_allocation":2800},
        "control":{"ch_status":13,"ch_control_mode":0,"ch_mode":1,"ch_mode_duration":0,"ch_mode_temp":20.5,
            "dhw_temp_setp":60.0,"dhw_status":5,"dhw_mode":1,"dhw_mode_temp":60.0,"weather_temp":5.1,
            "weather_status":9,"vacation_duration":0,"extend_duration":0,"fireplace_duration":10800},
        "acc_status":2} }"#;

    #[test]
    fn snapshot_maps_reply_fields() {
        let snap = local_snapshot("6808-1401-3109_15-30-001-544", REPLY);
        assert_eq!(snap.text("deviceId"), Some("6808-1401-3109_15-30-001-544"));
        assert_eq!(snap.decimal("roomTemperature"), Some(20.6));
        assert_eq!(snap.decimal("dhwSetpoint"), Some(60.0));
        assert_eq!(snap.decimal("targetTemperature"), Some(20.5));
        assert_eq!(snap.decimal("chWaterPressure"), Some(1.5));
        assert_eq!(snap.get("current"), Some(&FieldValue::Integer(-155)));
        assert_eq!(snap.get("fireplaceDuration"), Some(&FieldValue::Integer(10800)));
        assert_eq!(snap.text("deviceErrors"), Some(""));
        assert_eq!(snap.len(), LOCAL_FIELDS.len() + 2);
    }

    #[test]
    fn snapshot_keeps_key_order() {
        let snap = local_snapshot("id", REPLY);
        let keys: Vec<&str> = snap.iter().map(|(k, _)| k).take(4).collect();
        assert_eq!(keys, ["deviceId", "latestReportTime", "burningHours", "roomTemperature"]);
    }

    #[test]
    fn report_time_uses_device_epoch() {
        let snap = local_snapshot("id", REPLY);
        let expected = format_canonical(&to_calendar_time(503_187_998).unwrap());
        assert_eq!(snap.text("latestReportTime"), Some(expected.as_str()));
    }

    #[test]
    fn missing_fields_are_absent_not_errors() {
        let snap = local_snapshot("id", r#"{"retrieve_reply":{"report":{"room_temp":"n/a"}}}"#);
        assert!(snap.contains("roomTemperature"));
        assert_eq!(snap.get("roomTemperature"), None);
        assert_eq!(snap.get("latestReportTime"), None);
    }

    #[test]
    fn authorization_recheck() {
        assert!(check_authorization(REPLY).is_ok());
        assert!(check_authorization(r#"{"update_reply":{}}"#).is_ok());
        assert!(matches!(
            check_authorization(r#"{"retrieve_reply":{"acc_status":1}}"#),
            Err(Error::NotAuthorized(_))
        ));
        assert!(matches!(
            check_authorization(r#"{"retrieve_reply":{"acc_status":3}}"#),
            Err(Error::AccessDenied(_))
        ));
        assert!(matches!(
            check_authorization(r#"{"retrieve_reply":{"acc_status":7}}"#),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn mac_override_is_normalized() {
        assert_eq!(normalize_mac(" 6c:40:08:b6:e2:80 "), "6C-40-08-B6-E2-80");
        let peer = detect_peer_identity(Some("6c:40:08:b6:e2:80")).unwrap();
        assert_eq!(peer.hardware_address, "6C-40-08-B6-E2-80");
        assert!(!peer.host_name.is_empty());
    }

    #[tokio::test]
    async fn operations_need_login() {
        let mut connector = LocalConnector::builder()
            .mac_address("6C-40-08-B6-E2-80")
            .build()
            .unwrap();
        assert_eq!(connector.state(), &LocalState::Unresolved);
        assert!(matches!(
            connector.get_diagnostics().await,
            Err(Error::IllegalState(_))
        ));
        assert!(matches!(connector.dump().await, Err(Error::IllegalState(_))));
    }

    #[tokio::test]
    async fn out_of_bounds_setpoint_fails_first() {
        let mut connector = LocalConnector::builder()
            .mac_address("6C-40-08-B6-E2-80")
            .build()
            .unwrap();
        assert!(matches!(
            connector.set_temperature(27.5).await,
            Err(Error::IllegalArgument(_))
        ));
        assert!(matches!(
            connector.set_temperature(3.9).await,
            Err(Error::IllegalArgument(_))
        ));
    }

    #[tokio::test]
    async fn resolves_literal_addresses() {
        assert_eq!(
            resolve_host("192.168.1.20", 10000).await.unwrap(),
            "192.168.1.20".parse::<IpAddr>().unwrap()
        );
    }
}
