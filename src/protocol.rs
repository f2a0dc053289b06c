use serde_json::{json, Value};

use crate::types::LocalPeerIdentity;

pub const DEVICE_PORT: u16 = 10000;
pub const DISCOVERY_PORT: u16 = 11000;
pub const ANNOUNCEMENT_TAG: &str = "ONE ";
pub const ANNOUNCEMENT_LEN: usize = 37;

pub const PATH_PAIR: &str = "/pair_message";
pub const PATH_RETRIEVE: &str = "/retrieve";
pub const PATH_UPDATE: &str = "/update";

// Information categories, one bit each in the `info` field of a retrieve.
pub const INFO_CONTROL: u32 = 1;
pub const INFO_SCHEDULES: u32 = 2;
pub const INFO_CONFIGURATION: u32 = 4;
pub const INFO_REPORT: u32 = 8;
pub const INFO_STATUS: u32 = 16;
pub const INFO_WIFISCAN: u32 = 32;

pub const INFO_DIAGNOSTICS: u32 = INFO_CONTROL | INFO_REPORT | INFO_STATUS;
pub const INFO_DUMP: u32 =
    INFO_CONTROL | INFO_SCHEDULES | INFO_CONFIGURATION | INFO_REPORT | INFO_STATUS;

fn account_auth(peer: &LocalPeerIdentity) -> Value {
    json!({
        "user_account": "",
        "mac_address": peer.hardware_address,
    })
}

pub fn pair_message(peer: &LocalPeerIdentity) -> Value {
    json!({
        "pair_message": {
            "seqnr": 0,
            "accounts": {
                "entries": [{
                    "user_account": "",
                    "mac_address": peer.hardware_address,
                    "device_name": peer.device_name(),
                    "account_type": 0
                }]
            }
        }
    })
}

pub fn retrieve_message(peer: &LocalPeerIdentity, info: u32) -> Value {
    json!({
        "retrieve_message": {
            "seqnr": 0,
            "account_auth": account_auth(peer),
            "info": info
        }
    })
}

pub fn update_setpoint_message(peer: &LocalPeerIdentity, device_id: &str, setpoint: f64) -> Value {
    json!({
        "update_message": {
            "seqnr": 0,
            "account_auth": account_auth(peer),
            "device": device_id,
            "status": null,
            "report": null,
            "configuration": null,
            "schedules": null,
            "control": {
                "ch_mode_temp": setpoint
            }
        }
    })
}

/// Device id from a discovery datagram such as `"ONE 6808-1401-3109_15-30-001-544"`.
pub fn parse_announcement(message: &str) -> Option<String> {
    let message = message.trim_end_matches(['\0', ' ', '\r', '\n']);
    if !message.starts_with(ANNOUNCEMENT_TAG) {
        return None;
    }
    message
        .split(' ')
        .nth(1)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> LocalPeerIdentity {
        LocalPeerIdentity {
            host_name: "study.example.org".to_string(),
            local_ip: "192.168.1.10".parse().unwrap(),
            hardware_address: "6C-40-08-B6-E2-80".to_string(),
        }
    }

    #[test]
    fn pair_message_structure() {
        let msg = pair_message(&peer());
        let entry = &msg["pair_message"]["accounts"]["entries"][0];
        assert_eq!(msg["pair_message"]["seqnr"], 0);
        assert_eq!(entry["mac_address"], "6C-40-08-B6-E2-80");
        assert_eq!(entry["device_name"], "study atag-one API");
        assert_eq!(entry["account_type"], 0);
    }

    #[test]
    fn retrieve_message_carries_info_mask() {
        let msg = retrieve_message(&peer(), INFO_DIAGNOSTICS);
        assert_eq!(msg["retrieve_message"]["info"], 25);
        assert_eq!(msg["retrieve_message"]["account_auth"]["mac_address"], "6C-40-08-B6-E2-80");
    }

    #[test]
    fn info_bits_are_independent() {
        let all = [INFO_CONTROL, INFO_SCHEDULES, INFO_CONFIGURATION, INFO_REPORT, INFO_STATUS, INFO_WIFISCAN];
        assert_eq!(all.iter().copied().fold(0u32, |acc, b| acc | b), 63);
        assert_eq!(INFO_DUMP & INFO_WIFISCAN, 0);
    }

    #[test]
    fn update_message_puts_setpoint_in_control() {
        let msg = update_setpoint_message(&peer(), "6808-1401-3109_15-30-001-544", 19.5);
        assert_eq!(msg["update_message"]["control"]["ch_mode_temp"], 19.5);
        assert_eq!(msg["update_message"]["device"], "6808-1401-3109_15-30-001-544");
    }

    #[test]
    fn announcement_parsing() {
        assert_eq!(
            parse_announcement("ONE 6808-1401-3109_15-30-001-544").as_deref(),
            Some("6808-1401-3109_15-30-001-544")
        );
        assert_eq!(
            parse_announcement("ONE 6808-1401-3109_15-30-001-544\0\0\0\0\0").as_deref(),
            Some("6808-1401-3109_15-30-001-544")
        );
        assert_eq!(parse_announcement("TWO 6808"), None);
        assert_eq!(parse_announcement("ONE "), None);
    }
}
