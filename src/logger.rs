use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

/// Appends every exchange with the thermostat or portal to an NDJSON file.
pub(crate) struct MessageLogger {
    file: File,
}

impl MessageLogger {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }

    pub fn log_request(&mut self, method: &str, url: &str, body: Option<&str>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "url": url,
            "body": body.map(body_value),
        });
        self.write_line(&entry);
    }

    pub fn log_response(&mut self, url: &str, status: u16, body: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "resp",
            "url": url,
            "status": status,
            "body": body_value(body),
        });
        self.write_line(&entry);
    }

    pub fn log_datagram(&mut self, sender: &str, message: &str) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "udp",
            "from": sender,
            "body": message,
        });
        self.write_line(&entry);
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

/// JSON bodies are embedded as JSON, anything else as a string.
fn body_value(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn read_lines(path: &Path) -> Vec<Value> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn log_request_writes_ndjson() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(tmp.path()).unwrap();
        logger.log_request("POST", "http://10.0.0.5:10000/retrieve", Some(r#"{"retrieve_message":{}}"#));

        let lines = read_lines(tmp.path());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["dir"], "req");
        assert_eq!(lines[0]["method"], "POST");
        assert!(lines[0]["body"]["retrieve_message"].is_object());
        assert!(lines[0]["ts"].as_str().is_some());
    }

    #[test]
    fn html_response_is_kept_as_text() {
        let tmp = NamedTempFile::new().unwrap();
        let mut logger = MessageLogger::new(tmp.path()).unwrap();
        logger.log_response("https://portal/Account/Login", 200, "<html></html>");

        let lines = read_lines(tmp.path());
        assert_eq!(lines[0]["dir"], "resp");
        assert_eq!(lines[0]["status"], 200);
        assert_eq!(lines[0]["body"], "<html></html>");
    }

    #[test]
    fn appends_across_loggers() {
        let tmp = NamedTempFile::new().unwrap();
        MessageLogger::new(tmp.path()).unwrap().log_request("GET", "/a", None);
        MessageLogger::new(tmp.path())
            .unwrap()
            .log_datagram("10.0.0.5:11000", "ONE 6808-1401-3109_15-30-001-544");

        let lines = read_lines(tmp.path());
        assert_eq!(lines.len(), 2);
        assert!(lines[0]["body"].is_null());
        assert_eq!(lines[1]["dir"], "udp");
    }
}
