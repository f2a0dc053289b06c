//! Rendering of results for the command line.

use crate::types::DiagnosticsSnapshot;
use crate::Result;

/// Fields printed by the CSV format, in column order.
pub const CSV_COLUMNS: [&str; 5] = [
    "roomTemperature",
    "outsideTemperature",
    "chWaterPressure",
    "chWaterTemperature",
    "chReturnTemperature",
];

/// Pretty JSON object in snapshot order, absent fields as `null`.
pub fn render_json(snapshot: &DiagnosticsSnapshot) -> Result<String> {
    serde_json::to_string_pretty(snapshot)
        .map_err(|e| crate::Error::Protocol(format!("cannot render diagnostics: {e}")))
}

/// Space separated, one line, `null` for absent values.
pub fn render_csv(snapshot: &DiagnosticsSnapshot) -> String {
    CSV_COLUMNS
        .iter()
        .map(|name| match snapshot.get(name) {
            Some(value) => value.to_string(),
            None => "null".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn render_temperature(room_temperature: f64) -> String {
    format!("{room_temperature:.1}")
}
