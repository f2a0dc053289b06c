use tracing::debug;

use crate::config::{Configuration, OutputFormat};
use crate::connector::Connector;
use crate::output::{render_csv, render_json, render_temperature};
use crate::types::DiagnosticsSnapshot;
use crate::Result;

/// What a run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Diagnostics(DiagnosticsSnapshot),
    RoomTemperature(f64),
    Dump(String),
}

impl Outcome {
    pub fn render(&self, format: OutputFormat) -> Result<String> {
        match self {
            Outcome::Diagnostics(snapshot) => match format {
                OutputFormat::Json => render_json(snapshot),
                OutputFormat::Csv => Ok(render_csv(snapshot)),
            },
            Outcome::RoomTemperature(t) => Ok(render_temperature(*t)),
            Outcome::Dump(raw) => Ok(raw.clone()),
        }
    }
}

/// Log in, then set the temperature, dump, or read diagnostics.
pub async fn run(config: &Configuration) -> Result<Outcome> {
    let connector = Connector::from_config(config)?;
    execute(connector, config).await
}

/// Same as [`run`] with a connector the caller built.
pub async fn execute(mut connector: Connector, config: &Configuration) -> Result<Outcome> {
    let device_id = connector.login().await?;
    debug!(%device_id, "logged in");

    if let Some(target) = config.temperature {
        return Ok(Outcome::RoomTemperature(
            connector.set_temperature(target).await?,
        ));
    }
    if config.dump {
        return Ok(Outcome::Dump(connector.dump().await?));
    }
    Ok(Outcome::Diagnostics(connector.get_diagnostics().await?))
}
