use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atag_one::{app, Configuration, Error, ErrorKind, OutputFormat};

/// Read diagnostics from, or set the temperature of, an ATAG One thermostat.
#[derive(Debug, Parser)]
#[command(name = "atag-one", version)]
struct Cli {
    /// Portal email address; leave out to use the local network
    #[arg(short, long)]
    email: Option<String>,

    /// Portal password
    #[arg(short, long)]
    password: Option<String>,

    /// Thermostat address, skips discovery
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Hardware address presented to the thermostat when pairing
    #[arg(short, long)]
    mac: Option<String>,

    /// Set the target temperature in degrees Celsius
    #[arg(short, long, allow_negative_numbers = true)]
    set: Option<f64>,

    /// Do not ask the thermostat for authorization first
    #[arg(long)]
    skip_auth_request: bool,

    /// Print the raw thermostat response
    #[arg(long)]
    dump: bool,

    /// Output format: json or csv
    #[arg(short, long, default_value = "json")]
    output: OutputFormat,

    /// Append every request and response to this NDJSON file
    #[arg(long)]
    message_log: Option<PathBuf>,

    /// Print debugging information
    #[arg(short, long)]
    debug: bool,
}

impl From<Cli> for Configuration {
    fn from(cli: Cli) -> Self {
        Configuration {
            email: cli.email,
            password: cli.password,
            host: cli.host,
            mac_address: cli.mac,
            temperature: cli.set,
            skip_authorization: cli.skip_auth_request,
            dump: cli.dump,
            format: cli.output,
            message_log: cli.message_log,
            debug: cli.debug,
        }
    }
}

fn main() -> ExitCode {
    let config = Configuration::from(Cli::parse());

    let default_filter = if config.debug {
        "atag_one=debug"
    } else {
        "atag_one=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return fail(&Error::Io(e)),
    };

    let result = runtime.block_on(app::run(&config));
    match result.and_then(|outcome| outcome.render(config.format)) {
        Ok(text) => {
            println!("{text}");
            ExitCode::SUCCESS
        }
        Err(e) => fail(&e),
    }
}

fn fail(e: &Error) -> ExitCode {
    match e.kind() {
        ErrorKind::Connection => eprintln!("Connection Error: {e}"),
        ErrorKind::State => eprintln!("State Error: {e}"),
        ErrorKind::Argument => eprintln!("Illegal Argument: {e}"),
        ErrorKind::Other => eprintln!("{e}"),
    }
    ExitCode::FAILURE
}
