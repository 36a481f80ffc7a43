// ip100_driver - Weather data collection driver for the Rainwise IP-100
//
// Copyright 2023 Matthew Wall
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use clap::Parser;
use ip100_driver::client::Ip100Client;
use ip100_driver::driver::{Config, Driver, Ip100Driver};
use ip100_driver::parser::{self, RawReading, RawValue};
use reqwest::Client;
use std::error::Error;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal::unix::{self, SignalKind};
use tracing::Level;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_HOST: &str = "192.168.1.12";
const DEFAULT_PORT: u16 = 80;
const DEFAULT_POLL_SECS: u64 = 2;
const DEFAULT_TIMEOUT_MILLIS: u64 = 5000;
const DEFAULT_MAX_TRIES: u32 = 3;
const DEFAULT_RETRY_WAIT_SECS: u64 = 5;

#[derive(Debug, Parser)]
#[clap(name = "ip100_driver", version = clap::crate_version!())]
struct Ip100Application {
    /// Hostname or IP address of the IP-100
    #[clap(long, default_value_t = DEFAULT_HOST.into())]
    host: String,

    /// Port on which the IP-100 is listening
    #[clap(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// How often to poll the station, in seconds
    #[clap(long, default_value_t = DEFAULT_POLL_SECS)]
    poll_interval: u64,

    /// Timeout for fetching the status page, in milliseconds. Clamped to
    /// the poll interval.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// Number of times to try to reach the IP-100 at startup before
    /// giving up
    #[clap(long, default_value_t = DEFAULT_MAX_TRIES)]
    max_tries: u32,

    /// Seconds to wait between startup attempts
    #[clap(long, default_value_t = DEFAULT_RETRY_WAIT_SECS)]
    retry_wait: u64,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info',
    /// 'warn', and 'error' (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Fetch and print a single packet as JSON, then exit
    #[clap(long)]
    current: bool,

    /// Parse a saved status page and print the raw reading, then exit
    #[clap(long, value_name = "FILE")]
    test_parse: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = Ip100Application::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    if let Some(path) = &opts.test_parse {
        let data = fs::read(path)?;
        let reading = parser::parse(&data)?;
        println!("{:#?}", reading);
        return Ok(());
    }

    let config = Config::new(
        &opts.host,
        opts.port,
        opts.poll_interval,
        Duration::from_millis(opts.timeout_millis),
    )
    .unwrap_or_else(|e| {
        tracing::error!(message = "invalid station configuration", error = %e);
        process::exit(1)
    });

    let http_client = Client::builder()
        .timeout(config.timeout())
        .build()
        .unwrap_or_else(|e| {
            tracing::error!(message = "unable to initialize HTTP client", error = %e);
            process::exit(1)
        });
    let client = Ip100Client::new(http_client, config.station_url().clone());

    // Make sure the IP-100 can be reached before polling indefinitely. If
    // the machine was just rebooted, a temporary failure in name resolution
    // is likely, so allow a few attempts.
    let reading = probe_station(&client, opts.max_tries, opts.retry_wait).await;
    tracing::info!(
        message = "station online",
        url = %config.station_url(),
        model = hardware_field(&reading, "model"),
        firmware = hardware_field(&reading, "firmware"),
    );

    let (mut driver, handle) = Ip100Driver::new(client, &config);

    if opts.current {
        if let Some(packet) = driver.next_packet().await {
            println!("{}", serde_json::to_string(&packet)?);
        }
        return Ok(());
    }

    tokio::spawn(async move {
        // Wait for either SIGTERM or SIGINT to shutdown
        tokio::select! {
            _ = sigterm() => {}
            _ = sigint() => {}
        }
        handle.shutdown();
    });

    tracing::info!(
        message = "polling started",
        hardware = driver.hardware_name(),
        poll_interval_secs = config.poll_interval().as_secs(),
    );

    while let Some(packet) = driver.next_packet().await {
        println!("{}", serde_json::to_string(&packet)?);
    }

    tracing::info!("driver shutdown");
    Ok(())
}

async fn probe_station(client: &Ip100Client, max_tries: u32, retry_wait: u64) -> RawReading {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match fetch_reading(client).await {
            Ok(reading) => return reading,
            Err(e) if attempt < max_tries => {
                tracing::info!(
                    message = "station not reachable yet, retrying",
                    attempt = attempt,
                    max_tries = max_tries,
                    error = %e,
                );
                tokio::time::sleep(Duration::from_secs(retry_wait)).await;
            }
            Err(e) => {
                tracing::error!(
                    message = "unable to reach station",
                    url = %client.status_url(),
                    error = %e,
                );
                process::exit(1)
            }
        }
    }
}

async fn fetch_reading(client: &Ip100Client) -> Result<RawReading, Box<dyn Error + Send + Sync>> {
    let body = client.fetch().await?;
    Ok(parser::parse(&body)?)
}

fn hardware_field<'a>(reading: &'a RawReading, field: &str) -> &'a str {
    reading.get(field).and_then(RawValue::as_text).unwrap_or("unknown")
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
