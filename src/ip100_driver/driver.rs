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

//! The polling loop: fetch, parse, normalize, emit, on a fixed interval.

use crate::client::Ip100Client;
use crate::parser;
use crate::schema::{self, Packet};
use async_trait::async_trait;
use reqwest::Url;
use std::error;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::{self, Interval, MissedTickBehavior};

#[derive(Debug)]
pub enum ConfigError {
    EmptyHost,
    InvalidHost(String),
    InvalidPort,
    InvalidPollInterval,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyHost => write!(f, "host must not be empty"),
            Self::InvalidHost(host) => write!(f, "cannot build station url from host {}", host),
            Self::InvalidPort => write!(f, "port must be between 1 and 65535"),
            Self::InvalidPollInterval => write!(f, "poll interval must be at least 1 second"),
        }
    }
}

impl error::Error for ConfigError {}

/// Connection settings for the station, validated once at construction and
/// immutable afterward.
#[derive(Debug, Clone)]
pub struct Config {
    host: String,
    port: u16,
    poll_interval: Duration,
    timeout: Duration,
    station_url: Url,
}

impl Config {
    const STATUS_PATH: &'static str = "status.xml";

    /// Validate connection settings. The request timeout is clamped to the
    /// poll interval so a slow fetch can never outlive its own cycle.
    pub fn new(
        host: &str,
        port: u16,
        poll_interval_secs: u64,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        let station_url = Url::parse(&format!("http://{}:{}/{}", host, port, Self::STATUS_PATH))
            .map_err(|_| ConfigError::InvalidHost(host.to_owned()))?;
        let poll_interval = Duration::from_secs(poll_interval_secs);

        Ok(Config {
            host: host.to_owned(),
            port,
            poll_interval,
            timeout: timeout.min(poll_interval),
            station_url,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn station_url(&self) -> &Url {
        &self.station_url
    }
}

/// The seam the host framework consumes: a hardware identity queried once at
/// startup and a pull-based stream of packets. `next_packet` returns `None`
/// only after shutdown has been requested; device trouble is absorbed as
/// skipped cycles, never as stream termination.
#[async_trait]
pub trait Driver: Send {
    fn hardware_name(&self) -> &'static str;

    async fn next_packet(&mut self) -> Option<Packet>;
}

/// Signals the driver to end its stream. Checked between cycles; an
/// in-flight fetch is allowed to finish or time out first.
#[derive(Debug)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Polling driver for the Rainwise IP-100.
///
/// Each cycle is fetch -> parse -> normalize -> emit. A failed fetch or
/// parse logs a warning and skips the cycle; the next cycle starts at the
/// normal interval, which is also the only backoff (the station is never
/// polled faster than `poll_interval`). Cycles are scheduled from cycle
/// start, and missed ticks are skipped rather than compounded.
#[derive(Debug)]
pub struct Ip100Driver {
    client: Ip100Client,
    interval: Interval,
    stop: watch::Receiver<bool>,
    stop_closed: bool,
    last_timestamp: i64,
    previous_rain_total: Option<f64>,
}

impl Ip100Driver {
    pub const HARDWARE_NAME: &'static str = "IP-100";

    pub fn new(client: Ip100Client, config: &Config) -> (Self, ShutdownHandle) {
        let mut interval = time::interval(config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let (tx, rx) = watch::channel(false);
        let driver = Ip100Driver {
            client,
            interval,
            stop: rx,
            stop_closed: false,
            last_timestamp: 0,
            previous_rain_total: None,
        };
        (driver, ShutdownHandle { tx })
    }

    /// Produce the next observation, waiting out the poll interval and as
    /// many degraded cycles as it takes. Returns `None` once shutdown has
    /// been requested.
    pub async fn next_packet(&mut self) -> Option<Packet> {
        loop {
            if !self.idle().await {
                tracing::info!("shutdown requested, ending observation stream");
                return None;
            }

            let body = match self.client.fetch().await {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(message = "fetch failed, skipping cycle", error = %e);
                    continue;
                }
            };

            let reading = match parser::parse(&body) {
                Ok(reading) => reading,
                Err(e) => {
                    tracing::warn!(message = "parse failed, skipping cycle", error = %e);
                    continue;
                }
            };

            let date_time = self.next_timestamp(unix_now());
            let mut packet = schema::normalize(&reading, date_time);
            self.apply_rain_delta(&mut packet);
            tracing::debug!(
                message = "emitting packet",
                date_time = packet.date_time,
                fields = packet.values.len(),
            );
            return Some(packet);
        }
    }

    /// Wait for the next scheduled cycle. Returns false when shutdown is
    /// requested instead.
    async fn idle(&mut self) -> bool {
        loop {
            if *self.stop.borrow() {
                return false;
            }
            if self.stop_closed {
                self.interval.tick().await;
                return true;
            }
            tokio::select! {
                changed = self.stop.changed() => {
                    // A dropped handle means shutdown can no longer arrive.
                    if changed.is_err() {
                        self.stop_closed = true;
                    }
                }
                _ = self.interval.tick() => return true,
            }
        }
    }

    /// Timestamps must be strictly increasing across the stream, even when
    /// the wall clock stalls or steps backward.
    fn next_timestamp(&mut self, now: i64) -> i64 {
        let ts = if now > self.last_timestamp {
            now
        } else {
            self.last_timestamp + 1
        };
        self.last_timestamp = ts;
        ts
    }

    /// Turn the cumulative daily rain counter into a per-packet delta.
    fn apply_rain_delta(&mut self, packet: &mut Packet) {
        if let Some(&total) = packet.values.get("day_rain_total") {
            if let Some(delta) = schema::rain_delta(total, self.previous_rain_total) {
                packet.values.insert("rain", delta);
            }
            self.previous_rain_total = Some(total);
        } else {
            tracing::debug!("no rain counter in packet");
        }
    }
}

#[async_trait]
impl Driver for Ip100Driver {
    fn hardware_name(&self) -> &'static str {
        Self::HARDWARE_NAME
    }

    async fn next_packet(&mut self) -> Option<Packet> {
        Ip100Driver::next_packet(self).await
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_secs_f64() + 0.5) as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::new("192.168.1.12", 80, 2, Duration::from_secs(5)).unwrap()
    }

    fn driver() -> (Ip100Driver, ShutdownHandle) {
        let config = config();
        let client = Ip100Client::new(reqwest::Client::new(), config.station_url().clone());
        Ip100Driver::new(client, &config)
    }

    #[test]
    fn config_builds_station_url() {
        let config = config();
        assert_eq!(config.station_url().as_str(), "http://192.168.1.12/status.xml");
        assert_eq!(config.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn config_keeps_nonstandard_port() {
        let config = Config::new("station.local", 8080, 2, Duration::from_secs(1)).unwrap();
        assert_eq!(config.station_url().as_str(), "http://station.local:8080/status.xml");
    }

    #[test]
    fn config_rejects_bad_values() {
        assert!(matches!(
            Config::new("", 80, 2, Duration::from_secs(5)),
            Err(ConfigError::EmptyHost)
        ));
        assert!(matches!(
            Config::new("host", 0, 2, Duration::from_secs(5)),
            Err(ConfigError::InvalidPort)
        ));
        assert!(matches!(
            Config::new("host", 80, 0, Duration::from_secs(5)),
            Err(ConfigError::InvalidPollInterval)
        ));
    }

    #[test]
    fn timeout_is_clamped_to_poll_interval() {
        let config = Config::new("host", 80, 2, Duration::from_secs(30)).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(2));

        let config = Config::new("host", 80, 10, Duration::from_secs(5)).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn timestamps_strictly_increase_under_clock_anomalies() {
        let (mut driver, _handle) = driver();
        assert_eq!(driver.next_timestamp(100), 100);
        // stuck clock
        assert_eq!(driver.next_timestamp(100), 101);
        // clock stepped backward
        assert_eq!(driver.next_timestamp(95), 102);
        // clock caught up again
        assert_eq!(driver.next_timestamp(110), 110);
    }

    #[tokio::test]
    async fn shutdown_before_first_cycle_yields_no_packet() {
        let (mut driver, handle) = driver();
        handle.shutdown();
        assert!(driver.next_packet().await.is_none());
    }

    #[tokio::test]
    async fn hardware_name_is_static() {
        let (driver, _handle) = driver();
        assert_eq!(Driver::hardware_name(&driver), "IP-100");
    }
}
