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

//! Weather data collection driver for the Rainwise IP-100
//!
//! ## Features
//!
//! `ip100_driver` polls a Rainwise IP-100 weather-station appliance over its
//! local HTTP interface and turns the station's `status.xml` page into a
//! stream of timestamped observation packets. Each packet carries whichever
//! of the following canonical fields the station reported that cycle, in the
//! unit system the station is configured for (`usUnits` 1 for US, 17 for
//! METRICWX):
//!
//! * `outTemp` / `inTemp` - outside and inside temperature
//! * `outHumidity` - relative humidity (0-100)
//! * `pressure` - barometric pressure
//! * `windSpeed` / `windDir` - wind speed and direction
//! * `windGust` / `windGustDir` - gust speed and direction
//! * `day_rain_total` - the station's cumulative daily rain counter
//! * `rain` - rain since the previous packet, derived from the counter
//! * `radiation` - solar radiation
//!
//! Sensors with no reading are simply absent from the packet; the driver
//! never substitutes zero for missing data. Network or parse trouble on a
//! cycle is logged and the cycle is skipped; the stream itself only ends
//! when shutdown is requested.
//!
//! ## Build
//!
//! `ip100_driver` is a Rust program and must be built from source using a
//! [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! git clone git@github.com:weewx/ip100_driver.git && cd ip100_driver
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! Point the driver at the station and it will emit one JSON packet per
//! poll interval on stdout:
//!
//! ```text
//! ./ip100_driver --host 192.168.1.12
//! ```
//!
//! Fetch a single packet and exit:
//!
//! ```text
//! ./ip100_driver --host 192.168.1.12 --current
//! ```
//!
//! Exercise the parser against a saved copy of the station's status page:
//!
//! ```text
//! curl -sS 'http://192.168.1.12/status.xml' > status.xml
//! ./ip100_driver --test-parse status.xml
//! ```
//!

pub mod client;
pub mod driver;
pub mod parser;
pub mod schema;
