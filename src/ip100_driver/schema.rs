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

//! Mapping from raw device fields to the canonical observation schema.
//!
//! A single static table drives the translation: raw field name to canonical
//! name plus a scale/offset and a validity range. Adding a field exposed by
//! newer station firmware means adding one table row.

use crate::parser::RawReading;
use serde::ser::Serializer;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Unit system the station reports in, per its `base_units` setting.
///
/// Codes match the host framework's convention: 1 for US customary units,
/// 17 for metric with wind in m/s and rain in mm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitSystem {
    Us,
    MetricWx,
}

impl UnitSystem {
    pub fn code(&self) -> u8 {
        match self {
            Self::Us => 1,
            Self::MetricWx => 17,
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Us => write!(f, "US"),
            Self::MetricWx => write!(f, "METRICWX"),
        }
    }
}

impl Serialize for UnitSystem {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// One observation emitted by the driver: a capture timestamp, the unit
/// system tag, and whichever canonical fields the station reported this
/// cycle. Serializes to the flat layout the host framework consumes.
#[derive(Debug, Clone, Serialize)]
pub struct Packet {
    #[serde(rename = "dateTime")]
    pub date_time: i64,
    #[serde(rename = "usUnits")]
    pub unit_system: UnitSystem,
    #[serde(flatten)]
    pub values: BTreeMap<&'static str, f64>,
}

/// One row of the sensor map: how a raw device field becomes a canonical one.
#[derive(Debug, Clone, Copy)]
pub struct SensorField {
    pub raw: &'static str,
    pub canonical: &'static str,
    pub scale: f64,
    pub offset: f64,
    pub min: f64,
    pub max: f64,
}

impl SensorField {
    /// Apply the conversion, rejecting values outside the validity range.
    /// Out-of-range readings are dropped, never clamped.
    pub fn convert(&self, raw: f64) -> Option<f64> {
        let value = raw * self.scale + self.offset;
        if value < self.min || value > self.max {
            tracing::debug!(
                message = "dropped out-of-range reading",
                field = self.canonical,
                value = value,
            );
            return None;
        }
        Some(value)
    }
}

// The station reports in whichever unit system base_units selects, so the
// ranges are wide physical sanity bounds that hold for both systems.
pub const SENSOR_MAP: &[SensorField] = &[
    SensorField { raw: "temperature_outside", canonical: "outTemp", scale: 1.0, offset: 0.0, min: -60.0, max: 150.0 },
    SensorField { raw: "temperature_inside", canonical: "inTemp", scale: 1.0, offset: 0.0, min: -60.0, max: 150.0 },
    SensorField { raw: "humidity", canonical: "outHumidity", scale: 1.0, offset: 0.0, min: 0.0, max: 100.0 },
    SensorField { raw: "pressure", canonical: "pressure", scale: 1.0, offset: 0.0, min: 10.0, max: 1100.0 },
    SensorField { raw: "wind_speed", canonical: "windSpeed", scale: 1.0, offset: 0.0, min: 0.0, max: 250.0 },
    SensorField { raw: "wind_dir", canonical: "windDir", scale: 1.0, offset: 0.0, min: 0.0, max: 360.0 },
    SensorField { raw: "gust_speed", canonical: "windGust", scale: 1.0, offset: 0.0, min: 0.0, max: 250.0 },
    SensorField { raw: "gust_dir", canonical: "windGustDir", scale: 1.0, offset: 0.0, min: 0.0, max: 360.0 },
    SensorField { raw: "precipitation", canonical: "day_rain_total", scale: 1.0, offset: 0.0, min: 0.0, max: 10000.0 },
    SensorField { raw: "solar_radiation", canonical: "radiation", scale: 1.0, offset: 0.0, min: 0.0, max: 2000.0 },
];

/// Build a packet from a raw reading. Pure and total: raw fields that are
/// missing, non-numeric, unknown, or out of range are left out of the
/// result; the packet itself is always produced.
pub fn normalize(reading: &RawReading, date_time: i64) -> Packet {
    let unit_system = match reading.get("base_units").and_then(|v| v.as_text()) {
        Some("English") => UnitSystem::Us,
        Some(_) => UnitSystem::MetricWx,
        None => {
            tracing::debug!("no base_units in reading, assuming US");
            UnitSystem::Us
        }
    };

    let mut values = BTreeMap::new();
    for field in SENSOR_MAP {
        let raw = reading.get(field.raw).and_then(|v| v.as_number());
        if let Some(value) = raw.and_then(|r| field.convert(r)) {
            values.insert(field.canonical, value);
        }
    }

    Packet { date_time, unit_system, values }
}

/// Rain differential between two cumulative counter readings.
///
/// No delta is produced for the first reading, or when the counter has
/// decreased (a daily reset on the station side).
pub fn rain_delta(total: f64, previous_total: Option<f64>) -> Option<f64> {
    match previous_total {
        Some(previous) if total >= previous => Some(total - previous),
        Some(previous) => {
            tracing::debug!(
                message = "rain counter reset",
                total = total,
                previous = previous,
            );
            None
        }
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::RawValue;

    fn reading(fields: &[(&str, RawValue)]) -> RawReading {
        fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn maps_raw_fields_to_canonical_names() {
        let reading = reading(&[
            ("base_units", RawValue::Text("English".to_owned())),
            ("temperature_outside", RawValue::Number(72.4)),
            ("wind_speed", RawValue::Number(4.0)),
            ("precipitation", RawValue::Number(0.12)),
        ]);
        let packet = normalize(&reading, 1700000000);
        assert_eq!(packet.date_time, 1700000000);
        assert_eq!(packet.unit_system, UnitSystem::Us);
        assert_eq!(packet.values["outTemp"], 72.4);
        assert_eq!(packet.values["windSpeed"], 4.0);
        assert_eq!(packet.values["day_rain_total"], 0.12);
    }

    #[test]
    fn missing_fields_stay_missing() {
        let reading = reading(&[("humidity", RawValue::Number(41.0))]);
        let packet = normalize(&reading, 1);
        assert_eq!(packet.values.len(), 1);
        assert!(!packet.values.contains_key("outTemp"));
    }

    #[test]
    fn zero_is_a_valid_reading() {
        let reading = reading(&[("wind_speed", RawValue::Number(0.0))]);
        let packet = normalize(&reading, 1);
        assert_eq!(packet.values["windSpeed"], 0.0);
    }

    #[test]
    fn out_of_range_values_are_dropped_not_clamped() {
        let reading = reading(&[
            ("humidity", RawValue::Number(312.0)),
            ("wind_dir", RawValue::Number(-5.0)),
            ("temperature_outside", RawValue::Number(72.0)),
        ]);
        let packet = normalize(&reading, 1);
        assert!(!packet.values.contains_key("outHumidity"));
        assert!(!packet.values.contains_key("windDir"));
        assert_eq!(packet.values["outTemp"], 72.0);
    }

    #[test]
    fn unknown_raw_fields_are_ignored() {
        let reading = reading(&[("soil_moisture", RawValue::Number(12.0))]);
        let packet = normalize(&reading, 1);
        assert!(packet.values.is_empty());
    }

    #[test]
    fn metric_base_units_sets_metricwx() {
        let reading = reading(&[("base_units", RawValue::Text("Metric".to_owned()))]);
        assert_eq!(normalize(&reading, 1).unit_system, UnitSystem::MetricWx);
    }

    #[test]
    fn missing_base_units_defaults_to_us() {
        assert_eq!(normalize(&RawReading::new(), 1).unit_system, UnitSystem::Us);
    }

    #[test]
    fn convert_applies_scale_and_offset() {
        let field = SensorField {
            raw: "t",
            canonical: "t",
            scale: 0.1,
            offset: -32.0,
            min: -100.0,
            max: 100.0,
        };
        assert_eq!(field.convert(400.0), Some(8.0));
        assert_eq!(field.convert(5000.0), None);
    }

    #[test]
    fn rain_delta_semantics() {
        assert_eq!(rain_delta(0.5, None), None);
        assert!((rain_delta(0.5, Some(0.3)).unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(rain_delta(0.5, Some(0.5)), Some(0.0));
        // counter reset at midnight
        assert_eq!(rain_delta(0.1, Some(2.4)), None);
    }

    #[test]
    fn packet_serializes_flat() {
        let mut values = BTreeMap::new();
        values.insert("outTemp", 72.4);
        values.insert("windSpeed", 4.0);
        let packet = Packet {
            date_time: 1700000000,
            unit_system: UnitSystem::Us,
            values,
        };
        let json: serde_json::Value = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["dateTime"], 1700000000);
        assert_eq!(json["usUnits"], 1);
        assert_eq!(json["outTemp"], 72.4);
        assert_eq!(json["windSpeed"], 4.0);
    }
}
