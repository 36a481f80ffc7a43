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

//! Decoding of the IP-100 `status.xml` payload into raw sensor readings.
//!
//! The device returns a small XML document:
//!
//! ```text
//! <status>
//!   <hardware>...nested leaves: model, firmware, base_units, flags...</hardware>
//!   <weather>
//!     <temperature_outside><current>72.4</current>...</temperature_outside>
//!     <wind><speed>4.0</speed><direction>270</direction>
//!           <gust_speed>7.0</gust_speed><gust_direction>265</gust_direction></wind>
//!     ...
//!   </weather>
//! </status>
//! ```
//!
//! Parsing degrades gracefully: fields that are missing, empty, or carry a
//! non-numeric placeholder are simply absent from the result. Zero is a
//! valid physical reading and is never used as a stand-in for missing data.

use roxmltree::{Document, Node};
use std::collections::BTreeMap;
use std::error;
use std::fmt;
use std::str;

/// Raw field values as reported by the device, before any normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Number(f64),
    Text(String),
}

impl RawValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Number(_) => None,
        }
    }
}

/// One fetch cycle's worth of raw device fields, keyed by device field name.
pub type RawReading = BTreeMap<String, RawValue>;

#[derive(Debug)]
pub enum ParseError {
    Encoding(str::Utf8Error),
    Malformed(roxmltree::Error),
    UnexpectedRoot(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Encoding(e) => write!(f, "response is not valid utf-8: {}", e),
            Self::Malformed(e) => write!(f, "malformed status document: {}", e),
            Self::UnexpectedRoot(tag) => write!(f, "expected status element, found {}", tag),
        }
    }
}

impl error::Error for ParseError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Encoding(e) => Some(e),
            Self::Malformed(e) => Some(e),
            Self::UnexpectedRoot(_) => None,
        }
    }
}

/// Parse a raw status page into a `RawReading`.
///
/// Returns an error only when no fields can be located at all: undecodable
/// bytes, XML the parser rejects outright, or a document whose root is not
/// `<status>`. A document missing some or even most fields still yields a
/// (possibly empty) partial reading.
pub fn parse(data: &[u8]) -> Result<RawReading, ParseError> {
    let text = str::from_utf8(data).map_err(ParseError::Encoding)?;
    let doc = Document::parse(text).map_err(ParseError::Malformed)?;
    let root = doc.root_element();
    if root.tag_name().name() != "status" {
        return Err(ParseError::UnexpectedRoot(root.tag_name().name().to_owned()));
    }

    let mut reading = RawReading::new();
    if let Some(hw) = element_child(root, "hardware") {
        collect_hardware(hw, &mut reading);
    }
    if let Some(weather) = element_child(root, "weather") {
        collect_weather(weather, &mut reading);
    }
    Ok(reading)
}

fn element_child<'a>(node: Node<'a, 'a>, name: &str) -> Option<Node<'a, 'a>> {
    node.children().find(|c| c.is_element() && c.tag_name().name() == name)
}

/// The hardware section is a nested tree; every leaf element becomes a text
/// field (model, firmware version, base_units, battery/status flags).
fn collect_hardware(node: Node<'_, '_>, reading: &mut RawReading) {
    for child in node.children().filter(|c| c.is_element()) {
        if child.children().any(|c| c.is_element()) {
            collect_hardware(child, reading);
        } else if let Some(text) = nonempty_text(child) {
            reading.insert(child.tag_name().name().to_owned(), RawValue::Text(text.to_owned()));
        }
    }
}

/// Weather sensors carry their value in a `<current>` child, except the
/// compound `<wind>` element which holds speed/direction/gust children.
fn collect_weather(node: Node<'_, '_>, reading: &mut RawReading) {
    const WIND_FIELDS: [(&str, &str); 4] = [
        ("speed", "wind_speed"),
        ("direction", "wind_dir"),
        ("gust_speed", "gust_speed"),
        ("gust_direction", "gust_dir"),
    ];

    for child in node.children().filter(|c| c.is_element()) {
        let tag = child.tag_name().name();
        if tag == "wind" {
            for (element, field) in WIND_FIELDS {
                if let Some(value) = element_child(child, element).and_then(numeric_text) {
                    reading.insert(field.to_owned(), RawValue::Number(value));
                }
            }
        } else if let Some(current) = element_child(child, "current") {
            if let Some(value) = numeric_text(current) {
                reading.insert(tag.to_owned(), RawValue::Number(value));
            } else {
                tracing::debug!(message = "no reading for sensor", sensor = tag);
            }
        } else {
            tracing::debug!(message = "ignored weather element", element = tag);
        }
    }
}

fn nonempty_text<'a>(node: Node<'a, 'a>) -> Option<&'a str> {
    node.text().map(str::trim).filter(|t| !t.is_empty())
}

// The device reports "--" for sensors with no reading.
fn numeric_text(node: Node<'_, '_>) -> Option<f64> {
    nonempty_text(node)
        .filter(|t| *t != "--")
        .and_then(|t| t.parse().ok())
}
