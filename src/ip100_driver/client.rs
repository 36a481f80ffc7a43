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

use reqwest::{Client, StatusCode, Url};
use std::error;
use std::fmt;

#[derive(Debug)]
pub enum ClientError {
    Timeout(Url),
    ConnectionRefused(Url),
    Dns(Url),
    ShortRead(reqwest::Error),
    BadStatus(StatusCode, Url),
    Internal(reqwest::Error),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(url) => write!(f, "request timed out for {}", url),
            Self::ConnectionRefused(url) => write!(f, "connection refused for {}", url),
            Self::Dns(url) => write!(f, "name resolution failed for {}", url),
            Self::ShortRead(e) => write!(f, "response body ended early: {}", e),
            Self::BadStatus(status, url) => write!(f, "unexpected status {} for {}", status, url),
            Self::Internal(e) => write!(f, "{}", e),
        }
    }
}

impl error::Error for ClientError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::ShortRead(e) | Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Transport for the IP-100 status page.
///
/// One `fetch()` call is one GET request against the station's fixed
/// `status.xml` path. There are no retries at this layer; the polling loop
/// owns that policy. The request timeout is set on the underlying
/// `reqwest::Client` at startup.
#[derive(Debug)]
pub struct Ip100Client {
    client: Client,
    status_url: Url,
}

impl Ip100Client {
    pub fn new(client: Client, status_url: Url) -> Self {
        Ip100Client { client, status_url }
    }

    pub fn status_url(&self) -> &Url {
        &self.status_url
    }

    pub async fn fetch(&self) -> Result<Vec<u8>, ClientError> {
        tracing::debug!(message = "fetching station status", url = %self.status_url);

        let res = self
            .client
            .get(self.status_url.clone())
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = res.status();
        if !status.is_success() {
            return Err(ClientError::BadStatus(status, self.status_url.clone()));
        }

        // A connection dropped mid-body surfaces here, not in send().
        let body = res.bytes().await.map_err(ClientError::ShortRead)?;
        Ok(body.to_vec())
    }

    fn classify(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.status_url.clone())
        } else if is_dns_failure(&e) {
            ClientError::Dns(self.status_url.clone())
        } else if e.is_connect() {
            ClientError::ConnectionRefused(self.status_url.clone())
        } else {
            ClientError::Internal(e)
        }
    }
}

// reqwest exposes no structured DNS error, so walk the source chain for the
// marker hyper attaches to resolver failures.
fn is_dns_failure(e: &reqwest::Error) -> bool {
    let mut source = error::Error::source(e);
    while let Some(cause) = source {
        if cause.to_string().contains("dns error") {
            return true;
        }
        source = cause.source();
    }
    false
}
