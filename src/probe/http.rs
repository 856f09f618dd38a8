//! HTTP probe implementation.

use super::{ProbeError, Prober};

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

const USER_AGENT: &str = concat!("pingwatch/", env!("CARGO_PKG_VERSION"));

/// Issues a GET against the target address and reads the full body.
pub struct HttpProber {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProber {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn check(&self, address: &str) -> Result<StatusCode, ProbeError> {
        let response = self.client.get(address).send().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

        let status = response.status();

        // Read the full body to measure complete transfer time
        let _body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout(self.timeout)
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

        Ok(status)
    }
}
