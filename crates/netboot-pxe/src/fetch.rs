//! Scheme-dispatched resource fetching
//!
//! PXE configs and boot images live behind either HTTP(S) or TFTP
//! depending on how the DHCP server was set up. The trait seam keeps
//! the config and entry code testable without a network.

use crate::error::{PxeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use netboot_tftp::TftpClient;
use std::net::SocketAddr;
use tokio::net::lookup_host;
use tracing::debug;
use url::Url;

/// Default TFTP port when the boot URI does not name one
const TFTP_PORT: u16 = 69;

/// Bound on any single HTTP fetch; the orchestrator's overall
/// deadline handles everything beyond that
const HTTP_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Fetches a resource by URL
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes>;
}

/// Fetcher backed by reqwest (http/https) and the TFTP client
#[derive(Debug, Clone)]
pub struct DefaultFetcher {
    http: reqwest::Client,
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    async fn fetch_http(&self, url: &Url) -> Result<Bytes> {
        let response = self.http.get(url.clone()).send().await?;
        let response = response.error_for_status()?;
        Ok(response.bytes().await?)
    }

    async fn fetch_tftp(&self, url: &Url) -> Result<Bytes> {
        let host = url
            .host_str()
            .ok_or_else(|| PxeError::InvalidUrl(format!("no host in {}", url)))?;
        let port = url.port().unwrap_or(TFTP_PORT);

        let server: SocketAddr = lookup_host((host, port))
            .await
            .map_err(|e| PxeError::InvalidUrl(format!("cannot resolve {}: {}", host, e)))?
            .next()
            .ok_or_else(|| PxeError::InvalidUrl(format!("no address for {}", host)))?;

        let filename = url.path().trim_start_matches('/');
        Ok(TftpClient::new(server).fetch(filename).await?)
    }
}

#[async_trait]
impl Fetcher for DefaultFetcher {
    async fn fetch(&self, url: &Url) -> Result<Bytes> {
        debug!(url = %url, "fetching");
        match url.scheme() {
            "http" | "https" => self.fetch_http(url).await,
            "tftp" => self.fetch_tftp(url).await,
            other => Err(PxeError::UnsupportedScheme(other.to_string())),
        }
    }
}
