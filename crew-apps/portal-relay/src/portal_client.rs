//!  eCrew Portal Relay
//!
//!  Copyright (C) 2026  Mamy Ratsimbazafy
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # eCrew Portal Client
//!
//! Effectful (network) side of the relay. Knows the portal host, the headers
//! the portal expects from a browser, and nothing about what the calls mean.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use wreq::redirect::Policy;
use wreq_util::Emulation;

use crate::error::{RelayError, RelayResult};
use crate::session_negotiator::Session;

pub const DEFAULT_PORTAL_URL: &str = "https://i2-crew.aims.aero";
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36";

/// Where the portal lives and how the relay presents itself to it.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub portal_url: String,
    pub user_agent: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            portal_url: DEFAULT_PORTAL_URL.to_string(),
            user_agent: USER_AGENT.to_string(),
        }
    }
}

impl RelayConfig {
    pub fn with_portal_url(portal_url: impl Into<String>) -> Self {
        Self {
            portal_url: portal_url.into(),
            ..Default::default()
        }
    }
}

/// Status, cookies and body of one portal answer, read in full.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    pub status: u16,
    pub set_cookies: Vec<String>,
    pub body: String,
}

impl PortalResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Keep 2xx answers, turn the rest into a portal error.
    pub fn error_for_status(self) -> RelayResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RelayError::from_portal_status(self.status, self.body))
        }
    }
}

#[derive(Clone)]
pub struct PortalClient {
    client: Arc<wreq::Client>,
    no_redirect: Arc<wreq::Client>,
    base_url: String,
    user_agent: String,
}

impl PortalClient {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let client = wreq::Client::builder()
            .emulation(Emulation::Safari18_5)
            .redirect(Policy::default())
            .build()
            .context("Failed to build HTTP client")?;
        let no_redirect = wreq::Client::builder()
            .emulation(Emulation::Safari18_5)
            .redirect(Policy::none())
            .build()
            .context("Failed to build non-redirecting HTTP client")?;
        Ok(Self {
            client: Arc::new(client),
            no_redirect: Arc::new(no_redirect),
            base_url: config.portal_url.trim_end_matches('/').to_string(),
            user_agent: config.user_agent.clone(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a page without credentials.
    pub async fn get_anonymous(&self, path: &str) -> RelayResult<PortalResponse> {
        let request = self
            .client
            .get(self.url(path))
            .header("User-Agent", &self.user_agent);
        self.send(path, request).await
    }

    /// GET a page as the session's owner. The portal answers some of these
    /// with a redirect whose body is what we want, so redirects are returned
    /// as they are.
    pub async fn get_authorized_no_redirect(
        &self,
        path: &str,
        session: &Session,
        referer: &str,
    ) -> RelayResult<PortalResponse> {
        let request = self
            .no_redirect
            .get(self.url(path))
            .header("User-Agent", &self.user_agent)
            .header("Cookie", &session.session_cookie)
            .header("eCrewHeader", &session.session_header_token)
            .header("Referer", self.url(referer));
        self.send(path, request).await
    }

    /// POST a JSON body carrying only the per-login header token.
    pub async fn post_json_with_token<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        header_token: &str,
        payload: &T,
    ) -> RelayResult<PortalResponse> {
        let request = self
            .client
            .post(self.url(path))
            .header("User-Agent", &self.user_agent)
            .header("eCrewHeader", header_token)
            .header("Origin", &self.base_url)
            .json(payload);
        self.send(path, request).await
    }

    /// POST a JSON body as the session's owner.
    pub async fn post_json_authorized<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        session: &Session,
        referer: &str,
        payload: &T,
    ) -> RelayResult<PortalResponse> {
        let request = self
            .client
            .post(self.url(path))
            .header("User-Agent", &self.user_agent)
            .header("Cookie", &session.session_cookie)
            .header("eCrewHeader", &session.session_header_token)
            .header("Origin", &self.base_url)
            .header("Referer", self.url(referer))
            .json(payload);
        self.send(path, request).await
    }

    async fn send(&self, path: &str, request: wreq::RequestBuilder) -> RelayResult<PortalResponse> {
        let http_start = Instant::now();
        tracing::trace!("[portal] Starting HTTP request to: {}", path);
        let response = request.send().await?;

        let status = response.status();
        tracing::debug!(
            "[portal] {} -> HTTP {} {} in {:?}",
            path,
            status.as_u16(),
            status.canonical_reason().unwrap_or("Unknown"),
            http_start.elapsed()
        );

        let set_cookies = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .map(str::to_string)
            .collect();
        let body = response.text().await?;
        tracing::trace!("[portal] {} body: {} bytes", path, body.len());

        Ok(PortalResponse {
            status: status.as_u16(),
            set_cookies,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_is_trimmed() {
        let client = PortalClient::new(&RelayConfig::with_portal_url("http://127.0.0.1:9/"))
            .expect("client builds");
        assert_eq!(client.url("/eCrew"), "http://127.0.0.1:9/eCrew");
    }

    #[test]
    fn only_2xx_passes_status_check() {
        let ok = PortalResponse {
            status: 204,
            set_cookies: Vec::new(),
            body: String::new(),
        };
        assert!(ok.error_for_status().is_ok());

        let redirected = PortalResponse {
            status: 302,
            set_cookies: Vec::new(),
            body: String::new(),
        };
        assert!(matches!(
            redirected.error_for_status(),
            Err(RelayError::RequestRejected { status: 302, .. })
        ));
    }
}
