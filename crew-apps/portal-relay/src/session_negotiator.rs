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

//! # Session Negotiator
//!
//! The portal needs a handshake before it will answer anything useful, and a
//! second chain of keys before it hands out a crew schedule:
//!
//! ```text
//! Anonymous -> TokensExtracted -> Authenticated
//!           -> KeyObtained -> RetrievalKeyObtained -> EventsRetrieved
//! ```
//!
//! Each stage produces a distinct type consumed by the next one, so the chain
//! cannot be run out of order. Nothing is cached: every key is fetched for one
//! use.

use std::fmt;

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha512};

use crate::error::{RelayError, RelayResult};
use crate::portal_client::PortalClient;

const LOGIN_PAGE_PATH: &str = "/eCrew";
const DASHBOARD_PATH: &str = "/eCrew/Dashboard/";
const CREW_SCHEDULE_PATH: &str = "/eCrew/CrewSchedule";
const RETRIEVE_PATH: &str = "/eCrew/CrewSchedule/Retrieve";
const SCHEDULER_EVENTS_PATH: &str = "/eCrew/CrewSchedule/SchedulerEvents";

const HEADER_TOKEN_TEMPLATE: &str = "xxxx-xxxx-4xxx-yxxx";
const MIN_RETRIEVAL_KEY_LEN: usize = 10;

static WIN_OBJ_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"winObj:"([a-f0-9]+)""#).unwrap());
static LOGIN_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"EcallUrlAsync\("(/eCrew/Login/[a-zA-Z0-9_-]+)""#).unwrap()
});

/// Credentials of one portal login. Opaque to callers, who hand it back
/// unchanged on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_cookie: String,
    pub session_header_token: String,
}

impl Session {
    pub fn is_complete(&self) -> bool {
        !self.session_cookie.trim().is_empty() && !self.session_header_token.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStage {
    Anonymous,
    TokensExtracted,
    Authenticated,
    KeyObtained,
    RetrievalKeyObtained,
    EventsRetrieved,
}

impl fmt::Display for NegotiationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Anonymous => "anonymous",
            Self::TokensExtracted => "tokens-extracted",
            Self::Authenticated => "authenticated",
            Self::KeyObtained => "key-obtained",
            Self::RetrievalKeyObtained => "retrieval-key-obtained",
            Self::EventsRetrieved => "events-retrieved",
        })
    }
}

/// Values the login page embeds in its inline script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTokens {
    pub win_obj: String,
    pub login_path: String,
}

impl LoginTokens {
    pub fn extract(html: &str) -> RelayResult<Self> {
        let win_obj = WIN_OBJ_RE
            .captures(html)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| {
                RelayError::PortalStructureChanged("winObj not found on login page".into())
            })?;
        let login_path = LOGIN_URL_RE
            .captures(html)
            .and_then(|caps| caps.get(1))
            .ok_or_else(|| {
                RelayError::PortalStructureChanged("login URL not found on login page".into())
            })?;
        Ok(Self {
            win_obj: win_obj.as_str().to_string(),
            login_path: login_path.as_str().to_string(),
        })
    }
}

/// Static key scraped from the crew schedule page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ScheduleKey(String);

impl ScheduleKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ScheduleKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Short-lived key the portal trades for a schedule key and a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RetrievalKey(String);

impl RetrievalKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RetrievalKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Raw scheduler payload, passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SchedulerEvents(String);

impl SchedulerEvents {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

struct KeyExtractor {
    name: &'static str,
    pattern: Regex,
}

impl KeyExtractor {
    fn new(name: &'static str, pattern: &str) -> Self {
        Self {
            name,
            pattern: Regex::new(pattern).unwrap(),
        }
    }

    fn extract<'a>(&self, body: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(body)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|key| !key.is_empty())
    }
}

// Tried in order, first hit wins.
static KEY_EXTRACTORS: Lazy<Vec<KeyExtractor>> = Lazy::new(|| {
    vec![
        KeyExtractor::new("input-name", r#"name="Key"\s+value="([^"]+)""#),
        KeyExtractor::new("input-id", r#"id="Key"\s+value="([^"]+)""#),
        KeyExtractor::new("object-property", r#"(?i)Key["']?\s*:\s*["']([^"']+)"#),
        KeyExtractor::new("data-attribute", r#"(?i)data-key=["']([^"']+)"#),
        KeyExtractor::new("window-global", r#"(?i)window\.Key\s*=\s*["']([^"']+)"#),
        KeyExtractor::new("json-field", r#"(?i)"key"\s*:\s*"([^"]+)""#),
        KeyExtractor::new("assignment", r#"(?i)Key\s*=\s*"([^"]+)""#),
    ]
});

/// Find the schedule key in the crew schedule page.
pub fn extract_schedule_key(body: &str) -> Option<&str> {
    let (name, key) = match_schedule_key(body)?;
    tracing::debug!("[schedule_key] Matched by {} extractor", name);
    Some(key)
}

/// First extractor that finds a key, with its name.
fn match_schedule_key(body: &str) -> Option<(&'static str, &str)> {
    KEY_EXTRACTORS
        .iter()
        .find_map(|extractor| Some((extractor.name, extractor.extract(body)?)))
}

/// Lowercase hex SHA-512 of the password; the portal never sees plaintext.
pub fn password_digest(password: &str) -> String {
    format!("{:x}", Sha512::digest(password.as_bytes()))
}

/// Random token shaped like a UUID. The portal only checks the shape.
pub fn generate_header_token() -> String {
    let mut rng = rand::thread_rng();
    HEADER_TOKEN_TEMPLATE
        .chars()
        .map(|c| match c {
            'x' => hex_digit(rng.gen_range(0..16)),
            'y' => hex_digit(rng.gen_range(0..16) & 0x3 | 0x8),
            other => other,
        })
        .collect()
}

fn hex_digit(value: u32) -> char {
    char::from_digit(value, 16).unwrap_or('0')
}

/// `name=value` part of each `Set-Cookie`, ready for a `Cookie` header.
fn cookie_header(set_cookies: &[String]) -> String {
    set_cookies
        .iter()
        .filter_map(|cookie| cookie.split(';').next())
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    crewid: &'a str,
    password: &'a str,
    #[serde(rename = "winObj")]
    win_obj: &'a str,
    chk: &'a str,
    cio: &'a str,
    alias: &'a str,
    rad: &'a str,
    hotp: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct KeyedRequest<'a> {
    key: &'a str,
    data: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RetrieveRange<'a> {
    from_date: &'a str,
    to_date: &'a str,
    timesin: &'a str,
    #[serde(rename = "CrewIDS")]
    crew_ids: &'a str,
    period_select: bool,
}

/// What `/Retrieve` sends back: a JSON string, some other body, or nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RetrieveReply {
    Key(String),
    Opaque(String),
    Empty,
}

impl RetrieveReply {
    fn from_body(body: &str) -> Self {
        let trimmed = body.trim();
        match serde_json::from_str::<Value>(trimmed) {
            _ if trimmed.is_empty() => Self::Empty,
            Ok(Value::Null) => Self::Empty,
            Ok(Value::String(key)) if key.is_empty() => Self::Empty,
            Ok(Value::String(key)) => Self::Key(key),
            _ => Self::Opaque(trimmed.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct SessionNegotiator {
    portal: PortalClient,
}

impl SessionNegotiator {
    pub fn new(portal: PortalClient) -> Self {
        Self { portal }
    }

    /// Log in with a crew id and password and return the session the portal
    /// granted.
    pub async fn login(&self, crew_id: &str, password: &str) -> RelayResult<Session> {
        tracing::debug!(stage = %NegotiationStage::Anonymous, "[login] Fetching login page");
        let page = self.portal.get_anonymous(LOGIN_PAGE_PATH).await?;
        if page.status >= 500 {
            return Err(RelayError::from_portal_status(page.status, page.body));
        }
        // 4xx on a page without caller input is drift
        if !page.is_success() {
            return Err(RelayError::PortalStructureChanged(format!(
                "login page answered HTTP {}",
                page.status
            )));
        }
        let tokens = LoginTokens::extract(&page.body)?;
        tracing::debug!(stage = %NegotiationStage::TokensExtracted, "[login] Login URL: {}", tokens.login_path);

        let header_token = generate_header_token();
        let digest = password_digest(password);
        let request = LoginRequest {
            crewid: crew_id,
            password: &digest,
            win_obj: &tokens.win_obj,
            chk: "",
            cio: "",
            alias: "",
            rad: "",
            hotp: "",
        };
        let response = self
            .portal
            .post_json_with_token(&tokens.login_path, &header_token, &request)
            .await?;

        if response.status >= 500 {
            return Err(RelayError::from_portal_status(response.status, response.body));
        }
        if !response.is_success() {
            return Err(RelayError::AuthenticationFailed(format!(
                "portal answered HTTP {}",
                response.status
            )));
        }
        let session_cookie = cookie_header(&response.set_cookies);
        if session_cookie.is_empty() {
            return Err(RelayError::AuthenticationFailed(
                "portal did not issue a session cookie".into(),
            ));
        }

        tracing::info!(stage = %NegotiationStage::Authenticated, "[login] Crew {} logged in", crew_id);
        Ok(Session {
            session_cookie,
            session_header_token: header_token,
        })
    }

    pub async fn fetch_schedule_key(&self, session: &Session) -> RelayResult<ScheduleKey> {
        let path = format!(
            "{}?eCrewHeader={}",
            CREW_SCHEDULE_PATH,
            urlencoding::encode(&session.session_header_token)
        );
        let response = self
            .portal
            .get_authorized_no_redirect(&path, session, DASHBOARD_PATH)
            .await?;
        if !(200..400).contains(&response.status) {
            return Err(RelayError::from_portal_status(response.status, response.body));
        }

        let key = extract_schedule_key(&response.body).ok_or_else(|| {
            tracing::warn!(
                "[schedule_key] No extractor matched a {} byte page (HTTP {})",
                response.body.len(),
                response.status
            );
            RelayError::KeyNotFound
        })?;
        tracing::debug!(stage = %NegotiationStage::KeyObtained, "[schedule_key] Key obtained");
        Ok(ScheduleKey(key.to_string()))
    }

    /// Trade the schedule key and a date range for a short-lived retrieval
    /// key. Dates go to the portal as given.
    pub async fn retrieve_schedule_data(
        &self,
        session: &Session,
        key: &ScheduleKey,
        from_date: &str,
        to_date: &str,
    ) -> RelayResult<RetrievalKey> {
        let range = serde_json::to_string(&RetrieveRange {
            from_date,
            to_date,
            timesin: "3",
            crew_ids: "",
            period_select: false,
        })?;
        let request = KeyedRequest {
            key: key.as_str(),
            data: &range,
        };
        let response = self
            .portal
            .post_json_authorized(RETRIEVE_PATH, session, &schedule_referer(session), &request)
            .await?
            .error_for_status()?;

        match RetrieveReply::from_body(&response.body) {
            RetrieveReply::Key(key) | RetrieveReply::Opaque(key) => {
                tracing::debug!(stage = %NegotiationStage::RetrievalKeyObtained, "[retrieve] Retrieval key obtained");
                Ok(RetrievalKey(key))
            }
            RetrieveReply::Empty => Err(RelayError::EmptyPortalResponse("schedule retrieve")),
        }
    }

    /// Fetch the raw scheduler events for a retrieval key. The portal wants
    /// the key both as lookup key and as payload.
    pub async fn fetch_scheduler_events(
        &self,
        session: &Session,
        key: &RetrievalKey,
    ) -> RelayResult<SchedulerEvents> {
        if key.as_str().chars().count() < MIN_RETRIEVAL_KEY_LEN {
            return Err(RelayError::InvalidKey);
        }
        let request = KeyedRequest {
            key: key.as_str(),
            data: key.as_str(),
        };
        let response = self
            .portal
            .post_json_authorized(
                SCHEDULER_EVENTS_PATH,
                session,
                &schedule_referer(session),
                &request,
            )
            .await?;
        if response.status != 200 {
            return Err(RelayError::from_portal_status(response.status, response.body));
        }

        tracing::debug!(stage = %NegotiationStage::EventsRetrieved, "[scheduler_events] {} bytes", response.body.len());
        Ok(SchedulerEvents(response.body))
    }
}

fn schedule_referer(session: &Session) -> String {
    format!(
        "{}?eCrewHeader={}",
        CREW_SCHEDULE_PATH,
        urlencoding::encode(&session.session_header_token)
    )
}
