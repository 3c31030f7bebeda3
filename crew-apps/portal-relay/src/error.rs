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

//! # Relay Errors
//!
//! Everything that can go wrong between the inbound request and the portal.
//! Flight entries that fail to parse never show up here, see
//! [`crate::FlightParseError`].

use thiserror::Error;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed caller input, rejected before any portal call.
    #[error("{0}")]
    Validation(String),

    #[error("unsupported date format: {0}")]
    UnsupportedDateFormat(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// An embedded token or marker the portal used to serve is gone.
    #[error("portal markup changed: {0}")]
    PortalStructureChanged(String),

    #[error("schedule key not found in portal response")]
    KeyNotFound,

    #[error("portal returned an empty response for {0}")]
    EmptyPortalResponse(&'static str),

    #[error("temporary key is missing or too short")]
    InvalidKey,

    #[error("portal unavailable (HTTP {status})")]
    PortalUnavailable {
        status: u16,
        details: Option<String>,
    },

    #[error("portal rejected the request (HTTP {status})")]
    RequestRejected {
        status: u16,
        details: Option<String>,
    },

    #[error("portal request failed: {0}")]
    Transport(#[from] wreq::Error),

    #[error("unexpected portal payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl RelayError {
    /// Classify a non-success portal status. 5xx is the portal's problem,
    /// everything else below it is a rejection of what we sent.
    pub fn from_portal_status(status: u16, body: String) -> Self {
        let details = (!body.trim().is_empty()).then(|| preview(&body));
        if status >= 500 {
            Self::PortalUnavailable { status, details }
        } else {
            Self::RequestRejected { status, details }
        }
    }

    /// HTTP status the inbound API answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_)
            | Self::UnsupportedDateFormat(_)
            | Self::InvalidKey
            | Self::RequestRejected { .. } => 400,
            Self::AuthenticationFailed(_) => 401,
            Self::PortalStructureChanged(_)
            | Self::KeyNotFound
            | Self::EmptyPortalResponse(_)
            | Self::PortalUnavailable { .. }
            | Self::Transport(_)
            | Self::Payload(_) => 500,
        }
    }

    /// Portal-provided body, when the portal answered at all.
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::PortalUnavailable { details, .. } | Self::RequestRejected { details, .. } => {
                details.as_deref()
            }
            _ => None,
        }
    }
}

fn preview(body: &str) -> String {
    body.chars().take(500).collect()
}

#[cfg(feature = "server")]
mod response {
    use axum::Json;
    use axum::response::{IntoResponse, Response};
    use http::StatusCode;
    use serde_json::json;

    use super::RelayError;

    impl IntoResponse for RelayError {
        fn into_response(self) -> Response {
            let status = StatusCode::from_u16(self.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                tracing::error!("[relay] {}", self);
            } else {
                tracing::warn!("[relay] {}", self);
            }

            let mut body = json!({
                "success": false,
                "error": self.to_string(),
            });
            if let Some(details) = self.details() {
                body["details"] = json!(details);
            }
            (status, Json(body)).into_response()
        }
    }
}
