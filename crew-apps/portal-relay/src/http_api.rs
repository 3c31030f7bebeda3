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

//! # Relay HTTP API
//!
//! JSON endpoints the crew apps call. Handlers only validate input and shape
//! output; every portal call goes through [`PortalRelay`]. Input is checked
//! completely before the portal is contacted.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::error::{RelayError, RelayResult};
use crate::portal_relay::{CrewQuery, PortalRelay};
use crate::session_negotiator::{RetrievalKey, ScheduleKey, Session};

type ApiResult = RelayResult<Json<Value>>;

pub fn router(relay: Arc<PortalRelay>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/login", post(login))
        .route("/api/crew-on-flight", post(crew_on_flight))
        .route("/api/crew", post(crew_on_flight))
        .route("/api/flights-by-registration", post(flights_by_registration))
        .route("/api/flights", post(flights_by_registration))
        .route("/api/flight-details", post(flight_details))
        .route("/api/get-schedule-key", post(schedule_key))
        .route("/api/get-crew-schedule-key", post(schedule_key))
        .route("/api/retrieve-schedule-data", post(retrieve_schedule_data))
        .route("/api/get-scheduler-events", post(scheduler_events))
        .with_state(relay)
}

/// Flight numbers arrive as JSON numbers or as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlightNumberInput {
    Number(u64),
    Text(String),
}

impl FlightNumberInput {
    fn as_text(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s.trim().to_string(),
        }
    }

    /// Leading digits as a number, the way the portal's own form reads it.
    fn as_number(&self) -> Option<u32> {
        match self {
            Self::Number(n) => u32::try_from(*n).ok(),
            Self::Text(s) => {
                let digits: String = s
                    .trim()
                    .chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                digits.parse().ok()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest {
    crew_id: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrewOnFlightRequest {
    session: Option<Session>,
    flight_number: Option<FlightNumberInput>,
    dep_airport: Option<String>,
    day: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightsByRegistrationRequest {
    session: Option<Session>,
    matriculas: Option<Vec<String>>,
    fecha: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlightDetailsRequest {
    session: Option<Session>,
    flight_number: Option<FlightNumberInput>,
    fecha: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleKeyRequest {
    session: Option<Session>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetrieveScheduleRequest {
    session: Option<Session>,
    initial_key: Option<String>,
    from_date: Option<String>,
    to_date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerEventsRequest {
    session: Option<Session>,
    temp_key: Option<String>,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> RelayResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| RelayError::Validation(rejection.body_text()))
}

fn required(value: Option<String>, field: &str) -> RelayResult<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RelayError::Validation(format!("missing required field: {field}")))
}

fn required_session(session: Option<Session>) -> RelayResult<Session> {
    session
        .filter(Session::is_complete)
        .ok_or_else(|| RelayError::Validation("missing required field: session".into()))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

async fn login(
    State(relay): State<Arc<PortalRelay>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let crew_id = required(request.crew_id, "crewId")?;
    let password = required(request.password, "password")?;

    let session = relay.negotiator().login(crew_id.trim(), &password).await?;
    Ok(Json(json!({ "success": true, "session": session })))
}

async fn crew_on_flight(
    State(relay): State<Arc<PortalRelay>>,
    payload: Result<Json<CrewOnFlightRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let session = required_session(request.session)?;
    let flight_number = request
        .flight_number
        .ok_or_else(|| RelayError::Validation("missing required field: flightNumber".into()))?
        .as_number()
        .ok_or_else(|| RelayError::Validation("flightNumber must start with digits".into()))?;
    let day = request
        .day
        .filter(|day| !day.is_null())
        .ok_or_else(|| RelayError::Validation("missing required field: day".into()))?;

    let query = CrewQuery {
        flight_number,
        dep_airport: request.dep_airport,
        day,
    };
    let crew = relay.crew_on_flight(&session, &query).await?;
    Ok(Json(json!({ "crew": crew })))
}

async fn flights_by_registration(
    State(relay): State<Arc<PortalRelay>>,
    payload: Result<Json<FlightsByRegistrationRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let session = required_session(request.session)?;
    let registrations = request
        .matriculas
        .ok_or_else(|| RelayError::Validation("missing required field: matriculas".into()))?;
    let date = required(request.fecha, "fecha")?;

    let flights = relay
        .flights_by_registrations(&session, &registrations, &date)
        .await?;
    Ok(Json(json!({ "vuelos": flights })))
}

async fn flight_details(
    State(relay): State<Arc<PortalRelay>>,
    payload: Result<Json<FlightDetailsRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let session = required_session(request.session)?;
    let flight_number = required(
        request.flight_number.map(|n| n.as_text()),
        "flightNumber",
    )?;
    let date = required(request.fecha, "fecha")?;

    let details = relay.flight_details(&session, &flight_number, &date).await?;
    Ok(Json(json!({ "success": true, "details": details })))
}

async fn schedule_key(
    State(relay): State<Arc<PortalRelay>>,
    payload: Result<Json<ScheduleKeyRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let session = required_session(request.session)?;

    let key = relay.negotiator().fetch_schedule_key(&session).await?;
    Ok(Json(json!({ "success": true, "key": key })))
}

async fn retrieve_schedule_data(
    State(relay): State<Arc<PortalRelay>>,
    payload: Result<Json<RetrieveScheduleRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let session = required_session(request.session)?;
    let initial_key = ScheduleKey::from(required(request.initial_key, "initialKey")?);
    let from_date = required(request.from_date, "fromDate")?;
    let to_date = required(request.to_date, "toDate")?;

    let temp_key = relay
        .negotiator()
        .retrieve_schedule_data(&session, &initial_key, &from_date, &to_date)
        .await?;
    Ok(Json(json!({ "success": true, "tempKey": temp_key })))
}

async fn scheduler_events(
    State(relay): State<Arc<PortalRelay>>,
    payload: Result<Json<SchedulerEventsRequest>, JsonRejection>,
) -> ApiResult {
    let request = body(payload)?;
    let temp_key = RetrievalKey::from(request.temp_key.ok_or(RelayError::InvalidKey)?);
    let session = required_session(request.session)?;

    let events = relay
        .negotiator()
        .fetch_scheduler_events(&session, &temp_key)
        .await?;
    Ok(Json(json!({ "success": true, "events": events })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flight_number_forms() {
        let n: FlightNumberInput = serde_json::from_value(json!(3842)).unwrap();
        assert_eq!(n.as_number(), Some(3842));
        assert_eq!(n.as_text(), "3842");

        let n: FlightNumberInput = serde_json::from_value(json!(" 3842A ")).unwrap();
        assert_eq!(n.as_number(), Some(3842));
        assert_eq!(n.as_text(), "3842A");

        let n: FlightNumberInput = serde_json::from_value(json!("IB3842")).unwrap();
        assert_eq!(n.as_number(), None);
    }

    #[test]
    fn required_rejects_blank() {
        assert!(required(Some("  ".into()), "fecha").is_err());
        assert!(required(None, "fecha").is_err());
        assert_eq!(required(Some("x".into()), "fecha").unwrap(), "x");
    }

    #[test]
    fn incomplete_session_is_rejected() {
        let session = Session {
            session_cookie: String::new(),
            session_header_token: "1234-5678-4abc-8def".into(),
        };
        assert!(matches!(
            required_session(Some(session)),
            Err(RelayError::Validation(_))
        ));
    }
}
