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

//! # Portal Relay
//!
//! Per-endpoint portal calls on behalf of a caller-held [`Session`]. The relay
//! holds no per-caller state; the session travels with every call.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RelayError, RelayResult};
use crate::flights_results_parser::{FlightRecord, parse_flights};
use crate::portal_client::{PortalClient, RelayConfig};
use crate::portal_dates::{normalize_date, previous_day};
use crate::session_negotiator::{Session, SessionNegotiator};

const CREW_ON_FLIGHT_PATH: &str = "/eCrew/FlightInformation/ShowCrewOnFlight";
const FLIGHT_INFO_PATH: &str = "/eCrew/FlightInformation/FetchFlightInfoAction";
const FLIGHT_INFO_REFERER: &str = "/eCrew/FlightInformation/FlightInfo";
const FLIGHT_INFORMATION_PATH: &str = "/eCrew/FlightInformation";

// Portal lookup modes for FetchFlightInfoAction
const OPTION_BY_FLIGHT_NUMBER: &str = "4";
const OPTION_BY_REGISTRATION: &str = "7";
const TIMES_IN_LOCAL: &str = "3";
const CARRIER_ID: u32 = 1;

/// Which leg to list the crew of.
#[derive(Debug, Clone)]
pub struct CrewQuery {
    pub flight_number: u32,
    pub dep_airport: Option<String>,
    /// Day as the portal numbers it; forwarded untouched.
    pub day: Value,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct CrewOnFlightRequest {
    leg_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct LegId<'a> {
    day: &'a Value,
    dep: &'a str,
    carrier: u32,
    flt: u32,
    leg_cd: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct FlightInfoRequest<'a> {
    #[serde(rename = "ACReg")]
    ac_reg: &'a str,
    #[serde(rename = "ACType")]
    ac_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    airport: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    arr_dep: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    carrier: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    flight_no: Option<&'a str>,
    for_date: &'a str,
    option_idx: &'a str,
    times_in: &'a str,
}

impl<'a> FlightInfoRequest<'a> {
    fn by_registration(registration: &'a str, wire_date: &'a str) -> Self {
        Self {
            ac_reg: registration,
            ac_type: "",
            airport: None,
            arr_dep: None,
            carrier: None,
            flight_no: None,
            for_date: wire_date,
            option_idx: OPTION_BY_REGISTRATION,
            times_in: TIMES_IN_LOCAL,
        }
    }

    fn by_flight_number(flight_number: &'a str, wire_date: &'a str) -> Self {
        Self {
            ac_reg: "",
            ac_type: "",
            airport: Some(""),
            arr_dep: Some(0),
            carrier: Some(""),
            flight_no: Some(flight_number),
            for_date: wire_date,
            option_idx: OPTION_BY_FLIGHT_NUMBER,
            times_in: TIMES_IN_LOCAL,
        }
    }
}

/// FetchFlightInfoAction answers with an array of grid rows, or with
/// anything else when it has nothing to say (an error page, an object).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlightInfoReply {
    Entries(Vec<Value>),
    Unexpected(Value),
}

impl FlightInfoReply {
    fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self::Unexpected(Value::String(body.into())))
    }

    fn into_flights(self) -> Vec<FlightRecord> {
        match self {
            Self::Entries(entries) => parse_flights(&entries),
            Self::Unexpected(value) => {
                let preview: String = value.to_string().chars().take(300).collect();
                tracing::warn!("[flight_info] Portal did not return flight entries: {}", preview);
                Vec::new()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CrewReply {
    Members(Vec<Value>),
    Unexpected(Value),
}

impl CrewReply {
    fn from_body(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_else(|_| Self::Unexpected(Value::String(body.into())))
    }

    fn into_members(self) -> Vec<Value> {
        match self {
            Self::Members(members) => members,
            Self::Unexpected(_) => {
                tracing::warn!("[crew_on_flight] Portal did not return a crew list");
                Vec::new()
            }
        }
    }
}

#[derive(Clone)]
pub struct PortalRelay {
    portal: PortalClient,
    negotiator: SessionNegotiator,
}

impl PortalRelay {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let portal = PortalClient::new(config)?;
        Ok(Self {
            negotiator: SessionNegotiator::new(portal.clone()),
            portal,
        })
    }

    /// Login and the schedule key chain.
    pub fn negotiator(&self) -> &SessionNegotiator {
        &self.negotiator
    }

    pub async fn crew_on_flight(
        &self,
        session: &Session,
        query: &CrewQuery,
    ) -> RelayResult<Vec<Value>> {
        let dep = query
            .dep_airport
            .as_deref()
            .filter(|airport| !airport.trim().is_empty())
            .unwrap_or(" ");
        let leg_id = serde_json::to_string(&LegId {
            day: &query.day,
            dep,
            carrier: CARRIER_ID,
            flt: query.flight_number,
            leg_cd: " ",
        })?;
        let referer = format!(
            "{}?eCrewHeader={}",
            FLIGHT_INFORMATION_PATH,
            urlencoding::encode(&session.session_header_token)
        );
        let response = self
            .portal
            .post_json_authorized(
                CREW_ON_FLIGHT_PATH,
                session,
                &referer,
                &CrewOnFlightRequest { leg_id },
            )
            .await?
            .error_for_status()?;

        let crew = CrewReply::from_body(&response.body).into_members();
        tracing::debug!(
            "[crew_on_flight] Flight {}: {} crew members",
            query.flight_number,
            crew.len()
        );
        Ok(crew)
    }

    /// Flights flown by one aircraft on a wire-format date.
    pub async fn flights_for_registration(
        &self,
        session: &Session,
        registration: &str,
        wire_date: &str,
    ) -> RelayResult<Vec<FlightRecord>> {
        let request = FlightInfoRequest::by_registration(registration, wire_date);
        self.fetch_flight_info(session, &request).await
    }

    /// Flights of several aircraft, looked up one after the other. An
    /// aircraft whose lookup fails is logged and left out.
    pub async fn flights_by_registrations(
        &self,
        session: &Session,
        registrations: &[String],
        date: &str,
    ) -> RelayResult<Vec<FlightRecord>> {
        let wire_date = normalize_date(date)?;
        let mut flights = Vec::new();
        for registration in registrations {
            match self
                .flights_for_registration(session, registration, &wire_date)
                .await
            {
                Ok(found) => {
                    tracing::debug!(
                        "[flights_by_registration] {}: {} flights",
                        registration,
                        found.len()
                    );
                    flights.extend(found);
                }
                Err(e) => {
                    tracing::warn!("[flights_by_registration] Skipping {}: {}", registration, e);
                }
            }
        }
        Ok(flights)
    }

    /// First leg matching a flight number. The portal files legs under the
    /// previous day, so the lookup date is shifted back by one.
    pub async fn flight_details(
        &self,
        session: &Session,
        flight_number: &str,
        date: &str,
    ) -> RelayResult<Option<FlightRecord>> {
        let lookup_date = previous_day(&normalize_date(date)?)?;
        let request = FlightInfoRequest::by_flight_number(flight_number, &lookup_date);
        let flights = self.fetch_flight_info(session, &request).await?;
        Ok(flights.into_iter().next())
    }

    async fn fetch_flight_info(
        &self,
        session: &Session,
        request: &FlightInfoRequest<'_>,
    ) -> RelayResult<Vec<FlightRecord>> {
        let response = self
            .portal
            .post_json_authorized(FLIGHT_INFO_PATH, session, FLIGHT_INFO_REFERER, request)
            .await?;
        if !response.is_success() {
            return Err(RelayError::from_portal_status(response.status, response.body));
        }
        Ok(FlightInfoReply::from_body(&response.body).into_flights())
    }
}
