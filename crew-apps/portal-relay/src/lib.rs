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

// Library for crew-portal-relay
// Session relay and flight-state parser for the AIMS eCrew portal

mod error;
mod flights_results_parser;
#[cfg(feature = "server")]
mod http_api;
mod portal_client;
mod portal_dates;
mod portal_relay;
mod session_negotiator;

pub use error::{RelayError, RelayResult};

// Re-export the parser surface
pub use flights_results_parser::{
    DelayNote, FlightParseError, FlightPhase, FlightRecord, FlightStatus, RawFlightEntry,
    TimeOfDay, UNKNOWN, delay_note, derive_phase, parse_flight_entry, parse_flights,
};

#[cfg(feature = "server")]
pub use http_api::router;
pub use portal_client::{DEFAULT_PORTAL_URL, PortalClient, PortalResponse, RelayConfig, USER_AGENT};
pub use portal_dates::{normalize_date, previous_day};
pub use portal_relay::{CrewQuery, PortalRelay};
pub use session_negotiator::{
    LoginTokens, NegotiationStage, RetrievalKey, ScheduleKey, SchedulerEvents, Session,
    SessionNegotiator, extract_schedule_key, generate_header_token, password_digest,
};
