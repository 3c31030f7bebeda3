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

//! # Flights Results Parser
//!
//! Side-effect free parsing of the portal's flight information entries.
//! Every field of an entry is an HTML fragment rendered for the portal's own
//! grid; this module pulls times, registration, gate and the rest out of it
//! and derives the flight status.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

/// Wire value for any field the portal did not provide.
pub const UNKNOWN: &str = "---";
const CARRIER_PREFIX: &str = "IBS";
const DEFAULT_GATE: &str = "-/-";
const DEFAULT_PASSENGERS: &str = "0/0";

static SCHEDULED_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<span style=['"]padding-left:\s*15px;?['"]>([0-9]{4})</span>"#).unwrap()
});
static ACTUAL_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<span style=['"]padding-left:\s*15px;?['"]>A([0-9]{4})</span>"#).unwrap()
});
static ESTIMATED_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<span style=['"]padding-left:\s*15px;?['"]>E([0-9]{4})</span>"#).unwrap()
});
static FLIGHT_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z0-9]{1,6}$").unwrap());
static REGISTRATION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"EC[A-Z0-9]{3}").unwrap());
static GATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<span>([^<]+)</span>\s*<br\s*/?>\s*<span>([^<]+)</span>").unwrap()
});
static FIRST_SPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<span>([^<]+)</span>").unwrap());
static IATA_SPAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<span>([A-Z]{3})\s</span>").unwrap());
static IATA_TRAILING_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Z]{3})\s*</span>").unwrap());

/// Why a single entry was left out of the parsed batch.
#[derive(Debug, Error)]
pub enum FlightParseError {
    #[error("entry is not a flight record: {0}")]
    Shape(#[from] serde_json::Error),
    #[error("entry carries no flight number, scheduled time, registration or airport")]
    Unidentifiable,
}

/// One row of the portal's flight information grid, as sent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFlightEntry {
    #[serde(default)]
    pub departure: Option<String>,
    #[serde(default)]
    pub arrival: Option<String>,
    #[serde(default)]
    pub registrations: Option<String>,
    #[serde(default)]
    pub flight: Option<String>,
    #[serde(default)]
    pub stand_gate: Option<String>,
    #[serde(default)]
    pub passengers: Option<String>,
}

/// 24h clock value the portal writes as four digits, `HHMM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn parse(hhmm: &str) -> Option<Self> {
        if hhmm.len() != 4 || !hhmm.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        hhmm.parse().ok().map(Self)
    }

    pub fn minutes_since_midnight(self) -> i32 {
        i32::from(self.0 / 100) * 60 + i32::from(self.0 % 100)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightPhase {
    Scheduled,
    InFlight,
    Completed,
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scheduled => "Scheduled",
            Self::InFlight => "In flight",
            Self::Completed => "Completed",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayNote {
    Delayed { minutes: i32 },
    OnTime,
}

impl fmt::Display for DelayNote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delayed { minutes } => write!(f, "(Delay +{minutes} min)"),
            Self::OnTime => f.write_str("(On time)"),
        }
    }
}

/// Phase plus optional delay note, serialized as one string such as
/// `Completed (Delay +15 min)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlightStatus {
    pub phase: FlightPhase,
    pub note: Option<DelayNote>,
}

impl fmt::Display for FlightStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.note {
            Some(note) => write!(f, "{} {}", self.phase, note),
            None => write!(f, "{}", self.phase),
        }
    }
}

impl Serialize for FlightStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlightRecord {
    #[serde(serialize_with = "or_unknown")]
    pub aircraft_registration: Option<String>,
    pub flight_number: String,
    #[serde(serialize_with = "or_unknown")]
    pub scheduled_departure: Option<TimeOfDay>,
    #[serde(serialize_with = "or_unknown")]
    pub actual_departure: Option<TimeOfDay>,
    #[serde(serialize_with = "or_unknown")]
    pub scheduled_arrival: Option<TimeOfDay>,
    #[serde(serialize_with = "or_unknown")]
    pub actual_arrival: Option<TimeOfDay>,
    #[serde(serialize_with = "or_unknown")]
    pub estimated_arrival: Option<TimeOfDay>,
    #[serde(serialize_with = "or_unknown")]
    pub arrival_time_in_use: Option<TimeOfDay>,
    pub status: FlightStatus,
    pub gate: String,
    pub passengers: String,
    #[serde(serialize_with = "or_unknown")]
    pub origin: Option<String>,
    #[serde(serialize_with = "or_unknown")]
    pub destination: Option<String>,
}

fn or_unknown<T: fmt::Display, S: Serializer>(
    value: &Option<T>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => serializer.collect_str(v),
        None => serializer.serialize_str(UNKNOWN),
    }
}

/// Parse a batch of portal entries.
///
/// Entries are independent: a broken one is logged and dropped, the rest of
/// the batch still comes through.
pub fn parse_flights(entries: &[Value]) -> Vec<FlightRecord> {
    let mut flights = Vec::with_capacity(entries.len());
    for entry in entries {
        match parse_flight_entry(entry) {
            Ok(record) => flights.push(record),
            Err(e) => tracing::warn!("[parse_flights] Skipping entry ({}): {}", e, entry),
        }
    }
    tracing::debug!(
        "[parse_flights] Parsed {} of {} entries",
        flights.len(),
        entries.len()
    );
    flights
}

pub fn parse_flight_entry(entry: &Value) -> Result<FlightRecord, FlightParseError> {
    RawFlightEntry::deserialize(entry)?.parse()
}

impl RawFlightEntry {
    pub fn parse(&self) -> Result<FlightRecord, FlightParseError> {
        let departure = self.departure.as_deref().unwrap_or_default();
        let arrival = self.arrival.as_deref().unwrap_or_default();

        let scheduled_departure = capture_time(&SCHEDULED_TIME_RE, departure);
        let actual_departure = capture_time(&ACTUAL_TIME_RE, departure);
        let scheduled_arrival = capture_time(&SCHEDULED_TIME_RE, arrival);
        let actual_arrival = capture_time(&ACTUAL_TIME_RE, arrival);
        let estimated_arrival = capture_time(&ESTIMATED_TIME_RE, arrival);

        let flight_code = self
            .flight
            .as_deref()
            .map(strip_markup)
            .filter(|text| is_flight_code(text));
        let aircraft_registration = self
            .registrations
            .as_deref()
            .and_then(|r| REGISTRATION_RE.find(r))
            .map(|m| m.as_str().to_string());
        let origin = extract_iata(departure);
        let destination = extract_iata(arrival);

        if flight_code.is_none()
            && scheduled_departure.is_none()
            && scheduled_arrival.is_none()
            && aircraft_registration.is_none()
            && origin.is_none()
            && destination.is_none()
        {
            return Err(FlightParseError::Unidentifiable);
        }
        let flight_number = format!(
            "{CARRIER_PREFIX}{}",
            flight_code.as_deref().unwrap_or(UNKNOWN)
        );

        let (phase, arrival_time_in_use) = derive_phase(
            actual_departure,
            actual_arrival,
            scheduled_arrival,
            estimated_arrival,
        );
        let status = FlightStatus {
            phase,
            note: delay_note(phase, scheduled_arrival, arrival_time_in_use),
        };

        Ok(FlightRecord {
            aircraft_registration,
            flight_number,
            scheduled_departure,
            actual_departure,
            scheduled_arrival,
            actual_arrival,
            estimated_arrival,
            arrival_time_in_use,
            status,
            gate: self
                .stand_gate
                .as_deref()
                .and_then(extract_gate)
                .unwrap_or_else(|| DEFAULT_GATE.to_string()),
            passengers: self
                .passengers
                .as_deref()
                .and_then(extract_first_span)
                .unwrap_or_else(|| DEFAULT_PASSENGERS.to_string()),
            origin,
            destination,
        })
    }
}

/// Status and the arrival time it should be judged against, from which
/// actual times the portal has already recorded.
pub fn derive_phase(
    actual_departure: Option<TimeOfDay>,
    actual_arrival: Option<TimeOfDay>,
    scheduled_arrival: Option<TimeOfDay>,
    estimated_arrival: Option<TimeOfDay>,
) -> (FlightPhase, Option<TimeOfDay>) {
    match (actual_departure, actual_arrival) {
        (None, None) => (FlightPhase::Scheduled, scheduled_arrival),
        (Some(_), None) => (FlightPhase::InFlight, estimated_arrival.or(scheduled_arrival)),
        (_, Some(actual)) => (FlightPhase::Completed, Some(actual)),
    }
}

pub fn delay_note(
    phase: FlightPhase,
    scheduled_arrival: Option<TimeOfDay>,
    arrival_in_use: Option<TimeOfDay>,
) -> Option<DelayNote> {
    if phase == FlightPhase::Scheduled {
        return None;
    }
    let delay = arrival_in_use?.minutes_since_midnight()
        - scheduled_arrival?.minutes_since_midnight();
    match phase {
        _ if delay > 0 => Some(DelayNote::Delayed { minutes: delay }),
        FlightPhase::Completed => Some(DelayNote::OnTime),
        _ => None,
    }
}

fn capture_time(re: &Regex, html: &str) -> Option<TimeOfDay> {
    re.captures(html)
        .and_then(|caps| caps.get(1))
        .and_then(|m| TimeOfDay::parse(m.as_str()))
}

/// Flight designator without the carrier: up to six capitals or digits, at
/// least one digit.
fn is_flight_code(text: &str) -> bool {
    FLIGHT_CODE_RE.is_match(text) && text.bytes().any(|b| b.is_ascii_digit())
}

fn strip_markup(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let text: String = fragment.root_element().text().collect();
    text.trim().to_string()
}

fn extract_gate(html: &str) -> Option<String> {
    GATE_RE
        .captures(html)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().trim().to_string())
        .filter(|gate| !gate.is_empty())
}

fn extract_first_span(html: &str) -> Option<String> {
    FIRST_SPAN_RE
        .captures(html)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn extract_iata(html: &str) -> Option<String> {
    IATA_SPAN_RE
        .captures(html)
        .or_else(|| IATA_TRAILING_RE.captures(html))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn t(hhmm: &str) -> Option<TimeOfDay> {
        TimeOfDay::parse(hhmm)
    }

    fn time_span(value: &str) -> String {
        format!("<span style='padding-left: 15px'>{value}</span>")
    }

    #[test]
    fn test_minutes_since_midnight() {
        assert_eq!(t("0130").unwrap().minutes_since_midnight(), 90);
        assert_eq!(t("0000").unwrap().minutes_since_midnight(), 0);
        assert_eq!(t("2359").unwrap().minutes_since_midnight(), 1439);
        assert_eq!(t("0905").unwrap().to_string(), "0905");
    }

    #[test]
    fn test_time_of_day_rejects_garbage() {
        assert!(t("130").is_none());
        assert!(t("12:30").is_none());
        assert!(t("---").is_none());
        assert!(t("+123").is_none());
    }

    #[test]
    fn test_phase_table() {
        assert_eq!(
            derive_phase(None, None, t("1000"), t("1010")),
            (FlightPhase::Scheduled, t("1000"))
        );
        assert_eq!(
            derive_phase(t("0900"), None, t("1000"), t("1010")),
            (FlightPhase::InFlight, t("1010"))
        );
        assert_eq!(
            derive_phase(t("0900"), None, t("1000"), None),
            (FlightPhase::InFlight, t("1000"))
        );
        assert_eq!(
            derive_phase(t("0900"), t("1005"), t("1000"), t("1010")),
            (FlightPhase::Completed, t("1005"))
        );
        // An arrival without a recorded departure still means the leg is done
        assert_eq!(
            derive_phase(None, t("1005"), t("1000"), None),
            (FlightPhase::Completed, t("1005"))
        );
    }

    #[test]
    fn test_delay_notes() {
        assert_eq!(
            delay_note(FlightPhase::Completed, t("1000"), t("1015")),
            Some(DelayNote::Delayed { minutes: 15 })
        );
        assert_eq!(
            delay_note(FlightPhase::Completed, t("1000"), t("0955")),
            Some(DelayNote::OnTime)
        );
        assert_eq!(
            delay_note(FlightPhase::Completed, t("1000"), t("1000")),
            Some(DelayNote::OnTime)
        );
        assert_eq!(
            delay_note(FlightPhase::InFlight, t("1000"), t("1040")),
            Some(DelayNote::Delayed { minutes: 40 })
        );
        assert_eq!(delay_note(FlightPhase::InFlight, t("1000"), t("0950")), None);
        assert_eq!(delay_note(FlightPhase::Scheduled, t("1000"), t("1100")), None);
        assert_eq!(delay_note(FlightPhase::Completed, None, t("1100")), None);
    }

    #[test]
    fn test_status_rendering() {
        let status = FlightStatus {
            phase: FlightPhase::Completed,
            note: Some(DelayNote::Delayed { minutes: 15 }),
        };
        assert_eq!(status.to_string(), "Completed (Delay +15 min)");
        let status = FlightStatus {
            phase: FlightPhase::Completed,
            note: Some(DelayNote::OnTime),
        };
        assert_eq!(status.to_string(), "Completed (On time)");
    }

    #[test]
    fn test_extractors() {
        assert_eq!(
            extract_gate("<span>T4</span><br><span>B12</span>").as_deref(),
            Some("B12")
        );
        assert_eq!(extract_gate("<span>T4</span>"), None);
        assert_eq!(
            extract_first_span("<span>172/180</span><span>x</span>").as_deref(),
            Some("172/180")
        );
        assert_eq!(extract_iata("<span>MAD </span>").as_deref(), Some("MAD"));
        assert_eq!(extract_iata("<div>to <b>BCN</span>").as_deref(), Some("BCN"));
        assert_eq!(extract_iata("<span>1000</span>"), None);
        assert_eq!(strip_markup(" <b>38</b><i>42</i> "), "3842");
        assert!(is_flight_code("3842"));
        assert!(is_flight_code("384A"));
        assert!(!is_flight_code("%%%%"));
        assert!(!is_flight_code("ABC"));
        assert!(!is_flight_code("1234567"));
    }

    #[test]
    fn test_completed_leg_with_delay() {
        let entry = json!({
            "departure": format!("<span>MAD </span>{}{}", time_span("1000"), time_span("A1012")),
            "arrival": format!("<span>BCN </span>{}{}", time_span("1115"), time_span("A1130")),
            "registrations": "<span>ECMKV</span>",
            "flight": "<b>3842</b>",
            "stand_gate": "<span>T4</span><br><span>B12</span>",
            "passengers": "<span>172/180</span>",
        });
        let record = parse_flight_entry(&entry).unwrap();

        assert_eq!(record.aircraft_registration.as_deref(), Some("ECMKV"));
        assert_eq!(record.flight_number, "IBS3842");
        assert_eq!(record.scheduled_departure, t("1000"));
        assert_eq!(record.actual_departure, t("1012"));
        assert_eq!(record.arrival_time_in_use, t("1130"));
        assert_eq!(record.status.to_string(), "Completed (Delay +15 min)");
        assert_eq!(record.gate, "B12");
        assert_eq!(record.passengers, "172/180");
        assert_eq!(record.origin.as_deref(), Some("MAD"));
        assert_eq!(record.destination.as_deref(), Some("BCN"));
    }

    #[test]
    fn test_defaults_serialize_as_unknown() {
        let entry = json!({
            "departure": time_span("0700"),
            "flight": "<span>101</span>",
        });
        let record = parse_flight_entry(&entry).unwrap();
        let value = serde_json::to_value(&record).unwrap();

        assert_eq!(value["aircraftRegistration"], UNKNOWN);
        assert_eq!(value["scheduledDeparture"], "0700");
        assert_eq!(value["actualDeparture"], UNKNOWN);
        assert_eq!(value["arrivalTimeInUse"], UNKNOWN);
        assert_eq!(value["status"], "Scheduled");
        assert_eq!(value["gate"], "-/-");
        assert_eq!(value["passengers"], "0/0");
        assert_eq!(value["origin"], UNKNOWN);
    }

    #[test]
    fn test_malformed_entries_are_dropped() {
        let entries = vec![
            json!({ "departure": 42, "arrival": ["x"], "flight": {} }),
            json!("not an object"),
            json!({ "departure": "garbage", "arrival": "garbage", "flight": "<br>" }),
            json!({ "flight": "<b>200</b>" }),
        ];
        let flights = parse_flights(&entries);
        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].flight_number, "IBS200");
    }

    #[test]
    fn test_all_garbage_fields_are_dropped() {
        let garbage = json!({
            "departure": "%%%%",
            "arrival": "%%%%",
            "registrations": "%%%%",
            "flight": "%%%%",
            "stand_gate": "%%%%",
            "passengers": "%%%%",
        });
        assert!(matches!(
            parse_flight_entry(&garbage),
            Err(FlightParseError::Unidentifiable)
        ));
        assert!(parse_flights(&[garbage]).is_empty());
    }

    #[test]
    fn test_unreadable_flight_text_kept_when_leg_is_identified() {
        let entry = json!({
            "registrations": "<span>ECNXA</span>",
            "flight": "<b>n/a</b>",
        });
        let record = parse_flight_entry(&entry).unwrap();
        assert_eq!(record.flight_number, "IBS---");
        assert_eq!(record.aircraft_registration.as_deref(), Some("ECNXA"));
    }
}
