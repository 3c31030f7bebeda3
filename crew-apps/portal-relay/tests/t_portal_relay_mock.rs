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

//! Session negotiation and relay calls against the in-process mock portal.


use crew_portal_relay::{
    PortalRelay, RelayConfig, RelayError, RetrievalKey, ScheduleKey, Session,
};
use mock_portal::{
    CREW_ID, EVENTS_BODY, FAILING_REGISTRATION, MockPortal, PASSWORD, REJECTED_TEMP_KEY,
    SCHEDULE_KEY, SESSION_COOKIE, TEMP_KEY, UNAVAILABLE_TEMP_KEY,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
            .with_writer(std::io::stderr)
            .with_env_filter(EnvFilter::new("debug"))
            .init();
    });
}

async fn setup() -> (MockPortal, PortalRelay) {
    init_tracing();
    let portal = MockPortal::spawn().await;
    let relay = PortalRelay::new(&RelayConfig::with_portal_url(portal.base_url.clone()))
        .expect("relay builds");
    (portal, relay)
}

async fn logged_in(relay: &PortalRelay) -> Session {
    relay
        .negotiator()
        .login(CREW_ID, PASSWORD)
        .await
        .expect("login succeeds")
}

#[tokio::test]
async fn test_login_handshake() {
    let (portal, relay) = setup().await;
    let session = logged_in(&relay).await;

    assert_eq!(
        session.session_cookie,
        format!("{SESSION_COOKIE}; .ASPXAUTH=mock-auth")
    );
    let calls = portal.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].path, "/eCrew");
    assert_eq!(calls[1].path, "/eCrew/Login/Xy_12-z");
    assert_eq!(
        calls[1].header_token.as_deref(),
        Some(session.session_header_token.as_str())
    );
    // Plaintext never leaves the relay
    assert_ne!(calls[1].body["password"], PASSWORD);
    assert_eq!(calls[1].body["chk"], "");
    assert_eq!(calls[1].body["hotp"], "");
}

#[tokio::test]
async fn test_login_with_bad_password() {
    let (_portal, relay) = setup().await;
    let result = relay.negotiator().login(CREW_ID, "wrong").await;
    assert!(matches!(result, Err(RelayError::AuthenticationFailed(_))));
}

#[tokio::test]
async fn test_login_page_drift() {
    let (portal, relay) = setup().await;
    portal.drift_markup();
    let result = relay.negotiator().login(CREW_ID, PASSWORD).await;
    assert!(matches!(result, Err(RelayError::PortalStructureChanged(_))));
    // Credentials are never submitted when the page is not understood
    assert_eq!(portal.call_count(), 1);
}

#[tokio::test]
async fn test_login_page_http_errors() {
    let (portal, relay) = setup().await;

    portal.fail_login_page(404);
    let result = relay.negotiator().login(CREW_ID, PASSWORD).await;
    assert!(matches!(result, Err(RelayError::PortalStructureChanged(_))));

    portal.fail_login_page(503);
    let result = relay.negotiator().login(CREW_ID, PASSWORD).await;
    assert!(matches!(
        result,
        Err(RelayError::PortalUnavailable { status: 503, .. })
    ));
    assert_eq!(portal.call_count(), 2);
}

#[tokio::test]
async fn test_schedule_key_chain() {
    let (portal, relay) = setup().await;
    let session = logged_in(&relay).await;
    let negotiator = relay.negotiator();

    let key = negotiator.fetch_schedule_key(&session).await.unwrap();
    assert_eq!(key.as_str(), SCHEDULE_KEY);

    let temp_key = negotiator
        .retrieve_schedule_data(&session, &key, "01/08/2025", "31/08/2025")
        .await
        .unwrap();
    assert_eq!(temp_key.as_str(), TEMP_KEY);

    let events = negotiator
        .fetch_scheduler_events(&session, &temp_key)
        .await
        .unwrap();
    assert_eq!(events.as_str(), EVENTS_BODY);

    let retrieve = portal
        .calls()
        .into_iter()
        .find(|call| call.path == "/eCrew/CrewSchedule/Retrieve")
        .expect("retrieve was called");
    let range: serde_json::Value =
        serde_json::from_str(retrieve.body["Data"].as_str().unwrap()).unwrap();
    assert_eq!(
        range,
        json!({
            "FromDate": "01/08/2025",
            "ToDate": "31/08/2025",
            "Timesin": "3",
            "CrewIDS": "",
            "PeriodSelect": false,
        })
    );
}

#[tokio::test]
async fn test_schedule_key_not_found() {
    let (portal, relay) = setup().await;
    let session = logged_in(&relay).await;
    portal.drift_markup();
    let result = relay.negotiator().fetch_schedule_key(&session).await;
    assert!(matches!(result, Err(RelayError::KeyNotFound)));
}

#[tokio::test]
async fn test_retrieve_with_unknown_key_is_empty() {
    let (_portal, relay) = setup().await;
    let session = logged_in(&relay).await;
    let result = relay
        .negotiator()
        .retrieve_schedule_data(
            &session,
            &ScheduleKey::from("stale".to_string()),
            "01/08/2025",
            "31/08/2025",
        )
        .await;
    assert!(matches!(result, Err(RelayError::EmptyPortalResponse(_))));
}

#[tokio::test]
async fn test_scheduler_events_errors() {
    let (portal, relay) = setup().await;
    let session = logged_in(&relay).await;
    let negotiator = relay.negotiator();

    let result = negotiator
        .fetch_scheduler_events(&session, &RetrievalKey::from("short".to_string()))
        .await;
    assert!(matches!(result, Err(RelayError::InvalidKey)));
    assert_eq!(portal.call_count(), 2, "short keys never reach the portal");

    let result = negotiator
        .fetch_scheduler_events(&session, &RetrievalKey::from(REJECTED_TEMP_KEY.to_string()))
        .await;
    assert!(matches!(
        result,
        Err(RelayError::RequestRejected { status: 403, .. })
    ));

    let result = negotiator
        .fetch_scheduler_events(
            &session,
            &RetrievalKey::from(UNAVAILABLE_TEMP_KEY.to_string()),
        )
        .await;
    assert!(matches!(
        result,
        Err(RelayError::PortalUnavailable { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_multi_registration_partial_success() {
    let (portal, relay) = setup().await;
    let session = logged_in(&relay).await;
    let registrations = vec![
        "ECMKV".to_string(),
        FAILING_REGISTRATION.to_string(),
        "ECNXA".to_string(),
    ];

    let flights = relay
        .flights_by_registrations(&session, &registrations, "5/8/2025")
        .await
        .unwrap();

    // Two legs per aircraft, the malformed third row and the failing aircraft
    // are left out
    assert_eq!(flights.len(), 4);
    assert_eq!(flights[0].aircraft_registration.as_deref(), Some("ECMKV"));
    assert_eq!(flights[2].aircraft_registration.as_deref(), Some("ECNXA"));
    assert_eq!(flights[0].status.to_string(), "Completed (Delay +20 min)");

    let lookups: Vec<_> = portal
        .calls()
        .into_iter()
        .filter(|call| call.path == "/eCrew/FlightInformation/FetchFlightInfoAction")
        .collect();
    assert_eq!(lookups.len(), 3);
    for (call, registration) in lookups.iter().zip(&registrations) {
        assert_eq!(call.body["ACReg"], registration.as_str());
        assert_eq!(call.body["ForDate"], "05/08/2025");
        assert_eq!(call.body["OptionIdx"], "7");
    }
}

#[tokio::test]
async fn test_flight_details_uses_previous_day() {
    let (portal, relay) = setup().await;
    let session = logged_in(&relay).await;

    let details = relay
        .flight_details(&session, "3842", "1/3/2025")
        .await
        .unwrap()
        .expect("one leg found");
    assert_eq!(details.flight_number, "IBS3842");
    assert_eq!(details.destination.as_deref(), Some("LIS"));

    let call = portal.calls().pop().unwrap();
    assert_eq!(call.body["ForDate"], "28/02/2025");
    assert_eq!(call.body["FlightNo"], "3842");
    assert_eq!(call.body["OptionIdx"], "4");
}

#[tokio::test]
async fn test_expired_session_yields_no_flights() {
    let (_portal, relay) = setup().await;
    let session = Session {
        session_cookie: "ASP.NET_SessionId=expired".into(),
        session_header_token: "0000-0000-4000-8000".into(),
    };
    let flights = relay
        .flights_by_registrations(&session, &["ECMKV".to_string()], "05/08/2025")
        .await
        .unwrap();
    assert!(flights.is_empty());
}

#[tokio::test]
async fn test_crew_on_flight() {
    let (portal, relay) = setup().await;
    let session = logged_in(&relay).await;

    let crew = relay
        .crew_on_flight(
            &session,
            &crew_portal_relay::CrewQuery {
                flight_number: 3800,
                dep_airport: None,
                day: json!(20305),
            },
        )
        .await
        .unwrap();
    assert_eq!(crew.len(), 2);
    assert_eq!(crew[0]["role"], "CP");

    let call = portal.calls().pop().unwrap();
    let leg: serde_json::Value = serde_json::from_str(call.body["LegId"].as_str().unwrap()).unwrap();
    assert_eq!(
        leg,
        json!({ "Day": 20305, "Dep": " ", "Carrier": 1, "Flt": 3800, "LegCd": " " })
    );

    let crew = relay
        .crew_on_flight(
            &session,
            &crew_portal_relay::CrewQuery {
                flight_number: 1,
                dep_airport: Some("MAD".into()),
                day: json!(20305),
            },
        )
        .await
        .unwrap();
    assert!(crew.is_empty());
}
