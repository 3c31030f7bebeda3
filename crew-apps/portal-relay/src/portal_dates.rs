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

//! # Portal Dates
//!
//! The portal only understands `DD/MM/YYYY`. Callers send whatever their
//! date picker produced.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{RelayError, RelayResult};

const WIRE_FORMAT: &str = "%d/%m/%Y";

static DAY_FIRST_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})([/.\-])(\d{1,2})([/.\-])(\d{4})$").unwrap());
static ISO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap());

/// Convert a date to the portal's wire format.
///
/// Accepts `DD/MM/YYYY` as is, `D/M/YYYY` (also with `-` or `.`) and ISO
/// `YYYY-MM-DD`. The date has to exist on the calendar.
pub fn normalize_date(input: &str) -> RelayResult<String> {
    let input = input.trim();
    let unsupported = || RelayError::UnsupportedDateFormat(input.to_string());

    let (year, month, day) = if let Some(caps) = DAY_FIRST_RE.captures(input) {
        // "1/2-2025" is not a date
        if caps[2] != caps[4] {
            return Err(unsupported());
        }
        (&caps[5], &caps[3], &caps[1])
    } else if let Some(caps) = ISO_RE.captures(input) {
        (
            caps.get(1).map_or("", |m| m.as_str()),
            caps.get(2).map_or("", |m| m.as_str()),
            caps.get(3).map_or("", |m| m.as_str()),
        )
    } else {
        return Err(unsupported());
    };

    let (Ok(year), Ok(month), Ok(day)) = (
        year.parse::<i32>(),
        month.parse::<u32>(),
        day.parse::<u32>(),
    ) else {
        return Err(unsupported());
    };
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(unsupported)?;
    Ok(date.format(WIRE_FORMAT).to_string())
}

/// The day before a wire-format date.
///
/// Flight info lookups are keyed one day earlier on the portal side.
pub fn previous_day(date: &str) -> RelayResult<String> {
    let parsed = NaiveDate::parse_from_str(date.trim(), WIRE_FORMAT)
        .map_err(|_| RelayError::UnsupportedDateFormat(date.to_string()))?;
    let previous = parsed
        .pred_opt()
        .ok_or_else(|| RelayError::UnsupportedDateFormat(date.to_string()))?;
    Ok(previous.format(WIRE_FORMAT).to_string())
}
