//! Geography and period resolution.

use govdata_indicator_models::{Geography, PeriodType};
use serde_json::{Map, Value};

use crate::coerce::first_label;

/// Name used for country-wide figures.
pub const NATIONAL_NAME: &str = "India";

/// Period used when a record carries no period field.
pub const FALLBACK_PERIOD: &str = "2024";

/// Fields that may hold a state or union territory name.
pub const STATE_FIELDS: &[&str] = &["state", "State", "state_name"];

/// Postal and vehicle-registration abbreviations for states and union
/// territories.
const STATE_ABBREVIATIONS: &[(&str, &str)] = &[
    ("AN", "Andaman and Nicobar Islands"),
    ("AP", "Andhra Pradesh"),
    ("AR", "Arunachal Pradesh"),
    ("AS", "Assam"),
    ("BR", "Bihar"),
    ("CG", "Chhattisgarh"),
    ("CH", "Chandigarh"),
    ("CT", "Chhattisgarh"),
    ("DH", "Dadra and Nagar Haveli and Daman and Diu"),
    ("DL", "Delhi"),
    ("DN", "Dadra and Nagar Haveli and Daman and Diu"),
    ("GA", "Goa"),
    ("GJ", "Gujarat"),
    ("HP", "Himachal Pradesh"),
    ("HR", "Haryana"),
    ("JH", "Jharkhand"),
    ("JK", "Jammu and Kashmir"),
    ("KA", "Karnataka"),
    ("KL", "Kerala"),
    ("LA", "Ladakh"),
    ("LD", "Lakshadweep"),
    ("MH", "Maharashtra"),
    ("ML", "Meghalaya"),
    ("MN", "Manipur"),
    ("MP", "Madhya Pradesh"),
    ("MZ", "Mizoram"),
    ("NL", "Nagaland"),
    ("OD", "Odisha"),
    ("OR", "Odisha"),
    ("PB", "Punjab"),
    ("PY", "Puducherry"),
    ("RJ", "Rajasthan"),
    ("SK", "Sikkim"),
    ("TG", "Telangana"),
    ("TN", "Tamil Nadu"),
    ("TR", "Tripura"),
    ("TS", "Telangana"),
    ("UK", "Uttarakhand"),
    ("UP", "Uttar Pradesh"),
    ("WB", "West Bengal"),
];

/// Expands a state abbreviation to its full name.
///
/// Unknown values are returned trimmed but otherwise unchanged.
#[must_use]
pub fn normalize_state_name(name: &str) -> String {
    let trimmed = name.trim();
    STATE_ABBREVIATIONS
        .iter()
        .find(|(abbr, _)| *abbr == trimmed)
        .map_or_else(|| trimmed.to_string(), |(_, full)| (*full).to_string())
}

/// Resolves the geography of a record from its state field.
///
/// A state other than "India" yields [`Geography::State`]; a missing state
/// or "India" yields [`Geography::National`].
#[must_use]
pub fn state_geography(record: &Map<String, Value>) -> (Geography, String) {
    first_label(record, STATE_FIELDS)
        .map(|s| normalize_state_name(&s))
        .filter(|s| !s.eq_ignore_ascii_case(NATIONAL_NAME))
        .map_or_else(
            || (Geography::National, NATIONAL_NAME.to_string()),
            |name| (Geography::State, name),
        )
}

/// Resolves a yearly period from the first present alias.
#[must_use]
pub fn year_period(record: &Map<String, Value>, aliases: &[&str]) -> (String, PeriodType) {
    (
        first_label(record, aliases).unwrap_or_else(|| FALLBACK_PERIOD.to_string()),
        PeriodType::Year,
    )
}
