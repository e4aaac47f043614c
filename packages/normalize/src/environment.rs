//! Environment strategy: air quality, water, and waste readings.
//!
//! Environment datasets are usually station-level readings, so geography
//! comes from the city when present and periods are often dated readings
//! rather than years. Every record produces its own indicators; readings
//! from several stations in one city are not aggregated.

use std::collections::BTreeMap;

use govdata_indicator_models::{Geography, Indicator, PeriodType, RawRecord};
use serde_json::{Map, Value};

use crate::coerce::{first_label, first_present, parse_number};
use crate::geography::{FALLBACK_PERIOD, NATIONAL_NAME, normalize_state_name, state_geography};
use crate::metrics::MetricSpec;
use crate::{NormalizeContext, NormalizeError, object_records};

/// Fields holding a dated reading; these imply a monthly period.
const DATED_PERIOD_FIELDS: &[&str] = &["date", "month", "last_update"];

/// Fields holding a yearly period.
const YEAR_PERIOD_FIELDS: &[&str] = &["year", "Year"];

const CITY_FIELDS: &[&str] = &["city", "City"];

const METRICS: &[MetricSpec] = &[
    MetricSpec {
        name: "Air Quality Index",
        unit: "index",
        aliases: &["aqi", "AQI", "air_quality_index"],
        metadata: &[],
    },
    MetricSpec {
        name: "Water Scarcity Index",
        unit: "index",
        aliases: &["water_scarcity", "water_availability"],
        metadata: &[],
    },
    MetricSpec {
        name: "Municipal Solid Waste",
        unit: "tons/day",
        aliases: &["waste_generation"],
        metadata: &[],
    },
];

/// Per-pollutant average reported by the realtime air quality feed.
const POLLUTANT_AVERAGE_FIELDS: &[&str] = &["pollutant_avg", "avg_value"];

/// Normalizes environment records.
///
/// # Errors
///
/// Returns [`NormalizeError::NoObjectRecords`] if no record is a JSON
/// object.
pub fn normalize(
    records: &[RawRecord],
    ctx: &NormalizeContext<'_>,
) -> Result<Vec<Indicator>, NormalizeError> {
    let mut indicators = Vec::new();

    for record in object_records(records)? {
        let (geography, geography_name) = location(record);
        let (period, period_type) = period(record);
        let station = first_label(record, &["station"]);

        let mut push = |name: String, unit: &str, raw: &Value, metadata: Option<BTreeMap<String, String>>| {
            indicators.push(Indicator {
                indicator_name: name,
                value: parse_number(Some(raw)),
                unit: unit.to_string(),
                geography,
                geography_name: geography_name.clone(),
                period: period.clone(),
                period_type,
                source_dataset: ctx.source_dataset.to_string(),
                category: ctx.category,
                metadata,
            });
        };

        for metric in METRICS {
            if let Some(raw) = first_present(record, metric.aliases) {
                let metadata = station
                    .as_ref()
                    .map(|s| BTreeMap::from([("station".to_string(), s.clone())]));
                push(metric.name.to_string(), metric.unit, raw, metadata);
            }
        }

        if let Some(raw) = first_present(record, POLLUTANT_AVERAGE_FIELDS) {
            let pollutant = first_label(record, &["pollutant_id"]);
            let name = pollutant
                .as_ref()
                .map_or_else(|| "Pollutant Average".to_string(), |p| format!("{p} Average"));

            let mut metadata = BTreeMap::new();
            if let Some(station) = &station {
                metadata.insert("station".to_string(), station.clone());
            }
            if let Some(pollutant) = pollutant {
                metadata.insert("pollutant_id".to_string(), pollutant);
            }
            push(
                name,
                "µg/m³",
                raw,
                (!metadata.is_empty()).then_some(metadata),
            );
        }
    }

    Ok(indicators)
}

/// A city makes the reading district-level; otherwise the state rule
/// applies, with a free-form `location` treated like a state.
fn location(record: &Map<String, Value>) -> (Geography, String) {
    if let Some(city) = first_label(record, CITY_FIELDS) {
        return (Geography::District, city);
    }
    let (geography, name) = state_geography(record);
    if geography == Geography::National
        && let Some(location) = first_label(record, &["location"])
        && !location.eq_ignore_ascii_case(NATIONAL_NAME)
    {
        return (Geography::State, normalize_state_name(&location));
    }
    (geography, name)
}

fn period(record: &Map<String, Value>) -> (String, PeriodType) {
    if let Some(dated) = first_label(record, DATED_PERIOD_FIELDS) {
        return (dated, PeriodType::Month);
    }
    first_label(record, YEAR_PERIOD_FIELDS).map_or_else(
        || (FALLBACK_PERIOD.to_string(), PeriodType::Year),
        |year| (year, PeriodType::Year),
    )
}
