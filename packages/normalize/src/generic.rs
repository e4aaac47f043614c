//! Fallback strategy for uncatalogued datasets.
//!
//! Every numeric-looking field except the period becomes its own indicator,
//! named after the field.

use govdata_indicator_models::{Indicator, RawRecord};

use crate::coerce::{humanize, numeric_value};
use crate::geography::{STATE_FIELDS, state_geography, year_period};
use crate::{NormalizeContext, NormalizeError, object_records};

const PERIOD_FIELDS: &[&str] = &["year", "Year"];

/// Unit attached to generic indicators.
pub const GENERIC_UNIT: &str = "units";

/// Normalizes records by emitting one indicator per numeric field.
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
        let (geography, geography_name) = state_geography(record);
        let (period, period_type) = year_period(record, PERIOD_FIELDS);

        for (field, raw) in record {
            if PERIOD_FIELDS.contains(&field.as_str()) || STATE_FIELDS.contains(&field.as_str()) {
                continue;
            }
            let Some(value) = numeric_value(raw) else {
                continue;
            };

            indicators.push(Indicator {
                indicator_name: humanize(field),
                value,
                unit: GENERIC_UNIT.to_string(),
                geography,
                geography_name: geography_name.clone(),
                period: period.clone(),
                period_type,
                source_dataset: ctx.source_dataset.to_string(),
                category: ctx.category,
                metadata: None,
            });
        }
    }

    Ok(indicators)
}
