//! Alias-table strategies for the population, economy, and government
//! categories.
//!
//! Each table lists the metrics a category knows about. For every record,
//! every metric whose alias group has a present value emits one indicator.

use std::collections::BTreeMap;

use govdata_indicator_models::{Indicator, RawRecord};

use crate::coerce::{first_present, parse_number};
use crate::geography::{state_geography, year_period};
use crate::{NormalizeContext, NormalizeError, object_records};

/// One metric recognised by an alias-table strategy.
#[derive(Debug, Clone, Copy)]
pub struct MetricSpec {
    /// Indicator name emitted for this metric.
    pub name: &'static str,
    /// Unit of measure.
    pub unit: &'static str,
    /// Field names tried in order; the first present one wins.
    pub aliases: &'static [&'static str],
    /// Metadata attached to every indicator of this metric.
    pub metadata: &'static [(&'static str, &'static str)],
}

/// A category's period fields and metrics.
#[derive(Debug, Clone, Copy)]
pub struct MetricTable {
    /// Fields tried in order for the period label.
    pub period_fields: &'static [&'static str],
    /// Recognised metrics.
    pub metrics: &'static [MetricSpec],
}

const fn metric(
    name: &'static str,
    unit: &'static str,
    aliases: &'static [&'static str],
) -> MetricSpec {
    MetricSpec {
        name,
        unit,
        aliases,
        metadata: &[],
    }
}

/// Census and demographic metrics.
pub const POPULATION: MetricTable = MetricTable {
    period_fields: &["year", "Year", "census_year"],
    metrics: &[
        MetricSpec {
            name: "Population",
            unit: "persons",
            aliases: &["population", "Population", "total_population"],
            metadata: &[("source", "Census")],
        },
        metric(
            "Rural Population",
            "persons",
            &["rural_population", "Rural_Population"],
        ),
        metric(
            "Urban Population",
            "persons",
            &["urban_population", "Urban_Population"],
        ),
        metric(
            "Youth Unemployment Rate",
            "percentage",
            &["youth_unemployment", "unemployment_rate"],
        ),
    ],
};

/// GDP, income, and employment metrics.
pub const ECONOMY: MetricTable = MetricTable {
    period_fields: &["year", "Year", "fiscal_year"],
    metrics: &[
        metric(
            "Gross Domestic Product",
            "crores",
            &["gdp", "GDP", "gross_state_product"],
        ),
        metric("GDP Growth Rate", "percentage", &["gdp_growth", "growth_rate"]),
        metric(
            "Unemployment Rate",
            "percentage",
            &["unemployment_rate", "unemployment"],
        ),
        metric(
            "Per Capita Income",
            "rupees",
            &["per_capita_income", "income_per_capita"],
        ),
        metric("Employment Rate", "percentage", &["employment_rate"]),
    ],
};

/// Budget, revenue, and expenditure metrics.
pub const GOVERNMENT: MetricTable = MetricTable {
    period_fields: &["year", "Year", "fiscal_year"],
    metrics: &[
        metric(
            "Budget Allocation",
            "crores",
            &["budget_allocation", "allocation"],
        ),
        metric("Government Revenue", "crores", &["revenue"]),
        metric("Government Expenditure", "crores", &["expenditure"]),
        metric("Tax Collection", "crores", &["tax_collection"]),
    ],
};

/// Normalizes records with an alias table.
///
/// # Errors
///
/// Returns [`NormalizeError::NoObjectRecords`] if no record is a JSON
/// object.
pub fn normalize_table(
    table: &MetricTable,
    records: &[RawRecord],
    ctx: &NormalizeContext<'_>,
) -> Result<Vec<Indicator>, NormalizeError> {
    let mut indicators = Vec::new();

    for record in object_records(records)? {
        let (geography, geography_name) = state_geography(record);
        let (period, period_type) = year_period(record, table.period_fields);

        for metric in table.metrics {
            let Some(raw) = first_present(record, metric.aliases) else {
                continue;
            };
            let metadata = (!metric.metadata.is_empty()).then(|| {
                metric.metadata
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect::<BTreeMap<_, _>>()
            });

            indicators.push(Indicator {
                indicator_name: metric.name.to_string(),
                value: parse_number(Some(raw)),
                unit: metric.unit.to_string(),
                geography,
                geography_name: geography_name.clone(),
                period: period.clone(),
                period_type,
                source_dataset: ctx.source_dataset.to_string(),
                category: ctx.category,
                metadata,
            });
        }
    }

    Ok(indicators)
}
