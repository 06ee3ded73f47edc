//! Statistics queries routed to the collection of the metric's granularity.

use super::models::{AggregateSpec, Statistics};
use super::query::{make_query_from_filter, SampleFilter};
use super::store::{collection_name, DbError, Store};
use crate::mapping::{PeriodMapping, DEFAULT_PERIOD};

use std::sync::Arc;

/// Query engine over the statistics store.
///
/// Holds the period mapping loaded at startup; it is never reloaded.
#[derive(Clone)]
pub struct StatisticsEngine {
    store: Store,
    mapping: Arc<PeriodMapping>,
}

impl StatisticsEngine {
    /// Build the engine and create a collection for every mapped period.
    pub fn new(store: Store, mapping: Arc<PeriodMapping>) -> Result<Self, DbError> {
        for &period in mapping.period_colls() {
            store.ensure_collection(period)?;
        }
        Ok(Self { store, mapping })
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Granularity a query on `filter` reads from.
    ///
    /// An explicit `period` wins, then the mapping entry of the filter's
    /// (first) meter, then [`DEFAULT_PERIOD`].
    pub fn resolve_period(&self, filter: &SampleFilter, period: Option<u32>) -> u32 {
        period
            .or_else(|| {
                filter
                    .meter
                    .as_ref()
                    .and_then(|m| m.first())
                    .and_then(|m| self.mapping.lookup(m))
            })
            .unwrap_or(DEFAULT_PERIOD)
    }

    /// Statistics matching `filter`, newest first.
    ///
    /// Grouping and selectable aggregates are not computed: a request for
    /// either returns no rows.
    pub fn get_meter_statistics(
        &self,
        filter: &SampleFilter,
        period: Option<u32>,
        groupby: &[String],
        aggregate: &[AggregateSpec],
        limit: Option<usize>,
    ) -> Result<Vec<Statistics>, DbError> {
        if !groupby.is_empty() || !aggregate.is_empty() {
            tracing::debug!(
                "Grouped or aggregated statistics are not supported (groupby={:?}, aggregate={:?})",
                groupby,
                aggregate.iter().map(AggregateSpec::key).collect::<Vec<_>>()
            );
            return Ok(Vec::new());
        }

        let query = make_query_from_filter(filter, true)?;
        let coll = collection_name(self.resolve_period(filter, period));
        tracing::debug!("Querying {} with {:?}", coll, query);
        self.store.find_statistics(&coll, &query, limit)
    }

    /// Shorthand for an ungrouped, unaggregated query.
    pub fn query(&self, filter: &SampleFilter, period: Option<u32>, limit: Option<usize>) -> Result<Vec<Statistics>, DbError> {
        self.get_meter_statistics(filter, period, &[], &[], limit)
    }
}
