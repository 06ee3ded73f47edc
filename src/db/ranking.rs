//! Top-N ranking over query results.

use super::models::Statistics;
use std::collections::HashSet;

/// One `(resource, avg)` pair per resource, keeping the first row seen.
///
/// Query results come newest first, so this keeps the latest average.
/// Rows without an average are skipped.
pub fn first_seen_averages(stats: &[Statistics]) -> Vec<(String, f64)> {
    let mut seen = HashSet::with_capacity(stats.len());
    stats
        .iter()
        .filter_map(|s| {
            let avg = s.avg?;
            seen.insert(s.resource_id.as_str())
                .then(|| (s.resource_id.clone(), avg))
        })
        .collect()
}

/// The `k` highest values, descending. Ties keep their input order.
pub fn top_n(mut values: Vec<(String, f64)>, k: usize) -> Vec<(String, f64)> {
    if values.len() < k {
        tracing::warn!(
            "Only {} resources available, fewer than top({})",
            values.len(),
            k
        );
    }
    values.sort_by(|a, b| b.1.total_cmp(&a.1));
    values.truncate(k);
    values
}
