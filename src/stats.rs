//! Shared statistics derivation: percentage change and pagination.

use serde::Serialize;

/// Percentage change from `baseline` to `current`, rounded to two decimal
/// places. A zero baseline yields 0, not a division error, so fresh datasets
/// report no change.
///
/// Every "change" metric goes through this one definition.
pub fn percentage_change(baseline: f64, current: f64) -> f64 {
    if baseline == 0.0 {
        return 0.0;
    }
    round2((current - baseline) / baseline * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_LIMIT: usize = 1000;

/// A page of ranked rows plus enough metadata for the table UI.
#[derive(Debug, Clone, Serialize)]
pub struct Paginated<T> {
    pub docs: Vec<T>,
    pub page: usize,
    pub total: u64,
    pub total_pages: usize,
}

/// Slices `rows` down to the requested page. `page` is 1-based; zero is
/// clamped to the first page.
pub fn paginate<T>(rows: Vec<T>, page: Option<usize>, limit: Option<usize>, total: u64) -> Paginated<T> {
    let page = page.unwrap_or(DEFAULT_PAGE).max(1);
    let limit = limit.unwrap_or(DEFAULT_LIMIT).max(1);
    let total_pages = rows.len().div_ceil(limit);
    let start = (page - 1) * limit;
    let docs: Vec<T> = rows
        .into_iter()
        .skip(start)
        .take(limit)
        .collect();
    Paginated {
        docs,
        page,
        total,
        total_pages,
    }
}
