use anyhow::Result;

use crate::models::{ClosedPosition, HistoryQuery};
use crate::source::HistorySource;

/// Fetches positions closed after `high_water_mark` under the current filters,
/// in the source's default (newest first) order.
pub async fn fetch_delta(
    source: &dyn HistorySource,
    base: &HistoryQuery,
    high_water_mark: Option<u64>,
    page_size: usize,
) -> Result<Vec<ClosedPosition>> {
    let min_close_block = match high_water_mark {
        Some(hwm) => match hwm.checked_add(1) {
            Some(next) => Some(next),
            // Nothing can close after the last representable block.
            None => return Ok(Vec::new()),
        },
        None => None,
    };

    let mut query = base.clone().page(page_size, 0);
    query.sort = None;
    query.min_close_block = min_close_block;

    let page = source.query(&query).await?;
    Ok(page.data)
}
