use anyhow::{Context, Result};
use futures::future::try_join_all;
use tracing::debug;

use crate::batch::batches;
use crate::merge::{dedup, high_water_mark};
use crate::models::{ClosedPosition, HistoryQuery, PageMeta};
use crate::source::HistorySource;

/// Result of a full resync.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub dataset: Vec<ClosedPosition>,
    pub meta: PageMeta,
    pub high_water_mark: Option<u64>,
}

/// Runs every planned batch against `source` and merges them in offset order.
///
/// Any failed batch fails the whole load; an empty plan never touches the source.
pub async fn load_baseline(source: &dyn HistorySource, base: &HistoryQuery, plan: &[usize]) -> Result<Baseline> {
    if plan.is_empty() {
        return Ok(Baseline::default());
    }

    let calls = batches(plan).into_iter().map(|(limit, offset)| {
        let query = base.clone().page(limit, offset);
        async move {
            debug!(limit, offset, "fetching baseline batch");
            source
                .query(&query)
                .await
                .with_context(|| format!("baseline batch at offset {} failed", offset))
        }
    });
    let pages = try_join_all(calls).await?;

    let meta = pages.last().map(|p| p.meta).unwrap_or_default();
    let dataset = dedup(pages.into_iter().flat_map(|p| p.data).collect());
    let high_water_mark = high_water_mark(&dataset);

    Ok(Baseline {
        dataset,
        meta,
        high_water_mark,
    })
}
