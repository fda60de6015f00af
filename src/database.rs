use anyhow::Result;
use async_trait::async_trait;
use sled::{Db, Tree};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use crate::models::{
    ClosedPosition, FilterState, HistoryPage, HistoryQuery, PageMeta, SortDirection, SortSpec, Subject,
};
use crate::source::HistorySource;

/// Local closed-position history, also usable as a [`HistorySource`].
#[derive(Clone)]
pub struct HistoryStore {
    _db: Arc<Db>,
    // K: address bytes ++ context (bytes), V: Vec<ClosedPosition> (json), newest first
    pub closed_positions: Tree,
}

impl HistoryStore {
    pub fn new(path: &str) -> Result<Self> {
        let _db = Arc::new(sled::open(path)?);
        Ok(Self {
            closed_positions: _db.open_tree("closed_positions")?,
            _db,
        })
    }

    /// Stores a closed position, keeping the list ordered newest block first.
    /// Returns `false` when the id is already recorded.
    pub fn record_closed(&self, subject: &Subject, position: ClosedPosition) -> Result<bool> {
        let key = subject.key();
        let mut positions = self.get_closed_positions(subject)?;
        if positions.iter().any(|p| p.id == position.id) {
            return Ok(false);
        }

        let index = positions
            .iter()
            .position(|p| p.close_block_number < position.close_block_number)
            .unwrap_or(positions.len());
        debug!(id = %position.id, block = position.close_block_number, "recording closed position");
        positions.insert(index, position);
        self.closed_positions.insert(key, serde_json::to_vec(&positions)?)?;
        Ok(true)
    }

    pub fn get_closed_positions(&self, subject: &Subject) -> Result<Vec<ClosedPosition>> {
        match self.closed_positions.get(subject.key())? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(Vec::new()),
        }
    }

    fn get_closed_positions_for(&self, account: &str, context: &str) -> Result<Vec<ClosedPosition>> {
        let subject = Subject::parse(account, context)?;
        self.get_closed_positions(&subject)
    }

    /// Filtered, sorted, sliced view of one subject's history.
    pub fn get_history_page(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        let mut positions: Vec<ClosedPosition> = self
            .get_closed_positions_for(&query.account, &query.context)?
            .into_iter()
            .filter(|p| matches_filters(p, &query.filters))
            .filter(|p| query.min_close_block.map_or(true, |min| p.close_block_number >= min))
            .collect();

        if let Some(sort) = &query.sort {
            positions.sort_by(|a, b| compare(a, b, sort));
        }

        let total = positions.len();
        let start = query.offset.min(total);
        let end = std::cmp::min(start + query.limit, total);
        let data = positions[start..end].to_vec();
        let total_pages = if query.limit == 0 { 0 } else { total.div_ceil(query.limit) };

        Ok(HistoryPage {
            data,
            meta: PageMeta {
                limit: query.limit,
                offset: query.offset,
                total,
                total_pages,
            },
        })
    }
}

#[async_trait]
impl HistorySource for HistoryStore {
    async fn query(&self, query: &HistoryQuery) -> Result<HistoryPage> {
        self.get_history_page(query)
    }
}

fn matches_filters(position: &ClosedPosition, filters: &FilterState) -> bool {
    if let Some(currency) = &filters.currency {
        match position.detail_str("currency") {
            Some(c) if c.eq_ignore_ascii_case(currency) => {}
            _ => return false,
        }
    }

    let pair = position.detail_str("pair");
    if !filters.include_pairs.is_empty() && !pair.map_or(false, |p| filters.include_pairs.iter().any(|i| i == p)) {
        return false;
    }
    if pair.map_or(false, |p| filters.exclude_pairs.iter().any(|e| e == p)) {
        return false;
    }

    filters.ranges().iter().all(|(field, range)| match range {
        Some(range) => position.detail_f64(field).map_or(false, |v| range.contains(v)),
        None => true,
    })
}

fn compare(a: &ClosedPosition, b: &ClosedPosition, sort: &SortSpec) -> Ordering {
    let ordering = match sort.field.as_str() {
        "close_block_time" | "close_block_number" => a
            .close_block_number
            .cmp(&b.close_block_number)
            .then(a.close_block_time.cmp(&b.close_block_time)),
        "id" => a.id.cmp(&b.id),
        field => match (a.detail_f64(field), b.detail_f64(field)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.detail_str(field).cmp(&b.detail_str(field)),
        },
    };
    match sort.direction {
        SortDirection::Asc => ordering,
        SortDirection::Desc => ordering.reverse(),
    }
}
