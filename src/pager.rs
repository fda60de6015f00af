use anyhow::Result;

use crate::models::{HistoryPage, HistoryQuery, Quota};
use crate::source::HistorySource;

/// Offset of the next page to fetch for a dataset of `loaded` positions.
///
/// Rounds down to a page boundary: positions prepended by delta polls shift the
/// source's offsets, and re-reading a partial page is deduped away while
/// rounding up would skip positions.
pub fn next_offset(loaded: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return loaded;
    }
    (loaded / page_size) * page_size
}

/// Page limit at `offset`, clamped so a finite quota is never exceeded.
pub fn page_limit(offset: usize, page_size: usize, quota: &Quota) -> usize {
    match quota.ceiling() {
        Some(ceiling) => page_size.min(ceiling.saturating_sub(offset)),
        None => page_size,
    }
}

pub async fn fetch_page(
    source: &dyn HistorySource,
    base: &HistoryQuery,
    limit: usize,
    offset: usize,
) -> Result<HistoryPage> {
    source.query(&base.clone().page(limit, offset)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_round_down_to_page_boundary() {
        assert_eq!(next_offset(0, 20), 0);
        assert_eq!(next_offset(20, 20), 20);
        assert_eq!(next_offset(22, 20), 20);
        assert_eq!(next_offset(39, 20), 20);
        assert_eq!(next_offset(5, 0), 5);
    }

    #[test]
    fn limit_respects_quota() {
        assert_eq!(page_limit(40, 20, &Quota::unlimited()), 20);
        assert_eq!(page_limit(40, 20, &Quota::limited(50)), 10);
        assert_eq!(page_limit(60, 20, &Quota::limited(50)), 0);
    }
}
