use crate::models::Quota;

/// Upper bound on how many pages an initial load will ever try to cover,
/// however deep the requested page is.
pub const MAX_INITIAL_PAGES: usize = 100;

/// Splits "records up to `target_page`" into per-request limits no larger
/// than `max_batch_size`. Offsets are the running sum (see [`batches`]).
pub fn plan(target_page: usize, page_size: usize, max_batch_size: usize, quota: &Quota) -> Vec<usize> {
    let mut desired_total = target_page.min(MAX_INITIAL_PAGES) * page_size;
    if let Some(ceiling) = quota.ceiling() {
        desired_total = desired_total.min(ceiling);
    }

    let max_batch_size = max_batch_size.max(1);
    let mut limits = Vec::with_capacity(desired_total.div_ceil(max_batch_size));
    let mut remaining = desired_total;
    while remaining > 0 {
        let limit = remaining.min(max_batch_size);
        limits.push(limit);
        remaining -= limit;
    }
    limits
}

/// `(limit, offset)` pairs for a plan.
pub fn batches(plan: &[usize]) -> Vec<(usize, usize)> {
    plan.iter()
        .scan(0usize, |offset, &limit| {
            let start = *offset;
            *offset += limit;
            Some((limit, start))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page_is_a_single_batch() {
        let limits = plan(1, 20, 100, &Quota::unlimited());
        assert_eq!(limits, vec![20]);
        assert_eq!(batches(&limits), vec![(20, 0)]);
    }

    #[test]
    fn deep_page_is_split_at_the_batch_ceiling() {
        let limits = plan(10, 20, 100, &Quota::unlimited());
        assert_eq!(limits, vec![100, 100]);
        assert_eq!(batches(&limits), vec![(100, 0), (100, 100)]);
    }

    #[test]
    fn last_batch_takes_the_remainder() {
        let limits = plan(7, 20, 50, &Quota::unlimited());
        assert_eq!(limits, vec![50, 50, 40]);
        assert_eq!(batches(&limits), vec![(50, 0), (50, 50), (40, 100)]);
    }

    #[test]
    fn zero_quota_plans_nothing() {
        assert!(plan(5, 20, 100, &Quota::limited(0)).is_empty());
    }

    #[test]
    fn quota_caps_the_total() {
        let limits = plan(10, 20, 100, &Quota::limited(150));
        assert_eq!(limits, vec![100, 50]);
    }

    #[test]
    fn target_page_is_capped() {
        let limits = plan(10_000, 10, 100, &Quota::unlimited());
        assert_eq!(limits.iter().sum::<usize>(), MAX_INITIAL_PAGES * 10);
    }

    #[test]
    fn plans_cover_the_target_exactly() {
        for page in 0..=12 {
            for page_size in [1, 7, 20, 25] {
                for max_batch in [1, 10, 33, 100] {
                    for quota in [Quota::unlimited(), Quota::limited(0), Quota::limited(45), Quota::limited(1_000)] {
                        let limits = plan(page, page_size, max_batch, &quota);
                        let expected = quota.ceiling().map_or(page * page_size, |c| c.min(page * page_size));
                        assert_eq!(limits.iter().sum::<usize>(), expected);
                        assert!(limits.iter().all(|&l| l > 0 && l <= max_batch));
                    }
                }
            }
        }
    }

    #[test]
    fn zero_batch_size_does_not_spin() {
        assert_eq!(plan(1, 3, 0, &Quota::unlimited()), vec![1, 1, 1]);
    }
}
