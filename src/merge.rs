use std::collections::HashSet;

use crate::models::ClosedPosition;

/// Drops repeated ids, keeping the first occurrence in order.
pub fn dedup(positions: Vec<ClosedPosition>) -> Vec<ClosedPosition> {
    let mut seen = HashSet::with_capacity(positions.len());
    positions
        .into_iter()
        .filter(|p| seen.insert(p.id.clone()))
        .collect()
}

/// Incoming positions whose id is neither in `existing` nor earlier in `incoming`.
fn unseen(existing: &[ClosedPosition], incoming: Vec<ClosedPosition>) -> Vec<ClosedPosition> {
    let known: HashSet<&str> = existing.iter().map(|p| p.id.as_str()).collect();
    dedup(
        incoming
            .into_iter()
            .filter(|p| !known.contains(p.id.as_str()))
            .collect(),
    )
}

/// Puts unseen incoming positions at the front, in incoming order.
/// Returns how many were added.
pub fn prepend_new(dataset: &mut Vec<ClosedPosition>, incoming: Vec<ClosedPosition>) -> usize {
    let fresh = unseen(dataset, incoming);
    let added = fresh.len();
    if added > 0 {
        dataset.splice(0..0, fresh);
    }
    added
}

/// Puts unseen incoming positions at the back, in incoming order.
/// Returns how many were added.
pub fn append_new(dataset: &mut Vec<ClosedPosition>, incoming: Vec<ClosedPosition>) -> usize {
    let fresh = unseen(dataset, incoming);
    let added = fresh.len();
    dataset.extend(fresh);
    added
}

/// Highest close block in the set.
pub fn high_water_mark(positions: &[ClosedPosition]) -> Option<u64> {
    positions.iter().map(|p| p.close_block_number).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn pos(id: &str, block: u64) -> ClosedPosition {
        ClosedPosition::new(id, block, Utc.timestamp_opt(1_700_000_000 + block as i64, 0).unwrap())
    }

    fn ids(positions: &[ClosedPosition]) -> Vec<&str> {
        positions.iter().map(|p| p.id.as_str()).collect()
    }

    #[test]
    fn dedup_keeps_first() {
        let out = dedup(vec![pos("a", 1), pos("b", 2), pos("a", 3)]);
        assert_eq!(ids(&out), vec!["a", "b"]);
        assert_eq!(out[0].close_block_number, 1);
    }

    #[test]
    fn prepend_skips_known_ids() {
        let mut dataset = vec![pos("c", 3), pos("b", 2)];
        let added = prepend_new(&mut dataset, vec![pos("e", 5), pos("d", 4), pos("c", 3)]);
        assert_eq!(added, 2);
        assert_eq!(ids(&dataset), vec!["e", "d", "c", "b"]);
    }

    #[test]
    fn append_skips_known_and_repeated_ids() {
        let mut dataset = vec![pos("a", 9)];
        let added = append_new(&mut dataset, vec![pos("a", 9), pos("b", 8), pos("b", 8), pos("c", 7)]);
        assert_eq!(added, 2);
        assert_eq!(ids(&dataset), vec!["a", "b", "c"]);
    }

    #[test]
    fn merge_holds_every_id_once() {
        let existing = vec![pos("a", 1), pos("b", 2), pos("c", 3)];
        let incoming = vec![pos("c", 3), pos("d", 4), pos("a", 1), pos("e", 5), pos("d", 4)];

        for prepend in [true, false] {
            let mut dataset = existing.clone();
            if prepend {
                prepend_new(&mut dataset, incoming.clone());
            } else {
                append_new(&mut dataset, incoming.clone());
            }
            let mut got = ids(&dataset);
            got.sort();
            assert_eq!(got, vec!["a", "b", "c", "d", "e"]);
        }
    }

    #[test]
    fn high_water_mark_is_the_max_block() {
        assert_eq!(high_water_mark(&[pos("a", 4), pos("b", 11), pos("c", 7)]), Some(11));
        assert_eq!(high_water_mark(&[]), None);
    }
}
