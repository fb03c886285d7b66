use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::{replay, LoanRecord, LoanStatus, MovementEntry};

/// Result of checking the ledger against the movement log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub record_count: usize,
    pub movement_count: usize,
    pub open_loan_count: usize,
    /// Keys with more than one record on loan at the same time
    pub keys_with_multiple_open_loans: Vec<String>,
    /// Records with no loan or duplicate-attempt movement creating them
    pub records_without_movement: usize,
    /// Expected history length: one entry per record plus one per returned record
    pub expected_movement_count: usize,
    /// Set when the movement log cannot be replayed at all
    pub replay_error: Option<String>,
    /// Records whose replayed state differs from the stored one
    pub replay_mismatches: usize,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.keys_with_multiple_open_loans.is_empty()
            && self.records_without_movement == 0
            && self.movement_count == self.expected_movement_count
            && self.replay_error.is_none()
            && self.replay_mismatches == 0
    }
}

pub fn build_integrity_report(
    records: &[LoanRecord],
    movements: &[MovementEntry],
) -> IntegrityReport {
    let mut open_per_key: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_on_loan()) {
        *open_per_key.entry(record.key_id.as_str()).or_insert(0) += 1;
    }

    let created: HashSet<_> = movements
        .iter()
        .filter(|m| m.is_loan_attempt())
        .map(|m| m.loan_id)
        .collect();

    let returned = records
        .iter()
        .filter(|r| r.status == LoanStatus::Returned)
        .count();

    let (replay_error, replay_mismatches) = match replay(movements) {
        Ok(rebuilt) => (None, count_mismatches(records, &rebuilt)),
        Err(e) => (Some(e.to_string()), 0),
    };

    IntegrityReport {
        record_count: records.len(),
        movement_count: movements.len(),
        open_loan_count: open_per_key.values().sum(),
        keys_with_multiple_open_loans: open_per_key
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(key, _)| key.to_string())
            .collect(),
        records_without_movement: records.iter().filter(|r| !created.contains(&r.id)).count(),
        expected_movement_count: records.len() + returned,
        replay_error,
        replay_mismatches,
    }
}

fn count_mismatches(stored: &[LoanRecord], rebuilt: &[LoanRecord]) -> usize {
    let rebuilt_by_id: BTreeMap<_, _> = rebuilt.iter().map(|r| (r.id, r)).collect();

    let differing = stored
        .iter()
        .filter(|s| match rebuilt_by_id.get(&s.id) {
            Some(r) => r.key_id != s.key_id || r.holder != s.holder || r.status != s.status,
            None => true,
        })
        .count();

    // Records that exist only in the log
    let stored_ids: HashSet<_> = stored.iter().map(|r| r.id).collect();
    differing + rebuilt.iter().filter(|r| !stored_ids.contains(&r.id)).count()
}
