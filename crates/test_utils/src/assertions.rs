//! Custom Test Assertions
//!
//! Assertions over watermarks and staged rows with messages that name the
//! offending range or row.

use domain_intake::{BatchWatermark, EntityKind, StagedClaim, StagingStatus};

/// Asserts that no two watermarks of the same kind overlap
///
/// # Panics
///
/// Panics naming the first overlapping pair
pub fn assert_watermarks_disjoint(watermarks: &[BatchWatermark]) {
    for kind in EntityKind::ALL {
        let mut ranges: Vec<&BatchWatermark> = watermarks.iter().filter(|w| w.kind == kind).collect();
        ranges.sort_by_key(|w| w.first_id);
        for pair in ranges.windows(2) {
            assert!(
                pair[0].last_id < pair[1].first_id,
                "Overlapping {} watermarks: [{}, {}] and [{}, {}]",
                kind,
                pair[0].first_id,
                pair[0].last_id,
                pair[1].first_id,
                pair[1].last_id
            );
        }
    }
}

/// Asserts that `ids` cover exactly the watermark's range
pub fn assert_range_covers(watermark: &BatchWatermark, ids: &[i64]) {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    let expected: Vec<i64> = (watermark.first_id..=watermark.last_id).collect();
    assert_eq!(
        sorted, expected,
        "Watermark {} [{}, {}] does not match the staged ids",
        watermark.id, watermark.first_id, watermark.last_id
    );
}

/// Asserts that every claim reached `status`
pub fn assert_all_claims(claims: &[StagedClaim], status: StagingStatus) {
    for claim in claims {
        assert_eq!(
            claim.status,
            status,
            "Claim {} ({}) is {}, expected {}",
            claim.id,
            claim.claim_ref(),
            claim.status.as_str(),
            status.as_str()
        );
        assert_eq!(
            claim.processed,
            status != StagingStatus::Pending,
            "Claim {} has processed={} with status {}",
            claim.id,
            claim.processed,
            claim.status.as_str()
        );
    }
}
