use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Availability snapshot of one eligible worker at selection time.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub worker_id: Uuid,
    pub active_deliveries: usize,
    pub registered_at: DateTime<Utc>,
}

/// Deterministic selection policy: fewest active deliveries first, then the
/// earliest-registered worker, then the smallest id. The id tie-break makes
/// the pick stable even for workers registered in the same instant.
pub fn pick(candidates: &[Candidate]) -> Option<Uuid> {
    candidates
        .iter()
        .min_by_key(|candidate| {
            (
                candidate.active_deliveries,
                candidate.registered_at,
                candidate.worker_id,
            )
        })
        .map(|candidate| candidate.worker_id)
}
