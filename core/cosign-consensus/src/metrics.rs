//! Metrics collection for consensus

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, HistogramVec, IntCounter,
    IntCounterVec,
};

lazy_static! {
    /// Rounds by role and outcome
    pub static ref CONSENSUS_ROUNDS: IntCounterVec = register_int_counter_vec!(
        "cosign_consensus_rounds_total",
        "Total number of consensus rounds",
        &["role", "outcome"]
    ).unwrap();

    /// Commitments seen by the leader
    pub static ref CONSENSUS_COMMITS: IntCounterVec = register_int_counter_vec!(
        "cosign_consensus_commits_total",
        "Total number of commitments received",
        &["result"]
    ).unwrap();

    /// Responses seen by the leader
    pub static ref CONSENSUS_RESPONSES: IntCounterVec = register_int_counter_vec!(
        "cosign_consensus_responses_total",
        "Total number of responses received",
        &["result"]
    ).unwrap();

    /// Round duration by role
    pub static ref CONSENSUS_ROUND_DURATION: HistogramVec = register_histogram_vec!(
        "cosign_consensus_round_duration_seconds",
        "Duration of consensus rounds",
        &["role"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0]
    ).unwrap();

    /// Base units credited as block rewards
    pub static ref REWARDS_CREDITED: IntCounter = register_int_counter!(
        "cosign_rewards_credited_total",
        "Total base units credited as block rewards"
    ).unwrap();
}

/// Record a finished round
pub fn record_round(role: &str, success: bool, seconds: f64) {
    let outcome = if success { "success" } else { "failure" };
    CONSENSUS_ROUNDS.with_label_values(&[role, outcome]).inc();
    CONSENSUS_ROUND_DURATION.with_label_values(&[role]).observe(seconds);
}

pub fn record_commit(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    CONSENSUS_COMMITS.with_label_values(&[result]).inc();
}

pub fn record_response(accepted: bool) {
    let result = if accepted { "accepted" } else { "rejected" };
    CONSENSUS_RESPONSES.with_label_values(&[result]).inc();
}

pub fn record_reward(amount: u64) {
    REWARDS_CREDITED.inc_by(amount);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_counts() {
        let before = CONSENSUS_ROUNDS.with_label_values(&["leader", "failure"]).get();
        record_round("leader", false, 0.2);
        assert!(CONSENSUS_ROUNDS.with_label_values(&["leader", "failure"]).get() > before);
    }
}
