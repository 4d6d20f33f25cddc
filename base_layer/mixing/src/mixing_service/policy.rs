// Copyright 2024. The Murmur Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Decides whether the wallet should try to join a round at all, and why.

use log::*;
use rand::Rng;
use strum_macros::Display;

use crate::mixing_service::{
    classification::PrivacyBreakdown,
    config::{ConsolidationMode, MixingServiceConfig},
    storage::models::ResolvedCoin,
};

const LOG_TARGET: &str = "wallet::mixing::policy";

/// Why the wallet wants to participate in a round. An attempt carries a set of these; the
/// gatekeepers narrow the set as more round information becomes known and withdraw once it is
/// empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum MixReason {
    /// Merge many small coins into fewer larger ones.
    Consolidation,
    /// Settle pending payments inside the round.
    Payment,
    /// Some holdings are below the anonymity target.
    NotPrivate,
    /// Already private, joining anyway to defeat timing analysis.
    ExtraJoin,
    /// Funds are being moved to the configured secondary wallet.
    WalletForward,
    /// A decision needs fee information the caller has not supplied yet. Re-query once it is
    /// available; never select on this reason alone.
    PreliminaryConclusion,
}

/// The outcome of evaluating the coin-dependent participation clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOutcome {
    /// Fee information is required before a decision can be made.
    Preliminary,
    /// The reasons found; empty means do not mix.
    Reasons(Vec<MixReason>),
}

/// Evaluate the participation clauses that depend on the resolved coin set. The payment-batching
/// clause runs before resolution and lives with the caller.
pub fn evaluate<R: Rng>(
    config: &MixingServiceConfig,
    candidates: &[ResolvedCoin],
    is_low_fee: Option<bool>,
    rng: &mut R,
) -> PolicyOutcome {
    if candidates.is_empty() {
        return PolicyOutcome::Reasons(Vec::new());
    }
    let mut reasons = Vec::new();
    let confirmed: Vec<&ResolvedCoin> = candidates.iter().filter(|coin| coin.is_confirmed()).collect();

    match config.consolidation_mode {
        ConsolidationMode::Always => reasons.push(MixReason::Consolidation),
        ConsolidationMode::WhenLowFeeAndManyUnspent if confirmed.len() > config.high_coin_count_threshold => {
            match is_low_fee {
                None => {
                    debug!(
                        target: LOG_TARGET,
                        "{} confirmed coins but the fee environment is unknown; deferring the decision",
                        confirmed.len()
                    );
                    return PolicyOutcome::Preliminary;
                },
                Some(true) => reasons.push(MixReason::Consolidation),
                Some(false) => {},
            }
        },
        _ => {},
    }

    let breakdown = PrivacyBreakdown::from_coins(confirmed.iter().copied(), config.anonymity_score_target);
    let privacy_percentage = breakdown.privacy_percentage();
    if privacy_percentage < 100.0 {
        reasons.push(MixReason::NotPrivate);
    } else {
        if rng.gen_bool(config.extra_join_probability) {
            reasons.push(MixReason::ExtraJoin);
        }
        if config.forward_to_wallet.is_some() {
            reasons.push(MixReason::WalletForward);
        }
    }
    trace!(
        target: LOG_TARGET,
        "Privacy at {:.1}% over {} confirmed coin(s), reasons: {:?}",
        privacy_percentage,
        confirmed.len(),
        reasons
    );
    PolicyOutcome::Reasons(reasons)
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use murmur_common_types::{OutPoint, Satoshi, ScriptPubkey, ScriptType, TxId};
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn coin(index: u32, score: f64, confirmations: u64) -> ResolvedCoin {
        ResolvedCoin {
            outpoint: OutPoint::new(TxId::from([7u8; 32]), index),
            value: Satoshi(50_000),
            script: ScriptPubkey::new(vec![index as u8]),
            script_type: ScriptType::P2wpkh,
            confirmations,
            anonymity_score: score,
            labels: BTreeSet::new(),
            last_coordinator: None,
            join_in_progress: false,
        }
    }

    fn coins(count: u32, score: f64) -> Vec<ResolvedCoin> {
        (0..count).map(|i| coin(i, score, 1)).collect()
    }

    #[test]
    fn no_candidates_no_reasons() {
        let config = MixingServiceConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(evaluate(&config, &[], Some(true), &mut rng), PolicyOutcome::Reasons(Vec::new()));
    }

    #[test]
    fn unprivate_holdings_want_mixing() {
        let config = MixingServiceConfig::default();
        let mut rng = StdRng::seed_from_u64(1);
        match evaluate(&config, &coins(5, 1.0), Some(false), &mut rng) {
            PolicyOutcome::Reasons(reasons) => assert_eq!(reasons, vec![MixReason::NotPrivate]),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn many_coins_defer_until_fee_info_is_known() {
        let config = MixingServiceConfig {
            consolidation_mode: ConsolidationMode::WhenLowFeeAndManyUnspent,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(evaluate(&config, &coins(31, 1.0), None, &mut rng), PolicyOutcome::Preliminary);
    }

    #[test]
    fn many_coins_and_low_fee_consolidate() {
        let config = MixingServiceConfig {
            consolidation_mode: ConsolidationMode::WhenLowFeeAndManyUnspent,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        match evaluate(&config, &coins(31, 1.0), Some(true), &mut rng) {
            PolicyOutcome::Reasons(reasons) => {
                assert!(reasons.contains(&MixReason::Consolidation));
                assert!(reasons.contains(&MixReason::NotPrivate));
            },
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn thirty_coins_is_not_above_the_threshold() {
        let config = MixingServiceConfig {
            consolidation_mode: ConsolidationMode::WhenLowFeeAndManyUnspent,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        match evaluate(&config, &coins(30, 1.0), None, &mut rng) {
            PolicyOutcome::Reasons(reasons) => assert_eq!(reasons, vec![MixReason::NotPrivate]),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn unconfirmed_coins_do_not_count_towards_consolidation() {
        let config = MixingServiceConfig {
            consolidation_mode: ConsolidationMode::WhenLowFeeAndManyUnspent,
            extra_join_probability: 0.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let candidates: Vec<ResolvedCoin> = (0..31).map(|i| coin(i, 1.0, 0)).collect();
        // 31 unconfirmed coins: no consolidation trigger and nothing confirmed to score
        match evaluate(&config, &candidates, None, &mut rng) {
            PolicyOutcome::Reasons(reasons) => assert!(reasons.is_empty()),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn fully_private_wallet_forwards_when_configured() {
        let config = MixingServiceConfig {
            forward_to_wallet: Some("cold storage".to_string()),
            extra_join_probability: 0.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        match evaluate(&config, &coins(4, 50.0), Some(false), &mut rng) {
            PolicyOutcome::Reasons(reasons) => assert_eq!(reasons, vec![MixReason::WalletForward]),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn fully_private_wallet_sometimes_joins_anyway() {
        let config = MixingServiceConfig {
            extra_join_probability: 1.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        match evaluate(&config, &coins(4, 50.0), Some(false), &mut rng) {
            PolicyOutcome::Reasons(reasons) => assert_eq!(reasons, vec![MixReason::ExtraJoin]),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
