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

//! One round attempt: the solution the wallet committed to, the reasons it is participating, and
//! the two checkpoints at which it re-validates that participation.

use std::fmt;

use itertools::Itertools;
use log::*;
use murmur_common_types::{OutPoint, Satoshi, TxId};
use rand::{rngs::OsRng, RngCore};
use strum_macros::Display;

use crate::mixing_service::{
    classification::PrivacyTier,
    interface::{PaymentId, RoundParameters},
    policy::MixReason,
    selection::{payment_output_cost, Solution},
    storage::models::ResolvedCoin,
};

const LOG_TARGET: &str = "wallet::mixing::round";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttemptId(u64);

impl AttemptId {
    pub fn new_random() -> Self {
        AttemptId(OsRng.next_u64())
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for AttemptId {
    fn from(id: u64) -> Self {
        AttemptId(id)
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How far an attempt has progressed through the round protocol. Checkpoints must run in order;
/// an out-of-order call is answered with a withdrawal, never a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AttemptStage {
    Selected,
    Registered,
    Finalized,
}

/// A wallet output realized by the finished round.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedOutput {
    pub outpoint: OutPoint,
    pub value: Satoshi,
    pub anonymity_score: f64,
}

/// A batched payment output realized by the finished round.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedPaymentOutput {
    pub outpoint: OutPoint,
    pub payment: PaymentId,
    pub value: Satoshi,
}

/// What the unsigned round transaction pays this wallet and its payees.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedOutputs {
    pub txid: TxId,
    pub our_outputs: Vec<RealizedOutput>,
    pub payment_outputs: Vec<RealizedPaymentOutput>,
}

/// One select, register, finalize pass. Holds the solution and narrows the reason set as the
/// round reveals what actually happened.
#[derive(Debug, Clone)]
pub struct RoundAttempt {
    id: AttemptId,
    coordinator: String,
    params: RoundParameters,
    solution: Solution,
    reasons: Vec<MixReason>,
    stage: AttemptStage,
    registered: Vec<ResolvedCoin>,
    anonymity_score_target: f64,
    consolidation_floor: usize,
}

impl RoundAttempt {
    pub(crate) fn new(
        coordinator: String,
        params: RoundParameters,
        solution: Solution,
        reasons: Vec<MixReason>,
        anonymity_score_target: f64,
        consolidation_floor: usize,
    ) -> Self {
        Self {
            id: AttemptId::new_random(),
            coordinator,
            params,
            solution,
            reasons,
            stage: AttemptStage::Selected,
            registered: Vec::new(),
            anonymity_score_target,
            consolidation_floor,
        }
    }

    pub fn id(&self) -> AttemptId {
        self.id
    }

    pub fn coordinator(&self) -> &str {
        &self.coordinator
    }

    pub fn params(&self) -> &RoundParameters {
        &self.params
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    pub fn reasons(&self) -> &[MixReason] {
        &self.reasons
    }

    pub fn stage(&self) -> AttemptStage {
        self.stage
    }

    /// The coins the coordinator actually accepted, as of the registration checkpoint.
    pub fn registered_coins(&self) -> &[ResolvedCoin] {
        &self.registered
    }

    /// First checkpoint: enough of the chosen coins were actually accepted by the coordinator?
    /// Returns false when no participation reason survives; the caller must then withdraw and
    /// release the attempt's locks.
    pub fn accept_registered(&mut self, registered: &[OutPoint]) -> bool {
        if self.stage != AttemptStage::Selected {
            error!(
                target: LOG_TARGET,
                "[{}] Registration checkpoint invoked in stage {}", self.id, self.stage
            );
            return false;
        }
        let registered_coins: Vec<ResolvedCoin> = self
            .solution
            .coins
            .iter()
            .filter(|coin| registered.contains(&coin.outpoint))
            .cloned()
            .collect();

        if registered_coins.len() < self.consolidation_floor {
            self.drop_reason(MixReason::Consolidation, "too few coins registered");
        }
        let effective_sum: Satoshi = registered_coins
            .iter()
            .map(|coin| coin.effective_value(&self.params))
            .sum();
        let any_coverable = self
            .solution
            .handled_payments
            .iter()
            .any(|handled| payment_output_cost(&handled.payment, &self.params) <= effective_sum);
        if !any_coverable {
            self.drop_reason(MixReason::Payment, "registered value covers no payment");
        }
        if registered_coins
            .iter()
            .all(|coin| coin.tier(self.anonymity_score_target) == PrivacyTier::Private)
        {
            self.drop_reason(MixReason::NotPrivate, "every registered coin is already private");
        }
        if registered_coins.len() != self.solution.coins.len() {
            self.drop_reason(MixReason::ExtraJoin, "registration partially failed");
        }
        self.registered = registered_coins;

        let proceed = !self.reasons.is_empty();
        if proceed {
            self.stage = AttemptStage::Registered;
            debug!(
                target: LOG_TARGET,
                "[{}] Proceeding past registration with {} coin(s), reasons: {}",
                self.id,
                self.registered.len(),
                self.reasons.iter().map(|r| r.to_string()).join(", ")
            );
        } else {
            info!(
                target: LOG_TARGET,
                "[{}] Withdrawing at the registration checkpoint: no reason left to participate", self.id
            );
        }
        proceed
    }

    /// Second checkpoint: does the realized outcome still justify proceeding? Must only run after
    /// a successful registration checkpoint.
    pub fn accept_outputs(&mut self, realized: &RealizedOutputs) -> bool {
        if self.stage != AttemptStage::Registered {
            error!(
                target: LOG_TARGET,
                "[{}] Output checkpoint invoked in stage {}", self.id, self.stage
            );
            return false;
        }
        let input_average = weighted_average_score(
            self.registered
                .iter()
                .map(|coin| (coin.value, coin.anonymity_score)),
        );
        let output_average =
            weighted_average_score(realized.our_outputs.iter().map(|output| (output.value, output.anonymity_score)));

        let payments_batched = !realized.payment_outputs.is_empty();
        if !payments_batched {
            self.drop_reason(MixReason::Payment, "no payment was batched into the outputs");
        }
        // With payments on board, holding the average steady is enough; a pure privacy round has
        // to actually improve it.
        let gained = if payments_batched {
            output_average >= input_average
        } else {
            output_average > input_average
        };
        if !gained {
            self.drop_reason(MixReason::NotPrivate, "realized outputs gained no anonymity");
            self.drop_reason(MixReason::ExtraJoin, "realized outputs gained no anonymity");
        }
        if realized.our_outputs.len() > self.registered.len() {
            self.drop_reason(MixReason::Consolidation, "more outputs than inputs consumed");
        }

        let proceed = !self.reasons.is_empty();
        if proceed {
            self.stage = AttemptStage::Finalized;
            debug!(
                target: LOG_TARGET,
                "[{}] Proceeding past outputs: anonymity {:.2} -> {:.2}, reasons: {}",
                self.id,
                input_average,
                output_average,
                self.reasons.iter().map(|r| r.to_string()).join(", ")
            );
        } else {
            info!(
                target: LOG_TARGET,
                "[{}] Withdrawing at the output checkpoint: no reason left to participate", self.id
            );
        }
        proceed
    }

    fn drop_reason(&mut self, reason: MixReason, why: &str) {
        if self.reasons.contains(&reason) {
            debug!(target: LOG_TARGET, "[{}] Dropping reason {}: {}", self.id, reason, why);
            self.reasons.retain(|r| *r != reason);
        }
    }
}

fn weighted_average_score<I: IntoIterator<Item = (Satoshi, f64)>>(items: I) -> f64 {
    let mut weighted = 0f64;
    let mut total = 0u64;
    for (value, score) in items {
        weighted += value.as_u64() as f64 * score;
        total += value.as_u64();
    }
    if total == 0 {
        return 0.0;
    }
    weighted / total as f64
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use murmur_common_types::{FeeRate, ScriptPubkey, ScriptType};

    use super::*;

    fn round_params() -> RoundParameters {
        RoundParameters {
            allowed_input_amounts: Satoshi(5_000)..=Satoshi(1_000_000_000),
            allowed_input_types: vec![ScriptType::P2wpkh],
            allowed_output_types: vec![ScriptType::P2wpkh],
            mining_fee_rate: FeeRate(2),
            min_input_count: 1,
            coordination_fee_rate: 0.0,
        }
    }

    fn coin(index: u32, value: u64, score: f64) -> ResolvedCoin {
        ResolvedCoin {
            outpoint: OutPoint::new(TxId::from([4u8; 32]), index),
            value: Satoshi(value),
            script: ScriptPubkey::new(vec![index as u8]),
            script_type: ScriptType::P2wpkh,
            confirmations: 1,
            anonymity_score: score,
            labels: BTreeSet::new(),
            last_coordinator: None,
            join_in_progress: false,
        }
    }

    fn attempt(coins: Vec<ResolvedCoin>, reasons: Vec<MixReason>) -> RoundAttempt {
        let solution = Solution {
            coins,
            handled_payments: Vec::new(),
            consolidating: reasons.contains(&MixReason::Consolidation),
        };
        RoundAttempt::new("coordinator-a".to_string(), round_params(), solution, reasons, 5.0, 10)
    }

    fn realized(txid_byte: u8, ours: Vec<(u64, f64)>) -> RealizedOutputs {
        RealizedOutputs {
            txid: TxId::from([txid_byte; 32]),
            our_outputs: ours
                .into_iter()
                .enumerate()
                .map(|(i, (value, score))| RealizedOutput {
                    outpoint: OutPoint::new(TxId::from([txid_byte; 32]), i as u32),
                    value: Satoshi(value),
                    anonymity_score: score,
                })
                .collect(),
            payment_outputs: Vec::new(),
        }
    }

    #[test]
    fn consolidation_needs_ten_registered_coins() {
        let coins: Vec<ResolvedCoin> = (0..10).map(|i| coin(i, 50_000, 1.0)).collect();
        let registered: Vec<OutPoint> = coins.iter().take(9).map(|c| c.outpoint).collect();
        let mut attempt = attempt(coins, vec![MixReason::Consolidation]);
        assert!(!attempt.accept_registered(&registered));
        assert!(attempt.reasons().is_empty());
    }

    #[test]
    fn consolidation_survives_a_full_registration() {
        let coins: Vec<ResolvedCoin> = (0..10).map(|i| coin(i, 50_000, 1.0)).collect();
        let registered: Vec<OutPoint> = coins.iter().map(|c| c.outpoint).collect();
        let mut attempt = attempt(coins, vec![MixReason::Consolidation]);
        assert!(attempt.accept_registered(&registered));
        assert_eq!(attempt.stage(), AttemptStage::Registered);
    }

    #[test]
    fn not_private_drops_when_everything_registered_is_private() {
        let coins: Vec<ResolvedCoin> = (0..3).map(|i| coin(i, 50_000, 50.0)).collect();
        let registered: Vec<OutPoint> = coins.iter().map(|c| c.outpoint).collect();
        let mut attempt = attempt(coins, vec![MixReason::NotPrivate]);
        assert!(!attempt.accept_registered(&registered));
    }

    #[test]
    fn extra_join_drops_on_partial_registration() {
        let coins: Vec<ResolvedCoin> = (0..3).map(|i| coin(i, 50_000, 50.0)).collect();
        let registered: Vec<OutPoint> = coins.iter().take(2).map(|c| c.outpoint).collect();
        let mut attempt = attempt(coins, vec![MixReason::ExtraJoin]);
        assert!(!attempt.accept_registered(&registered));
    }

    #[test]
    fn output_checkpoint_requires_registration_first() {
        let coins: Vec<ResolvedCoin> = (0..3).map(|i| coin(i, 50_000, 1.0)).collect();
        let mut attempt = attempt(coins, vec![MixReason::NotPrivate]);
        assert!(!attempt.accept_outputs(&realized(9, vec![(49_000, 20.0)])));
        assert_eq!(attempt.stage(), AttemptStage::Selected);
    }

    #[test]
    fn anonymity_must_improve_without_payments() {
        let coins: Vec<ResolvedCoin> = (0..3).map(|i| coin(i, 50_000, 2.0)).collect();
        let registered: Vec<OutPoint> = coins.iter().map(|c| c.outpoint).collect();
        let mut attempt = attempt(coins, vec![MixReason::NotPrivate]);
        assert!(attempt.accept_registered(&registered));
        // Outputs at the same weighted score: no gain, withdraw
        assert!(!attempt.accept_outputs(&realized(9, vec![(150_000, 2.0)])));
    }

    #[test]
    fn anonymity_gain_finalizes_the_attempt() {
        let coins: Vec<ResolvedCoin> = (0..3).map(|i| coin(i, 50_000, 2.0)).collect();
        let registered: Vec<OutPoint> = coins.iter().map(|c| c.outpoint).collect();
        let mut attempt = attempt(coins, vec![MixReason::NotPrivate]);
        assert!(attempt.accept_registered(&registered));
        assert!(attempt.accept_outputs(&realized(9, vec![(149_000, 8.0)])));
        assert_eq!(attempt.stage(), AttemptStage::Finalized);
    }

    #[test]
    fn consolidation_fails_when_outputs_exceed_inputs() {
        let coins: Vec<ResolvedCoin> = (0..10).map(|i| coin(i, 50_000, 1.0)).collect();
        let registered: Vec<OutPoint> = coins.iter().map(|c| c.outpoint).collect();
        let mut attempt = attempt(coins, vec![MixReason::Consolidation]);
        assert!(attempt.accept_registered(&registered));
        let outputs: Vec<(u64, f64)> = (0..11).map(|_| (4_000, 5.0)).collect();
        assert!(!attempt.accept_outputs(&realized(9, outputs)));
    }

    #[test]
    fn weighted_average_is_value_weighted() {
        let avg = weighted_average_score(vec![(Satoshi(3_000), 10.0), (Satoshi(1_000), 2.0)]);
        assert!((avg - 8.0).abs() < f64::EPSILON);
        assert_eq!(weighted_average_score(Vec::new()), 0.0);
    }
}
