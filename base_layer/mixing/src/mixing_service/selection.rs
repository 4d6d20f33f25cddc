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

//! Builds one candidate round solution: which coins to bring and which payments to settle.

use std::collections::VecDeque;

use log::*;
use murmur_common_types::{OutPoint, Satoshi};
use rand::{seq::SliceRandom, Rng};

use crate::mixing_service::{
    classification::PrivacyTier,
    config::{MixingServiceConfig, TierCounts},
    interface::{PendingPayment, RoundParameters},
    storage::models::ResolvedCoin,
};

const LOG_TARGET: &str = "wallet::mixing::selection";

/// A payment the solution settles, captured with its cost at selection time (payment value plus
/// its output's share of the mining fee).
#[derive(Debug, Clone, PartialEq)]
pub struct HandledPayment {
    pub payment: PendingPayment,
    pub cost: Satoshi,
}

/// The selector's output for one round attempt. Discarded once the round concludes; only the
/// realized outcome is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub coins: Vec<ResolvedCoin>,
    pub handled_payments: Vec<HandledPayment>,
    pub consolidating: bool,
}

impl Solution {
    pub fn empty(consolidating: bool) -> Self {
        Self {
            coins: Vec::new(),
            handled_payments: Vec::new(),
            consolidating,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coins.is_empty()
    }

    pub fn coin_outpoints(&self) -> Vec<OutPoint> {
        self.coins.iter().map(|coin| coin.outpoint).collect()
    }

    pub fn total_effective_value(&self, params: &RoundParameters) -> Satoshi {
        self.coins.iter().map(|coin| coin.effective_value(params)).sum()
    }

    pub fn payment_cost_total(&self) -> Satoshi {
        self.handled_payments.iter().map(|handled| handled.cost).sum()
    }

    /// Selected value not consumed by handled payments. Non-negative by construction.
    pub fn leftover(&self, params: &RoundParameters) -> Satoshi {
        self.total_effective_value(params).saturating_sub(self.payment_cost_total())
    }
}

/// What a payment costs a round at the announced fee rate: its value plus the fee for its output.
pub fn payment_output_cost(payment: &PendingPayment, params: &RoundParameters) -> Satoshi {
    payment.value + params.mining_fee_rate.fee_for_vsize(payment.destination_type.output_vsize())
}

/// Builds one [`Solution`] from eligible coins and pending payments under the round's
/// constraints. All randomness comes from the caller's source.
pub struct CoinSelector<'a> {
    config: &'a MixingServiceConfig,
    params: &'a RoundParameters,
    coordinator: &'a str,
    cross_mix_is_free: bool,
}

impl<'a> CoinSelector<'a> {
    pub fn new(
        config: &'a MixingServiceConfig,
        params: &'a RoundParameters,
        coordinator: &'a str,
        cross_mix_is_free: bool,
    ) -> Self {
        Self {
            config,
            params,
            coordinator,
            cross_mix_is_free,
        }
    }

    pub fn select<R: Rng>(
        &self,
        candidates: Vec<ResolvedCoin>,
        payments: Vec<PendingPayment>,
        consolidating: bool,
        liquidity_hint: Satoshi,
        rng: &mut R,
    ) -> Solution {
        let candidates = self.filter_candidates(candidates);
        if candidates.is_empty() {
            debug!(target: LOG_TARGET, "No candidates survived the round constraints");
            return Solution::empty(consolidating);
        }
        let mut pool = self.order_candidates(candidates, liquidity_hint, rng);
        // A payment whose destination the round cannot express can never be batched here
        let payments: Vec<PendingPayment> = payments
            .into_iter()
            .filter(|payment| self.params.allowed_output_types.contains(&payment.destination_type))
            .collect();
        let caps = self.tier_caps(!payments.is_empty());
        let target = self.config.anonymity_score_target;

        let mut selected: Vec<ResolvedCoin> = Vec::new();
        let mut counts = TierCounts::default();
        let mut remaining_payments = payments;
        let mut handled: Vec<HandledPayment> = Vec::new();

        loop {
            if selected.len() >= self.config.max_coins_per_round {
                break;
            }
            let pick = match self.next_pick(&pool, &counts, &caps, target, rng) {
                Some(pos) => pos,
                None => break,
            };
            let coin = pool.remove(pick);
            // Reused addresses are swept together: everything paying to the same script comes
            // along, regardless of tier caps or the coin budget.
            let script = coin.script.clone();
            let mut batch = vec![coin];
            let mut i = 0;
            while i < pool.len() {
                if pool[i].script == script {
                    batch.push(pool.remove(i));
                } else {
                    i += 1;
                }
            }
            for coin in batch {
                counts.increment(coin.tier(target));
                selected.push(coin);
            }

            let effective: Satoshi = selected.iter().map(|coin| coin.effective_value(self.params)).sum();
            let spent: Satoshi = handled.iter().map(|h| h.cost).sum();
            self.pack_payments(&mut remaining_payments, &mut handled, effective.saturating_sub(spent), rng);

            if selected.len() >= self.config.max_coins_per_round {
                break;
            }
            if remaining_payments.is_empty() {
                let spent: Satoshi = handled.iter().map(|h| h.cost).sum();
                let leftover = effective.saturating_sub(spent);
                let planned_outputs = handled.len() + 1;
                if !self.should_continue(selected.len(), planned_outputs, leftover, consolidating, rng) {
                    break;
                }
            }
        }

        info!(
            target: LOG_TARGET,
            "Selected {} coin(s) and {} payment(s), {} candidate(s) left in the pool",
            selected.len(),
            handled.len(),
            pool.len()
        );
        Solution {
            coins: selected,
            handled_payments: handled,
            consolidating,
        }
    }

    fn filter_candidates(&self, candidates: Vec<ResolvedCoin>) -> Vec<ResolvedCoin> {
        let before = candidates.len();
        let filtered: Vec<ResolvedCoin> = candidates
            .into_iter()
            .filter(|coin| {
                if !self.params.allowed_input_types.contains(&coin.script_type) {
                    return false;
                }
                if !self.params.allowed_input_amounts.contains(&coin.value) {
                    return false;
                }
                if coin.join_in_progress {
                    return false;
                }
                let effective = coin.effective_value(self.params).as_u64() as f64;
                if effective < coin.value.as_u64() as f64 * self.config.fee_efficiency_floor {
                    return false;
                }
                if let Some(previous) = &coin.last_coordinator {
                    if previous != self.coordinator &&
                        !self.config.allow_unconditional_cross_mix &&
                        !self.cross_mix_is_free
                    {
                        return false;
                    }
                }
                true
            })
            .collect();
        if filtered.len() < before {
            debug!(
                target: LOG_TARGET,
                "Round constraints dropped {} of {} candidate(s)",
                before - filtered.len(),
                before
            );
        }
        filtered
    }

    /// Least private first, largest effective value first within a tier, then two randomized
    /// passes that break value-based and common-ancestor fingerprints in the final ordering.
    fn order_candidates<R: Rng>(
        &self,
        mut coins: Vec<ResolvedCoin>,
        liquidity_hint: Satoshi,
        rng: &mut R,
    ) -> Vec<ResolvedCoin> {
        let target = self.config.anonymity_score_target;
        coins.sort_by(|a, b| {
            a.tier(target)
                .cmp(&b.tier(target))
                .then_with(|| b.effective_value(self.params).cmp(&a.effective_value(self.params)))
        });
        let mut coins = decluster(coins, liquidity_hint, rng);
        for i in 1..coins.len() {
            if rng.gen_bool(self.config.adjacent_swap_probability) {
                coins.swap(i - 1, i);
            }
        }
        coins
    }

    /// Per-tier caps for this attempt. Risky tiers are shut out entirely when payments must not
    /// be linkable or when the funds move on to another wallet; red-coin isolation admits at most
    /// one fully traceable coin.
    fn tier_caps(&self, handling_payments: bool) -> TierCounts {
        let mut caps = self.config.max_coins_per_tier;
        let forwarding = self.config.forward_to_wallet.is_some();
        if (handling_payments && self.config.strict_payment_privacy) || forwarding {
            caps.not_private = 0;
            caps.semi_private = 0;
        }
        if self.config.isolate_red_coins {
            caps.not_private = caps.not_private.min(1);
        }
        caps
    }

    /// The position of the next coin to pull, honouring which tier is furthest below its ideal
    /// minimum. Ties resolve in a shuffled tier order; tiers with ideal minimum 0 go last.
    fn next_pick<R: Rng>(
        &self,
        pool: &[ResolvedCoin],
        counts: &TierCounts,
        caps: &TierCounts,
        target: f64,
        rng: &mut R,
    ) -> Option<usize> {
        let mut tiers = [PrivacyTier::NotPrivate, PrivacyTier::SemiPrivate, PrivacyTier::Private];
        tiers.shuffle(rng);
        tiers.sort_by_key(|tier| {
            let ideal = self.config.ideal_minimum_per_tier.get(*tier);
            if ideal == 0 {
                (1, 0)
            } else {
                (0, counts.get(*tier) as i64 - ideal as i64)
            }
        });
        for tier in tiers {
            if counts.get(tier) >= caps.get(tier) {
                continue;
            }
            if let Some(pos) = pool.iter().position(|coin| coin.tier(target) == tier) {
                return Some(pos);
            }
        }
        None
    }

    /// Settle as many payments as fit the current leftover, shuffling the fitting set each round
    /// so no payment is systematically preferred.
    fn pack_payments<R: Rng>(
        &self,
        remaining: &mut Vec<PendingPayment>,
        handled: &mut Vec<HandledPayment>,
        mut leftover: Satoshi,
        rng: &mut R,
    ) {
        loop {
            let mut fitting: Vec<usize> = remaining
                .iter()
                .enumerate()
                .filter(|(_, payment)| payment_output_cost(payment, self.params) <= leftover)
                .map(|(i, _)| i)
                .collect();
            if fitting.is_empty() {
                break;
            }
            fitting.shuffle(rng);
            let payment = remaining.swap_remove(fitting[0]);
            let cost = payment_output_cost(&payment, self.params);
            leftover = leftover - cost;
            trace!(target: LOG_TARGET, "Handling payment {} at cost {}", payment.id, cost);
            handled.push(HandledPayment { payment, cost });
        }
    }

    /// Whether to keep pulling coins once every payment is handled. Stop pressure grows with the
    /// share of the coin budget already used.
    fn should_continue<R: Rng>(
        &self,
        selected_count: usize,
        planned_outputs: usize,
        leftover: Satoshi,
        consolidating: bool,
        rng: &mut R,
    ) -> bool {
        // A consolidation of one coin consolidates nothing.
        if consolidating && selected_count == 1 {
            return true;
        }
        // Stopping now would strand unspendable dust.
        if leftover < self.config.min_spendable_value {
            return true;
        }
        let budget = self.config.max_coins_per_round as f64;
        let mut reduction = 100.0 * selected_count as f64 / budget;
        if planned_outputs < self.config.min_output_target {
            reduction *= self.config.below_output_target_factor;
        }
        if consolidating {
            let divisor = rng.gen_range(self.config.consolidation_continue_divisor.clone());
            reduction /= divisor as f64;
        }
        let continue_probability = (100.0 - reduction).max(0.0);
        let draw = rng.gen_range(0.0..100.0);
        draw < continue_probability
    }
}

/// Break up runs of coins that share an originating transaction. A clustered coin is deferred to
/// the back of the queue unless it is the last item, the liquidity hint cannot spare it, or a
/// coin-flip lets it through.
fn decluster<R: Rng>(coins: Vec<ResolvedCoin>, liquidity_hint: Satoshi, rng: &mut R) -> Vec<ResolvedCoin> {
    let mut queue: VecDeque<ResolvedCoin> = coins.into();
    let mut out = Vec::with_capacity(queue.len());
    while let Some(coin) = queue.pop_front() {
        let clustered = out
            .last()
            .map(|previous: &ResolvedCoin| previous.outpoint.txid == coin.outpoint.txid)
            .unwrap_or(false);
        if clustered && !queue.is_empty() && liquidity_hint >= coin.value && !rng.gen_bool(0.5) {
            queue.push_back(coin);
            continue;
        }
        out.push(coin);
    }
    out
}
