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

use std::{ops::RangeInclusive, time::Duration};

use murmur_common_types::Satoshi;

use crate::mixing_service::classification::PrivacyTier;

/// When the wallet joins rounds purely to merge many small coins into fewer larger ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidationMode {
    /// Never consolidate.
    Never,
    /// Consolidate when fees are low and the confirmed coin count exceeds
    /// [`MixingServiceConfig::high_coin_count_threshold`].
    WhenLowFeeAndManyUnspent,
    /// Consolidate on every round.
    Always,
}

impl Default for ConsolidationMode {
    fn default() -> Self {
        ConsolidationMode::Never
    }
}

/// A coin count per privacy tier, used both for the selector's ideal minimums and its hard caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierCounts {
    pub not_private: usize,
    pub semi_private: usize,
    pub private: usize,
}

impl TierCounts {
    pub const fn splat(count: usize) -> Self {
        Self {
            not_private: count,
            semi_private: count,
            private: count,
        }
    }

    pub fn get(&self, tier: PrivacyTier) -> usize {
        match tier {
            PrivacyTier::NotPrivate => self.not_private,
            PrivacyTier::SemiPrivate => self.semi_private,
            PrivacyTier::Private => self.private,
        }
    }

    pub fn increment(&mut self, tier: PrivacyTier) {
        match tier {
            PrivacyTier::NotPrivate => self.not_private += 1,
            PrivacyTier::SemiPrivate => self.semi_private += 1,
            PrivacyTier::Private => self.private += 1,
        }
    }
}

/// Tunables for the mixing engine. The numeric defaults are hand-tuned operating values carried
/// over from long-running deployments; override them per wallet rather than editing them here.
#[derive(Debug, Clone)]
pub struct MixingServiceConfig {
    /// Anonymity score at or above which a coin counts as private.
    pub anonymity_score_target: f64,
    /// A coin is skipped for a round when fees would eat more than this fraction of its value.
    pub fee_efficiency_floor: f64,
    /// Minimum registered coin count for a consolidation to still count as one.
    pub consolidation_floor: usize,
    /// Confirmed coin count above which the wallet starts looking for consolidation rounds.
    pub high_coin_count_threshold: usize,
    /// Probability of joining a round when the wallet is already fully private.
    pub extra_join_probability: f64,
    /// Probability of swapping each adjacent candidate pair during ordering.
    pub adjacent_swap_probability: f64,
    /// Divisor range applied to the stop pressure while consolidating.
    pub consolidation_continue_divisor: RangeInclusive<u64>,
    /// The selector tops up each tier to this count before following value order.
    pub ideal_minimum_per_tier: TierCounts,
    /// Hard per-tier caps for one attempt.
    pub max_coins_per_tier: TierCounts,
    /// Hard cap on the number of coins brought to one round.
    pub max_coins_per_round: usize,
    /// Planned output count below which the selector is more eager to stop adding coins.
    pub min_output_target: usize,
    /// Stop-pressure multiplier applied below `min_output_target`.
    pub below_output_target_factor: f64,
    /// The selector keeps adding coins while the leftover would be below this.
    pub min_spendable_value: Satoshi,
    /// How many ancestor levels the resolver walks before treating a chain as resolved.
    pub max_ancestry_depth: usize,
    /// How long a resolved coin's metadata stays cached. External labels can change between
    /// rounds, so this should stay minutes-scale.
    pub resolution_cache_ttl: Duration,
    /// Persistence retries for a completed round's record.
    pub persist_max_retries: usize,
    /// Backoff before the first persistence retry; doubles per retry.
    pub persist_retry_backoff: Duration,
    pub consolidation_mode: ConsolidationMode,
    /// Settle pending payments inside rounds.
    pub payment_batching_enabled: bool,
    /// Exclude non-private tiers entirely from attempts that settle payments.
    pub strict_payment_privacy: bool,
    /// Allow at most one fully traceable coin per attempt.
    pub isolate_red_coins: bool,
    /// Allow remixing coins under a different coordinator even when it is not free.
    pub allow_unconditional_cross_mix: bool,
    /// Secondary wallet that fully private funds are forwarded to.
    pub forward_to_wallet: Option<String>,
}

impl Default for MixingServiceConfig {
    fn default() -> Self {
        Self {
            anonymity_score_target: 5.0,
            fee_efficiency_floor: 0.5,
            consolidation_floor: 10,
            high_coin_count_threshold: 30,
            extra_join_probability: 0.1,
            adjacent_swap_probability: 0.1,
            consolidation_continue_divisor: 2..=8,
            ideal_minimum_per_tier: TierCounts::splat(1),
            max_coins_per_tier: TierCounts::splat(usize::MAX),
            max_coins_per_round: 21,
            min_output_target: 2,
            below_output_target_factor: 2.0,
            min_spendable_value: Satoshi(5_000),
            max_ancestry_depth: 3,
            resolution_cache_ttl: Duration::from_secs(120),
            persist_max_retries: 3,
            persist_retry_backoff: Duration::from_millis(500),
            consolidation_mode: ConsolidationMode::default(),
            payment_batching_enabled: true,
            strict_payment_privacy: false,
            isolate_red_coins: false,
            allow_unconditional_cross_mix: false,
            forward_to_wallet: None,
        }
    }
}
