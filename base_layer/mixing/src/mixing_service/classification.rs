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

use std::fmt::{Display, Formatter};

use murmur_common_types::Satoshi;

use crate::mixing_service::storage::models::ResolvedCoin;

/// How traceable a coin currently is, relative to the wallet's configured anonymity target.
/// The ordering is least private first; the selector relies on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrivacyTier {
    NotPrivate,
    SemiPrivate,
    Private,
}

impl Display for PrivacyTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PrivacyTier::NotPrivate => "NotPrivate",
            PrivacyTier::SemiPrivate => "SemiPrivate",
            PrivacyTier::Private => "Private",
        };
        write!(f, "{}", s)
    }
}

/// Classify an anonymity score against the wallet's target. A score of 1 means the coin has
/// exactly one plausible owner and is fully traceable.
pub fn classify(anonymity_score: f64, target: f64) -> PrivacyTier {
    if anonymity_score >= target {
        PrivacyTier::Private
    } else if anonymity_score > 1.0 {
        PrivacyTier::SemiPrivate
    } else {
        PrivacyTier::NotPrivate
    }
}

/// Per-tier value and count totals over a coin set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrivacyBreakdown {
    pub private_value: Satoshi,
    pub semi_private_value: Satoshi,
    pub not_private_value: Satoshi,
    pub private_count: usize,
    pub semi_private_count: usize,
    pub not_private_count: usize,
}

impl PrivacyBreakdown {
    pub fn from_coins<'a, I: IntoIterator<Item = &'a ResolvedCoin>>(coins: I, target: f64) -> Self {
        let mut breakdown = PrivacyBreakdown::default();
        for coin in coins {
            match classify(coin.anonymity_score, target) {
                PrivacyTier::Private => {
                    breakdown.private_value += coin.value;
                    breakdown.private_count += 1;
                },
                PrivacyTier::SemiPrivate => {
                    breakdown.semi_private_value += coin.value;
                    breakdown.semi_private_count += 1;
                },
                PrivacyTier::NotPrivate => {
                    breakdown.not_private_value += coin.value;
                    breakdown.not_private_count += 1;
                },
            }
        }
        breakdown
    }

    pub fn total_value(&self) -> Satoshi {
        self.private_value + self.semi_private_value + self.not_private_value
    }

    /// Value-weighted share of strictly private coins, in percent. An empty set is 100%: there is
    /// nothing left to make private.
    pub fn privacy_percentage(&self) -> f64 {
        let total = self.total_value().as_u64();
        if total == 0 {
            return 100.0;
        }
        self.private_value.as_u64() as f64 / total as f64 * 100.0
    }
}

impl Display for PrivacyBreakdown {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "private: {} ({}), semi-private: {} ({}), not private: {} ({})",
            self.private_value,
            self.private_count,
            self.semi_private_value,
            self.semi_private_count,
            self.not_private_value,
            self.not_private_count
        )
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeSet;

    use murmur_common_types::{OutPoint, Satoshi, ScriptPubkey, ScriptType, TxId};

    use super::*;

    fn coin(value: u64, score: f64) -> ResolvedCoin {
        ResolvedCoin {
            outpoint: OutPoint::new(TxId::from([score as u8; 32]), value as u32),
            value: Satoshi(value),
            script: ScriptPubkey::new(vec![value as u8]),
            script_type: ScriptType::P2wpkh,
            confirmations: 1,
            anonymity_score: score,
            labels: BTreeSet::new(),
            last_coordinator: None,
            join_in_progress: false,
        }
    }

    #[test]
    fn classify_boundaries() {
        assert_eq!(classify(1.0, 5.0), PrivacyTier::NotPrivate);
        assert_eq!(classify(1.01, 5.0), PrivacyTier::SemiPrivate);
        assert_eq!(classify(4.99, 5.0), PrivacyTier::SemiPrivate);
        assert_eq!(classify(5.0, 5.0), PrivacyTier::Private);
    }

    #[test]
    fn tier_ordering_is_least_private_first() {
        assert!(PrivacyTier::NotPrivate < PrivacyTier::SemiPrivate);
        assert!(PrivacyTier::SemiPrivate < PrivacyTier::Private);
    }

    #[test]
    fn percentage_is_value_weighted() {
        let coins = vec![coin(3_000, 10.0), coin(1_000, 1.0)];
        let breakdown = PrivacyBreakdown::from_coins(coins.iter(), 5.0);
        assert!((breakdown.privacy_percentage() - 75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn semi_private_value_does_not_count_as_private() {
        let coins = vec![coin(1_000, 3.0)];
        let breakdown = PrivacyBreakdown::from_coins(coins.iter(), 5.0);
        assert_eq!(breakdown.privacy_percentage(), 0.0);
        assert_eq!(breakdown.semi_private_count, 1);
    }

    #[test]
    fn raising_a_score_never_lowers_the_percentage() {
        let mut coins = vec![coin(3_000, 1.0), coin(1_000, 10.0)];
        let before = PrivacyBreakdown::from_coins(coins.iter(), 5.0).privacy_percentage();
        coins[0].anonymity_score = 10.0;
        let after = PrivacyBreakdown::from_coins(coins.iter(), 5.0).privacy_percentage();
        assert!(after >= before);
    }
}
