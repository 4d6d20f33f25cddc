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

use std::{cmp::Ordering, collections::BTreeSet};

use chrono::NaiveDateTime;
use murmur_common_types::{OutPoint, Satoshi, ScriptPubkey, ScriptType, TxId};
use serde::{Deserialize, Serialize};

use crate::mixing_service::{
    classification::{classify, PrivacyTier},
    interface::{PaymentId, RoundParameters},
};

/// A coin together with the privacy metadata the resolver derived for it. The snapshot is
/// immutable; callers that need current metadata re-resolve instead of mutating shared state.
#[derive(Debug, Clone)]
pub struct ResolvedCoin {
    pub outpoint: OutPoint,
    pub value: Satoshi,
    pub script: ScriptPubkey,
    pub script_type: ScriptType,
    pub confirmations: u64,
    /// Estimated number of equally likely owners. Always at least 1.
    pub anonymity_score: f64,
    pub labels: BTreeSet<String>,
    /// Coordinator of the last round this coin came out of, when known.
    pub last_coordinator: Option<String>,
    /// Set when another attempt holds the process-wide lock on this outpoint.
    pub join_in_progress: bool,
}

impl ResolvedCoin {
    pub fn is_confirmed(&self) -> bool {
        self.confirmations > 0
    }

    pub fn tier(&self, anonymity_score_target: f64) -> PrivacyTier {
        classify(self.anonymity_score, anonymity_score_target)
    }

    /// The value this coin contributes to a round after its share of the mining fee and the
    /// coordination fee at the announced rates.
    pub fn effective_value(&self, params: &RoundParameters) -> Satoshi {
        let mining_fee = params.mining_fee_rate.fee_for_vsize(self.script_type.input_vsize());
        let coordination_fee = Satoshi((self.value.as_u64() as f64 * params.coordination_fee_rate) as u64);
        self.value.saturating_sub(mining_fee + coordination_fee)
    }
}

impl PartialEq for ResolvedCoin {
    fn eq(&self, other: &ResolvedCoin) -> bool {
        self.outpoint == other.outpoint
    }
}

impl Eq for ResolvedCoin {}

impl PartialOrd<ResolvedCoin> for ResolvedCoin {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResolvedCoin {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value).then_with(|| self.outpoint.cmp(&other.outpoint))
    }
}

/// A coin consumed by a completed round, captured with its pre-round metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedInput {
    pub outpoint: OutPoint,
    pub value: Satoshi,
    pub anonymity_score: f64,
}

/// A coin produced by a completed round. `payment` links the output to the pending payment it
/// settled; `None` marks an output the wallet keeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedOutput {
    pub outpoint: OutPoint,
    pub value: Satoshi,
    pub anonymity_score: f64,
    pub payment: Option<PaymentId>,
}

/// The durable outcome of one successfully completed round. Immutable once created; appended to
/// the wallet's transaction history by the record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinjoinRecord {
    pub round_id: String,
    pub coordinator: String,
    pub txid: TxId,
    pub coins_in: Vec<RecordedInput>,
    pub coins_out: Vec<RecordedOutput>,
    pub timestamp: NaiveDateTime,
}

impl CoinjoinRecord {
    /// Total value consumed minus total value produced, i.e. what this round cost the wallet in
    /// mining and coordination fees.
    pub fn fee_contribution(&self) -> Satoshi {
        let consumed: Satoshi = self.coins_in.iter().map(|input| input.value).sum();
        let produced: Satoshi = self.coins_out.iter().map(|output| output.value).sum();
        consumed.saturating_sub(produced)
    }
}
