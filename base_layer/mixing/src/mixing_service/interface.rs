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

//! Collaborator contracts the engine is given at construction. The engine owns none of the
//! resources behind these traits; tests inject in-memory doubles.

use std::{
    collections::HashSet,
    fmt,
    fmt::{Display, Formatter},
    ops::RangeInclusive,
    sync::Arc,
};

use async_trait::async_trait;
use murmur_common_types::{FeeRate, OutPoint, Satoshi, ScriptPubkey, ScriptType, TxId};
use serde::{Deserialize, Serialize};

use crate::mixing_service::{error::MixingInterfaceError, storage::models::CoinjoinRecord};

/// An unspent output as reported by the ledger, before privacy resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub outpoint: OutPoint,
    pub value: Satoshi,
    pub script: ScriptPubkey,
    pub script_type: ScriptType,
    pub confirmations: u64,
}

/// A transaction as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub txid: TxId,
    pub inputs: Vec<OutPoint>,
    pub outputs: Vec<LedgerOutput>,
    pub confirmations: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerOutput {
    pub value: Satoshi,
    pub script: ScriptPubkey,
}

/// A key under which external metadata can be attached to ledger entities.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AttachmentKey {
    Transaction(TxId),
    Script(ScriptPubkey),
    Output(OutPoint),
}

/// External metadata attached to a transaction, script or outpoint by other subsystems
/// (user tags, coinjoin round results, manual anonymity corrections).
#[derive(Debug, Clone, PartialEq)]
pub enum Attachment {
    Label(String),
    AnonymityOverride(f64),
    CoinjoinRound {
        round_id: String,
        coordinator: String,
        outputs: Vec<(OutPoint, f64)>,
    },
}

/// Parameters announced by the coordinating round. Read-only selection constraints.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundParameters {
    pub allowed_input_amounts: RangeInclusive<Satoshi>,
    pub allowed_input_types: Vec<ScriptType>,
    pub allowed_output_types: Vec<ScriptType>,
    pub mining_fee_rate: FeeRate,
    pub min_input_count: usize,
    /// Coordinator fee as a fraction of each input's value.
    pub coordination_fee_rate: f64,
}

#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Fetch the wallet's current unspent output set.
    async fn get_unspent_outputs(&self) -> Result<Vec<UnspentOutput>, MixingInterfaceError>;

    /// Fetch a transaction by id. `Ok(None)` means the ledger does not know the transaction;
    /// an `Err` means the ledger itself could not be reached.
    async fn get_transaction(&self, txid: TxId) -> Result<Option<LedgerTransaction>, MixingInterfaceError>;
}

#[async_trait]
pub trait LabelStore: Send + Sync {
    /// Fetch every attachment stored under the given key.
    async fn get_attachments(&self, key: &AttachmentKey) -> Result<Vec<Attachment>, MixingInterfaceError>;
}

/// Process-wide UTXO locking. Locks taken here are what other wallet subsystems consult before
/// spending; pairing them with the in-engine "join in progress" flag is mandatory.
#[async_trait]
pub trait UtxoLocker: Send + Sync {
    /// Attempt to take the lock on an outpoint. Returns false when it is already held.
    async fn try_lock(&self, outpoint: OutPoint) -> Result<bool, MixingInterfaceError>;

    async fn unlock(&self, outpoints: &[OutPoint]) -> Result<(), MixingInterfaceError>;

    /// Which of the given outpoints are currently locked.
    async fn find_locks(&self, outpoints: &[OutPoint]) -> Result<HashSet<OutPoint>, MixingInterfaceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PaymentId(pub u64);

impl Display for PaymentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle callbacks for one pending payment. `mark_started` must succeed before the payment is
/// considered part of an attempt; exactly one of the other two is invoked when the attempt ends.
#[async_trait]
pub trait PaymentSink: Send + Sync {
    async fn mark_started(&self) -> Result<(), MixingInterfaceError>;

    async fn mark_succeeded(&self, round_id: &str, txid: TxId) -> Result<(), MixingInterfaceError>;

    async fn mark_failed(&self) -> Result<(), MixingInterfaceError>;
}

/// An outgoing payment awaiting settlement. Equality ignores the sink so payments stay comparable
/// in tests and logs.
#[derive(Clone)]
pub struct PendingPayment {
    pub id: PaymentId,
    pub destination: ScriptPubkey,
    pub destination_type: ScriptType,
    pub value: Satoshi,
    pub sink: Arc<dyn PaymentSink>,
}

impl PartialEq for PendingPayment {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id &&
            self.destination == other.destination &&
            self.destination_type == other.destination_type &&
            self.value == other.value
    }
}

impl fmt::Debug for PendingPayment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPayment")
            .field("id", &self.id)
            .field("destination", &self.destination)
            .field("destination_type", &self.destination_type)
            .field("value", &self.value)
            .finish()
    }
}

#[async_trait]
pub trait PaymentSource: Send + Sync {
    /// Payments currently eligible for settlement under the given round parameters. Each payment
    /// arrives already bound to its sink.
    async fn pending_payments(&self, params: &RoundParameters) -> Result<Vec<PendingPayment>, MixingInterfaceError>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Durably append the realized outcome of a completed round.
    async fn append_coinjoin_record(&self, record: &CoinjoinRecord) -> Result<(), MixingInterfaceError>;
}
