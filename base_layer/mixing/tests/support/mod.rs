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

//! In-memory collaborator doubles for driving the mixing engine end to end.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use async_trait::async_trait;
use murmur_common_types::{FeeRate, OutPoint, Satoshi, ScriptPubkey, ScriptType, TxId};
use murmur_mixing::mixing_service::{
    error::MixingInterfaceError,
    interface::{
        Attachment,
        AttachmentKey,
        LabelStore,
        LedgerOutput,
        LedgerService,
        LedgerTransaction,
        PaymentId,
        PaymentSink,
        PaymentSource,
        PendingPayment,
        RecordStore,
        RoundParameters,
        UnspentOutput,
        UtxoLocker,
    },
    storage::models::CoinjoinRecord,
};

pub fn txid(byte: u8) -> TxId {
    TxId::from([byte; 32])
}

pub fn outpoint(byte: u8, index: u32) -> OutPoint {
    OutPoint::new(txid(byte), index)
}

pub fn script(byte: u8) -> ScriptPubkey {
    ScriptPubkey::new(vec![0x51, byte])
}

pub fn round_params() -> RoundParameters {
    RoundParameters {
        allowed_input_amounts: Satoshi(1)..=Satoshi(u64::MAX),
        allowed_input_types: vec![ScriptType::P2wpkh],
        allowed_output_types: vec![ScriptType::P2wpkh],
        mining_fee_rate: FeeRate(2),
        min_input_count: 1,
        coordination_fee_rate: 0.0,
    }
}

#[derive(Clone, Default)]
pub struct MemoryLedger {
    unspent: Arc<Mutex<Vec<UnspentOutput>>>,
    transactions: Arc<Mutex<HashMap<TxId, LedgerTransaction>>>,
    fetch_count: Arc<AtomicUsize>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a confirmed single-output coin together with its owning transaction.
    pub fn seed_coin(&self, byte: u8, value: u64) -> UnspentOutput {
        self.seed_coin_with(byte, value, script(byte), 1)
    }

    pub fn seed_coin_with(&self, byte: u8, value: u64, coin_script: ScriptPubkey, confirmations: u64) -> UnspentOutput {
        let tx = LedgerTransaction {
            txid: txid(byte),
            inputs: Vec::new(),
            outputs: vec![LedgerOutput {
                value: Satoshi(value),
                script: coin_script.clone(),
            }],
            confirmations,
        };
        self.add_transaction(tx);
        let output = UnspentOutput {
            outpoint: outpoint(byte, 0),
            value: Satoshi(value),
            script: coin_script,
            script_type: ScriptType::P2wpkh,
            confirmations,
        };
        self.add_unspent(output.clone());
        output
    }

    pub fn add_unspent(&self, output: UnspentOutput) {
        self.unspent.lock().unwrap().push(output);
    }

    pub fn add_transaction(&self, tx: LedgerTransaction) {
        self.transactions.lock().unwrap().insert(tx.txid, tx);
    }

    pub fn transaction_fetches(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerService for MemoryLedger {
    async fn get_unspent_outputs(&self) -> Result<Vec<UnspentOutput>, MixingInterfaceError> {
        Ok(self.unspent.lock().unwrap().clone())
    }

    async fn get_transaction(&self, txid: TxId) -> Result<Option<LedgerTransaction>, MixingInterfaceError> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.transactions.lock().unwrap().get(&txid).cloned())
    }
}

#[derive(Clone, Default)]
pub struct MemoryLabelStore {
    attachments: Arc<Mutex<HashMap<AttachmentKey, Vec<Attachment>>>>,
}

impl MemoryLabelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, key: AttachmentKey, attachment: Attachment) {
        self.attachments.lock().unwrap().entry(key).or_default().push(attachment);
    }
}

#[async_trait]
impl LabelStore for MemoryLabelStore {
    async fn get_attachments(&self, key: &AttachmentKey) -> Result<Vec<Attachment>, MixingInterfaceError> {
        Ok(self.attachments.lock().unwrap().get(key).cloned().unwrap_or_default())
    }
}

#[derive(Clone, Default)]
pub struct MemoryLocker {
    locked: Arc<Mutex<HashSet<OutPoint>>>,
}

impl MemoryLocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locked_outpoints(&self) -> HashSet<OutPoint> {
        self.locked.lock().unwrap().clone()
    }

    pub fn lock_externally(&self, outpoint: OutPoint) {
        self.locked.lock().unwrap().insert(outpoint);
    }
}

#[async_trait]
impl UtxoLocker for MemoryLocker {
    async fn try_lock(&self, outpoint: OutPoint) -> Result<bool, MixingInterfaceError> {
        Ok(self.locked.lock().unwrap().insert(outpoint))
    }

    async fn unlock(&self, outpoints: &[OutPoint]) -> Result<(), MixingInterfaceError> {
        let mut locked = self.locked.lock().unwrap();
        for outpoint in outpoints {
            locked.remove(outpoint);
        }
        Ok(())
    }

    async fn find_locks(&self, outpoints: &[OutPoint]) -> Result<HashSet<OutPoint>, MixingInterfaceError> {
        let locked = self.locked.lock().unwrap();
        Ok(outpoints.iter().filter(|op| locked.contains(op)).copied().collect())
    }
}

#[derive(Default)]
pub struct SinkCounters {
    pub started: AtomicUsize,
    pub succeeded: AtomicUsize,
    pub failed: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct TestPaymentSink {
    pub counters: Arc<SinkCounters>,
    pub fail_start: bool,
}

impl TestPaymentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_to_start() -> Self {
        Self {
            counters: Arc::new(SinkCounters::default()),
            fail_start: true,
        }
    }
}

#[async_trait]
impl PaymentSink for TestPaymentSink {
    async fn mark_started(&self) -> Result<(), MixingInterfaceError> {
        if self.fail_start {
            return Err(MixingInterfaceError::Unavailable("payment already committed".to_string()));
        }
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_succeeded(&self, _round_id: &str, _txid: TxId) -> Result<(), MixingInterfaceError> {
        self.counters.succeeded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn mark_failed(&self) -> Result<(), MixingInterfaceError> {
        self.counters.failed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn payment(id: u64, value: u64, sink: TestPaymentSink) -> PendingPayment {
    PendingPayment {
        id: PaymentId(id),
        destination: ScriptPubkey::new(vec![0xaa, id as u8]),
        destination_type: ScriptType::P2wpkh,
        value: Satoshi(value),
        sink: Arc::new(sink),
    }
}

#[derive(Clone, Default)]
pub struct MemoryPayments {
    pending: Arc<Mutex<Vec<PendingPayment>>>,
}

impl MemoryPayments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, payment: PendingPayment) {
        self.pending.lock().unwrap().push(payment);
    }
}

#[async_trait]
impl PaymentSource for MemoryPayments {
    async fn pending_payments(&self, _params: &RoundParameters) -> Result<Vec<PendingPayment>, MixingInterfaceError> {
        Ok(self.pending.lock().unwrap().clone())
    }
}

#[derive(Clone, Default)]
pub struct MemoryRecords {
    records: Arc<Mutex<Vec<CoinjoinRecord>>>,
    fail_remaining: Arc<AtomicUsize>,
    append_calls: Arc<AtomicUsize>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` append calls fail.
    pub fn fail_next(&self, count: usize) {
        self.fail_remaining.store(count, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<CoinjoinRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn append_calls(&self) -> usize {
        self.append_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for MemoryRecords {
    async fn append_coinjoin_record(&self, record: &CoinjoinRecord) -> Result<(), MixingInterfaceError> {
        self.append_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(MixingInterfaceError::Unavailable("record store offline".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
