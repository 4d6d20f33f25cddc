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

//! Resolves each unspent output's privacy metadata by walking its ancestry in the ledger and
//! merging the label attachments other subsystems have stored against it.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::Mutex,
    time::{Duration, Instant},
};

use log::*;
use murmur_common_types::{OutPoint, ScriptPubkey, TxId};

use crate::mixing_service::{
    error::MixingError,
    interface::{Attachment, AttachmentKey, LabelStore, LedgerService, LedgerTransaction, UnspentOutput},
    storage::models::ResolvedCoin,
};

const LOG_TARGET: &str = "wallet::mixing::resolver";

/// Privacy metadata derived for one outpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMetadata {
    pub anonymity_score: f64,
    pub labels: BTreeSet<String>,
    pub last_coordinator: Option<String>,
}

struct CacheEntry {
    metadata: ResolvedMetadata,
    cached_at: Instant,
}

/// Walks coin ancestry with an explicit worklist and a bounded depth, caching results per
/// outpoint. External labels change between rounds, so cache entries expire after a short TTL.
pub struct CoinResolver<TLedger, TLabels> {
    ledger: TLedger,
    labels: TLabels,
    max_depth: usize,
    cache_ttl: Duration,
    cache: Mutex<HashMap<OutPoint, CacheEntry>>,
}

impl<TLedger, TLabels> CoinResolver<TLedger, TLabels>
where
    TLedger: LedgerService,
    TLabels: LabelStore,
{
    pub fn new(ledger: TLedger, labels: TLabels, max_depth: usize, cache_ttl: Duration) -> Self {
        Self {
            ledger,
            labels,
            max_depth,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the wallet's entire unspent set. A coin whose owning transaction cannot be found
    /// is skipped and the batch continues; a ledger fault aborts the batch.
    pub async fn resolve_unspent_outputs(&self) -> Result<Vec<ResolvedCoin>, MixingError> {
        let unspent = self.ledger.get_unspent_outputs().await?;
        let own_scripts: HashSet<ScriptPubkey> = unspent.iter().map(|output| output.script.clone()).collect();
        let mut tx_memo: HashMap<TxId, Option<LedgerTransaction>> = HashMap::new();

        let mut resolved = Vec::with_capacity(unspent.len());
        for output in unspent {
            match self.resolve_output(&output, &own_scripts, &mut tx_memo).await? {
                Some(metadata) => resolved.push(ResolvedCoin {
                    outpoint: output.outpoint,
                    value: output.value,
                    script: output.script,
                    script_type: output.script_type,
                    confirmations: output.confirmations,
                    anonymity_score: metadata.anonymity_score,
                    labels: metadata.labels,
                    last_coordinator: metadata.last_coordinator,
                    join_in_progress: false,
                }),
                None => {
                    warn!(
                        target: LOG_TARGET,
                        "Excluding coin {}: its transaction is not known to the ledger", output.outpoint
                    );
                },
            }
        }
        trace!(target: LOG_TARGET, "Resolved {} unspent output(s)", resolved.len());
        Ok(resolved)
    }

    /// Derive metadata for one output. Returns `Ok(None)` when the output's own transaction is
    /// unknown and the coin must be excluded from candidacy.
    async fn resolve_output(
        &self,
        output: &UnspentOutput,
        own_scripts: &HashSet<ScriptPubkey>,
        tx_memo: &mut HashMap<TxId, Option<LedgerTransaction>>,
    ) -> Result<Option<ResolvedMetadata>, MixingError> {
        if let Some(metadata) = self.cached(&output.outpoint) {
            return Ok(Some(metadata));
        }

        let mut labels = BTreeSet::new();
        let mut score_override = None;
        let mut coinjoin_score = None;
        let mut last_coordinator = None;

        let mut worklist: Vec<(OutPoint, ScriptPubkey, usize)> = vec![(output.outpoint, output.script.clone(), 0)];
        let mut visited: HashSet<OutPoint> = HashSet::new();

        while let Some((outpoint, script, depth)) = worklist.pop() {
            if !visited.insert(outpoint) {
                continue;
            }
            let tx = match self.fetch_transaction(outpoint.txid, tx_memo).await? {
                Some(tx) => tx,
                None if depth == 0 => return Ok(None),
                None => {
                    debug!(
                        target: LOG_TARGET,
                        "Ancestry walk for {} stopped at {}: transaction unknown", output.outpoint, outpoint
                    );
                    continue;
                },
            };

            let keys = [
                AttachmentKey::Transaction(outpoint.txid),
                AttachmentKey::Script(script),
                AttachmentKey::Output(outpoint),
            ];
            for key in &keys {
                for attachment in self.labels.get_attachments(key).await? {
                    match attachment {
                        Attachment::Label(label) => {
                            labels.insert(label);
                        },
                        Attachment::AnonymityOverride(score) => {
                            if depth == 0 {
                                score_override = Some(score);
                            }
                        },
                        Attachment::CoinjoinRound { coordinator, outputs, .. } => {
                            if depth == 0 {
                                if let Some((_, score)) = outputs.iter().find(|(op, _)| *op == outpoint) {
                                    coinjoin_score = Some(*score);
                                    last_coordinator = Some(coordinator);
                                }
                            }
                        },
                    }
                }
            }

            // Chains deeper than this are treated as already resolved.
            if depth >= self.max_depth {
                continue;
            }
            for input in &tx.inputs {
                if visited.contains(input) {
                    continue;
                }
                if let Some(funding_tx) = self.fetch_transaction(input.txid, tx_memo).await? {
                    if let Some(funded) = funding_tx.outputs.get(input.index as usize) {
                        if own_scripts.contains(&funded.script) {
                            worklist.push((*input, funded.script.clone(), depth + 1));
                        }
                    }
                }
            }
        }

        // An explicit override wins over round metadata; with neither the coin is fully traceable.
        let anonymity_score = score_override.or(coinjoin_score).unwrap_or(1.0).max(1.0);
        let metadata = ResolvedMetadata {
            anonymity_score,
            labels,
            last_coordinator,
        };
        self.cache
            .lock()
            .expect("resolution cache lock poisoned")
            .insert(output.outpoint, CacheEntry {
                metadata: metadata.clone(),
                cached_at: Instant::now(),
            });
        Ok(Some(metadata))
    }

    /// Drop cached resolutions for the given outpoints so the next resolve re-reads the ledger
    /// and label store.
    pub fn invalidate(&self, outpoints: &[OutPoint]) {
        let mut cache = self.cache.lock().expect("resolution cache lock poisoned");
        for outpoint in outpoints {
            cache.remove(outpoint);
        }
    }

    fn cached(&self, outpoint: &OutPoint) -> Option<ResolvedMetadata> {
        let cache = self.cache.lock().expect("resolution cache lock poisoned");
        cache
            .get(outpoint)
            .filter(|entry| entry.cached_at.elapsed() < self.cache_ttl)
            .map(|entry| entry.metadata.clone())
    }

    async fn fetch_transaction(
        &self,
        txid: TxId,
        tx_memo: &mut HashMap<TxId, Option<LedgerTransaction>>,
    ) -> Result<Option<LedgerTransaction>, MixingError> {
        if let Some(tx) = tx_memo.get(&txid) {
            return Ok(tx.clone());
        }
        let tx = self.ledger.get_transaction(txid).await?;
        tx_memo.insert(txid, tx.clone());
        Ok(tx)
    }
}
