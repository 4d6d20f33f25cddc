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

//! Turns a finalized attempt into the durable record of what the round actually did.

use std::time::Duration;

use chrono::Utc;
use log::*;

use crate::mixing_service::{
    error::MixingError,
    interface::RecordStore,
    round::{RealizedOutputs, RoundAttempt},
    storage::models::{CoinjoinRecord, RecordedInput, RecordedOutput},
};

const LOG_TARGET: &str = "wallet::mixing::completion";

/// Anonymity recorded against outputs that left the wallet to settle a payment. The payee knows
/// exactly where the money came from.
const PAYMENT_OUTPUT_SCORE: f64 = 1.0;

/// Assemble the durable record from the attempt's registered coins and the realized outputs.
pub fn build_record(attempt: &RoundAttempt, round_id: &str, realized: &RealizedOutputs) -> CoinjoinRecord {
    let coins_in = attempt
        .registered_coins()
        .iter()
        .map(|coin| RecordedInput {
            outpoint: coin.outpoint,
            value: coin.value,
            anonymity_score: coin.anonymity_score,
        })
        .collect();
    let mut coins_out: Vec<RecordedOutput> = realized
        .our_outputs
        .iter()
        .map(|output| RecordedOutput {
            outpoint: output.outpoint,
            value: output.value,
            anonymity_score: output.anonymity_score,
            payment: None,
        })
        .collect();
    coins_out.extend(realized.payment_outputs.iter().map(|output| RecordedOutput {
        outpoint: output.outpoint,
        value: output.value,
        anonymity_score: PAYMENT_OUTPUT_SCORE,
        payment: Some(output.payment),
    }));
    CoinjoinRecord {
        round_id: round_id.to_string(),
        coordinator: attempt.coordinator().to_string(),
        txid: realized.txid,
        coins_in,
        coins_out,
        timestamp: Utc::now().naive_utc(),
    }
}

/// Append the record, retrying with a doubling backoff. The record represents real value moving,
/// so giving up is reported loudly rather than swallowed.
pub async fn persist_with_retry<TRecords: RecordStore>(
    store: &TRecords,
    record: &CoinjoinRecord,
    max_retries: usize,
    initial_backoff: Duration,
) -> Result<(), MixingError> {
    let mut backoff = initial_backoff;
    let attempts = max_retries + 1;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.append_coinjoin_record(record).await {
            Ok(()) => {
                if attempt > 1 {
                    debug!(
                        target: LOG_TARGET,
                        "Coinjoin record for round {} persisted on attempt {}", record.round_id, attempt
                    );
                }
                return Ok(());
            },
            Err(e) if attempt < attempts => {
                warn!(
                    target: LOG_TARGET,
                    "Failed to persist coinjoin record for round {} (attempt {} of {}): {}. Retrying in {:?}",
                    record.round_id,
                    attempt,
                    attempts,
                    e,
                    backoff
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            },
            Err(e) => {
                error!(
                    target: LOG_TARGET,
                    "Giving up persisting coinjoin record for round {} after {} attempt(s): {}",
                    record.round_id,
                    attempts,
                    e
                );
                return Err(MixingError::PersistenceFailed {
                    attempts,
                    reason: e.to_string(),
                });
            },
        }
    }
}
