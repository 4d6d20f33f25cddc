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

//! The engine's public surface. Owns the resolver and the collaborator handles and drives one
//! round attempt through select, register, finalize, or rolls it back.

use std::sync::Arc;

use log::*;
use murmur_common_types::{OutPoint, Satoshi};
use rand::Rng;
use tokio::sync::broadcast;

use crate::mixing_service::{
    classification::PrivacyBreakdown,
    completion,
    config::MixingServiceConfig,
    error::MixingError,
    handle::{MixingEvent, MixingEventReceiver, MixingEventSender},
    interface::{LabelStore, LedgerService, PaymentSource, RecordStore, RoundParameters, UtxoLocker},
    policy::{self, MixReason, PolicyOutcome},
    resolver::CoinResolver,
    round::{AttemptStage, RealizedOutputs, RoundAttempt},
    selection::{CoinSelector, HandledPayment},
    storage::models::{CoinjoinRecord, ResolvedCoin},
};

const LOG_TARGET: &str = "wallet::mixing::service";

/// The wallet-side coinjoin participation engine. All long-running work happens inside the
/// injected collaborators; the engine itself runs no tasks of its own and is driven entirely from
/// the round protocol's callbacks. At most one selection should be in flight per wallet; the two
/// later checkpoints and completion may run on other tasks.
pub struct MixingService<TLedger, TLabels, TLocker, TPayments, TRecords> {
    config: MixingServiceConfig,
    resolver: CoinResolver<TLedger, TLabels>,
    locker: TLocker,
    payments: TPayments,
    records: TRecords,
    event_sender: MixingEventSender,
}

impl<TLedger, TLabels, TLocker, TPayments, TRecords> MixingService<TLedger, TLabels, TLocker, TPayments, TRecords>
where
    TLedger: LedgerService,
    TLabels: LabelStore,
    TLocker: UtxoLocker,
    TPayments: PaymentSource,
    TRecords: RecordStore,
{
    pub fn new(
        config: MixingServiceConfig,
        ledger: TLedger,
        labels: TLabels,
        locker: TLocker,
        payments: TPayments,
        records: TRecords,
    ) -> Self {
        let resolver = CoinResolver::new(ledger, labels, config.max_ancestry_depth, config.resolution_cache_ttl);
        let (event_sender, _) = broadcast::channel(100);
        Self {
            config,
            resolver,
            locker,
            payments,
            records,
            event_sender,
        }
    }

    pub fn config(&self) -> &MixingServiceConfig {
        &self.config
    }

    pub fn get_event_stream(&self) -> MixingEventReceiver {
        self.event_sender.subscribe()
    }

    /// Resolve the wallet's unspent set and mark the coins other attempts currently hold locks
    /// on.
    pub async fn resolve_coins(&self) -> Result<Vec<ResolvedCoin>, MixingError> {
        let mut coins = self.resolver.resolve_unspent_outputs().await?;
        let outpoints: Vec<OutPoint> = coins.iter().map(|coin| coin.outpoint).collect();
        let locked = self.locker.find_locks(&outpoints).await?;
        for coin in &mut coins {
            coin.join_in_progress = locked.contains(&coin.outpoint);
        }
        Ok(coins)
    }

    /// Current per-tier holdings, for display and for the participation decision.
    pub async fn privacy_breakdown(&self) -> Result<PrivacyBreakdown, MixingError> {
        let coins = self.resolve_coins().await?;
        let confirmed: Vec<&ResolvedCoin> = coins.iter().filter(|coin| coin.is_confirmed()).collect();
        Ok(PrivacyBreakdown::from_coins(confirmed, self.config.anonymity_score_target))
    }

    /// Should the wallet try to join a round under `coordinator` right now, and why. An empty
    /// set is a hard stop: there is nothing eligible to mix and selection must not be invoked.
    /// `PreliminaryConclusion` alone means the decision needs fee information the caller has not
    /// supplied yet.
    pub async fn should_mix<R: Rng>(
        &self,
        coordinator: &str,
        is_low_fee: Option<bool>,
        has_pending_payments: bool,
        rng: &mut R,
    ) -> Result<Vec<MixReason>, MixingError> {
        let mut reasons = Vec::new();
        if self.config.payment_batching_enabled {
            if has_pending_payments {
                reasons.push(MixReason::Payment);
            }
            if is_low_fee.is_none() {
                debug!(
                    target: LOG_TARGET,
                    "Payment batching is on but the fee environment is unknown; deferring the decision"
                );
                return Ok(vec![MixReason::PreliminaryConclusion]);
            }
        }

        let candidates = self.resolve_coins().await?;
        if candidates.is_empty() {
            debug!(target: LOG_TARGET, "No eligible coins to mix under {}", coordinator);
            return Ok(Vec::new());
        }
        match policy::evaluate(&self.config, &candidates, is_low_fee, rng) {
            PolicyOutcome::Preliminary => Ok(vec![MixReason::PreliminaryConclusion]),
            PolicyOutcome::Reasons(more) => {
                reasons.extend(more);
                info!(
                    target: LOG_TARGET,
                    "Participation decision for {}: {:?} over {} candidate(s)",
                    coordinator,
                    reasons,
                    candidates.len()
                );
                Ok(reasons)
            },
        }
    }

    /// Build a solution for the round and commit to it: lock every selected coin and start every
    /// handled payment. The returned attempt is what the round protocol's later checkpoints are
    /// evaluated against.
    pub async fn begin_attempt<R: Rng>(
        &self,
        coordinator: &str,
        params: RoundParameters,
        reasons: Vec<MixReason>,
        liquidity_hint: Satoshi,
        cross_mix_is_free: bool,
        rng: &mut R,
    ) -> Result<RoundAttempt, MixingError> {
        if reasons.is_empty() || reasons == [MixReason::PreliminaryConclusion] {
            return Err(MixingError::NoMixingReasons);
        }
        let candidates = self.resolve_coins().await?;
        let pending = if reasons.contains(&MixReason::Payment) {
            self.payments.pending_payments(&params).await?
        } else {
            Vec::new()
        };
        let consolidating = reasons.contains(&MixReason::Consolidation);

        let selector = CoinSelector::new(&self.config, &params, coordinator, cross_mix_is_free);
        let mut solution = selector.select(candidates, pending, consolidating, liquidity_hint, rng);
        if solution.is_empty() {
            debug!(target: LOG_TARGET, "Selection yielded no coins for {}", coordinator);
            return Err(MixingError::SelectionInfeasible);
        }
        if solution.coins.len() < params.min_input_count {
            debug!(
                target: LOG_TARGET,
                "Selection yielded {} coin(s) but the round requires {}",
                solution.coins.len(),
                params.min_input_count
            );
            return Err(MixingError::SelectionInfeasible);
        }
        if consolidating && solution.coins.len() == 1 {
            debug!(target: LOG_TARGET, "A single coin cannot consolidate; aborting before registration");
            return Err(MixingError::SelectionInfeasible);
        }

        // Pair the in-solution commitment with the process-wide locks, all or nothing.
        let mut locked: Vec<OutPoint> = Vec::with_capacity(solution.coins.len());
        for outpoint in solution.coin_outpoints() {
            match self.locker.try_lock(outpoint).await {
                Ok(true) => locked.push(outpoint),
                Ok(false) => {
                    warn!(target: LOG_TARGET, "Coin {} is locked elsewhere; releasing the attempt", outpoint);
                    self.unlock_quietly(&locked).await;
                    return Err(MixingError::LockContention);
                },
                Err(e) => {
                    self.unlock_quietly(&locked).await;
                    return Err(e.into());
                },
            }
        }

        // A payment that cannot be marked as started must not ride along; it may already be
        // committed to a concurrent attempt.
        let mut started: Vec<HandledPayment> = Vec::with_capacity(solution.handled_payments.len());
        for handled in solution.handled_payments.drain(..) {
            match handled.payment.sink.mark_started().await {
                Ok(()) => started.push(handled),
                Err(e) => {
                    warn!(
                        target: LOG_TARGET,
                        "Payment {} could not be started and is excluded from the attempt: {}", handled.payment.id, e
                    );
                },
            }
        }
        solution.handled_payments = started;

        let attempt = RoundAttempt::new(
            coordinator.to_string(),
            params,
            solution,
            reasons,
            self.config.anonymity_score_target,
            self.config.consolidation_floor,
        );
        info!(
            target: LOG_TARGET,
            "[{}] Attempt begun under {} with {} coin(s), {} payment(s), reasons: {:?}",
            attempt.id(),
            coordinator,
            attempt.solution().coins.len(),
            attempt.solution().handled_payments.len(),
            attempt.reasons()
        );
        self.publish_event(MixingEvent::AttemptStarted {
            attempt_id: attempt.id(),
        });
        Ok(attempt)
    }

    /// Record a successful round: persist the realized outcome, settle the payments, drop stale
    /// cache entries and release the attempt's locks. Only valid once the attempt passed the
    /// output checkpoint.
    pub async fn complete_attempt(
        &self,
        attempt: &RoundAttempt,
        round_id: &str,
        realized: &RealizedOutputs,
    ) -> Result<CoinjoinRecord, MixingError> {
        if attempt.stage() != AttemptStage::Finalized {
            return Err(MixingError::AttemptNotFinalized);
        }
        let record = completion::build_record(attempt, round_id, realized);
        let persisted = completion::persist_with_retry(
            &self.records,
            &record,
            self.config.persist_max_retries,
            self.config.persist_retry_backoff,
        )
        .await;
        if let Err(e) = persisted {
            // Leave a consistent wallet behind even when the record could not land: the spent
            // coins must not look spendable and the locks must not outlive the attempt.
            self.invalidate_attempt_caches(attempt, realized);
            self.unlock_quietly(&attempt.solution().coin_outpoints()).await;
            self.publish_event(MixingEvent::RoundFailed {
                attempt_id: attempt.id(),
            });
            return Err(e);
        }

        for handled in &attempt.solution().handled_payments {
            if let Err(e) = handled.payment.sink.mark_succeeded(round_id, realized.txid).await {
                warn!(
                    target: LOG_TARGET,
                    "[{}] Payment {} settled on chain but its sink rejected the notification: {}",
                    attempt.id(),
                    handled.payment.id,
                    e
                );
            }
        }

        self.invalidate_attempt_caches(attempt, realized);
        self.unlock_quietly(&attempt.solution().coin_outpoints()).await;
        info!(
            target: LOG_TARGET,
            "[{}] Round {} completed in {} with {} input(s) and {} output(s)",
            attempt.id(),
            round_id,
            record.txid,
            record.coins_in.len(),
            record.coins_out.len()
        );
        self.publish_event(MixingEvent::RoundCompleted {
            attempt_id: attempt.id(),
            txid: realized.txid,
        });
        Ok(record)
    }

    /// Roll an attempt back after a gate rejection, a round failure or a timeout: fail the
    /// started payments and release every lock, however far the attempt got.
    pub async fn abort_attempt(&self, attempt: &RoundAttempt) -> Result<(), MixingError> {
        for handled in &attempt.solution().handled_payments {
            if let Err(e) = handled.payment.sink.mark_failed().await {
                warn!(
                    target: LOG_TARGET,
                    "[{}] Payment {} could not be rolled back: {}",
                    attempt.id(),
                    handled.payment.id,
                    e
                );
            }
        }
        self.locker.unlock(&attempt.solution().coin_outpoints()).await?;
        info!(
            target: LOG_TARGET,
            "[{}] Attempt abandoned in stage {}; locks released",
            attempt.id(),
            attempt.stage()
        );
        let event = if attempt.stage() == AttemptStage::Finalized {
            MixingEvent::RoundFailed {
                attempt_id: attempt.id(),
            }
        } else {
            MixingEvent::WithdrewFromRound {
                attempt_id: attempt.id(),
                stage: attempt.stage(),
            }
        };
        self.publish_event(event);
        Ok(())
    }

    fn invalidate_attempt_caches(&self, attempt: &RoundAttempt, realized: &RealizedOutputs) {
        let mut outpoints = attempt.solution().coin_outpoints();
        outpoints.extend(realized.our_outputs.iter().map(|output| output.outpoint));
        self.resolver.invalidate(&outpoints);
    }

    async fn unlock_quietly(&self, outpoints: &[OutPoint]) {
        if outpoints.is_empty() {
            return;
        }
        if let Err(e) = self.locker.unlock(outpoints).await {
            warn!(target: LOG_TARGET, "Failed to release {} lock(s): {}", outpoints.len(), e);
        }
    }

    fn publish_event(&self, event: MixingEvent) {
        if self.event_sender.send(Arc::new(event)).is_err() {
            trace!(target: LOG_TARGET, "No subscribers for mixing event");
        }
    }
}
