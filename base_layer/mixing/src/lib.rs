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

//! The wallet-side coinjoin participation engine.
//!
//! Given the wallet's unspent outputs, its pending payments and the parameters announced by a
//! coordinating round, this crate decides whether to participate in the round, which coins and
//! payments to bring, and re-validates that decision at the two later checkpoints of the round
//! protocol. It owns no transport, keys or persistence; all of those are injected collaborator
//! interfaces.

pub mod mixing_service;

pub use mixing_service::{
    classification::{PrivacyBreakdown, PrivacyTier},
    config::{ConsolidationMode, MixingServiceConfig},
    error::{MixingError, MixingInterfaceError},
    handle::MixingEvent,
    policy::MixReason,
    round::{AttemptId, AttemptStage, RealizedOutput, RealizedOutputs, RealizedPaymentOutput, RoundAttempt},
    selection::{HandledPayment, Solution},
    service::MixingService,
    storage::models::{CoinjoinRecord, ResolvedCoin},
};
