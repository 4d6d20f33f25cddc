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

use std::sync::Arc;

use murmur_common_types::TxId;
use tokio::sync::broadcast;

use crate::mixing_service::round::{AttemptId, AttemptStage};

/// Lifecycle notifications for round attempts. Subscribers that fall behind lose old events, as
/// usual for a broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixingEvent {
    AttemptStarted {
        attempt_id: AttemptId,
    },
    WithdrewFromRound {
        attempt_id: AttemptId,
        stage: AttemptStage,
    },
    RoundCompleted {
        attempt_id: AttemptId,
        txid: TxId,
    },
    RoundFailed {
        attempt_id: AttemptId,
    },
}

pub type MixingEventSender = broadcast::Sender<Arc<MixingEvent>>;
pub type MixingEventReceiver = broadcast::Receiver<Arc<MixingEvent>>;
