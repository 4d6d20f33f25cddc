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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixingError {
    #[error("Mixing interface error: `{0}`")]
    InterfaceError(#[from] MixingInterfaceError),
    #[error("Selection was invoked without any mixing reason")]
    NoMixingReasons,
    #[error("The selector could not build a viable solution for this attempt")]
    SelectionInfeasible,
    #[error("Another process holds a lock on one of the selected coins")]
    LockContention,
    #[error("The attempt has not passed the final output checkpoint")]
    AttemptNotFinalized,
    #[error("Failed to persist the coinjoin record after {attempts} attempt(s): `{reason}`")]
    PersistenceFailed { attempts: usize, reason: String },
}

/// Errors reported by the injected collaborator services (ledger, label store, UTXO locker,
/// payment source and record store).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MixingInterfaceError {
    #[error("Value not found: `{0}`")]
    NotFound(String),
    #[error("The backing service is unavailable: `{0}`")]
    Unavailable(String),
    #[error("The backing service failed: `{0}`")]
    BackendError(String),
}
