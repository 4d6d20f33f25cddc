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

use std::{
    fmt::{Display, Error, Formatter},
    iter::Sum,
    ops::Mul,
};

use newtype_ops::newtype_ops;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// All value calculations use this newtype to prevent bugs related to unit conversion and accidental
/// mixing of amounts with bare integers.
///
/// ```edition2021
/// use murmur_common_types::amount::Satoshi;
///
/// let a = Satoshi::from(500);
/// let b = Satoshi::from(50);
/// assert_eq!(a + b, Satoshi::from(550));
/// ```
#[derive(Copy, Default, Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Satoshi(pub u64);

#[derive(Debug, Clone, ThisError, PartialEq)]
pub enum SatoshiError {
    #[error("Failed to parse value: {0}")]
    ParseError(String),
}

// You can only add or subtract sats from sats
newtype_ops! { [Satoshi] {add sub} {:=} Self Self }
newtype_ops! { [Satoshi] {add sub} {:=} &Self &Self }
newtype_ops! { [Satoshi] {add sub} {:=} Self &Self }

// Multiplication and division only makes sense when sats are multiplied/divided by a scalar
newtype_ops! { [Satoshi] {mul div rem} {:=} Self u64 }

impl Mul<Satoshi> for u64 {
    type Output = Satoshi;

    fn mul(self, rhs: Satoshi) -> Self::Output {
        Satoshi(self * rhs.0)
    }
}

impl Satoshi {
    pub fn zero() -> Self {
        Satoshi(0)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn checked_sub(self, v: Satoshi) -> Option<Satoshi> {
        if self.0 >= v.0 {
            return Some(self - v);
        }
        None
    }

    pub fn saturating_sub(self, v: Satoshi) -> Satoshi {
        Satoshi(self.0.saturating_sub(v.0))
    }
}

impl Display for Satoshi {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{} sat", self.0)
    }
}

impl From<u64> for Satoshi {
    fn from(v: u64) -> Self {
        Satoshi(v)
    }
}

impl From<Satoshi> for u64 {
    fn from(v: Satoshi) -> Self {
        v.0
    }
}

impl From<Satoshi> for f64 {
    fn from(v: Satoshi) -> Self {
        v.0 as f64
    }
}

impl std::str::FromStr for Satoshi {
    type Err = SatoshiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let processed = s.replace(',', "").replace(' ', "").to_ascii_lowercase();
        let processed = processed.trim_end_matches("sats").trim_end_matches("sat");
        processed
            .parse::<u64>()
            .map(Satoshi::from)
            .map_err(|e| SatoshiError::ParseError(e.to_string()))
    }
}

impl Sum for Satoshi {
    fn sum<I: Iterator<Item = Satoshi>>(iter: I) -> Satoshi {
        iter.fold(Satoshi::zero(), |acc, x| acc + x)
    }
}

impl<'a> Sum<&'a Satoshi> for Satoshi {
    fn sum<I: Iterator<Item = &'a Satoshi>>(iter: I) -> Satoshi {
        iter.fold(Satoshi::zero(), |acc, x| acc + *x)
    }
}
