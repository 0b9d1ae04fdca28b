// Copyright 2025 RISC Zero, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Fixed-point reward-per-share accumulator shared by both ledger levels.
//!
//! The pool ledger settles global emission into one accumulator per programme, and each provider
//! account settles whatever it pulls from the pool into its own local accumulator. Both go through
//! [settle] so the truncation policy is defined in exactly one place: every division rounds
//! towards zero and the lost dust is never recovered.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StakingError};

/// Fixed-point scale of every accumulator.
pub const ACCUMULATOR_SCALE: U256 = U256::from_limbs([1_000_000_000_000, 0, 0, 0]);

/// Cumulative reward per unit of principal since inception, scaled by [ACCUMULATOR_SCALE].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RewardPerShare(U256);

impl RewardPerShare {
    pub const ZERO: Self = Self(U256::ZERO);

    pub const fn from_raw(raw: U256) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> U256 {
        self.0
    }

    /// Reward per unit of principal when `reward` is shared over `total_principal`.
    ///
    /// Returns zero when there is no principal to share over.
    pub fn per_unit(reward: U256, total_principal: U256) -> Result<Self> {
        if total_principal.is_zero() {
            return Ok(Self::ZERO);
        }
        let scaled = reward.checked_mul(ACCUMULATOR_SCALE).ok_or(StakingError::ArithmeticOverflow)?;
        Ok(Self(scaled / total_principal))
    }

    /// Total reward accrued by `principal` since inception: `principal * acc / SCALE`.
    pub fn accrued(&self, principal: U256) -> Result<U256> {
        let product = principal.checked_mul(self.0).ok_or(StakingError::ArithmeticOverflow)?;
        Ok(product / ACCUMULATOR_SCALE)
    }

    /// Reward accrued since the holder's debt snapshot was taken.
    pub fn pending(&self, principal: U256, reward_debt: U256) -> Result<U256> {
        self.accrued(principal)?.checked_sub(reward_debt).ok_or(StakingError::ArithmeticOverflow)
    }

    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0.checked_add(rhs.0).map(Self).ok_or(StakingError::ArithmeticOverflow)
    }
}

/// Outcome of one call to [settle].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settlement {
    pub accumulator: RewardPerShare,
    pub last_settled_block: u64,
    /// Emission credited to holders, before truncation dust.
    pub distributed: U256,
}

/// Fold `emission` into `accumulator` over `total_principal` and stamp the settlement block.
///
/// With no principal the accumulator is left untouched and the emission is forgone. The settled
/// block never moves backwards.
pub fn settle(
    total_principal: U256,
    accumulator: RewardPerShare,
    last_settled_block: u64,
    now: u64,
    emission: U256,
) -> Result<Settlement> {
    let last_settled_block = last_settled_block.max(now);
    if total_principal.is_zero() || emission.is_zero() {
        return Ok(Settlement { accumulator, last_settled_block, distributed: U256::ZERO });
    }
    let increment = RewardPerShare::per_unit(emission, total_principal)?;
    Ok(Settlement {
        accumulator: accumulator.checked_add(increment)?,
        last_settled_block,
        distributed: emission,
    })
}
