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

//! Journal of engine events.

use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::pool::ProgrammeId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StakingEvent {
    ProgrammeAdded { id: ProgrammeId, weight: u64, min_lock_blocks: u64, active: bool },
    ProgrammeWeightUpdated { id: ProgrammeId, weight: u64 },
    ProgrammeActivationChanged { id: ProgrammeId, active: bool },
    ProviderWhitelisted { provider: Address, account: Address },
    BondStaked {
        provider: Address,
        bond_holder: Address,
        programme: ProgrammeId,
        amount: U256,
        fee_bps: u32,
    },
    OwnStakeIncreased { provider: Address, amount: U256 },
    StakeDelegated { provider: Address, delegator: Address, amount: U256 },
    WithdrawalRequested { provider: Address, holder: Address, amount: U256, unlock_block: u64 },
    StakeWithdrawn { provider: Address, holder: Address, amount: U256 },
    RewardPaid { provider: Address, holder: Address, amount: U256 },
    FeeCollected { provider: Address, bond_holder: Address, amount: U256 },
    ProviderExited { provider: Address },
    DelegatorExited { provider: Address, delegator: Address, principal: U256 },
    FeeCalibrated { provider: Address, old_bps: u32, new_bps: u32 },
    ConfigUpdated { version: u64, parameter: &'static str },
    UserActionsPauseToggled { paused: bool },
}

impl StakingEvent {
    /// Whether `address` appears in this event as a provider, holder or bond holder.
    pub fn involves(&self, address: Address) -> bool {
        use StakingEvent::*;
        match self {
            ProviderWhitelisted { provider, account } => {
                *provider == address || *account == address
            }
            BondStaked { provider, bond_holder, .. }
            | FeeCollected { provider, bond_holder, .. } => {
                *provider == address || *bond_holder == address
            }
            StakeDelegated { provider, delegator, .. }
            | DelegatorExited { provider, delegator, .. } => {
                *provider == address || *delegator == address
            }
            WithdrawalRequested { provider, holder, .. }
            | StakeWithdrawn { provider, holder, .. }
            | RewardPaid { provider, holder, .. } => *provider == address || *holder == address,
            OwnStakeIncreased { provider, .. }
            | ProviderExited { provider }
            | FeeCalibrated { provider, .. } => *provider == address,
            ProgrammeAdded { .. }
            | ProgrammeWeightUpdated { .. }
            | ProgrammeActivationChanged { .. }
            | ConfigUpdated { .. }
            | UserActionsPauseToggled { .. } => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimestampedStakingEvent {
    pub block_number: u64,
    /// Position in the journal, unique across the engine's lifetime.
    pub sequence: u64,
    pub event: StakingEvent,
}
