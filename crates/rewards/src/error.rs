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

//! Error types returned by the reward engine.

use alloy_primitives::{Address, U256};
use thiserror::Error;

use crate::pool::ProgrammeId;

/// Coarse classification of a [StakingError].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Caller lacks the admin or whitelist role, or is not the bound identity.
    Authorization,
    /// The account or programme is in the wrong lifecycle state.
    Lifecycle,
    /// An argument is out of range.
    Validation,
    /// A lock-up or unbonding window has not elapsed yet.
    Temporal,
    /// Not enough principal or tokens to complete the operation.
    Resource,
}

/// Failures of the token ledger collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient balance for {account}: requested {requested}, available {available}")]
    InsufficientBalance { account: Address, requested: U256, available: U256 },

    #[error("insufficient allowance from {owner} to {spender}: requested {requested}, approved {approved}")]
    InsufficientAllowance { owner: Address, spender: Address, requested: U256, approved: U256 },

    #[error("token supply overflow")]
    SupplyOverflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StakingError {
    // Authorization
    #[error("caller {0} lacks the required role")]
    Unauthorized(Address),

    #[error("caller {0} is not the bound provider or its admin")]
    WrongCaller(Address),

    #[error("the provider must use the provider path for own stake")]
    UseProviderPath,

    #[error("{0} is not a whitelisted provider")]
    UnknownProvider(Address),

    #[error("{0} is not a registered participant of the pool ledger")]
    NotParticipant(Address),

    // Lifecycle
    #[error("provider account already initialized")]
    AlreadyInitialized,

    #[error("provider account is not set up")]
    NotSetUp,

    #[error("provider bond already staked")]
    AlreadySetUp,

    #[error("provider has exited")]
    ProviderExited,

    #[error("provider is still active")]
    ProviderStillActive,

    #[error("provider has exited; use the delegator exit path")]
    UseExitPath,

    #[error("provider {0} is already whitelisted")]
    ProviderAlreadyWhitelisted(Address),

    #[error("reward programme {0} is not active")]
    ProgrammeInactive(ProgrammeId),

    #[error("programme change conflicts with an active programme")]
    ConflictingState,

    // Validation
    #[error("zero identity")]
    InvalidIdentity,

    #[error("zero token reference")]
    InvalidToken,

    #[error("allocation weight must be positive")]
    InvalidAllocation,

    #[error("unknown reward programme {0}")]
    UnknownProgramme(ProgrammeId),

    #[error("fee {fee_bps} bps is below the minimum of {min_bps} bps")]
    FeeTooLow { fee_bps: u32, min_bps: u32 },

    #[error("fee {0} bps is outside (0, 10000]")]
    FeeOutOfRange(u32),

    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("stake of {requested} exceeds the provider ceiling of {ceiling}")]
    StakeCeilingExceeded { requested: U256, ceiling: U256 },

    #[error("remaining stake {remaining} is below the minimum bond of {minimum}")]
    MinimumBondBreached { remaining: U256, minimum: U256 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("block {requested} precedes current block {current}")]
    BlockRegression { requested: u64, current: u64 },

    // Temporal
    #[error("lock-up ends at block {expiry}, current block is {now}")]
    LockupNotElapsed { expiry: u64, now: u64 },

    #[error("unbonding ends at block {unlock}, current block is {now}")]
    StillUnbonding { unlock: u64, now: u64 },

    #[error("nothing pending withdrawal")]
    NothingPending,

    #[error("user actions are paused")]
    UserActionsPaused,

    // Resource
    #[error("requested {requested} exceeds staked principal {available}")]
    InsufficientPrincipal { requested: U256, available: U256 },

    #[error("requested {requested} exceeds registered stake {available}")]
    InsufficientStake { requested: U256, available: U256 },

    #[error("no stake delegated")]
    NothingDelegated,

    #[error("vault holds {available}, cannot pay out {requested}")]
    InsufficientVaultBalance { requested: U256, available: U256 },

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("arithmetic overflow")]
    ArithmeticOverflow,
}

impl StakingError {
    /// Classify the error.
    pub fn category(&self) -> ErrorCategory {
        use StakingError::*;
        match self {
            Unauthorized(_) | WrongCaller(_) | UseProviderPath | UnknownProvider(_)
            | NotParticipant(_) => ErrorCategory::Authorization,
            AlreadyInitialized | NotSetUp | AlreadySetUp | ProviderExited
            | ProviderStillActive | UseExitPath | ProviderAlreadyWhitelisted(_)
            | ProgrammeInactive(_) | ConflictingState => ErrorCategory::Lifecycle,
            InvalidIdentity | InvalidToken | InvalidAllocation | UnknownProgramme(_)
            | FeeTooLow { .. } | FeeOutOfRange(_) | ZeroAmount | StakeCeilingExceeded { .. }
            | MinimumBondBreached { .. } | InvalidConfig(_) | BlockRegression { .. }
            | ArithmeticOverflow => ErrorCategory::Validation,
            LockupNotElapsed { .. } | StillUnbonding { .. } | NothingPending
            | UserActionsPaused => ErrorCategory::Temporal,
            InsufficientPrincipal { .. } | InsufficientStake { .. } | NothingDelegated
            | InsufficientVaultBalance { .. } | Token(_) => ErrorCategory::Resource,
        }
    }
}

pub type Result<T, E = StakingError> = std::result::Result<T, E>;
