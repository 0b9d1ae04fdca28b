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

//! Delegated-staking reward engine.
//!
//! A global per-block emission is split across weighted reward programmes by the [PoolLedger].
//! Each provider account participates in one programme and re-splits what it earns between the
//! provider and its delegators, net of the provider fee. [StakingEngine] sequences both levels
//! together with the token ledger, the reward vault and the access policy.

pub mod access;
pub mod accumulator;
pub mod bonding;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod pool;
pub mod provider;
pub mod token;

// Re-export commonly used types
pub use access::{AccessPolicy, RoleRegistry};

pub use accumulator::{settle, RewardPerShare, Settlement, ACCUMULATOR_SCALE};

pub use config::{
    parse_tokens, tokens, EngineConfig, BLOCKS_PER_DAY, DEFAULT_UNBONDING_BLOCKS, FEE_DENOMINATOR,
};

pub use engine::StakingEngine;

pub use error::{ErrorCategory, Result, StakingError, TokenError};

pub use events::{StakingEvent, TimestampedStakingEvent};

pub use pool::{PoolLedger, PoolPosition, Programme, ProgrammeId};

pub use provider::{
    AccountId, BondOrigin, DelegatorPosition, Harvest, ProviderAccount, ProviderState,
};

pub use token::{InMemoryToken, TokenLedger, Vault};

/// [StakingEngine] over the in-memory collaborators.
pub type InMemoryEngine = StakingEngine<InMemoryToken, RoleRegistry>;
