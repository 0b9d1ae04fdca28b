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

//! Pool ledger: distributes the global emission across weighted reward programmes.
//!
//! Each programme receives `rate * elapsed * weight * staked / Σ(weight_j * staked_j)` whenever it
//! is settled and folds it into its accumulator. A programme without stake is still stamped as
//! settled, so the emission of a zero-stake window is forgone rather than banked.

use std::collections::{BTreeMap, BTreeSet};

use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::{
    accumulator::{self, RewardPerShare, Settlement},
    config::EngineConfig,
    error::{Result, StakingError},
};

/// Index of a programme. Ids are assigned in creation order and never reused.
pub type ProgrammeId = u64;

/// An isolated emission-sharing bucket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Programme {
    pub id: ProgrammeId,
    /// Allocation weight, always positive.
    pub weight: u64,
    /// Lock-up applied to principal entering this programme.
    pub min_lock_blocks: u64,
    pub last_settled_block: u64,
    pub accumulator: RewardPerShare,
    pub total_staked: U256,
    pub active: bool,
}

impl Programme {
    fn stake_weight(&self) -> Result<U256> {
        if !self.active {
            return Ok(U256::ZERO);
        }
        U256::from(self.weight)
            .checked_mul(self.total_staked)
            .ok_or(StakingError::ArithmeticOverflow)
    }
}

/// A participant's registered principal in one programme.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PoolPosition {
    pub principal: U256,
    /// `principal * accumulator / SCALE` at the participant's last settlement.
    pub reward_debt: U256,
}

#[derive(Clone, Debug, Default)]
pub struct PoolLedger {
    programmes: Vec<Programme>,
    positions: BTreeMap<(ProgrammeId, Address), PoolPosition>,
    participants: BTreeSet<Address>,
}

/// Number of blocks in `(from, to]` that earn emission, given the global start block.
pub fn emission_blocks(from: u64, to: u64, start_block: u64) -> u64 {
    to.saturating_sub(from.max(start_block))
}

impl PoolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn programme(&self, id: ProgrammeId) -> Result<&Programme> {
        self.programmes.get(id as usize).ok_or(StakingError::UnknownProgramme(id))
    }

    fn programme_mut(&mut self, id: ProgrammeId) -> Result<&mut Programme> {
        self.programmes.get_mut(id as usize).ok_or(StakingError::UnknownProgramme(id))
    }

    pub fn programmes(&self) -> &[Programme] {
        &self.programmes
    }

    pub fn position(&self, id: ProgrammeId, participant: Address) -> PoolPosition {
        self.positions.get(&(id, participant)).copied().unwrap_or_default()
    }

    pub fn total_staked_across_programmes(&self) -> U256 {
        self.programmes.iter().fold(U256::ZERO, |acc, p| acc.saturating_add(p.total_staked))
    }

    /// Allow `participant` to hold positions.
    pub fn register_participant(&mut self, participant: Address) {
        self.participants.insert(participant);
    }

    pub fn is_participant(&self, participant: Address) -> bool {
        self.participants.contains(&participant)
    }

    fn ensure_no_active_duplicate(
        &self,
        min_lock_blocks: u64,
        except: Option<ProgrammeId>,
    ) -> Result<()> {
        let duplicate = self
            .programmes
            .iter()
            .any(|p| p.active && p.min_lock_blocks == min_lock_blocks && Some(p.id) != except);
        if duplicate {
            return Err(StakingError::ConflictingState);
        }
        Ok(())
    }

    /// Append a new programme and return its id.
    ///
    /// An active programme may not share its lock length with another active programme.
    pub fn add_programme(
        &mut self,
        weight: u64,
        min_lock_blocks: u64,
        activate: bool,
        now: u64,
        config: &EngineConfig,
    ) -> Result<ProgrammeId> {
        if weight == 0 {
            return Err(StakingError::InvalidAllocation);
        }
        if activate {
            self.ensure_no_active_duplicate(min_lock_blocks, None)?;
        }
        // Other programmes' share shrinks from here on, not retroactively.
        self.settle_all(now, config)?;

        let id = self.programmes.len() as ProgrammeId;
        self.programmes.push(Programme {
            id,
            weight,
            min_lock_blocks,
            last_settled_block: now,
            accumulator: RewardPerShare::ZERO,
            total_staked: U256::ZERO,
            active: activate,
        });
        tracing::info!(programme = id, weight, min_lock_blocks, activate, "added reward programme");
        Ok(id)
    }

    /// Change the allocation weight of `id`, effective from `now`.
    ///
    /// With `settle_first` every programme is settled, otherwise only `id` is.
    pub fn update_weight(
        &mut self,
        id: ProgrammeId,
        weight: u64,
        settle_first: bool,
        now: u64,
        config: &EngineConfig,
    ) -> Result<()> {
        if weight == 0 {
            return Err(StakingError::InvalidAllocation);
        }
        if settle_first {
            self.settle_all(now, config)?;
        } else {
            self.settle(id, now, config)?;
        }
        let programme = self.programme_mut(id)?;
        tracing::info!(
            programme = id,
            old = programme.weight,
            new = weight,
            "updated programme weight"
        );
        programme.weight = weight;
        Ok(())
    }

    pub fn set_active(
        &mut self,
        id: ProgrammeId,
        active: bool,
        now: u64,
        config: &EngineConfig,
    ) -> Result<()> {
        let programme = self.programme(id)?;
        if programme.active == active {
            return Ok(());
        }
        if active {
            self.ensure_no_active_duplicate(programme.min_lock_blocks, Some(id))?;
        }
        self.settle_all(now, config)?;
        self.programme_mut(id)?.active = active;
        tracing::info!(programme = id, active, "changed programme activation");
        Ok(())
    }

    /// Emission owed to programme `id` for the blocks since its last settlement.
    fn accrued_share(&self, id: ProgrammeId, now: u64, config: &EngineConfig) -> Result<U256> {
        let programme = self.programme(id)?;
        let blocks = emission_blocks(programme.last_settled_block, now, config.start_block);
        if blocks == 0 {
            return Ok(U256::ZERO);
        }
        let this_weight = programme.stake_weight()?;
        if this_weight.is_zero() {
            return Ok(U256::ZERO);
        }
        let total_weight = self.programmes.iter().try_fold(U256::ZERO, |acc, p| {
            acc.checked_add(p.stake_weight()?).ok_or(StakingError::ArithmeticOverflow)
        })?;
        let total_emission = config
            .token_reward_per_block
            .checked_mul(U256::from(blocks))
            .ok_or(StakingError::ArithmeticOverflow)?;
        let share = total_emission
            .checked_mul(this_weight)
            .ok_or(StakingError::ArithmeticOverflow)?
            / total_weight;
        Ok(share)
    }

    /// Settle programme `id` up to block `now`. Idempotent within a block.
    pub fn settle(
        &mut self,
        id: ProgrammeId,
        now: u64,
        config: &EngineConfig,
    ) -> Result<Settlement> {
        let programme = self.programme(id)?;
        if now <= programme.last_settled_block {
            return Ok(Settlement {
                accumulator: programme.accumulator,
                last_settled_block: programme.last_settled_block,
                distributed: U256::ZERO,
            });
        }
        let share = self.accrued_share(id, now, config)?;
        let programme = self.programme_mut(id)?;
        let settled = accumulator::settle(
            programme.total_staked,
            programme.accumulator,
            programme.last_settled_block,
            now,
            share,
        )?;
        programme.accumulator = settled.accumulator;
        programme.last_settled_block = settled.last_settled_block;
        if !settled.distributed.is_zero() {
            tracing::debug!(
                programme = id,
                block = now,
                share = %settled.distributed,
                "settled programme"
            );
        }
        Ok(settled)
    }

    pub fn settle_all(&mut self, now: u64, config: &EngineConfig) -> Result<()> {
        for id in 0..self.programmes.len() as ProgrammeId {
            self.settle(id, now, config)?;
        }
        Ok(())
    }

    /// Read-only simulation of [Self::settle] followed by a harvest of `principal` with
    /// `reward_debt`.
    pub fn pending_for(
        &self,
        id: ProgrammeId,
        principal: U256,
        reward_debt: U256,
        now: u64,
        config: &EngineConfig,
    ) -> Result<U256> {
        let programme = self.programme(id)?;
        let mut accumulator = programme.accumulator;
        if now > programme.last_settled_block {
            let share = self.accrued_share(id, now, config)?;
            accumulator = accumulator::settle(
                programme.total_staked,
                accumulator,
                programme.last_settled_block,
                now,
                share,
            )?
            .accumulator;
        }
        accumulator.pending(principal, reward_debt)
    }

    /// Pending reward of `participant` in programme `id`, without mutation.
    pub fn pending_of(
        &self,
        id: ProgrammeId,
        participant: Address,
        now: u64,
        config: &EngineConfig,
    ) -> Result<U256> {
        let position = self.position(id, participant);
        self.pending_for(id, position.principal, position.reward_debt, now, config)
    }

    /// Settle, then return the reward accrued by `participant` and reset its debt.
    pub fn claim(
        &mut self,
        id: ProgrammeId,
        participant: Address,
        now: u64,
        config: &EngineConfig,
    ) -> Result<U256> {
        self.update_position(id, participant, now, config, |principal| Ok(principal))
    }

    /// Settle, harvest, then add `amount` to the principal of `participant`.
    ///
    /// Returns the harvested reward, which the caller must pay out.
    pub fn stake(
        &mut self,
        id: ProgrammeId,
        participant: Address,
        amount: U256,
        now: u64,
        config: &EngineConfig,
    ) -> Result<U256> {
        if amount.is_zero() {
            return Err(StakingError::ZeroAmount);
        }
        if !self.is_participant(participant) {
            return Err(StakingError::NotParticipant(participant));
        }
        if !self.programme(id)?.active {
            return Err(StakingError::ProgrammeInactive(id));
        }
        let harvested = self.update_position(id, participant, now, config, |principal| {
            principal.checked_add(amount).ok_or(StakingError::ArithmeticOverflow)
        })?;
        let programme = self.programme_mut(id)?;
        programme.total_staked =
            programme.total_staked.checked_add(amount).ok_or(StakingError::ArithmeticOverflow)?;
        tracing::debug!(programme = id, %participant, %amount, "staked into programme");
        Ok(harvested)
    }

    /// Settle, harvest, then remove `amount` from the principal of `participant`.
    pub fn withdraw_principal(
        &mut self,
        id: ProgrammeId,
        participant: Address,
        amount: U256,
        now: u64,
        config: &EngineConfig,
    ) -> Result<U256> {
        if amount.is_zero() {
            return Err(StakingError::ZeroAmount);
        }
        let available = self.position(id, participant).principal;
        if amount > available {
            return Err(StakingError::InsufficientStake { requested: amount, available });
        }
        let harvested =
            self.update_position(id, participant, now, config, |principal| Ok(principal - amount))?;
        let programme = self.programme_mut(id)?;
        programme.total_staked -= amount;
        tracing::debug!(programme = id, %participant, %amount, "withdrew from programme");
        Ok(harvested)
    }

    fn update_position(
        &mut self,
        id: ProgrammeId,
        participant: Address,
        now: u64,
        config: &EngineConfig,
        new_principal: impl FnOnce(U256) -> Result<U256>,
    ) -> Result<U256> {
        // A stake change moves the total weight, so every programme settles at the old one first.
        self.settle_all(now, config)?;
        let accumulator = self.programme(id)?.accumulator;
        let position = self.position(id, participant);
        let harvested = accumulator.pending(position.principal, position.reward_debt)?;
        let principal = new_principal(position.principal)?;
        if principal.is_zero() {
            self.positions.remove(&(id, participant));
        } else {
            let reward_debt = accumulator.accrued(principal)?;
            self.positions.insert((id, participant), PoolPosition { principal, reward_debt });
        }
        Ok(harvested)
    }
}
