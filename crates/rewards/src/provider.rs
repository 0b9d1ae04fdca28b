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

//! Provider sub-ledger.
//!
//! A [ProviderAccount] is a single participant of the pool ledger. Whatever its pool position
//! earns is folded into a local accumulator over the aggregate principal of the account (the
//! provider's own entry plus every delegator), then paid out per holder on claim. Delegator
//! claims are charged the provider fee at claim time; the provider's own entry pays no fee.
//!
//! This module holds the local bookkeeping only. Token movements and pool ledger calls are
//! sequenced by the engine.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::Serialize;

use crate::{
    accumulator::{self, RewardPerShare},
    bonding,
    config::FEE_DENOMINATOR,
    error::{Result, StakingError},
    pool::ProgrammeId,
};

/// Stable handle of a provider account in the engine's arena.
pub type AccountId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ProviderState {
    Uninitialized,
    AwaitingBond,
    Active,
    Exited,
}

/// Who staked the bond. The first path taken forecloses the other for good.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BondOrigin {
    NotStaked,
    SelfStaked,
    AdminStaked { admin: Address },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DelegatorPosition {
    pub principal: U256,
    /// `principal * accumulator / SCALE` at this holder's last settlement.
    pub reward_debt: U256,
    pub lockup_expiry: u64,
    pub pending_withdrawal: U256,
    pub unlock_block: u64,
}

impl DelegatorPosition {
    fn is_empty(&self) -> bool {
        self.principal.is_zero() && self.pending_withdrawal.is_zero()
    }
}

/// Reward released by one claim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Harvest {
    pub gross: U256,
    /// Part of `gross` owed to the bond holder.
    pub fee: U256,
}

impl Harvest {
    pub fn net(&self) -> U256 {
        self.gross - self.fee
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ProviderAccount {
    pub id: AccountId,
    /// Address under which the account participates in the pool ledger and holds pulled rewards.
    pub address: Address,
    pub provider: Address,
    /// Admin that provisioned the account.
    pub controller: Address,
    pub token: Address,
    pub programme: Option<ProgrammeId>,
    pub fee_bps: u32,
    pub state: ProviderState,
    pub bond_origin: BondOrigin,
    pub aggregate_principal: U256,
    pub accumulator: RewardPerShare,
    /// Block of the last reward folded into [Self::accumulator].
    pub last_settled_block: u64,
    /// Reward that arrived while the account had no principal. Owed to the provider.
    pub unattributed: U256,
    positions: BTreeMap<Address, DelegatorPosition>,
}

impl ProviderAccount {
    pub fn new(id: AccountId, address: Address, controller: Address) -> Self {
        Self {
            id,
            address,
            provider: Address::ZERO,
            controller,
            token: Address::ZERO,
            programme: None,
            fee_bps: 0,
            state: ProviderState::Uninitialized,
            bond_origin: BondOrigin::NotStaked,
            aggregate_principal: U256::ZERO,
            accumulator: RewardPerShare::ZERO,
            last_settled_block: 0,
            unattributed: U256::ZERO,
            positions: BTreeMap::new(),
        }
    }

    /// Bind the provider identity and token. One-time.
    pub fn init(&mut self, provider: Address, token: Address) -> Result<()> {
        if self.state != ProviderState::Uninitialized {
            return Err(StakingError::AlreadyInitialized);
        }
        if provider.is_zero() {
            return Err(StakingError::InvalidIdentity);
        }
        if token.is_zero() {
            return Err(StakingError::InvalidToken);
        }
        self.provider = provider;
        self.token = token;
        self.state = ProviderState::AwaitingBond;
        Ok(())
    }

    /// Recipient of the provider's own rewards, its fees and its released bond.
    pub fn bond_holder(&self) -> Address {
        match self.bond_origin {
            BondOrigin::AdminStaked { admin } => admin,
            BondOrigin::NotStaked | BondOrigin::SelfStaked => self.provider,
        }
    }

    /// Position key of `caller`. The bond holder maps to the provider's own entry.
    pub fn holder_key(&self, caller: Address) -> Address {
        if caller == self.bond_holder() {
            self.provider
        } else {
            caller
        }
    }

    pub fn is_own_entry(&self, holder: Address) -> bool {
        holder == self.provider
    }

    /// Operator calls come from the provider, or from the admin that staked the bond.
    pub fn ensure_operator(&self, caller: Address) -> Result<()> {
        let allowed = match self.bond_origin {
            BondOrigin::AdminStaked { admin } => caller == admin || caller == self.provider,
            BondOrigin::NotStaked | BondOrigin::SelfStaked => caller == self.provider,
        };
        if !allowed {
            return Err(StakingError::WrongCaller(caller));
        }
        Ok(())
    }

    pub fn ensure_active(&self) -> Result<()> {
        match self.state {
            ProviderState::Active => Ok(()),
            ProviderState::Exited => Err(StakingError::ProviderExited),
            ProviderState::Uninitialized | ProviderState::AwaitingBond => {
                Err(StakingError::NotSetUp)
            }
        }
    }

    /// Move from `AwaitingBond` to `Active` with the given bond origin.
    pub fn activate(
        &mut self,
        origin: BondOrigin,
        programme: ProgrammeId,
        fee_bps: u32,
    ) -> Result<()> {
        if self.bond_origin != BondOrigin::NotStaked {
            return Err(StakingError::AlreadySetUp);
        }
        if self.state != ProviderState::AwaitingBond {
            return Err(StakingError::NotSetUp);
        }
        self.bond_origin = origin;
        self.programme = Some(programme);
        self.fee_bps = fee_bps;
        self.state = ProviderState::Active;
        Ok(())
    }

    pub fn mark_exited(&mut self) {
        self.state = ProviderState::Exited;
    }

    pub fn position(&self, holder: Address) -> DelegatorPosition {
        self.positions.get(&holder).copied().unwrap_or_default()
    }

    pub fn positions(&self) -> impl Iterator<Item = (&Address, &DelegatorPosition)> {
        self.positions.iter()
    }

    pub fn own_principal(&self) -> U256 {
        self.position(self.provider).principal
    }

    /// Sum of delegator principal, excluding the provider's own entry.
    pub fn delegated_principal(&self) -> U256 {
        self.positions
            .iter()
            .filter(|(holder, _)| !self.is_own_entry(**holder))
            .fold(U256::ZERO, |acc, (_, p)| acc.saturating_add(p.principal))
    }

    /// Fold `reward` pulled from the pool ledger at block `now` into the local accumulator.
    pub fn absorb(&mut self, reward: U256, now: u64) -> Result<()> {
        if reward.is_zero() {
            return Ok(());
        }
        if self.aggregate_principal.is_zero() {
            self.unattributed =
                self.unattributed.checked_add(reward).ok_or(StakingError::ArithmeticOverflow)?;
            return Ok(());
        }
        let settled = accumulator::settle(
            self.aggregate_principal,
            self.accumulator,
            self.last_settled_block,
            now,
            reward,
        )?;
        self.accumulator = settled.accumulator;
        self.last_settled_block = settled.last_settled_block;
        tracing::trace!(account = %self.address, %reward, "absorbed pool reward");
        Ok(())
    }

    fn split(&self, holder: Address, gross: U256) -> Result<Harvest> {
        if self.is_own_entry(holder) {
            let gross =
                gross.checked_add(self.unattributed).ok_or(StakingError::ArithmeticOverflow)?;
            return Ok(Harvest { gross, fee: U256::ZERO });
        }
        let fee = gross
            .checked_mul(U256::from(self.fee_bps))
            .ok_or(StakingError::ArithmeticOverflow)?
            / U256::from(FEE_DENOMINATOR);
        Ok(Harvest { gross, fee })
    }

    /// What `holder` would receive if `extra` more reward were absorbed first. Read-only.
    pub fn pending(&self, holder: Address, extra: U256) -> Result<Harvest> {
        let position = self.position(holder);
        let mut accumulator = self.accumulator;
        let mut unattributed = self.unattributed;
        if self.aggregate_principal.is_zero() {
            unattributed = unattributed.checked_add(extra).ok_or(StakingError::ArithmeticOverflow)?;
        } else {
            accumulator = accumulator::settle(
                self.aggregate_principal,
                accumulator,
                self.last_settled_block,
                self.last_settled_block,
                extra,
            )?
            .accumulator;
        }
        let gross = accumulator.pending(position.principal, position.reward_debt)?;
        if self.is_own_entry(holder) {
            let gross = gross.checked_add(unattributed).ok_or(StakingError::ArithmeticOverflow)?;
            return Ok(Harvest { gross, fee: U256::ZERO });
        }
        self.split(holder, gross)
    }

    /// Release `holder`'s accrued reward and reset its debt.
    pub fn harvest(&mut self, holder: Address) -> Result<Harvest> {
        let position = self.position(holder);
        let gross = self.accumulator.pending(position.principal, position.reward_debt)?;
        let harvest = self.split(holder, gross)?;
        if self.is_own_entry(holder) {
            self.unattributed = U256::ZERO;
        }
        if let Some(entry) = self.positions.get_mut(&holder) {
            entry.reward_debt = self.accumulator.accrued(entry.principal)?;
        }
        Ok(harvest)
    }

    /// Add principal for `holder`, who must have been harvested at the current block.
    pub fn add_principal(
        &mut self,
        holder: Address,
        amount: U256,
        min_lock_blocks: u64,
        now: u64,
    ) -> Result<()> {
        let accumulator = self.accumulator;
        let entry = self.positions.entry(holder).or_default();
        entry.principal =
            entry.principal.checked_add(amount).ok_or(StakingError::ArithmeticOverflow)?;
        entry.reward_debt = accumulator.accrued(entry.principal)?;
        entry.lockup_expiry = bonding::extend_lockup(now, min_lock_blocks, entry.lockup_expiry);
        self.aggregate_principal =
            self.aggregate_principal.checked_add(amount).ok_or(StakingError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Move `amount` of active principal into the unbonding bucket. Returns the unlock block.
    ///
    /// Repeated requests accumulate in one bucket and restart its unbonding window.
    pub fn request_withdrawal(
        &mut self,
        holder: Address,
        amount: U256,
        now: u64,
        unbonding_blocks: u64,
    ) -> Result<u64> {
        let position = self.position(holder);
        if amount.is_zero() || amount > position.principal {
            return Err(StakingError::InsufficientPrincipal {
                requested: amount,
                available: position.principal,
            });
        }
        bonding::ensure_lockup_elapsed(now, position.lockup_expiry)?;

        let accumulator = self.accumulator;
        let entry = self.positions.entry(holder).or_default();
        entry.principal -= amount;
        entry.reward_debt = accumulator.accrued(entry.principal)?;
        entry.pending_withdrawal += amount;
        entry.unlock_block = bonding::unbonding_release_block(now, unbonding_blocks);
        let unlock = entry.unlock_block;
        self.aggregate_principal -= amount;
        Ok(unlock)
    }

    /// Empty `holder`'s unbonding bucket once its window has elapsed.
    pub fn take_released(&mut self, holder: Address, now: u64) -> Result<U256> {
        let position = self.position(holder);
        if position.pending_withdrawal.is_zero() {
            return Err(StakingError::NothingPending);
        }
        bonding::ensure_unbonded(now, position.unlock_block)?;
        let released = position.pending_withdrawal;
        self.clear_bucket(holder);
        Ok(released)
    }

    fn clear_bucket(&mut self, holder: Address) {
        if let Some(entry) = self.positions.get_mut(&holder) {
            entry.pending_withdrawal = U256::ZERO;
            entry.unlock_block = 0;
            if entry.is_empty() {
                self.positions.remove(&holder);
            }
        }
    }

    /// Remove `holder` entirely, returning its active principal and unbonding bucket.
    ///
    /// The holder must have been harvested first.
    pub fn remove_holder(&mut self, holder: Address) -> (U256, U256) {
        match self.positions.remove(&holder) {
            Some(position) => {
                self.aggregate_principal -= position.principal;
                (position.principal, position.pending_withdrawal)
            }
            None => (U256::ZERO, U256::ZERO),
        }
    }

    /// Raise the fee to `min_fee_bps` if it is currently lower. Returns the old fee on change.
    pub fn calibrate_fee(&mut self, min_fee_bps: u32) -> Option<u32> {
        if min_fee_bps <= self.fee_bps {
            return None;
        }
        let old = self.fee_bps;
        self.fee_bps = min_fee_bps;
        Some(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tokens;

    const PROVIDER: Address = Address::repeat_byte(0x10);
    const DELEGATOR: Address = Address::repeat_byte(0x20);
    const ADMIN: Address = Address::repeat_byte(0x30);
    const TOKEN: Address = Address::repeat_byte(0x40);

    fn active_account(fee_bps: u32) -> ProviderAccount {
        let mut account = ProviderAccount::new(0, Address::repeat_byte(0x50), ADMIN);
        account.init(PROVIDER, TOKEN).unwrap();
        account.activate(BondOrigin::SelfStaked, 0, fee_bps).unwrap();
        account.add_principal(PROVIDER, tokens(2_000_000), 0, 0).unwrap();
        account
    }

    #[test]
    fn init_validates_inputs_once() {
        let mut account = ProviderAccount::new(0, Address::repeat_byte(0x50), ADMIN);
        assert_eq!(account.init(Address::ZERO, TOKEN), Err(StakingError::InvalidIdentity));
        assert_eq!(account.init(PROVIDER, Address::ZERO), Err(StakingError::InvalidToken));
        account.init(PROVIDER, TOKEN).unwrap();
        assert_eq!(account.state, ProviderState::AwaitingBond);
        assert_eq!(account.init(PROVIDER, TOKEN), Err(StakingError::AlreadyInitialized));
    }

    #[test]
    fn bond_origin_is_one_way() {
        let mut account = ProviderAccount::new(0, Address::repeat_byte(0x50), ADMIN);
        assert_eq!(account.activate(BondOrigin::SelfStaked, 0, 500), Err(StakingError::NotSetUp));
        account.init(PROVIDER, TOKEN).unwrap();
        account.activate(BondOrigin::AdminStaked { admin: ADMIN }, 0, 500).unwrap();
        assert_eq!(
            account.activate(BondOrigin::SelfStaked, 0, 500),
            Err(StakingError::AlreadySetUp)
        );

        assert_eq!(account.bond_holder(), ADMIN);
        assert_eq!(account.holder_key(ADMIN), PROVIDER);
        account.ensure_operator(ADMIN).unwrap();
        account.ensure_operator(PROVIDER).unwrap();
        assert_eq!(account.ensure_operator(DELEGATOR), Err(StakingError::WrongCaller(DELEGATOR)));
    }

    #[test]
    fn delegator_claim_pays_fee_on_gross() {
        let mut account = active_account(500);
        account.add_principal(DELEGATOR, tokens(100_000), 0, 0).unwrap();

        // Two blocks at 100 per block reach the account.
        account.absorb(tokens(200), 2).unwrap();
        assert_eq!(account.last_settled_block, 2);

        let delegator = account.harvest(DELEGATOR).unwrap();
        // 200 * 100_000 / 2_100_000 = 9.5238...
        assert!(delegator.gross > tokens(9) && delegator.gross < tokens(10));
        assert_eq!(delegator.fee, delegator.gross * U256::from(500) / U256::from(10_000));
        assert!(delegator.fee <= delegator.gross);

        let provider = account.harvest(PROVIDER).unwrap();
        assert_eq!(provider.fee, U256::ZERO);
        // Truncation dust is bounded by aggregate principal / SCALE per holder.
        let distributed = provider.gross + delegator.gross;
        assert!(tokens(200) - distributed < U256::from(10u64).pow(U256::from(13)));

        assert_eq!(account.harvest(DELEGATOR).unwrap(), Harvest::default());
    }

    #[test]
    fn pending_matches_harvest() {
        let mut account = active_account(1_000);
        account.add_principal(DELEGATOR, tokens(500_000), 0, 0).unwrap();
        account.absorb(tokens(50), 1).unwrap();

        let simulated = account.pending(DELEGATOR, tokens(25)).unwrap();
        account.absorb(tokens(25), 2).unwrap();
        assert_eq!(account.harvest(DELEGATOR).unwrap(), simulated);
    }

    #[test]
    fn reward_without_principal_goes_to_provider() {
        let mut account = ProviderAccount::new(0, Address::repeat_byte(0x50), ADMIN);
        account.init(PROVIDER, TOKEN).unwrap();
        account.absorb(tokens(7), 1).unwrap();
        assert_eq!(account.accumulator, RewardPerShare::ZERO);
        assert_eq!(account.pending(PROVIDER, U256::ZERO).unwrap().gross, tokens(7));
        assert_eq!(account.harvest(PROVIDER).unwrap().gross, tokens(7));
        assert_eq!(account.unattributed, U256::ZERO);
    }

    #[test]
    fn withdrawal_moves_principal_into_bucket() {
        let mut account = active_account(500);
        account.add_principal(DELEGATOR, tokens(100), 50, 1).unwrap();
        assert_eq!(account.position(DELEGATOR).lockup_expiry, 51);

        assert_eq!(
            account.request_withdrawal(DELEGATOR, tokens(10), 50, 100),
            Err(StakingError::LockupNotElapsed { expiry: 51, now: 50 })
        );
        assert_eq!(
            account.request_withdrawal(DELEGATOR, tokens(101), 51, 100),
            Err(StakingError::InsufficientPrincipal {
                requested: tokens(101),
                available: tokens(100)
            })
        );

        assert_eq!(
            account.request_withdrawal(DELEGATOR, U256::ZERO, 51, 100),
            Err(StakingError::InsufficientPrincipal {
                requested: U256::ZERO,
                available: tokens(100)
            })
        );

        let unlock = account.request_withdrawal(DELEGATOR, tokens(40), 51, 100).unwrap();
        assert_eq!(unlock, 151);
        assert_eq!(account.aggregate_principal, tokens(2_000_060));
        assert_eq!(
            account.take_released(DELEGATOR, 150),
            Err(StakingError::StillUnbonding { unlock: 151, now: 150 })
        );
        assert_eq!(account.take_released(DELEGATOR, 151).unwrap(), tokens(40));
        assert_eq!(account.take_released(DELEGATOR, 151), Err(StakingError::NothingPending));
        assert_eq!(account.position(DELEGATOR).principal, tokens(60));
    }

    #[test]
    fn fee_only_ratchets_up() {
        let mut account = active_account(500);
        assert_eq!(account.calibrate_fee(100), None);
        assert_eq!(account.calibrate_fee(700), Some(500));
        assert_eq!(account.fee_bps, 700);
    }

    #[test]
    fn aggregate_matches_positions() {
        let mut account = active_account(500);
        account.add_principal(DELEGATOR, tokens(30), 0, 0).unwrap();
        account.add_principal(ADMIN, tokens(20), 0, 0).unwrap();
        account.request_withdrawal(ADMIN, tokens(5), 0, 10).unwrap();
        assert_eq!(account.delegated_principal(), tokens(45));
        assert_eq!(
            account.aggregate_principal,
            account.own_principal() + account.delegated_principal()
        );

        assert_eq!(account.remove_holder(ADMIN), (tokens(15), tokens(5)));
        assert_eq!(account.aggregate_principal, tokens(2_000_030));
    }
}
