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

//! The [StakingEngine] facade.
//!
//! The engine owns the clock, the pool ledger, the arena of provider accounts and the token
//! ledger, and sequences every operation across them. Each public mutation is all-or-nothing:
//! state is snapshotted on entry and restored if the operation fails.
//!
//! Principal is held at the engine address. Rewards move from the vault to an account address
//! when the account's pool position is claimed, and from the account address to holders when
//! they claim locally.

use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};

use crate::{
    access::AccessPolicy,
    config::{validate_fee_bps, EngineConfig, FEE_DENOMINATOR},
    error::{Result, StakingError},
    events::{StakingEvent, TimestampedStakingEvent},
    pool::{PoolLedger, Programme, ProgrammeId},
    provider::{AccountId, BondOrigin, DelegatorPosition, ProviderAccount, ProviderState},
    token::{TokenLedger, Vault},
};

#[derive(Clone, Debug)]
struct EngineState<T> {
    token: T,
    pool: PoolLedger,
    accounts: Vec<ProviderAccount>,
    directory: BTreeMap<Address, AccountId>,
    config: EngineConfig,
    nonce: u64,
}

pub struct StakingEngine<T, A> {
    address: Address,
    vault: Vault,
    access: A,
    block: u64,
    state: EngineState<T>,
    events: Vec<TimestampedStakingEvent>,
}

impl<T, A> StakingEngine<T, A>
where
    T: TokenLedger + Clone,
    A: AccessPolicy,
{
    /// Create an engine holding principal at `address` and paying rewards out of `vault`.
    pub fn new(
        address: Address,
        token: T,
        vault: Vault,
        access: A,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        if token.address().is_zero() {
            return Err(StakingError::InvalidToken);
        }
        Ok(Self {
            address,
            vault,
            access,
            block: 0,
            state: EngineState {
                token,
                pool: PoolLedger::new(),
                accounts: Vec::new(),
                directory: BTreeMap::new(),
                config,
                nonce: 0,
            },
            events: Vec::new(),
        })
    }

    /// Run `op` atomically: on error every state change and event it made is discarded.
    fn transact<R>(
        &mut self,
        name: &'static str,
        op: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let snapshot = self.state.clone();
        let journal_len = self.events.len();
        let result = op(self);
        if let Err(err) = &result {
            tracing::warn!(
                operation = name,
                block = self.block,
                error = %err,
                "operation rolled back"
            );
            self.state = snapshot;
            self.events.truncate(journal_len);
        }
        result
    }

    fn emit(&mut self, event: StakingEvent) {
        let sequence = self.events.len() as u64;
        self.events.push(TimestampedStakingEvent { block_number: self.block, sequence, event });
    }

    fn ensure_unpaused(&self) -> Result<()> {
        if self.state.config.user_actions_paused {
            return Err(StakingError::UserActionsPaused);
        }
        Ok(())
    }

    fn account_id(&self, provider: Address) -> Result<AccountId> {
        self.state.directory.get(&provider).copied().ok_or(StakingError::UnknownProvider(provider))
    }

    fn programme_of(&self, id: AccountId) -> Result<ProgrammeId> {
        self.state.accounts[id].programme.ok_or(StakingError::NotSetUp)
    }

    // Clock

    pub fn block(&self) -> u64 {
        self.block
    }

    /// Move the clock forward to `block`.
    pub fn advance_to(&mut self, block: u64) -> Result<()> {
        if block < self.block {
            return Err(StakingError::BlockRegression { requested: block, current: self.block });
        }
        self.block = block;
        Ok(())
    }

    // Programme administration

    pub fn add_programme(
        &mut self,
        caller: Address,
        weight: u64,
        min_lock_blocks: u64,
        activate: bool,
    ) -> Result<ProgrammeId> {
        self.transact("add_programme", |engine| {
            engine.access.ensure_admin(caller)?;
            let now = engine.block;
            let state = &mut engine.state;
            let id =
                state.pool.add_programme(weight, min_lock_blocks, activate, now, &state.config)?;
            engine.emit(StakingEvent::ProgrammeAdded {
                id,
                weight,
                min_lock_blocks,
                active: activate,
            });
            Ok(id)
        })
    }

    pub fn update_programme_weight(
        &mut self,
        caller: Address,
        id: ProgrammeId,
        weight: u64,
        settle_first: bool,
    ) -> Result<()> {
        self.transact("update_programme_weight", |engine| {
            engine.access.ensure_admin(caller)?;
            let now = engine.block;
            let state = &mut engine.state;
            state.pool.update_weight(id, weight, settle_first, now, &state.config)?;
            engine.emit(StakingEvent::ProgrammeWeightUpdated { id, weight });
            Ok(())
        })
    }

    pub fn set_programme_active(
        &mut self,
        caller: Address,
        id: ProgrammeId,
        active: bool,
    ) -> Result<()> {
        self.transact("set_programme_active", |engine| {
            engine.access.ensure_admin(caller)?;
            let now = engine.block;
            let state = &mut engine.state;
            state.pool.set_active(id, active, now, &state.config)?;
            engine.emit(StakingEvent::ProgrammeActivationChanged { id, active });
            Ok(())
        })
    }

    // Configuration

    fn update_config(
        &mut self,
        name: &'static str,
        update: impl FnOnce(&mut EngineConfig) -> Result<()>,
    ) -> Result<()> {
        let config = &mut self.state.config;
        update(config)?;
        config.bump_version();
        let version = config.version;
        tracing::info!(parameter = name, version, "configuration updated");
        self.emit(StakingEvent::ConfigUpdated { version, parameter: name });
        Ok(())
    }

    /// Change the global emission rate. Every programme is settled at the old rate first.
    pub fn update_token_reward_per_block(&mut self, caller: Address, rate: U256) -> Result<()> {
        self.transact("update_token_reward_per_block", |engine| {
            engine.access.ensure_admin(caller)?;
            let now = engine.block;
            let state = &mut engine.state;
            state.pool.settle_all(now, &state.config)?;
            engine.update_config("token_reward_per_block", |config| {
                config.token_reward_per_block = rate;
                Ok(())
            })
        })
    }

    pub fn update_min_required_bond(&mut self, caller: Address, amount: U256) -> Result<()> {
        self.transact("update_min_required_bond", |engine| {
            engine.access.ensure_whitelisted(caller)?;
            engine.update_config("min_required_bond", |config| {
                config.min_required_bond = amount;
                config.validate()
            })
        })
    }

    pub fn update_max_provider_stake(&mut self, caller: Address, amount: U256) -> Result<()> {
        self.transact("update_max_provider_stake", |engine| {
            engine.access.ensure_whitelisted(caller)?;
            engine.update_config("max_provider_stake", |config| {
                config.max_provider_stake = amount;
                config.validate()
            })
        })
    }

    pub fn update_min_service_provider_fee(&mut self, caller: Address, fee_bps: u32) -> Result<()> {
        self.transact("update_min_service_provider_fee", |engine| {
            engine.access.ensure_whitelisted(caller)?;
            validate_fee_bps(fee_bps)?;
            engine.update_config("min_service_provider_fee_bps", |config| {
                config.min_service_provider_fee_bps = fee_bps;
                Ok(())
            })
        })
    }

    pub fn set_user_actions_paused(&mut self, caller: Address, paused: bool) -> Result<()> {
        self.transact("set_user_actions_paused", |engine| {
            engine.access.ensure_admin(caller)?;
            engine.update_config("user_actions_paused", |config| {
                config.user_actions_paused = paused;
                Ok(())
            })?;
            tracing::info!(paused, "user actions pause toggled");
            engine.emit(StakingEvent::UserActionsPauseToggled { paused });
            Ok(())
        })
    }

    // Factory

    /// Provision a provider account for `provider` and record it in the directory.
    ///
    /// Returns the address under which the account participates in the pool ledger.
    pub fn whitelist_provider(&mut self, caller: Address, provider: Address) -> Result<Address> {
        self.transact("whitelist_provider", |engine| {
            engine.access.ensure_admin(caller)?;
            if engine.state.directory.contains_key(&provider) {
                return Err(StakingError::ProviderAlreadyWhitelisted(provider));
            }
            let token = engine.state.token.address();
            let state = &mut engine.state;
            let address = engine.address.create(state.nonce);
            state.nonce += 1;

            let id = state.accounts.len();
            let mut account = ProviderAccount::new(id, address, caller);
            account.init(provider, token)?;
            state.accounts.push(account);
            state.directory.insert(provider, id);
            state.pool.register_participant(address);

            tracing::info!(%provider, %address, "whitelisted provider");
            engine.emit(StakingEvent::ProviderWhitelisted { provider, account: address });
            Ok(address)
        })
    }

    // Provider path

    /// Stake the bond as the provider itself.
    pub fn stake_bond(
        &mut self,
        caller: Address,
        programme: ProgrammeId,
        fee_bps: u32,
    ) -> Result<()> {
        self.transact("stake_bond", |engine| {
            let id = engine.account_id(caller)?;
            engine.bond(id, BondOrigin::SelfStaked, programme, fee_bps)
        })
    }

    /// Stake the bond on behalf of `provider`. The admin becomes the bond holder.
    pub fn admin_stake_bond(
        &mut self,
        caller: Address,
        provider: Address,
        programme: ProgrammeId,
        fee_bps: u32,
    ) -> Result<()> {
        self.transact("admin_stake_bond", |engine| {
            engine.access.ensure_admin(caller)?;
            let id = engine.account_id(provider)?;
            engine.bond(id, BondOrigin::AdminStaked { admin: caller }, programme, fee_bps)
        })
    }

    fn bond(
        &mut self,
        id: AccountId,
        origin: BondOrigin,
        programme: ProgrammeId,
        fee_bps: u32,
    ) -> Result<()> {
        self.ensure_unpaused()?;
        let min_bps = self.state.config.min_service_provider_fee_bps;
        if fee_bps == 0 || fee_bps < min_bps {
            return Err(StakingError::FeeTooLow { fee_bps, min_bps });
        }
        if fee_bps > FEE_DENOMINATOR {
            return Err(StakingError::FeeOutOfRange(fee_bps));
        }
        let min_lock_blocks = self.state.pool.programme(programme)?.min_lock_blocks;
        let amount = self.state.config.min_required_bond;
        let now = self.block;

        let account = &mut self.state.accounts[id];
        account.activate(origin, programme, fee_bps)?;
        let provider = account.provider;
        let bond_holder = account.bond_holder();
        account.add_principal(provider, amount, min_lock_blocks, now)?;
        let account_address = account.address;

        self.pull_principal(bond_holder, amount)?;
        self.stake_in_pool(id, programme, account_address, amount)?;

        tracing::info!(%provider, %bond_holder, programme, fee_bps, "provider bond staked");
        self.emit(StakingEvent::BondStaked { provider, bond_holder, programme, amount, fee_bps });
        Ok(())
    }

    /// Add to the provider's own stake. Tokens are pulled from the bond holder.
    pub fn increase_own_stake(
        &mut self,
        caller: Address,
        provider: Address,
        amount: U256,
    ) -> Result<()> {
        self.transact("increase_own_stake", |engine| {
            engine.ensure_unpaused()?;
            let id = engine.operator_account(caller, provider)?;
            if amount.is_zero() {
                return Err(StakingError::ZeroAmount);
            }
            let ceiling = engine.state.config.max_provider_stake;
            let requested = engine.state.accounts[id]
                .own_principal()
                .checked_add(amount)
                .ok_or(StakingError::ArithmeticOverflow)?;
            if requested > ceiling {
                return Err(StakingError::StakeCeilingExceeded { requested, ceiling });
            }
            engine.add_stake(id, provider, amount)?;
            engine.emit(StakingEvent::OwnStakeIncreased { provider, amount });
            Ok(())
        })
    }

    /// Move part of the provider's own stake into its unbonding bucket.
    pub fn request_reduce_own_stake(
        &mut self,
        caller: Address,
        provider: Address,
        amount: U256,
    ) -> Result<()> {
        self.transact("request_reduce_own_stake", |engine| {
            engine.ensure_unpaused()?;
            let id = engine.operator_account(caller, provider)?;
            let own = engine.state.accounts[id].own_principal();
            if amount > own {
                return Err(StakingError::InsufficientPrincipal {
                    requested: amount,
                    available: own,
                });
            }
            let remaining = own - amount;
            let minimum = engine.state.config.min_required_bond;
            if remaining < minimum {
                return Err(StakingError::MinimumBondBreached { remaining, minimum });
            }
            engine.reduce_stake(id, provider, amount)
        })
    }

    /// Release the provider's unbonded own stake to the bond holder.
    pub fn withdraw_own_stake(&mut self, caller: Address, provider: Address) -> Result<U256> {
        self.transact("withdraw_own_stake", |engine| {
            engine.ensure_unpaused()?;
            let id = engine.account_id(provider)?;
            let account = &mut engine.state.accounts[id];
            if !matches!(account.state, ProviderState::Active | ProviderState::Exited) {
                return Err(StakingError::NotSetUp);
            }
            account.ensure_operator(caller)?;
            let amount = account.take_released(provider, engine.block)?;
            let bond_holder = account.bond_holder();
            engine.release_principal(bond_holder, amount)?;
            engine.emit(StakingEvent::StakeWithdrawn { provider, holder: bond_holder, amount });
            Ok(amount)
        })
    }

    /// Leave the pool ledger. The provider's own reward is paid now and its bond starts unbonding.
    ///
    /// Delegators keep their principal and the reward accrued so far, and leave through
    /// [Self::exit_as_delegator].
    pub fn exit_as_provider(&mut self, caller: Address, provider: Address) -> Result<()> {
        self.transact("exit_as_provider", |engine| {
            engine.ensure_unpaused()?;
            let id = engine.operator_account(caller, provider)?;
            let now = engine.block;
            let position = engine.state.accounts[id].position(provider);
            crate::bonding::ensure_lockup_elapsed(now, position.lockup_expiry)?;

            engine.sync_account(id)?;
            engine.pay_reward(id, provider)?;

            let unbonding_blocks = engine.state.config.unbonding_blocks;
            let unlock_block = if position.principal.is_zero() {
                now
            } else {
                engine.state.accounts[id].request_withdrawal(
                    provider,
                    position.principal,
                    now,
                    unbonding_blocks,
                )?
            };

            let programme = engine.programme_of(id)?;
            let state = &mut engine.state;
            let account_address = state.accounts[id].address;
            let registered = state.pool.position(programme, account_address).principal;
            if !registered.is_zero() {
                let harvested = state.pool.withdraw_principal(
                    programme,
                    account_address,
                    registered,
                    now,
                    &state.config,
                )?;
                engine.credit_account(id, harvested)?;
            }
            let account = &mut engine.state.accounts[id];
            account.mark_exited();
            let bond_holder = account.bond_holder();

            tracing::info!(%provider, unlock_block, "provider exited");
            engine.emit(StakingEvent::WithdrawalRequested {
                provider,
                holder: bond_holder,
                amount: position.principal,
                unlock_block,
            });
            engine.emit(StakingEvent::ProviderExited { provider });
            Ok(())
        })
    }

    // Delegator path

    pub fn delegate_stake(
        &mut self,
        caller: Address,
        provider: Address,
        amount: U256,
    ) -> Result<()> {
        self.transact("delegate_stake", |engine| {
            engine.ensure_unpaused()?;
            let id = engine.account_id(provider)?;
            let account = &engine.state.accounts[id];
            account.ensure_active()?;
            if amount.is_zero() {
                return Err(StakingError::ZeroAmount);
            }
            if account.is_own_entry(account.holder_key(caller)) {
                return Err(StakingError::UseProviderPath);
            }
            engine.add_stake(id, caller, amount)?;
            engine.emit(StakingEvent::StakeDelegated { provider, delegator: caller, amount });
            Ok(())
        })
    }

    /// Move `amount` of the caller's delegation into its unbonding bucket.
    pub fn request_withdraw(
        &mut self,
        caller: Address,
        provider: Address,
        amount: U256,
    ) -> Result<()> {
        self.transact("request_withdraw", |engine| {
            engine.ensure_unpaused()?;
            let id = engine.delegator_account(caller, provider)?;
            engine.state.accounts[id].ensure_active()?;
            engine.reduce_stake(id, caller, amount)
        })
    }

    /// Release the caller's unbonded delegation.
    pub fn withdraw(&mut self, caller: Address, provider: Address) -> Result<U256> {
        self.transact("withdraw", |engine| {
            engine.ensure_unpaused()?;
            let id = engine.delegator_account(caller, provider)?;
            let amount = engine.state.accounts[id].take_released(caller, engine.block)?;
            engine.release_principal(caller, amount)?;
            engine.emit(StakingEvent::StakeWithdrawn { provider, holder: caller, amount });
            Ok(amount)
        })
    }

    /// Leave an exited provider: reward, principal and any unbonding bucket are paid at once.
    pub fn exit_as_delegator(&mut self, caller: Address, provider: Address) -> Result<U256> {
        self.transact("exit_as_delegator", |engine| {
            engine.ensure_unpaused()?;
            let id = engine.account_id(provider)?;
            let account = &engine.state.accounts[id];
            if account.state != ProviderState::Exited {
                return Err(StakingError::ProviderStillActive);
            }
            if account.is_own_entry(account.holder_key(caller)) {
                return Err(StakingError::UseProviderPath);
            }
            let position = account.position(caller);
            if position.principal.is_zero() && position.pending_withdrawal.is_zero() {
                return Err(StakingError::NothingDelegated);
            }

            engine.pay_reward(id, caller)?;
            let (principal, bucket) = engine.state.accounts[id].remove_holder(caller);
            let amount = principal.checked_add(bucket).ok_or(StakingError::ArithmeticOverflow)?;
            engine.release_principal(caller, amount)?;

            tracing::info!(%provider, delegator = %caller, %amount, "delegator exited");
            engine.emit(StakingEvent::DelegatorExited {
                provider,
                delegator: caller,
                principal: amount,
            });
            Ok(amount)
        })
    }

    // Claims

    /// Settle both ledgers and pay the caller's own pending reward. Returns the amount paid.
    ///
    /// Anyone may call this; a caller without a position triggers settlement and receives nothing.
    pub fn get_reward(&mut self, caller: Address, provider: Address) -> Result<U256> {
        self.transact("get_reward", |engine| {
            let id = engine.account_id(provider)?;
            let state = engine.state.accounts[id].state;
            if !matches!(state, ProviderState::Active | ProviderState::Exited) {
                return Err(StakingError::NotSetUp);
            }
            engine.sync_account(id)?;
            let holder = engine.state.accounts[id].holder_key(caller);
            engine.pay_reward(id, holder)
        })
    }

    /// Raise the provider's fee to the global minimum if it has fallen below it.
    pub fn calibrate_fee(&mut self, provider: Address) -> Result<()> {
        self.transact("calibrate_fee", |engine| {
            let id = engine.account_id(provider)?;
            let min_bps = engine.state.config.min_service_provider_fee_bps;
            let account = &mut engine.state.accounts[id];
            account.ensure_active()?;
            if let Some(old_bps) = account.calibrate_fee(min_bps) {
                tracing::info!(%provider, old_bps, new_bps = min_bps, "calibrated provider fee");
                engine.emit(StakingEvent::FeeCalibrated { provider, old_bps, new_bps: min_bps });
            }
            Ok(())
        })
    }

    // Shared sequencing

    fn operator_account(&self, caller: Address, provider: Address) -> Result<AccountId> {
        let id = self.account_id(provider)?;
        let account = &self.state.accounts[id];
        account.ensure_active()?;
        account.ensure_operator(caller)?;
        Ok(id)
    }

    /// Account for a delegator call made while the provider may have exited.
    fn delegator_account(&self, caller: Address, provider: Address) -> Result<AccountId> {
        let id = self.account_id(provider)?;
        let account = &self.state.accounts[id];
        if account.state == ProviderState::Exited {
            return Err(StakingError::UseExitPath);
        }
        if account.is_own_entry(account.holder_key(caller)) {
            return Err(StakingError::UseProviderPath);
        }
        Ok(id)
    }

    /// Pull the account's newly earned pool reward from the vault into its local accumulator.
    fn sync_account(&mut self, id: AccountId) -> Result<()> {
        let state = &mut self.state;
        let account = &mut state.accounts[id];
        if account.state != ProviderState::Active {
            return Ok(());
        }
        let Some(programme) = account.programme else {
            return Ok(());
        };
        let reward = state.pool.claim(programme, account.address, self.block, &state.config)?;
        self.credit_account(id, reward)
    }

    /// Pay `reward` harvested from the pool ledger out of the vault to the account and fold it
    /// into the account's local accumulator.
    fn credit_account(&mut self, id: AccountId, reward: U256) -> Result<()> {
        let state = &mut self.state;
        let account = &mut state.accounts[id];
        self.vault.pay_out(&mut state.token, account.address, reward)?;
        account.absorb(reward, self.block)
    }

    /// Harvest `holder` and pay it out of the account's reward balance. Returns the net paid.
    fn pay_reward(&mut self, id: AccountId, holder: Address) -> Result<U256> {
        let state = &mut self.state;
        let account = &mut state.accounts[id];
        let harvest = account.harvest(holder)?;
        let provider = account.provider;
        let bond_holder = account.bond_holder();
        let recipient = if account.is_own_entry(holder) { bond_holder } else { holder };
        let net = harvest.net();
        state.token.transfer(account.address, recipient, net)?;
        state.token.transfer(account.address, bond_holder, harvest.fee)?;

        if !net.is_zero() {
            tracing::trace!(%provider, %recipient, %net, fee = %harvest.fee, "paid reward");
            self.emit(StakingEvent::RewardPaid { provider, holder: recipient, amount: net });
        }
        if !harvest.fee.is_zero() {
            self.emit(StakingEvent::FeeCollected { provider, bond_holder, amount: harvest.fee });
        }
        Ok(net)
    }

    /// Settle, pay pending reward, then add principal for `holder` in the account and the pool.
    fn add_stake(&mut self, id: AccountId, holder: Address, amount: U256) -> Result<()> {
        let programme = self.programme_of(id)?;
        let min_lock_blocks = self.state.pool.programme(programme)?.min_lock_blocks;
        self.sync_account(id)?;
        self.pay_reward(id, holder)?;

        let account = &mut self.state.accounts[id];
        let source = if account.is_own_entry(holder) { account.bond_holder() } else { holder };
        let account_address = account.address;
        account.add_principal(holder, amount, min_lock_blocks, self.block)?;
        self.pull_principal(source, amount)?;
        self.stake_in_pool(id, programme, account_address, amount)
    }

    /// Settle, pay pending reward, then move principal of `holder` into its unbonding bucket.
    fn reduce_stake(&mut self, id: AccountId, holder: Address, amount: U256) -> Result<()> {
        let programme = self.programme_of(id)?;
        let now = self.block;
        self.sync_account(id)?;
        self.pay_reward(id, holder)?;

        let unbonding_blocks = self.state.config.unbonding_blocks;
        let state = &mut self.state;
        let account = &mut state.accounts[id];
        let unlock_block = account.request_withdrawal(holder, amount, now, unbonding_blocks)?;
        let account_address = account.address;
        let harvested =
            state.pool.withdraw_principal(programme, account_address, amount, now, &state.config)?;
        self.credit_account(id, harvested)?;
        let account = &self.state.accounts[id];
        let provider = account.provider;
        let holder = if account.is_own_entry(holder) { account.bond_holder() } else { holder };

        tracing::debug!(%provider, %holder, %amount, unlock_block, "withdrawal requested");
        self.emit(StakingEvent::WithdrawalRequested { provider, holder, amount, unlock_block });
        Ok(())
    }

    fn stake_in_pool(
        &mut self,
        id: AccountId,
        programme: ProgrammeId,
        participant: Address,
        amount: U256,
    ) -> Result<()> {
        let state = &mut self.state;
        let harvested =
            state.pool.stake(programme, participant, amount, self.block, &state.config)?;
        self.credit_account(id, harvested)
    }

    fn pull_principal(&mut self, from: Address, amount: U256) -> Result<()> {
        self.state.token.transfer_from(self.address, from, self.address, amount)?;
        Ok(())
    }

    fn release_principal(&mut self, to: Address, amount: U256) -> Result<()> {
        self.state.token.transfer(self.address, to, amount)?;
        Ok(())
    }

    // Queries

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn vault(&self) -> Vault {
        self.vault
    }

    pub fn token(&self) -> &T {
        &self.state.token
    }

    /// Direct access to the token ledger, for funding and approvals outside the engine.
    pub fn token_mut(&mut self) -> &mut T {
        &mut self.state.token
    }

    pub fn access(&self) -> &A {
        &self.access
    }

    pub fn access_mut(&mut self) -> &mut A {
        &mut self.access
    }

    pub fn config(&self) -> &EngineConfig {
        &self.state.config
    }

    pub fn programme(&self, id: ProgrammeId) -> Result<&Programme> {
        self.state.pool.programme(id)
    }

    pub fn programmes(&self) -> &[Programme] {
        self.state.pool.programmes()
    }

    pub fn pool(&self) -> &PoolLedger {
        &self.state.pool
    }

    pub fn total_staked_across_programmes(&self) -> U256 {
        self.state.pool.total_staked_across_programmes()
    }

    /// Principal registered in programme `id` by `participant`, which may be a provider identity
    /// or an account address.
    pub fn amount_staked_in_programme(&self, id: ProgrammeId, participant: Address) -> U256 {
        let participant = match self.account(participant) {
            Ok(account) => account.address,
            Err(_) => participant,
        };
        self.state.pool.position(id, participant).principal
    }

    pub fn account(&self, provider: Address) -> Result<&ProviderAccount> {
        Ok(&self.state.accounts[self.account_id(provider)?])
    }

    pub fn accounts(&self) -> &[ProviderAccount] {
        &self.state.accounts
    }

    pub fn position(&self, provider: Address, holder: Address) -> Result<DelegatorPosition> {
        let account = self.account(provider)?;
        Ok(account.position(account.holder_key(holder)))
    }

    /// Net reward `holder` would receive from `get_reward` at the current block.
    pub fn pending_rewards(&self, provider: Address, holder: Address) -> Result<U256> {
        let account = self.account(provider)?;
        let extra = match (account.state, account.programme) {
            (ProviderState::Active, Some(programme)) => {
                let config = &self.state.config;
                self.state.pool.pending_of(programme, account.address, self.block, config)?
            }
            _ => U256::ZERO,
        };
        Ok(account.pending(account.holder_key(holder), extra)?.net())
    }

    pub fn events(&self) -> &[TimestampedStakingEvent] {
        &self.events
    }

    pub fn events_for(&self, address: Address) -> impl Iterator<Item = &TimestampedStakingEvent> {
        self.events.iter().filter(move |e| e.event.involves(address))
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        access::RoleRegistry,
        config::tokens,
        token::InMemoryToken,
    };

    const ADMIN: Address = Address::repeat_byte(0xad);
    const PROVIDER: Address = Address::repeat_byte(0x01);
    const DELEGATOR: Address = Address::repeat_byte(0x02);
    const ENGINE: Address = Address::repeat_byte(0xee);
    const VAULT: Address = Address::repeat_byte(0xfa);

    type Engine = StakingEngine<InMemoryToken, RoleRegistry>;

    fn engine(config: EngineConfig) -> Engine {
        let mut token = InMemoryToken::new(Address::repeat_byte(0x70));
        token.mint(VAULT, tokens(1_000_000)).unwrap();
        for who in [PROVIDER, DELEGATOR, ADMIN] {
            token.mint(who, tokens(10_000_000)).unwrap();
            token.approve(who, ENGINE, U256::MAX);
        }
        StakingEngine::new(ENGINE, token, Vault::new(VAULT), RoleRegistry::new(ADMIN), config)
            .unwrap()
    }

    fn bonded_engine(fee_bps: u32) -> Engine {
        let mut engine = engine(EngineConfig { unbonding_blocks: 100, ..Default::default() });
        engine.add_programme(ADMIN, 100, 0, true).unwrap();
        engine.whitelist_provider(ADMIN, PROVIDER).unwrap();
        engine.stake_bond(PROVIDER, 0, fee_bps).unwrap();
        engine
    }

    #[test]
    #[traced_test]
    fn failed_operation_rolls_back() {
        let mut engine = bonded_engine(500);
        let before = engine.token().balance_of(DELEGATOR);
        let journal = engine.events().len();

        // Principal is transferred before the pool rejects the inactive programme.
        engine.set_programme_active(ADMIN, 0, false).unwrap();
        let err = engine.delegate_stake(DELEGATOR, PROVIDER, tokens(5)).unwrap_err();
        assert_eq!(err, StakingError::ProgrammeInactive(0));
        assert_eq!(engine.token().balance_of(DELEGATOR), before);
        assert_eq!(engine.position(PROVIDER, DELEGATOR).unwrap(), DelegatorPosition::default());
        assert_eq!(engine.events().len(), journal + 1);
        assert!(logs_contain("operation rolled back"));
    }

    #[test]
    fn fee_validation_on_bond() {
        let mut engine = engine(EngineConfig::default());
        engine.add_programme(ADMIN, 100, 0, true).unwrap();
        engine.whitelist_provider(ADMIN, PROVIDER).unwrap();

        assert_eq!(
            engine.stake_bond(PROVIDER, 0, 0),
            Err(StakingError::FeeTooLow { fee_bps: 0, min_bps: 100 })
        );
        assert_eq!(
            engine.stake_bond(PROVIDER, 0, 99),
            Err(StakingError::FeeTooLow { fee_bps: 99, min_bps: 100 })
        );
        assert_eq!(
            engine.stake_bond(PROVIDER, 0, 10_001),
            Err(StakingError::FeeOutOfRange(10_001))
        );
        engine.stake_bond(PROVIDER, 0, 100).unwrap();
        assert_eq!(engine.stake_bond(PROVIDER, 0, 100), Err(StakingError::AlreadySetUp));
        assert_eq!(
            engine.admin_stake_bond(ADMIN, PROVIDER, 0, 100),
            Err(StakingError::AlreadySetUp)
        );
    }

    #[test]
    fn whitelist_is_admin_only_and_unique() {
        let mut engine = engine(EngineConfig::default());
        assert_eq!(
            engine.whitelist_provider(PROVIDER, PROVIDER),
            Err(StakingError::Unauthorized(PROVIDER))
        );
        let address = engine.whitelist_provider(ADMIN, PROVIDER).unwrap();
        assert_eq!(address, ENGINE.create(0));
        assert_eq!(
            engine.whitelist_provider(ADMIN, PROVIDER),
            Err(StakingError::ProviderAlreadyWhitelisted(PROVIDER))
        );
        assert_eq!(
            engine.whitelist_provider(ADMIN, Address::ZERO),
            Err(StakingError::InvalidIdentity)
        );
        assert_eq!(engine.account(PROVIDER).unwrap().state, ProviderState::AwaitingBond);
        assert_eq!(engine.get_reward(PROVIDER, PROVIDER), Err(StakingError::NotSetUp));
    }

    #[test]
    fn provider_cannot_delegate_to_itself() {
        let mut engine = bonded_engine(500);
        assert_eq!(
            engine.delegate_stake(PROVIDER, PROVIDER, tokens(1)),
            Err(StakingError::UseProviderPath)
        );
        assert_eq!(
            engine.delegate_stake(DELEGATOR, PROVIDER, U256::ZERO),
            Err(StakingError::ZeroAmount)
        );
        assert_eq!(
            engine.increase_own_stake(DELEGATOR, PROVIDER, tokens(1)),
            Err(StakingError::WrongCaller(DELEGATOR))
        );
    }

    #[test]
    fn provider_and_bond_holder_use_the_provider_withdraw_path() {
        let mut engine = bonded_engine(500);
        assert_eq!(
            engine.request_withdraw(PROVIDER, PROVIDER, tokens(1)),
            Err(StakingError::UseProviderPath)
        );
        assert_eq!(engine.withdraw(PROVIDER, PROVIDER), Err(StakingError::UseProviderPath));

        let operator = Address::repeat_byte(0x03);
        engine.add_programme(ADMIN, 100, 1, true).unwrap();
        engine.whitelist_provider(ADMIN, operator).unwrap();
        engine.admin_stake_bond(ADMIN, operator, 1, 500).unwrap();
        for caller in [ADMIN, operator] {
            assert_eq!(
                engine.request_withdraw(caller, operator, tokens(1)),
                Err(StakingError::UseProviderPath)
            );
            assert_eq!(engine.withdraw(caller, operator), Err(StakingError::UseProviderPath));
        }
    }

    #[test]
    fn zero_withdrawal_request_is_insufficient_principal() {
        let mut engine = bonded_engine(500);
        engine.delegate_stake(DELEGATOR, PROVIDER, tokens(10)).unwrap();
        assert_eq!(
            engine.request_withdraw(DELEGATOR, PROVIDER, U256::ZERO),
            Err(StakingError::InsufficientPrincipal {
                requested: U256::ZERO,
                available: tokens(10)
            })
        );
    }

    #[test]
    fn own_stake_ceiling_and_floor() {
        let mut engine = bonded_engine(500);
        assert_eq!(
            engine.increase_own_stake(PROVIDER, PROVIDER, tokens(3_000_001)),
            Err(StakingError::StakeCeilingExceeded {
                requested: tokens(5_000_001),
                ceiling: tokens(5_000_000)
            })
        );
        engine.increase_own_stake(PROVIDER, PROVIDER, tokens(1_000)).unwrap();
        assert_eq!(
            engine.request_reduce_own_stake(PROVIDER, PROVIDER, tokens(1_001)),
            Err(StakingError::MinimumBondBreached {
                remaining: tokens(1_999_999),
                minimum: tokens(2_000_000)
            })
        );

        engine.request_reduce_own_stake(PROVIDER, PROVIDER, tokens(1_000)).unwrap();
        assert_eq!(engine.amount_staked_in_programme(0, PROVIDER), tokens(2_000_000));
        engine.advance_to(100).unwrap();
        assert_eq!(engine.withdraw_own_stake(PROVIDER, PROVIDER).unwrap(), tokens(1_000));
    }

    #[test]
    fn pause_gates_stake_paths_only() {
        let mut engine = bonded_engine(500);
        engine.delegate_stake(DELEGATOR, PROVIDER, tokens(100)).unwrap();
        engine.set_user_actions_paused(ADMIN, true).unwrap();
        engine.advance_to(3).unwrap();

        assert_eq!(
            engine.delegate_stake(DELEGATOR, PROVIDER, tokens(1)),
            Err(StakingError::UserActionsPaused)
        );
        assert_eq!(
            engine.request_withdraw(DELEGATOR, PROVIDER, tokens(1)),
            Err(StakingError::UserActionsPaused)
        );
        assert!(engine.get_reward(DELEGATOR, PROVIDER).unwrap() > U256::ZERO);
        assert_eq!(engine.config().version, 1);
    }

    #[test]
    fn config_updates_are_role_gated_and_versioned() {
        let mut engine = bonded_engine(500);
        assert_eq!(
            engine.update_min_required_bond(DELEGATOR, tokens(1)),
            Err(StakingError::Unauthorized(DELEGATOR))
        );
        assert!(matches!(
            engine.update_min_required_bond(ADMIN, tokens(6_000_000)),
            Err(StakingError::InvalidConfig(_))
        ));
        assert!(matches!(
            engine.update_max_provider_stake(ADMIN, tokens(1_000_000)),
            Err(StakingError::InvalidConfig(_))
        ));
        assert_eq!(
            engine.update_min_service_provider_fee(ADMIN, 0),
            Err(StakingError::FeeOutOfRange(0))
        );
        assert_eq!(engine.config().version, 0);

        engine.update_min_service_provider_fee(ADMIN, 800).unwrap();
        engine.calibrate_fee(PROVIDER).unwrap();
        assert_eq!(engine.account(PROVIDER).unwrap().fee_bps, 800);
        engine.update_min_service_provider_fee(ADMIN, 200).unwrap();
        engine.calibrate_fee(PROVIDER).unwrap();
        assert_eq!(engine.account(PROVIDER).unwrap().fee_bps, 800);
        assert_eq!(engine.config().version, 2);
    }

    #[test]
    fn rate_change_is_prospective() {
        let mut engine = bonded_engine(500);
        engine.advance_to(2).unwrap();
        engine.update_token_reward_per_block(ADMIN, tokens(10)).unwrap();
        engine.advance_to(4).unwrap();
        // 2 blocks at 100 then 2 blocks at 10, all to the only principal holder.
        let pending = engine.pending_rewards(PROVIDER, PROVIDER).unwrap();
        assert!(tokens(220) - pending < U256::from(10u64).pow(U256::from(13)));
        assert_eq!(engine.get_reward(PROVIDER, PROVIDER).unwrap(), pending);
    }

    #[test]
    fn clock_never_moves_backwards() {
        let mut engine = bonded_engine(500);
        engine.advance_to(10).unwrap();
        assert_eq!(
            engine.advance_to(9),
            Err(StakingError::BlockRegression { requested: 9, current: 10 })
        );
    }
}
