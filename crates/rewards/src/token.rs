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

//! Fungible token and reward vault collaborators.

use std::collections::HashMap;

use alloy_primitives::{Address, U256};

use crate::error::{Result, StakingError, TokenError};

/// Allowance-based fungible token ledger.
///
/// Every principal movement into the engine is a [TokenLedger::transfer_from] that the owner
/// pre-authorized with [TokenLedger::approve].
pub trait TokenLedger {
    /// Address identifying the token.
    fn address(&self) -> Address;

    fn balance_of(&self, account: Address) -> U256;

    fn allowance(&self, owner: Address, spender: Address) -> U256;

    fn approve(&mut self, owner: Address, spender: Address, amount: U256);

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), TokenError>;

    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError>;
}

/// In-memory [TokenLedger].
#[derive(Clone, Debug, Default)]
pub struct InMemoryToken {
    address: Address,
    total_supply: U256,
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
}

impl InMemoryToken {
    pub fn new(address: Address) -> Self {
        Self { address, ..Default::default() }
    }

    /// Create `amount` new tokens owned by `to`.
    pub fn mint(&mut self, to: Address, amount: U256) -> Result<(), TokenError> {
        self.total_supply =
            self.total_supply.checked_add(amount).ok_or(TokenError::SupplyOverflow)?;
        let balance = self.balances.entry(to).or_default();
        *balance += amount;
        Ok(())
    }

    pub fn total_supply(&self) -> U256 {
        self.total_supply
    }
}

impl TokenLedger for InMemoryToken {
    fn address(&self) -> Address {
        self.address
    }

    fn balance_of(&self, account: Address) -> U256 {
        self.balances.get(&account).copied().unwrap_or_default()
    }

    fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.allowances.get(&(owner, spender)).copied().unwrap_or_default()
    }

    fn approve(&mut self, owner: Address, spender: Address, amount: U256) {
        if amount.is_zero() {
            self.allowances.remove(&(owner, spender));
        } else {
            self.allowances.insert((owner, spender), amount);
        }
    }

    fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<(), TokenError> {
        if amount.is_zero() || from == to {
            return Ok(());
        }
        let available = self.balance_of(from);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                account: from,
                requested: amount,
                available,
            });
        }
        self.balances.insert(from, available - amount);
        // Supply is bounded, so no single balance can overflow.
        *self.balances.entry(to).or_default() += amount;
        Ok(())
    }

    fn transfer_from(
        &mut self,
        spender: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), TokenError> {
        let approved = self.allowance(from, spender);
        if approved < amount {
            return Err(TokenError::InsufficientAllowance {
                owner: from,
                spender,
                requested: amount,
                approved,
            });
        }
        self.transfer(from, to, amount)?;
        self.approve(from, spender, approved - amount);
        Ok(())
    }
}

/// Reward float held at a fixed address of a [TokenLedger].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Vault {
    address: Address,
}

impl Vault {
    pub const fn new(address: Address) -> Self {
        Self { address }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub fn balance<T: TokenLedger>(&self, token: &T) -> U256 {
        token.balance_of(self.address)
    }

    /// Transfer `amount` of reward float to `to`.
    ///
    /// Overdrawing fails with [StakingError::InsufficientVaultBalance]; the vault never pays out a
    /// truncated amount.
    pub fn pay_out<T: TokenLedger>(&self, token: &mut T, to: Address, amount: U256) -> Result<()> {
        if amount.is_zero() {
            return Ok(());
        }
        let available = token.balance_of(self.address);
        if available < amount {
            return Err(StakingError::InsufficientVaultBalance { requested: amount, available });
        }
        token.transfer(self.address, to, amount)?;
        tracing::trace!(%to, %amount, "vault pay out");
        Ok(())
    }
}
