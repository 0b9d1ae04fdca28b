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

//! Role checks consumed at the top of privileged operations.

use std::collections::HashSet;

use alloy_primitives::Address;

use crate::error::{Result, StakingError};

pub trait AccessPolicy {
    fn is_admin(&self, account: Address) -> bool;

    fn is_whitelisted(&self, account: Address) -> bool;

    fn ensure_admin(&self, account: Address) -> Result<()> {
        if !self.is_admin(account) {
            return Err(StakingError::Unauthorized(account));
        }
        Ok(())
    }

    fn ensure_whitelisted(&self, account: Address) -> Result<()> {
        if !self.is_whitelisted(account) {
            return Err(StakingError::Unauthorized(account));
        }
        Ok(())
    }
}

/// [AccessPolicy] backed by two role sets.
#[derive(Clone, Debug, Default)]
pub struct RoleRegistry {
    admins: HashSet<Address>,
    whitelisted: HashSet<Address>,
}

impl RoleRegistry {
    /// Registry whose only member is `admin`, holding both roles.
    pub fn new(admin: Address) -> Self {
        Self { admins: HashSet::from([admin]), whitelisted: HashSet::from([admin]) }
    }

    pub fn grant_admin(&mut self, granter: Address, account: Address) -> Result<()> {
        self.ensure_admin(granter)?;
        self.admins.insert(account);
        Ok(())
    }

    pub fn grant_whitelist(&mut self, granter: Address, account: Address) -> Result<()> {
        self.ensure_admin(granter)?;
        self.whitelisted.insert(account);
        Ok(())
    }

    pub fn revoke_whitelist(&mut self, granter: Address, account: Address) -> Result<()> {
        self.ensure_admin(granter)?;
        self.whitelisted.remove(&account);
        Ok(())
    }
}

impl AccessPolicy for RoleRegistry {
    fn is_admin(&self, account: Address) -> bool {
        self.admins.contains(&account)
    }

    fn is_whitelisted(&self, account: Address) -> bool {
        self.whitelisted.contains(&account)
    }
}
