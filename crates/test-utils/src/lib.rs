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

//! Test utilities for the bondpool crates.
//!
//! [TestCtx] wraps an in-memory engine with a funded vault and named actors whose addresses are
//! derived from their names, so tests can read like the scenarios they describe.

use alloy_primitives::{keccak256, Address, U256};
use anyhow::Context;
use bondpool_rewards::{
    tokens, EngineConfig, InMemoryEngine, InMemoryToken, ProgrammeId, RoleRegistry, TokenLedger,
    Vault,
};
use derive_builder::Builder;

/// Deterministic address for a named actor.
pub fn actor(name: &str) -> Address {
    Address::from_word(keccak256(name.as_bytes()))
}

/// `|a - b|`
pub fn abs_diff(a: U256, b: U256) -> U256 {
    if a > b {
        a - b
    } else {
        b - a
    }
}

/// Largest rounding loss expected from settling rewards over `principal`, across both ledgers
/// and a handful of settlements.
pub fn dust_bound(principal: U256) -> U256 {
    principal / U256::from(1_000_000_000_000u64) * U256::from(16) + U256::from(16)
}

#[derive(Clone, Debug, Builder)]
#[builder(build_fn(name = "build_inner", private))]
pub struct TestCtxOptions {
    #[builder(default)]
    config: EngineConfig,
    /// Reward float minted into the vault.
    #[builder(setter(into), default = "tokens(10_000_000)")]
    vault_funding: U256,
    /// Balance minted to every actor created through [TestCtx::actor].
    #[builder(setter(into), default = "tokens(10_000_000)")]
    actor_balance: U256,
}

impl Default for TestCtxOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TestCtxOptions {
    pub fn builder() -> TestCtxOptionsBuilder {
        Default::default()
    }
}

impl TestCtxOptionsBuilder {
    fn build(&self) -> TestCtxOptions {
        // Auto-generated build-inner is infallible because all fields have defaults.
        self.build_inner().unwrap()
    }
}

impl From<&mut TestCtxOptionsBuilder> for TestCtxOptions {
    fn from(value: &mut TestCtxOptionsBuilder) -> Self {
        value.build()
    }
}

impl From<TestCtxOptionsBuilder> for TestCtxOptions {
    fn from(value: TestCtxOptionsBuilder) -> Self {
        value.build()
    }
}

pub struct TestCtx {
    pub engine: InMemoryEngine,
    pub admin: Address,
    actor_balance: U256,
}

/// Creates a new [TestCtx] with the default configuration.
pub fn test_ctx() -> anyhow::Result<TestCtx> {
    test_ctx_with(TestCtxOptions::default())
}

pub fn test_ctx_with(options: impl Into<TestCtxOptions>) -> anyhow::Result<TestCtx> {
    let options = options.into();
    let admin = actor("admin");
    let vault = Vault::new(actor("vault"));

    let mut token = InMemoryToken::new(actor("token"));
    token.mint(vault.address(), options.vault_funding)?;

    let engine = InMemoryEngine::new(
        actor("engine"),
        token,
        vault,
        RoleRegistry::new(admin),
        options.config,
    )
    .context("failed to create engine")?;

    let mut ctx = TestCtx { engine, admin, actor_balance: options.actor_balance };
    ctx.actor("admin")?;
    Ok(ctx)
}

impl TestCtx {
    /// Address of `name`, minted its starting balance and with an unlimited approval to the
    /// engine on first use.
    pub fn actor(&mut self, name: &str) -> anyhow::Result<Address> {
        let address = actor(name);
        let spender = self.engine.address();
        let token = self.engine.token_mut();
        if token.allowance(address, spender).is_zero() {
            token.mint(address, self.actor_balance)?;
            token.approve(address, spender, U256::MAX);
        }
        Ok(address)
    }

    pub fn balance(&self, address: Address) -> U256 {
        self.engine.token().balance_of(address)
    }

    pub fn vault_balance(&self) -> U256 {
        self.engine.vault().balance(self.engine.token())
    }

    pub fn add_programme(
        &mut self,
        weight: u64,
        min_lock_blocks: u64,
    ) -> anyhow::Result<ProgrammeId> {
        Ok(self.engine.add_programme(self.admin, weight, min_lock_blocks, true)?)
    }

    /// Whitelist `name` and stake its bond into `programme`.
    pub fn bonded_provider(
        &mut self,
        name: &str,
        programme: ProgrammeId,
        fee_bps: u32,
    ) -> anyhow::Result<Address> {
        let provider = self.actor(name)?;
        self.engine.whitelist_provider(self.admin, provider)?;
        self.engine
            .stake_bond(provider, programme, fee_bps)
            .with_context(|| format!("failed to stake bond for {name}"))?;
        Ok(provider)
    }

    /// Create `name` and delegate `amount` to `provider`.
    pub fn delegator(
        &mut self,
        name: &str,
        provider: Address,
        amount: U256,
    ) -> anyhow::Result<Address> {
        let delegator = self.actor(name)?;
        self.engine
            .delegate_stake(delegator, provider, amount)
            .with_context(|| format!("failed to delegate for {name}"))?;
        Ok(delegator)
    }

    pub fn advance_to(&mut self, block: u64) -> anyhow::Result<()> {
        Ok(self.engine.advance_to(block)?)
    }

    /// Advance by `blocks` from the current block.
    pub fn mine(&mut self, blocks: u64) -> anyhow::Result<()> {
        let next = self.engine.block() + blocks;
        self.advance_to(next)
    }
}
