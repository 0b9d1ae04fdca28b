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

use std::collections::HashMap;

use alloy_primitives::{Address, U256};
use bondpool_rewards::{
    tokens, BondOrigin, EngineConfig, InMemoryEngine, ProviderAccount, ProviderState,
};
use bondpool_test_utils::{test_ctx_with, TestCtx, TestCtxOptions};
use proptest::prelude::*;

const DELEGATORS: [&str; 3] = ["alice", "bob", "carol"];

#[derive(Clone, Debug)]
enum Op {
    Advance(u64),
    Delegate(usize, u64),
    RequestWithdraw(usize, u64),
    Withdraw(usize),
    GetReward(usize),
    ProviderReward,
    IncreaseOwn(u64),
    ReduceOwn(u64),
    WithdrawOwn,
    ExitProvider,
    ExitDelegator(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let who = 0..DELEGATORS.len();
    prop_oneof![
        (0u64..30).prop_map(Op::Advance),
        (who.clone(), 0u64..50_000).prop_map(|(i, a)| Op::Delegate(i, a)),
        (who.clone(), 0u64..50_000).prop_map(|(i, a)| Op::RequestWithdraw(i, a)),
        who.clone().prop_map(Op::Withdraw),
        who.clone().prop_map(Op::GetReward),
        Just(Op::ProviderReward),
        (0u64..4_000_000).prop_map(Op::IncreaseOwn),
        (0u64..1_000_000).prop_map(Op::ReduceOwn),
        Just(Op::WithdrawOwn),
        Just(Op::ExitProvider),
        who.prop_map(Op::ExitDelegator),
    ]
}

struct Harness {
    ctx: TestCtx,
    provider: Address,
    delegators: Vec<Address>,
}

fn harness() -> anyhow::Result<Harness> {
    let config = EngineConfig { unbonding_blocks: 20, ..Default::default() };
    let mut ctx = test_ctx_with(TestCtxOptions::builder().config(config))?;
    let programme = ctx.add_programme(100, 5)?;
    let provider = ctx.bonded_provider("provider", programme, 700)?;
    let delegators =
        DELEGATORS.iter().map(|name| ctx.actor(name)).collect::<anyhow::Result<Vec<_>>>()?;
    Ok(Harness { ctx, provider, delegators })
}

impl Harness {
    fn apply(&mut self, op: &Op) -> bool {
        let engine = &mut self.ctx.engine;
        let provider = self.provider;
        let result = match *op {
            Op::Advance(blocks) => {
                let next = engine.block() + blocks;
                engine.advance_to(next).map(|_| ())
            }
            Op::Delegate(i, amount) => {
                engine.delegate_stake(self.delegators[i], provider, tokens(amount))
            }
            Op::RequestWithdraw(i, amount) => {
                engine.request_withdraw(self.delegators[i], provider, tokens(amount))
            }
            Op::Withdraw(i) => engine.withdraw(self.delegators[i], provider).map(|_| ()),
            Op::GetReward(i) => engine.get_reward(self.delegators[i], provider).map(|_| ()),
            Op::ProviderReward => engine.get_reward(provider, provider).map(|_| ()),
            Op::IncreaseOwn(amount) => {
                engine.increase_own_stake(provider, provider, tokens(amount))
            }
            Op::ReduceOwn(amount) => {
                engine.request_reduce_own_stake(provider, provider, tokens(amount))
            }
            Op::WithdrawOwn => engine.withdraw_own_stake(provider, provider).map(|_| ()),
            Op::ExitProvider => engine.exit_as_provider(provider, provider),
            Op::ExitDelegator(i) => {
                engine.exit_as_delegator(self.delegators[i], provider).map(|_| ())
            }
        };
        result.is_ok()
    }

    fn holders(&self) -> Vec<Address> {
        let mut holders = self.delegators.clone();
        holders.push(self.provider);
        holders
    }

    fn addresses(&self) -> Vec<Address> {
        let engine = &self.ctx.engine;
        let mut addresses = self.holders();
        addresses.push(self.ctx.admin);
        addresses.push(engine.address());
        addresses.push(engine.vault().address());
        addresses.extend(engine.accounts().iter().map(|a| a.address));
        addresses
    }

    fn account(&self) -> &ProviderAccount {
        &self.ctx.engine.accounts()[0]
    }

    /// Observable state, compared across failed operations.
    fn fingerprint(&self) -> (Vec<U256>, Vec<String>, usize, U256) {
        let engine = &self.ctx.engine;
        let balances = self.addresses().iter().map(|a| self.ctx.balance(*a)).collect();
        let positions = self
            .holders()
            .iter()
            .map(|h| format!("{:?}", engine.position(self.provider, *h).ok()))
            .collect();
        (balances, positions, engine.events().len(), engine.total_staked_across_programmes())
    }
}

fn check_invariants(h: &Harness) -> Result<(), TestCaseError> {
    let engine: &InMemoryEngine = &h.ctx.engine;
    let account = h.account();

    // Programme total equals registered principal.
    let programme = &engine.programmes()[0];
    prop_assert_eq!(programme.total_staked, engine.pool().position(0, account.address).principal);

    // Aggregate equals own (while active) plus delegated principal.
    let own = if account.state == ProviderState::Active {
        account.own_principal()
    } else {
        U256::ZERO
    };
    prop_assert_eq!(account.aggregate_principal, own + account.delegated_principal());
    if account.state == ProviderState::Active {
        prop_assert_eq!(programme.total_staked, account.aggregate_principal);
    }

    // Principal custody matches principal and unbonding buckets.
    let held = account
        .positions()
        .fold(U256::ZERO, |acc, (_, p)| acc + p.principal + p.pending_withdrawal);
    prop_assert_eq!(h.ctx.balance(engine.address()), held);

    // No tokens are created or destroyed.
    let total = h.addresses().iter().fold(U256::ZERO, |acc, a| acc + h.ctx.balance(*a));
    prop_assert_eq!(total, engine.token().total_supply());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn invariants_hold_over_random_sequences(
        ops in proptest::collection::vec(op_strategy(), 1..40)
    ) {
        let mut h = harness().unwrap();
        let mut lockups: HashMap<Address, u64> = HashMap::new();

        for op in &ops {
            let before = h.fingerprint();
            let applied = h.apply(op);
            if !applied {
                prop_assert_eq!(&h.fingerprint(), &before, "failed {:?} changed state", op);
            }
            check_invariants(&h)?;

            for holder in h.holders() {
                let position = h.ctx.engine.position(h.provider, holder).unwrap();
                if position.principal.is_zero() && position.pending_withdrawal.is_zero() {
                    lockups.remove(&holder);
                    continue;
                }
                let previous = lockups.insert(holder, position.lockup_expiry).unwrap_or_default();
                prop_assert!(
                    position.lockup_expiry >= previous,
                    "lock-up of {} moved backwards",
                    holder
                );
            }
        }
    }

    #[test]
    fn same_block_claims_pay_once(blocks in 1u64..50, amount in 1u64..1_000_000) {
        let mut h = harness().unwrap();
        let delegator = h.delegators[0];
        let provider = h.provider;
        h.ctx.engine.delegate_stake(delegator, provider, tokens(amount)).unwrap();
        h.ctx.mine(blocks).unwrap();

        h.ctx.engine.get_reward(delegator, provider).unwrap();
        h.ctx.engine.get_reward(provider, provider).unwrap();
        prop_assert_eq!(h.ctx.engine.get_reward(delegator, provider).unwrap(), U256::ZERO);
        prop_assert_eq!(h.ctx.engine.get_reward(provider, provider).unwrap(), U256::ZERO);
    }

    #[test]
    fn delegator_fee_is_bounded(
        fee_bps in 1u32..=10_000,
        principal in 1u64..10_000_000,
        reward in 0u64..1_000_000,
    ) {
        let provider = Address::repeat_byte(1);
        let delegator = Address::repeat_byte(2);
        let mut account = ProviderAccount::new(0, Address::repeat_byte(3), Address::repeat_byte(4));
        account.init(provider, Address::repeat_byte(5)).unwrap();
        account.activate(BondOrigin::SelfStaked, 0, fee_bps).unwrap();
        account.add_principal(provider, tokens(2_000_000), 0, 0).unwrap();
        account.add_principal(delegator, tokens(principal), 0, 0).unwrap();
        account.absorb(tokens(reward), 1).unwrap();

        let harvest = account.harvest(delegator).unwrap();
        prop_assert!(harvest.fee <= harvest.gross);
        prop_assert_eq!(harvest.fee, harvest.gross * U256::from(fee_bps) / U256::from(10_000));
        prop_assert_eq!(harvest.net() + harvest.fee, harvest.gross);
    }
}
