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

//! Scenario files and their replay against a fresh engine.
//!
//! A scenario names its actors; each name maps to a deterministic address. Steps run in file
//! order, each optionally advancing the clock first.

use std::path::Path;

use alloy_primitives::{keccak256, utils::format_ether, Address, U256};
use anyhow::{bail, Context};
use bondpool_rewards::{
    config::token_amount, EngineConfig, InMemoryEngine, InMemoryToken, ProgrammeId, RoleRegistry,
    StakingError, TokenLedger, Vault,
};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

/// Deterministic address of a named actor.
pub fn actor_address(name: &str) -> Address {
    Address::from_word(keccak256(name.as_bytes()))
}

fn default_admin() -> String {
    "admin".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Engine configuration. Replaces the configuration given on the command line.
    #[serde(default)]
    pub config: Option<EngineConfig>,
    #[serde(default = "default_admin")]
    pub admin: String,
    #[serde(default, with = "token_amount")]
    pub vault_funding: U256,
    #[serde(default)]
    pub actors: Vec<ActorSpec>,
    #[serde(default)]
    pub programmes: Vec<ProgrammeSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActorSpec {
    pub name: String,
    #[serde(default, with = "token_amount")]
    pub balance: U256,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgrammeSpec {
    pub weight: u64,
    #[serde(default)]
    pub min_lock_blocks: u64,
    #[serde(default = "default_true")]
    pub active: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Step {
    /// Block to advance to before the action runs.
    pub block: Option<u64>,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum Action {
    AddProgramme {
        weight: u64,
        #[serde(default)]
        min_lock_blocks: u64,
        #[serde(default = "default_true")]
        active: bool,
    },
    UpdateWeight {
        programme: ProgrammeId,
        weight: u64,
        #[serde(default = "default_true")]
        settle_first: bool,
    },
    SetProgrammeActive {
        programme: ProgrammeId,
        active: bool,
    },
    WhitelistProvider {
        provider: String,
    },
    StakeBond {
        provider: String,
        programme: ProgrammeId,
        fee_bps: u32,
    },
    AdminStakeBond {
        provider: String,
        programme: ProgrammeId,
        fee_bps: u32,
    },
    IncreaseOwnStake {
        provider: String,
        caller: Option<String>,
        #[serde(with = "token_amount")]
        amount: U256,
    },
    RequestReduceOwnStake {
        provider: String,
        caller: Option<String>,
        #[serde(with = "token_amount")]
        amount: U256,
    },
    WithdrawOwnStake {
        provider: String,
        caller: Option<String>,
    },
    ExitAsProvider {
        provider: String,
        caller: Option<String>,
    },
    Delegate {
        delegator: String,
        provider: String,
        #[serde(with = "token_amount")]
        amount: U256,
    },
    RequestWithdraw {
        delegator: String,
        provider: String,
        #[serde(with = "token_amount")]
        amount: U256,
    },
    Withdraw {
        delegator: String,
        provider: String,
    },
    ExitAsDelegator {
        delegator: String,
        provider: String,
    },
    GetReward {
        caller: String,
        provider: String,
    },
    CalibrateFee {
        provider: String,
    },
    SetRewardRate {
        #[serde(with = "token_amount")]
        amount: U256,
    },
    SetMinBond {
        #[serde(with = "token_amount")]
        amount: U256,
    },
    SetMaxStake {
        #[serde(with = "token_amount")]
        amount: U256,
    },
    SetMinFee {
        fee_bps: u32,
    },
    Pause {
        paused: bool,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddProgramme { .. } => "add-programme",
            Self::UpdateWeight { .. } => "update-weight",
            Self::SetProgrammeActive { .. } => "set-programme-active",
            Self::WhitelistProvider { .. } => "whitelist-provider",
            Self::StakeBond { .. } => "stake-bond",
            Self::AdminStakeBond { .. } => "admin-stake-bond",
            Self::IncreaseOwnStake { .. } => "increase-own-stake",
            Self::RequestReduceOwnStake { .. } => "request-reduce-own-stake",
            Self::WithdrawOwnStake { .. } => "withdraw-own-stake",
            Self::ExitAsProvider { .. } => "exit-as-provider",
            Self::Delegate { .. } => "delegate",
            Self::RequestWithdraw { .. } => "request-withdraw",
            Self::Withdraw { .. } => "withdraw",
            Self::ExitAsDelegator { .. } => "exit-as-delegator",
            Self::GetReward { .. } => "get-reward",
            Self::CalibrateFee { .. } => "calibrate-fee",
            Self::SetRewardRate { .. } => "set-reward-rate",
            Self::SetMinBond { .. } => "set-min-bond",
            Self::SetMaxStake { .. } => "set-max-stake",
            Self::SetMinFee { .. } => "set-min-fee",
            Self::Pause { .. } => "pause",
        }
    }
}

impl Scenario {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let scenario: Self = toml::from_str(raw).context("failed to parse scenario")?;
        if let Some(config) = &scenario.config {
            config.validate().context("invalid scenario config")?;
        }
        Ok(scenario)
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read scenario file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid scenario file {}", path.display()))
    }
}

#[derive(Clone, Debug, Serialize, Tabled)]
pub struct ActorRow {
    pub name: String,
    pub address: Address,
    #[tabled(display_with = "display_tokens")]
    #[serde(with = "token_amount")]
    pub balance: U256,
}

#[derive(Clone, Debug, Serialize, Tabled)]
pub struct ProgrammeRow {
    pub id: ProgrammeId,
    pub weight: u64,
    pub min_lock_blocks: u64,
    pub active: bool,
    #[tabled(display_with = "display_tokens")]
    #[serde(with = "token_amount")]
    pub total_staked: U256,
}

#[derive(Clone, Debug, Serialize, Tabled)]
pub struct ProviderRow {
    pub provider: String,
    pub state: String,
    pub fee_bps: u32,
    #[tabled(display_with = "display_tokens")]
    #[serde(with = "token_amount")]
    pub own_stake: U256,
    #[tabled(display_with = "display_tokens")]
    #[serde(with = "token_amount")]
    pub delegated: U256,
    #[tabled(display_with = "display_tokens")]
    #[serde(with = "token_amount")]
    pub pending_own_reward: U256,
}

#[derive(Clone, Debug, Serialize, Tabled)]
pub struct FailureRow {
    pub step: usize,
    pub block: u64,
    pub action: String,
    pub error: String,
}

fn display_tokens(amount: &U256) -> String {
    format_ether(*amount)
}

/// Final state of a replayed scenario.
#[derive(Clone, Debug, Serialize)]
pub struct Report {
    pub block: u64,
    pub config_version: u64,
    pub events: usize,
    pub actors: Vec<ActorRow>,
    pub programmes: Vec<ProgrammeRow>,
    pub providers: Vec<ProviderRow>,
    pub failures: Vec<FailureRow>,
}

pub struct Simulation {
    engine: InMemoryEngine,
    admin: Address,
    names: Vec<(String, Address)>,
    failures: Vec<FailureRow>,
}

impl Simulation {
    /// Build an engine for `scenario`, fund its actors and create its programmes.
    pub fn new(scenario: &Scenario, base_config: EngineConfig) -> anyhow::Result<Self> {
        let config = scenario.config.clone().unwrap_or(base_config);
        let admin = actor_address(&scenario.admin);
        let vault = Vault::new(actor_address("vault"));
        let engine_address = actor_address("engine");

        let mut token = InMemoryToken::new(actor_address("token"));
        token.mint(vault.address(), scenario.vault_funding)?;

        let mut names = vec![(scenario.admin.clone(), admin)];
        token.approve(admin, engine_address, U256::MAX);
        for spec in &scenario.actors {
            let address = actor_address(&spec.name);
            token.mint(address, spec.balance)?;
            token.approve(address, engine_address, U256::MAX);
            if !names.iter().any(|(name, _)| name == &spec.name) {
                names.push((spec.name.clone(), address));
            }
        }

        let mut engine =
            InMemoryEngine::new(engine_address, token, vault, RoleRegistry::new(admin), config)
                .context("failed to create engine")?;
        for (i, programme) in scenario.programmes.iter().enumerate() {
            engine
                .add_programme(admin, programme.weight, programme.min_lock_blocks, programme.active)
                .with_context(|| format!("failed to add programme {i}"))?;
        }
        tracing::debug!(
            actors = names.len(),
            programmes = scenario.programmes.len(),
            "scenario loaded"
        );

        Ok(Self { engine, admin, names, failures: Vec::new() })
    }

    pub fn engine(&self) -> &InMemoryEngine {
        &self.engine
    }

    fn resolve(&self, name: &str) -> Address {
        self.names
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, address)| *address)
            .unwrap_or_else(|| actor_address(name))
    }

    fn name_of(&self, address: Address) -> String {
        self.names
            .iter()
            .find(|(_, a)| *a == address)
            .map(|(name, _)| name.clone())
            .unwrap_or_else(|| address.to_string())
    }

    fn caller_or(&self, caller: Option<&str>, provider: Address) -> Address {
        caller.map(|c| self.resolve(c)).unwrap_or(provider)
    }

    /// Replay every step. With `keep_going`, failing steps are recorded and skipped.
    pub fn run(&mut self, steps: &[Step], keep_going: bool) -> anyhow::Result<()> {
        for (i, step) in steps.iter().enumerate() {
            if let Some(block) = step.block {
                self.engine
                    .advance_to(block)
                    .with_context(|| format!("step {i} cannot move the clock to block {block}"))?;
            }
            match self.apply(&step.action) {
                Ok(()) => tracing::debug!(step = i, action = step.action.name(), "step applied"),
                Err(err) if keep_going => {
                    tracing::warn!(
                        step = i,
                        action = step.action.name(),
                        error = %err,
                        "step failed"
                    );
                    self.failures.push(FailureRow {
                        step: i,
                        block: self.engine.block(),
                        action: step.action.name().to_string(),
                        error: err.to_string(),
                    });
                }
                Err(err) => {
                    bail!(
                        "step {i} ({}) failed at block {}: {err}",
                        step.action.name(),
                        self.engine.block()
                    )
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, action: &Action) -> Result<(), StakingError> {
        let admin = self.admin;
        match action {
            Action::AddProgramme { weight, min_lock_blocks, active } => {
                self.engine.add_programme(admin, *weight, *min_lock_blocks, *active).map(|_| ())
            }
            Action::UpdateWeight { programme, weight, settle_first } => {
                self.engine.update_programme_weight(admin, *programme, *weight, *settle_first)
            }
            Action::SetProgrammeActive { programme, active } => {
                self.engine.set_programme_active(admin, *programme, *active)
            }
            Action::WhitelistProvider { provider } => {
                let provider = self.resolve(provider);
                self.engine.whitelist_provider(admin, provider).map(|_| ())
            }
            Action::StakeBond { provider, programme, fee_bps } => {
                let provider = self.resolve(provider);
                self.engine.stake_bond(provider, *programme, *fee_bps)
            }
            Action::AdminStakeBond { provider, programme, fee_bps } => {
                let provider = self.resolve(provider);
                self.engine.admin_stake_bond(admin, provider, *programme, *fee_bps)
            }
            Action::IncreaseOwnStake { provider, caller, amount } => {
                let provider = self.resolve(provider);
                let caller = self.caller_or(caller.as_deref(), provider);
                self.engine.increase_own_stake(caller, provider, *amount)
            }
            Action::RequestReduceOwnStake { provider, caller, amount } => {
                let provider = self.resolve(provider);
                let caller = self.caller_or(caller.as_deref(), provider);
                self.engine.request_reduce_own_stake(caller, provider, *amount)
            }
            Action::WithdrawOwnStake { provider, caller } => {
                let provider = self.resolve(provider);
                let caller = self.caller_or(caller.as_deref(), provider);
                self.engine.withdraw_own_stake(caller, provider).map(|_| ())
            }
            Action::ExitAsProvider { provider, caller } => {
                let provider = self.resolve(provider);
                let caller = self.caller_or(caller.as_deref(), provider);
                self.engine.exit_as_provider(caller, provider)
            }
            Action::Delegate { delegator, provider, amount } => {
                let (delegator, provider) = (self.resolve(delegator), self.resolve(provider));
                self.engine.delegate_stake(delegator, provider, *amount)
            }
            Action::RequestWithdraw { delegator, provider, amount } => {
                let (delegator, provider) = (self.resolve(delegator), self.resolve(provider));
                self.engine.request_withdraw(delegator, provider, *amount)
            }
            Action::Withdraw { delegator, provider } => {
                let (delegator, provider) = (self.resolve(delegator), self.resolve(provider));
                self.engine.withdraw(delegator, provider).map(|_| ())
            }
            Action::ExitAsDelegator { delegator, provider } => {
                let (delegator, provider) = (self.resolve(delegator), self.resolve(provider));
                self.engine.exit_as_delegator(delegator, provider).map(|_| ())
            }
            Action::GetReward { caller, provider } => {
                let (caller, provider) = (self.resolve(caller), self.resolve(provider));
                self.engine.get_reward(caller, provider).map(|_| ())
            }
            Action::CalibrateFee { provider } => {
                let provider = self.resolve(provider);
                self.engine.calibrate_fee(provider)
            }
            Action::SetRewardRate { amount } => {
                self.engine.update_token_reward_per_block(admin, *amount)
            }
            Action::SetMinBond { amount } => self.engine.update_min_required_bond(admin, *amount),
            Action::SetMaxStake { amount } => self.engine.update_max_provider_stake(admin, *amount),
            Action::SetMinFee { fee_bps } => {
                self.engine.update_min_service_provider_fee(admin, *fee_bps)
            }
            Action::Pause { paused } => self.engine.set_user_actions_paused(admin, *paused),
        }
    }

    pub fn report(&self) -> Report {
        let engine = &self.engine;
        let mut actors: Vec<_> = self
            .names
            .iter()
            .map(|(name, address)| ActorRow {
                name: name.clone(),
                address: *address,
                balance: engine.token().balance_of(*address),
            })
            .collect();
        actors.push(ActorRow {
            name: "vault".to_string(),
            address: engine.vault().address(),
            balance: engine.vault().balance(engine.token()),
        });

        let programmes = engine
            .programmes()
            .iter()
            .map(|p| ProgrammeRow {
                id: p.id,
                weight: p.weight,
                min_lock_blocks: p.min_lock_blocks,
                active: p.active,
                total_staked: p.total_staked,
            })
            .collect();

        // Accounts that never bonded have no pending reward.
        let providers = engine
            .accounts()
            .iter()
            .map(|account| ProviderRow {
                provider: self.name_of(account.provider),
                state: format!("{:?}", account.state),
                fee_bps: account.fee_bps,
                own_stake: account.own_principal(),
                delegated: account.delegated_principal(),
                pending_own_reward: engine
                    .pending_rewards(account.provider, account.provider)
                    .unwrap_or_default(),
            })
            .collect();

        Report {
            block: engine.block(),
            config_version: engine.config().version,
            events: engine.events().len(),
            actors,
            programmes,
            providers,
            failures: self.failures.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bondpool_rewards::tokens;
    use tracing_test::traced_test;

    use super::*;

    const SCENARIO: &str = r#"
vault_funding = "1000000"

[config]
unbonding_blocks = 10

[[actors]]
name = "provider"
balance = "2000000"

[[actors]]
name = "delegator"
balance = "100000"

[[programmes]]
weight = 100

[[steps]]
action = "whitelist-provider"
provider = "provider"

[[steps]]
action = "stake-bond"
provider = "provider"
programme = 0
fee_bps = 500

[[steps]]
action = "delegate"
delegator = "delegator"
provider = "provider"
amount = "100000"

[[steps]]
block = 2
action = "get-reward"
caller = "delegator"
provider = "provider"
"#;

    #[test]
    fn replays_a_scenario() {
        let scenario = Scenario::from_toml_str(SCENARIO).unwrap();
        assert_eq!(scenario.steps.len(), 4);
        assert_eq!(scenario.steps[3].block, Some(2));

        let mut simulation = Simulation::new(&scenario, EngineConfig::default()).unwrap();
        simulation.run(&scenario.steps, false).unwrap();
        let report = simulation.report();

        assert_eq!(report.block, 2);
        let delegator = report.actors.iter().find(|a| a.name == "delegator").unwrap();
        // ~9.048 tokens net of the 5% fee
        assert!(delegator.balance > tokens(9) && delegator.balance < tokens(10));
        assert_eq!(report.programmes[0].total_staked, tokens(2_100_000));
        assert_eq!(report.providers[0].state, "Active");
        assert!(report.failures.is_empty());
    }

    #[test]
    #[traced_test]
    fn keep_going_records_failures() {
        let scenario = Scenario::from_toml_str(SCENARIO).unwrap();
        let mut steps = scenario.steps.clone();
        steps.insert(
            1,
            Step {
                block: None,
                action: Action::Withdraw {
                    delegator: "delegator".into(),
                    provider: "provider".into(),
                },
            },
        );

        let mut simulation = Simulation::new(&scenario, EngineConfig::default()).unwrap();
        let err = simulation.run(&steps, false).unwrap_err();
        assert!(err.to_string().contains("step 1 (withdraw) failed"));

        let mut simulation = Simulation::new(&scenario, EngineConfig::default()).unwrap();
        simulation.run(&steps, true).unwrap();
        let report = simulation.report();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].action, "withdraw");
        assert!(logs_contain("step failed"));
    }

    #[test]
    fn rejects_unknown_actions() {
        let err = Scenario::from_toml_str(
            r#"
[[steps]]
action = "teleport"
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("teleport"));
    }
}
