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

//! Global engine configuration.
//!
//! All tunable parameters live in one versioned [EngineConfig] record that is passed into
//! settlement explicitly. Updates are prospective: the engine settles before it swaps in a new
//! emission rate, and the other parameters are only read when stake changes.

use std::path::Path;

use alloy_primitives::{
    utils::{format_ether, parse_ether},
    U256,
};
use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StakingError};

/// Denominator of every fee expressed in basis points.
pub const FEE_DENOMINATOR: u32 = 10_000;

/// Blocks per day assumed by the default unbonding window.
pub const BLOCKS_PER_DAY: u64 = 6_500;

/// Default unbonding window, 21 days.
pub const DEFAULT_UNBONDING_BLOCKS: u64 = 21 * BLOCKS_PER_DAY;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Incremented on every accepted update.
    pub version: u64,
    /// Global emission per block, shared across all active programmes.
    #[serde(with = "token_amount")]
    pub token_reward_per_block: U256,
    /// No emission accrues before this block.
    pub start_block: u64,
    /// Bond a provider must stake, and the floor its own stake may be reduced to.
    #[serde(with = "token_amount")]
    pub min_required_bond: U256,
    /// Ceiling on a provider's own stake.
    #[serde(with = "token_amount")]
    pub max_provider_stake: U256,
    pub min_service_provider_fee_bps: u32,
    /// Delay between a withdrawal request and the release of the tokens.
    pub unbonding_blocks: u64,
    /// Gates stake and withdraw entry points. Claims and admin operations are never paused.
    pub user_actions_paused: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 0,
            token_reward_per_block: tokens(100),
            start_block: 0,
            min_required_bond: tokens(2_000_000),
            max_provider_stake: tokens(5_000_000),
            min_service_provider_fee_bps: 100,
            unbonding_blocks: DEFAULT_UNBONDING_BLOCKS,
            user_actions_paused: false,
        }
    }
}

impl EngineConfig {
    /// Check the cross-field constraints of the record.
    pub fn validate(&self) -> Result<()> {
        if self.min_required_bond > self.max_provider_stake {
            return Err(StakingError::InvalidConfig(format!(
                "min required bond {} exceeds max provider stake {}",
                format_ether(self.min_required_bond),
                format_ether(self.max_provider_stake)
            )));
        }
        validate_fee_bps(self.min_service_provider_fee_bps)?;
        Ok(())
    }

    /// Parse and validate a TOML document. Missing fields take their default value.
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw).context("failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("failed to serialize engine config")
    }

    pub(crate) fn bump_version(&mut self) {
        self.version = self.version.saturating_add(1);
    }
}

/// Fees are accepted in `(0, 10000]` basis points.
pub fn validate_fee_bps(fee_bps: u32) -> Result<()> {
    if fee_bps == 0 || fee_bps > FEE_DENOMINATOR {
        return Err(StakingError::FeeOutOfRange(fee_bps));
    }
    Ok(())
}

/// Whole tokens in base units (18 decimals).
pub fn tokens(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(18))
}

/// Token amounts are written as decimal token strings, e.g. `"100"` or `"0.5"`.
pub mod token_amount {
    use alloy_primitives::{
        utils::{format_ether, parse_ether},
        U256,
    };
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &U256, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_ether(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_ether(raw.trim())
            .map_err(|e| D::Error::custom(format!("invalid token amount {raw:?}: {e}")))
    }
}

/// Parse a decimal token string into base units.
pub fn parse_tokens(raw: &str) -> anyhow::Result<U256> {
    parse_ether(raw.trim()).map_err(|e| anyhow::anyhow!("invalid token amount {raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn toml_round_trip_keeps_token_amounts_readable() {
        let config = EngineConfig::default();
        let raw = config.to_toml_string().unwrap();
        assert!(raw.contains("token_reward_per_block = \"100.000000000000000000\""));
        assert_eq!(EngineConfig::from_toml_str(&raw).unwrap(), config);
    }

    #[test]
    fn partial_toml_takes_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            token_reward_per_block = "5"
            start_block = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.token_reward_per_block, tokens(5));
        assert_eq!(config.start_block, 5);
        assert_eq!(config.unbonding_blocks, DEFAULT_UNBONDING_BLOCKS);
    }

    #[test]
    fn rejects_min_bond_above_max_stake() {
        let err = EngineConfig::from_toml_str(
            r#"
            min_required_bond = "10"
            max_provider_stake = "9"
            "#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("exceeds max provider stake"));
    }

    #[test]
    fn rejects_zero_and_oversized_fee() {
        assert_eq!(validate_fee_bps(0), Err(StakingError::FeeOutOfRange(0)));
        assert_eq!(validate_fee_bps(10_001), Err(StakingError::FeeOutOfRange(10_001)));
        assert!(validate_fee_bps(10_000).is_ok());
    }
}
