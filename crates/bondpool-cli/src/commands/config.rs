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

use std::path::PathBuf;

use anyhow::Context;
use bondpool_rewards::EngineConfig;
use clap::{Args, Subcommand};

use crate::config::GlobalConfig;

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigCommands {
    /// Print the effective engine configuration as TOML.
    Show(ConfigShow),
    /// Check an engine configuration file.
    Validate(ConfigValidate),
}

impl ConfigCommands {
    pub fn run(&self, global_config: &GlobalConfig) -> anyhow::Result<()> {
        match self {
            Self::Show(cmd) => cmd.run(global_config),
            Self::Validate(cmd) => cmd.run(global_config),
        }
    }
}

#[non_exhaustive]
#[derive(Args, Clone, Debug)]
pub struct ConfigShow {}

impl ConfigShow {
    pub fn run(&self, global_config: &GlobalConfig) -> anyhow::Result<()> {
        let config = global_config.engine_config()?;
        print!("{}", config.to_toml_string()?);
        Ok(())
    }
}

#[non_exhaustive]
#[derive(Args, Clone, Debug)]
pub struct ConfigValidate {
    /// Path to the configuration file
    pub path: PathBuf,
}

impl ConfigValidate {
    pub fn run(&self, _global_config: &GlobalConfig) -> anyhow::Result<()> {
        let config = EngineConfig::load(&self.path).with_context(|| {
            format!("{} is not a valid engine configuration", self.path.display())
        })?;
        tracing::debug!(?config, "configuration loaded");
        println!("{} is valid (version {})", self.path.display(), config.version);
        Ok(())
    }
}
