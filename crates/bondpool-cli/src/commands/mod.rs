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

//! Commands of the bondpool CLI.

mod config;
mod simulate;

pub use config::{ConfigCommands, ConfigShow, ConfigValidate};
pub use simulate::{OutputFormat, Simulate};

use clap::Subcommand;

use crate::config::GlobalConfig;

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Replay a scenario file against a fresh engine and print the final state.
    Simulate(Simulate),
    /// Inspect or check engine configuration.
    #[command(subcommand)]
    Config(ConfigCommands),
}

impl Command {
    /// Run the command.
    pub fn run(&self, global_config: &GlobalConfig) -> anyhow::Result<()> {
        match self {
            Self::Simulate(cmd) => cmd.run(global_config),
            Self::Config(cmd) => cmd.run(global_config),
        }
    }
}
