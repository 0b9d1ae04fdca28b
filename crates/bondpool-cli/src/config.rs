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

use anyhow::Result;
use bondpool_rewards::EngineConfig;
use clap::Args;
use tracing::level_filters::LevelFilter;

#[derive(Args, Debug, Clone)]
pub struct GlobalConfig {
    /// Log level (error, warn, info, debug, trace)
    #[clap(long, env = "LOG_LEVEL", global = true, default_value = "info")]
    pub log_level: LevelFilter,

    /// Emit logs as JSON lines
    #[clap(long, env = "LOG_JSON", global = true)]
    pub log_json: bool,

    /// Engine configuration file (TOML). Defaults apply when omitted.
    #[clap(long, env = "BONDPOOL_CONFIG", global = true)]
    pub config: Option<PathBuf>,
}

impl GlobalConfig {
    /// Load [Self::config], or the default engine configuration if none was given.
    pub fn engine_config(&self) -> Result<EngineConfig> {
        match &self.config {
            Some(path) => EngineConfig::load(path),
            None => Ok(EngineConfig::default()),
        }
    }
}
