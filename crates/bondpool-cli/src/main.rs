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

use bondpool_cli::{commands::Command, config::GlobalConfig};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Replay delegated staking scenarios against the bondpool reward engine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct MainArgs {
    #[command(subcommand)]
    command: Command,

    #[clap(flatten)]
    config: GlobalConfig,
}

fn main() -> anyhow::Result<()> {
    let args = MainArgs::parse();

    let filter = EnvFilter::builder()
        .with_default_directive(args.config.log_level.into())
        .from_env_lossy();
    // Reports go to stdout; keep logs on stderr.
    if args.config.log_json {
        tracing_subscriber::fmt()
            .with_ansi(false)
            .json()
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .with_env_filter(filter)
            .init();
    }

    args.command.run(&args.config)
}
