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

use clap::{Args, ValueEnum};
use tabled::{settings::Style, Table, Tabled};

use crate::{
    config::GlobalConfig,
    scenario::{Report, Scenario, Simulation},
};

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[non_exhaustive]
#[derive(Args, Clone, Debug)]
pub struct Simulate {
    /// Scenario file (TOML)
    pub scenario: PathBuf,

    /// Output format of the final report
    #[clap(long, value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,

    /// Record failing steps in the report instead of aborting
    #[clap(long)]
    pub keep_going: bool,
}

impl Simulate {
    pub fn run(&self, global_config: &GlobalConfig) -> anyhow::Result<()> {
        let scenario = Scenario::load(&self.scenario)?;
        let mut simulation = Simulation::new(&scenario, global_config.engine_config()?)?;
        tracing::info!(
            scenario = %self.scenario.display(),
            steps = scenario.steps.len(),
            "running scenario"
        );
        simulation.run(&scenario.steps, self.keep_going)?;

        let report = simulation.report();
        match self.output {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
            OutputFormat::Table => print!("{}", render(&report)),
        }
        Ok(())
    }
}

fn table<T: Tabled>(rows: &[T]) -> String {
    Table::new(rows).with(Style::sharp()).to_string()
}

fn render(report: &Report) -> String {
    let mut out = format!(
        "block {} | config version {} | {} events\n\n",
        report.block, report.config_version, report.events
    );
    out.push_str(&format!("Programmes\n{}\n\n", table(&report.programmes)));
    out.push_str(&format!("Providers\n{}\n\n", table(&report.providers)));
    out.push_str(&format!("Balances\n{}\n", table(&report.actors)));
    if !report.failures.is_empty() {
        out.push_str(&format!("\nFailed steps\n{}\n", table(&report.failures)));
    }
    out
}
