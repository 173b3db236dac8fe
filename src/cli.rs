use std::{collections::BTreeSet, env, path::PathBuf};

use anyhow::{Result, anyhow};

use crate::{decision::DecisionMode, types::TreatmentId};

pub const USAGE: &str = "usage: cvm-decision [--config <path>] --customers <id,id,...> \
[--treatment <id> | --allow <id,id,...>] [--ledger]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliArgs {
    pub config_path: PathBuf,
    pub customer_ids: Vec<String>,
    pub treatment_id: Option<TreatmentId>,
    pub allowed: Option<BTreeSet<TreatmentId>>,
    pub print_ledger: bool,
}

impl CliArgs {
    pub fn mode(&self) -> DecisionMode {
        match &self.treatment_id {
            Some(treatment_id) => DecisionMode::Directed {
                treatment_id: treatment_id.clone(),
            },
            None => DecisionMode::Recommend {
                allowed: self.allowed.clone(),
            },
        }
    }
}

pub fn parse_args() -> Result<CliArgs> {
    parse_args_from(env::args().skip(1))
}

pub fn parse_args_from(args: impl IntoIterator<Item = String>) -> Result<CliArgs> {
    let mut args = args.into_iter();
    let mut config_path = None;
    let mut customer_ids = Vec::new();
    let mut treatment_id = None;
    let mut allowed: Option<BTreeSet<TreatmentId>> = None;
    let mut print_ledger = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --config"))?;
                config_path = Some(PathBuf::from(value));
            }
            "--customers" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --customers"))?;
                customer_ids.extend(split_list(&value));
            }
            "--treatment" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --treatment"))?;
                if value.trim().is_empty() {
                    return Err(anyhow!("--treatment cannot be empty"));
                }
                treatment_id = Some(value.trim().to_string());
            }
            "--allow" => {
                let value = args
                    .next()
                    .ok_or_else(|| anyhow!("missing value for --allow"))?;
                allowed.get_or_insert_with(BTreeSet::new).extend(split_list(&value));
            }
            "--ledger" => print_ledger = true,
            other => {
                return Err(anyhow!("unknown argument: {other}. {USAGE}"));
            }
        }
    }

    if customer_ids.is_empty() {
        return Err(anyhow!("at least one customer id is required. {USAGE}"));
    }
    if treatment_id.is_some() && allowed.is_some() {
        return Err(anyhow!("--treatment and --allow cannot be combined. {USAGE}"));
    }

    Ok(CliArgs {
        config_path: config_path.unwrap_or_else(|| PathBuf::from("./cvm-decision.jsonc")),
        customer_ids,
        treatment_id,
        allowed,
        print_ledger,
    })
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
}
