use clap::Subcommand;
use ticket_core::config::{ServiceConfig, WarnLevel};

use crate::output::print_json;
use crate::settings::redacted;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the effective config for common mistakes
    Check,

    /// Print the effective config (secrets masked)
    Show,
}

pub fn run(config: &ServiceConfig, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Check => check(config, json),
        ConfigSubcommand::Show => show(config, json),
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn check(config: &ServiceConfig, json: bool) -> anyhow::Result<()> {
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if warnings.iter().any(|w| w.level == WarnLevel::Error) {
        anyhow::bail!("config validation found errors");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(config: &ServiceConfig, json: bool) -> anyhow::Result<()> {
    let shown = redacted(config);
    if json {
        print_json(&shown)?;
    } else {
        print!("{}", serde_yaml::to_string(&shown)?);
    }
    Ok(())
}
