use anyhow::Context;
use clap::Subcommand;
use misting_core::config::Config;
use std::path::Path;

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the configuration and print it with defaults filled in
    Check,
}

pub fn run(path: &Path, subcmd: ConfigSubcommand) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Check => check(path),
    }
}

fn check(path: &Path) -> anyhow::Result<()> {
    let mut config = Config::load(path).with_context(|| format!("invalid config {}", path.display()))?;
    if config.auth.password.is_empty() {
        eprintln!("warning: auth.password is empty; nobody can log in");
    } else {
        config.auth.password = "********".into();
    }
    if config.auth.session_secret.is_some() {
        config.auth.session_secret = Some("********".into());
    }
    print!("{}", config.to_yaml()?);
    Ok(())
}
