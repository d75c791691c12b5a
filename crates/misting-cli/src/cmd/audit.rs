use anyhow::Result;
use misting_core::audit::AuditLog;
use misting_core::config::Config;

use crate::output::{print_json, print_table};

pub fn run(config: &Config, limit: usize, json: bool) -> Result<()> {
    let log = AuditLog::open(&config.audit.path)?;
    let rows = log.recent(limit)?;

    if json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No audit entries.");
        return Ok(());
    }

    let table = rows
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.logged_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                r.system.clone(),
                r.state.clone(),
                r.origin.clone(),
            ]
        })
        .collect();
    print_table(&["ID", "AT", "SYSTEM", "STATE", "ORIGIN"], table);
    Ok(())
}
