use anyhow::Result;
use misting_core::config::Config;
use misting_core::relay::{unset_time, Relay};
use misting_core::store::{RelayDb, RelayStore};

use crate::output::{print_json, print_table};

fn timestamp(t: chrono::DateTime<chrono::Utc>) -> String {
    if t <= unset_time() {
        "-".to_string()
    } else {
        t.format("%Y-%m-%d %H:%M:%S UTC").to_string()
    }
}

/// Stored relay records, in configuration order.
pub fn run(config: &Config, json: bool) -> Result<()> {
    // redb holds an exclusive lock, so this fails while `serve` is running.
    let store = RelayDb::open(&config.store.path)?;
    let stored = store.list()?;
    let relays: Vec<Relay> = config
        .relays
        .iter()
        .filter_map(|wanted| stored.iter().find(|r| r.pin == wanted.pin).cloned())
        .collect();

    if json {
        return print_json(&relays);
    }
    if relays.is_empty() {
        println!("No relay records. Run `misting provision` first.");
        return Ok(());
    }

    let rows = relays
        .iter()
        .map(|r| {
            vec![
                r.id.to_string(),
                r.description.clone(),
                r.pin.to_string(),
                r.state.label().to_string(),
                timestamp(r.run_till),
                timestamp(r.duty_time),
            ]
        })
        .collect();
    print_table(&["ID", "SYSTEM", "PIN", "STATE", "RUN TILL", "DUTY START"], rows);
    Ok(())
}
