use anyhow::Result;
use misting_core::config::Config;
use misting_core::store::{provision_records, RelayDb};

pub fn run(config: &Config) -> Result<()> {
    let store = RelayDb::open(&config.store.path)?;
    let relays: Vec<_> = config.relays.iter().map(|r| r.provision()).collect();
    let created = provision_records(&store, &relays)?;
    println!(
        "created {created} of {} relay records in {}",
        relays.len(),
        config.store.path.display()
    );
    Ok(())
}
