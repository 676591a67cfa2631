use super::{load, open_storage};
use crate::export::{AllowedTargetSet, ExportSettings};
use crate::storage::traits::EventStore;
use std::path::PathBuf;

/// Prints every target in the log and whether the export would ship it.
pub async fn list(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path.as_deref())?;
    let storage = open_storage(&config).await?;

    let observed = storage.distinct_targets().await?;
    let allow_list = ExportSettings::new(storage.clone()).allowed_targets().await?;
    let allowed = AllowedTargetSet::resolve(&allow_list, observed.iter().cloned());

    if observed.is_empty() {
        println!("No targets in the log yet");
        return Ok(());
    }

    for target in &observed {
        let marker = if allowed.allows(target) { "+" } else { "-" };
        println!("{} {}", marker, target);
    }
    Ok(())
}
