use super::{load, open_storage};
use crate::storage::traits::SettingsStore;
use std::path::PathBuf;

pub async fn get(config_path: Option<PathBuf>, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path.as_deref())?;
    let storage = open_storage(&config).await?;

    match storage.get_setting(name).await? {
        Some(value) => println!("{}", value),
        None => return Err(format!("setting '{}' is not set", name).into()),
    }
    Ok(())
}

pub async fn set(
    config_path: Option<PathBuf>,
    name: &str,
    value: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path.as_deref())?;
    let storage = open_storage(&config).await?;

    storage.set_setting(name, value.trim()).await?;
    println!("{} = {}", name, value.trim());
    Ok(())
}

pub async fn list(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path.as_deref())?;
    let storage = open_storage(&config).await?;

    for (name, value) in storage.list_settings().await? {
        println!("{} = {}", name, value);
    }
    Ok(())
}
