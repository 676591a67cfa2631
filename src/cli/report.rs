use super::{load, open_storage};
use crate::report::{ReportClient, ReportRequest};
use std::path::PathBuf;

pub async fn request(
    config_path: Option<PathBuf>,
    request: ReportRequest,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load(config_path.as_deref())?;
    let storage = open_storage(&config).await?;

    let client = ReportClient::new(
        storage,
        config.platform.site_url.clone(),
        config.report.timeout,
    )?;
    let response = client.request(&request).await?;

    println!("Report requested for user {}", request.user_id);
    if !response.trim().is_empty() {
        println!("LRS response: {}", response.trim());
    }
    Ok(())
}
