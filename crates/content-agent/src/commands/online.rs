use std::process::ExitCode;

use anyhow::Result;
use content_sync::ConnectivityProbe;

pub async fn run(probe: &dyn ConnectivityProbe) -> Result<ExitCode> {
    if probe.is_online().await {
        println!("online");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("offline");
        Ok(ExitCode::FAILURE)
    }
}
