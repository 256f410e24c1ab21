use std::sync::Arc;

use tokio::io::BufReader;
use tracing::{error, info};

use ssm_lib::config::{data_dir, AppSettings};
use ssm_lib::{ipc, logging, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = data_dir();
    let settings = AppSettings::load_or_init(&data_dir.join("settings.json"))?;
    let _log_guard = logging::init(&data_dir.join("logs"), &settings.log_level);

    info!("ssm v{} starting up", env!("CARGO_PKG_VERSION"));

    let state = Arc::new(AppState::open(&data_dir, settings)?);

    let served = ipc::serve(
        Arc::clone(&state),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await;
    if let Err(e) = &served {
        error!("IPC loop failed: {}", e);
    }

    state.shutdown().await;
    served?;
    Ok(())
}
