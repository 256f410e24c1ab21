//! Metrics commands

use tokio::sync::mpsc;

use super::{CommandError, CommandResult};
use crate::app::AppState;
use crate::metrics::{MetricsUpdate, PollRequest};

/// Start polling `connection_id`, replacing any running poller.
///
/// Credential problems are returned here; dial and command failures arrive on
/// `sink` as error updates.
pub async fn start_metrics(
    state: &AppState,
    connection_id: &str,
    sink: mpsc::UnboundedSender<MetricsUpdate>,
) -> CommandResult<()> {
    let profile = state
        .profiles
        .get(connection_id)
        .ok_or_else(|| CommandError::ConnectionNotFound(connection_id.to_string()))?;
    let auth = state.resolver.resolve(&profile, None).await?;

    state
        .metrics
        .start(
            PollRequest {
                connection_id: profile.id.clone(),
                auth,
                interval: state.settings.metrics_interval(),
                services: profile.services.clone(),
            },
            sink,
        )
        .await;

    // Removed while we were starting; remove_connection may have run its
    // stop before our poller existed
    if state.profiles.get(connection_id).is_none() {
        state.metrics.stop_for(connection_id).await;
        return Err(CommandError::ConnectionNotFound(connection_id.to_string()));
    }
    Ok(())
}

pub async fn stop_metrics(state: &AppState) -> bool {
    state.metrics.stop().await
}
