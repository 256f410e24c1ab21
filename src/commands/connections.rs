//! Connection profile commands

use tracing::{info, warn};

use super::{CommandError, CommandResult};
use crate::app::AppState;
use crate::config::{ConnectionProfile, ProfileDraft, ProfileUpdate};

pub fn list_connections(state: &AppState) -> Vec<ConnectionProfile> {
    state.profiles.list()
}

/// Save a new profile, storing `password` in the keychain when given
pub fn add_connection(
    state: &AppState,
    draft: ProfileDraft,
    password: Option<&str>,
) -> CommandResult<ConnectionProfile> {
    let profile = state.profiles.add(draft)?;
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        state.credentials.set(&profile.id, password)?;
    }
    info!("Added connection {} ({})", profile.id, profile.display_string());
    Ok(profile)
}

/// Apply a partial update.
///
/// Open sessions were dialed with the old parameters, so they are closed and
/// the next operation dials with the new ones.
pub async fn update_connection(
    state: &AppState,
    id: &str,
    update: ProfileUpdate,
    password: Option<&str>,
) -> CommandResult<ConnectionProfile> {
    let profile = state.profiles.update(id, update)?;
    if let Some(password) = password.filter(|p| !p.is_empty()) {
        state.credentials.set(id, password)?;
    }
    state.registry.close(id, None).await;
    Ok(profile)
}

/// Tear down everything tied to the connection, then delete it
/// Delete a profile and tear down everything opened for it.
///
/// The profile goes first: once it is gone no new session or poller can be
/// created for `id`, so the close below cannot miss one.
pub async fn remove_connection(state: &AppState, id: &str) -> CommandResult<bool> {
    let removed = state.profiles.remove(id)?;
    let closed = state.registry.close(id, None).await;
    let stopped = state.metrics.stop_for(id).await;

    if let Err(e) = state.credentials.delete(id) {
        warn!("Failed to delete stored secret for {}: {}", id, e);
    }
    info!(
        "Removed connection {} ({} sessions closed, poller stopped: {})",
        id, closed, stopped
    );
    Ok(removed)
}

pub fn set_password(state: &AppState, id: &str, password: &str) -> CommandResult<()> {
    if state.profiles.get(id).is_none() {
        return Err(CommandError::ConnectionNotFound(id.to_string()));
    }
    state.credentials.set(id, password)?;
    Ok(())
}

/// Check reachability and credentials without touching the registry.
///
/// Resolves with `password` as override (falling back to the keychain entry
/// of `existing_id`), opens a file-transfer session and closes it again.
pub async fn test_connection(
    state: &AppState,
    draft: ProfileDraft,
    existing_id: Option<&str>,
    password: Option<&str>,
) -> CommandResult<()> {
    let mut profile = ConnectionProfile::from_draft(draft);
    if let Some(id) = existing_id {
        profile.id = id.to_string();
    }
    let auth = state.resolver.resolve(&profile, password).await?;
    let session = state.connector.connect(&auth).await?;
    let result = session.open_sftp().await;
    if let Ok(fs) = &result {
        fs.close().await;
    }
    session.end().await;

    result?;
    info!("Connection test to {} succeeded", profile.display_string());
    Ok(())
}
