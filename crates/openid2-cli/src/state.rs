//! Session state persisted between `start` and `complete`.

use std::path::Path;

use anyhow::{Context, Result};
use openid2_rp::SessionState;

/// Writes the state, which includes the association key, readable by the
/// owner only on Unix.
pub fn save_state(path: &Path, state: &SessionState) -> Result<()> {
    let json = serde_json::to_string_pretty(state).context("Failed to serialize session state")?;
    write_private(path, json.as_bytes())
        .with_context(|| format!("Failed to write session state to {}", path.display()))?;
    tracing::debug!("Session state saved to {}", path.display());
    Ok(())
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten an existing file too.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

pub fn load_state(path: &Path) -> Result<SessionState> {
    let json = std::fs::read_to_string(path).with_context(|| {
        format!(
            "Failed to read session state from {} (run `openid2 start` first)",
            path.display()
        )
    })?;
    serde_json::from_str(&json)
        .with_context(|| format!("Invalid session state in {}", path.display()))
}
