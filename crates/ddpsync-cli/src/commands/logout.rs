//! Logout command handler

use anyhow::{Context, Result};

use ddpsync_core::{Config, Session};

use crate::output::Output;

/// Forget the stored login
///
/// Logging out is local; the server is not contacted.
pub fn logout(config: &Config, output: &Output) -> Result<()> {
    let session = Session::from_config(config).context("Failed to create session")?;

    if session.resume_token().is_none() {
        output.message("Not logged in.");
        return Ok(());
    }

    session.logout();
    if session.resume_token().is_some() {
        anyhow::bail!(
            "Could not remove stored login from {}",
            config.credentials_path().display()
        );
    }

    output.success("Logged out");
    Ok(())
}
