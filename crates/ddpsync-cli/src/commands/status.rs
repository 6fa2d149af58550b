//! Status command handler

use anyhow::Result;

use ddpsync_core::credentials::RESUME_TOKEN_KEY;
use ddpsync_core::{Config, CredentialStore, FileCredentialStore, SessionState};

use super::Connection;
use crate::output::{Output, OutputFormat};

/// Show configuration and what the server says about this client
pub async fn show(config: &Config, output: &Output) -> Result<()> {
    let url = config.websocket_url();
    let credentials_path = config.credentials_path();
    let has_token = FileCredentialStore::new(&credentials_path)
        .load(RESUME_TOKEN_KEY)?
        .is_some();

    let (state, user_id, server_session, error) = match Connection::open(config, true).await {
        Ok(connection) => {
            let session = &connection.session;
            let status = (
                session.state(),
                session.user_id(),
                session.server_session(),
                None,
            );
            connection.close().await;
            status
        }
        Err(e) => (SessionState::Closed, None, None, Some(e.to_string())),
    };

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "server_url": url,
                    "state": state,
                    "server_session": server_session,
                    "user_id": user_id,
                    "error": error,
                    "credentials": {
                        "path": credentials_path,
                        "resume_token": has_token
                    }
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", state);
        }
        OutputFormat::Human => {
            println!("ddpsync Status");
            println!("==============");
            println!();
            println!("Server:");
            println!("  URL:     {}", url);
            println!("  State:   {}", state);
            if let Some(ref server_session) = server_session {
                println!("  Session: {}", server_session);
            }
            if let Some(ref error) = error {
                println!("  Error:   {}", error);
            }
            println!();
            println!("Login:");
            println!("  User:         {}", user_id.as_deref().unwrap_or("(not logged in)"));
            println!(
                "  Resume token: {}",
                if has_token { "stored" } else { "none" }
            );
            println!("  Location:     {}", credentials_path.display());
        }
    }

    Ok(())
}
