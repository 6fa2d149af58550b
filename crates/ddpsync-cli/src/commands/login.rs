//! Login command handler

use std::io::{self, BufRead, Write};

use anyhow::{anyhow, bail, Context, Result};

use ddpsync_core::{Config, SessionEvent, SessionState};

use super::Connection;
use crate::output::{Output, OutputFormat};

/// Log in with a username or email and store the resume token
pub async fn login(
    config: &Config,
    user: String,
    password: Option<String>,
    output: &Output,
) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => prompt_password()?,
    };
    if password.is_empty() {
        bail!("Password must not be empty");
    }

    let mut connection = Connection::open(config, false).await?;
    connection.session.login(&user, &password);

    let result = connection
        .next_matching("login", |event| match event {
            SessionEvent::ConnectionStateChanged {
                state: SessionState::LoggedIn,
                user_id,
                ..
            } => Some(Ok(user_id.clone().unwrap_or_default())),
            SessionEvent::ConnectionStateChanged {
                state: SessionState::Closed,
                ..
            } => Some(Err(anyhow!("Connection closed during login"))),
            SessionEvent::Error { message } => Some(Err(anyhow!("Login failed: {}", message))),
            _ => None,
        })
        .await;
    connection.close().await;
    let user_id = result?;

    match output.format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "user_id": user_id }));
        }
        OutputFormat::Quiet => println!("{}", user_id),
        OutputFormat::Human => output.success(&format!("Logged in as {} ({})", user, user_id)),
    }

    Ok(())
}

fn prompt_password() -> Result<String> {
    eprint!("Password (input is visible): ");
    io::stderr().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read password")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}
