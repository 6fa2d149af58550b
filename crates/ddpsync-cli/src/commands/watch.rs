//! Watch command handler

use anyhow::{bail, Result};

use ddpsync_core::{ChangeType, Config, SessionEvent, SessionState};

use super::{collection_sizes, parse_params, Connection};
use crate::output::Output;

/// Subscribe to a publication and print changes until interrupted
pub async fn watch(
    config: &Config,
    name: String,
    params: Option<String>,
    output: &Output,
) -> Result<()> {
    let params = parse_params(params.as_deref())?;
    let mut connection = Connection::open(config, true).await?;

    let sub_id = connection.session.subscribe(&name, params);
    output.message(&format!("Watching {} (Ctrl-C to stop)", name));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut reported = false;

    loop {
        tokio::select! {
            event = connection.events.recv() => {
                let Some(event) = event else { break };
                output.print_event(&event);

                match event {
                    SessionEvent::ConnectionStateChanged { state: SessionState::Closed, .. } => {
                        bail!("Connection closed by server");
                    }
                    SessionEvent::SubscriptionChanged { change: ChangeType::Ready, .. }
                        if !reported && connection.session.all_subscriptions_ready() =>
                    {
                        reported = true;
                        output.print_collections(&collection_sizes(connection.session.store()));
                    }
                    _ => {}
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    connection.session.unsubscribe(&sub_id);
    connection.close().await;
    Ok(())
}
