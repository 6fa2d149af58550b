//! Call command handler

use anyhow::{anyhow, bail, Result};
use serde_json::Value;
use tokio::sync::oneshot;

use ddpsync_core::Config;

use super::{parse_params, Connection, RESPONSE_TIMEOUT};
use crate::output::Output;

/// Call a server method and print its result
pub async fn call(
    config: &Config,
    method: String,
    params: Option<String>,
    output: &Output,
) -> Result<()> {
    let params = parse_params(params.as_deref())?;
    let connection = Connection::open(config, true).await?;

    let (tx, rx) = oneshot::channel();
    connection.session.call(&method, params, move |result| {
        let _ = tx.send(result);
    });

    let result = tokio::time::timeout(RESPONSE_TIMEOUT, rx).await;
    connection.close().await;

    let result = result
        .map_err(|_| anyhow!("Timed out waiting for {}", method))?
        .map_err(|_| anyhow!("Connection closed before {} returned", method))?;

    match result {
        Ok(value) => {
            output.print_value(&value.unwrap_or(Value::Null));
            Ok(())
        }
        Err(error) => bail!("{} failed: {}", method, error),
    }
}
