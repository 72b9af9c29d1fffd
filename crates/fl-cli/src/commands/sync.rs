//! Sync command for uploading unsynced events to the backend.

use std::io::Write;

use anyhow::{Context, Result};
use fl_db::Database;
use fl_sync::{Client, RetryPolicy, SyncError, SyncReport, sync_pending};

use crate::Config;

/// Builds the backend client from configuration.
pub fn client(config: &Config) -> Result<Client> {
    let (url, token) = config
        .backend()
        .context("api_url and api_token must be configured to sync")?;
    Client::new(url, token).context("invalid backend configuration")
}

/// Uploads every unsynced event of the configured user once.
pub async fn sync_once(db: &mut Database, client: &Client, config: &Config) -> Result<SyncReport> {
    let user_id = config.user_id()?;
    let policy = RetryPolicy::from(config.sync);
    match sync_pending(db, client, &policy, Some(&user_id)).await {
        Ok(report) => Ok(report),
        Err(err @ SyncError::Unauthorized { .. }) => {
            Err(anyhow::Error::new(err).context("backend rejected the api_token"))
        }
        Err(err) => Err(err).context("sync failed"),
    }
}

/// Runs the sync command.
pub fn run<W: Write>(writer: &mut W, db: &mut Database, config: &Config) -> Result<SyncReport> {
    let client = client(config)?;
    let runtime = tokio::runtime::Runtime::new().context("failed to initialize tokio runtime")?;
    let report = runtime.block_on(sync_once(db, &client, config))?;

    writeln!(
        writer,
        "Uploaded {} event(s), {} failed",
        report.uploaded, report.failed
    )?;
    if report.failed > 0 {
        writeln!(writer, "Failed events stay queued for the next sync.")?;
    }
    Ok(report)
}
