use ticket_core::config::ServiceConfig;
use ticket_server::state::AppState;

use crate::output::{print_json, print_pairs};

/// Run a single reconciliation pass and print its report.
pub fn run(config: ServiceConfig, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async move {
        let state = AppState::from_config(config).await?;
        anyhow::Ok(state.reconciler.run_pass().await?)
    })?;

    if json {
        print_json(&report)?;
    } else {
        print_pairs(&[
            ("considered", report.considered.to_string()),
            ("refreshed", report.refreshed.to_string()),
            ("created", report.created.to_string()),
            ("unroutable", report.unroutable.to_string()),
            ("failed", report.failed.to_string()),
            ("committed", report.committed.to_string()),
        ]);
    }
    Ok(())
}
