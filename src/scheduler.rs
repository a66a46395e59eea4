use futures::stream::{self, StreamExt};
use log::{info, warn};

use crate::logging::check_finished_line;
use crate::relay::{run_account_cycle, CycleSummary, SessionFactory};
use crate::settings::Config;

/// One pass over every enabled account, in configuration order.
///
/// Up to `max_concurrent_accounts` accounts are in flight at once, all on
/// the calling task.
pub async fn run_cycle<F: SessionFactory>(factory: &F, config: &Config) -> Vec<CycleSummary> {
    stream::iter(config.enabled_accounts())
        .map(|account| run_account_cycle(factory, account))
        .buffered(config.max_concurrent_accounts.max(1))
        .collect()
        .await
}

pub fn log_totals(summaries: &[CycleSummary]) {
    for summary in summaries.iter().filter(|s| s.retrieved > 0) {
        info!(
            "{}: {} retrieved, {} forwarded, {} skipped, {} failed",
            summary.account, summary.retrieved, summary.sent, summary.skipped, summary.failed
        );
    }
    let failing = summaries.iter().filter(|s| !s.is_ok()).count();
    if failing > 0 {
        warn!("{} of {} accounts failed this cycle", failing, summaries.len());
    }
}

pub async fn run_forever<F: SessionFactory>(factory: &F, config: &Config) {
    loop {
        let summaries = run_cycle(factory, config).await;
        log_totals(&summaries);
        info!("{}", check_finished_line(chrono::Local::now()));
        tokio::time::sleep(config.check_interval()).await;
    }
}
