use smartpark_reservation::ExpirySweeper;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::metrics;

/// Run the expiry sweeper in the background for the life of the process
pub fn start_expiry_worker(sweeper: Arc<ExpirySweeper>) -> JoinHandle<()> {
    info!("Starting expiry worker");
    tokio::spawn(sweeper.run(metrics::record_sweep))
}
