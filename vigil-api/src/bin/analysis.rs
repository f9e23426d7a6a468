//! Vigil Analysis Replica
//!
//! Classifies metrics, correlates anomalies per client and forwards results to storage

use vigil_api::start_analysis;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    start_analysis().await
}
