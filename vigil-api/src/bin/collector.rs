//! Vigil Collector
//!
//! Accepts metrics and routes each client to a sticky analysis replica

use vigil_api::start_collector;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    start_collector().await
}
