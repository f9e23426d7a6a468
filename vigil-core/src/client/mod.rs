pub mod analysis;
pub mod predictor;
pub mod storage;
pub mod traits;
pub mod types;

pub use analysis::HttpAnalysisClient;
pub use predictor::HttpPredictor;
pub use storage::HttpStorageClient;
pub use traits::*;
pub use types::*;

use crate::deadline::{Deadline, TIMEOUT_HEADER};

/// 把剩余预算写入请求头，传递给下游
pub(crate) fn with_deadline(
    request: reqwest::RequestBuilder,
    deadline: &Deadline,
) -> reqwest::RequestBuilder {
    match deadline.header_value() {
        Some(ms) => request.header(TIMEOUT_HEADER, ms),
        None => request,
    }
}

#[cfg(test)]
mod tests;
