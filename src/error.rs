use thiserror::Error;

use crate::store::StoreError;

/// Engine-level failures. Parse problems (bad referrer URLs, malformed UTM
/// keys) are recovered with fallback values where they occur and never show
/// up here.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Fatal configuration problem detected at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),
}
