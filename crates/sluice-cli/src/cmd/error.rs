use sluice_core::HarnessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Harness(#[from] HarnessError),
}
