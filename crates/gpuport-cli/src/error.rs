use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] gpuport_core::ValidationError),

    #[error(transparent)]
    Config(#[from] gpuport_export::ConfigError),

    #[error("provider failure: {0}")]
    Provider(#[from] gpuport_core::ProviderError),

    #[error("strict mode failed: providers_failed={providers_failed}, pipelines_failed={pipelines_failed}")]
    StrictModeViolation {
        providers_failed: usize,
        pipelines_failed: usize,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) => 2,
            Self::Config(_) => 3,
            Self::Provider(_) => 4,
            Self::StrictModeViolation { .. } => 5,
            Self::Serialization(_) | Self::Io(_) => 10,
        }
    }
}
