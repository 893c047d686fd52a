//! CLI error types with miette diagnostics

use hubfetch_core::Error as CoreError;
use miette::Diagnostic;
use thiserror::Error;

/// Failures at the CLI boundary
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    #[error("Tracing initialization failed: {message}")]
    #[diagnostic(
        code(hubfetch::cli::tracing_error),
        help("Check the RUST_LOG environment variable")
    )]
    Tracing { message: String },

    #[error("Could not start the async runtime")]
    #[diagnostic(code(hubfetch::cli::runtime_error))]
    Runtime {
        #[source]
        source: std::io::Error,
    },

    #[error("Error downloading {repo_id}@{revision}")]
    #[diagnostic(code(hubfetch::cli::download_failed))]
    Download {
        repo_id: String,
        revision: String,
        #[source]
        #[diagnostic_source]
        source: CoreError,
    },
}

impl CliError {
    pub fn tracing(message: impl Into<String>) -> Self {
        Self::Tracing {
            message: message.into(),
        }
    }

    pub fn download(
        repo_id: impl Into<String>,
        revision: impl Into<String>,
        source: CoreError,
    ) -> Self {
        Self::Download {
            repo_id: repo_id.into(),
            revision: revision.into(),
            source,
        }
    }
}
