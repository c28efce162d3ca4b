//! Error taxonomy shared by both entry points.

use camino::Utf8PathBuf;

/// Exit code used for configuration/usage errors, matching clap.
pub const USAGE_EXIT_CODE: i32 = 2;

/// Errors surfaced by the build-cloud and scheduler workflows.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required configuration is missing; raised before any side effect.
    #[error("{0}")]
    Config(String),

    /// The per-run working directory could not be created or populated.
    #[error("cannot prepare {path}: {message}")]
    Resource { path: Utf8PathBuf, message: String },

    /// Bringing up a juju environment failed. Teardown has already run.
    #[error("failed to bootstrap environment {model}")]
    Bootstrap {
        model: String,
        #[source]
        source: Box<Error>,
    },

    /// An external command exited nonzero.
    #[error("`{command}` exited with status {code}: {stderr}")]
    Process {
        code: i32,
        command: String,
        stderr: String,
    },

    /// A test plan could not be read as a YAML mapping.
    #[error("invalid test plan {path}: {message}")]
    Plan { path: Utf8PathBuf, message: String },

    /// The Jenkins server rejected or failed a request.
    #[error("job server request failed: {0}")]
    JobServer(String),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Error {
        let context = context.into();
        move |source| Error::Io { context, source }
    }

    pub(crate) fn resource(path: impl Into<Utf8PathBuf>, message: impl ToString) -> Error {
        Error::Resource {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// The process exit code this error should produce.
    ///
    /// The exit code of a failed external command wins over a generic one.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Process { code, .. } if *code != 0 => *code,
            Error::Bootstrap { source, .. } => source.exit_code(),
            Error::Config(_) => USAGE_EXIT_CODE,
            _ => 1,
        }
    }
}

/// Resolve an exit code for a top-level report.
pub fn exit_code_for(report: &color_eyre::Report) -> i32 {
    report
        .chain()
        .find_map(|e| e.downcast_ref::<Error>())
        .map(Error::exit_code)
        .unwrap_or(1)
}
