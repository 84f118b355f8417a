use std::path::PathBuf;
use thiserror::Error;

/// The result type returned from the library.
pub type Result<T> = std::result::Result<T, BlocklistError>;

/// Exit status for a run that succeeded.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status for a missing dependency, invalid input or any other fatal error.
pub const EXIT_FAILURE: i32 = 1;
/// Exit status for the first run, when a default options file was created and nothing else was done.
pub const EXIT_FIRST_RUN: i32 = 2;
/// Exit status for a required option missing in non-interactive mode.
pub const EXIT_MISSING_OPTION: i32 = 3;
/// Exit status for a run where at least one list could not be fetched.
pub const EXIT_FETCH_FAILED: i32 = 4;

/// The error type returned from the library.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlocklistError {
    /// An HTTP request failed.
    #[error("The HTTP request failed with status code {0}. Body: {1}")]
    RequestFailed(
        /// The response's status code.
        u16,
        /// The response's body.
        String,
    ),
    /// The source URL of a list is using an unsupported URL scheme.
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedUrlScheme(
        /// The invalid scheme from the URL.
        String,
    ),
    /// The path in the `file://` source URL of a list is invalid.
    #[error("Invalid file path: {0}")]
    InvalidFilePath(
        /// The file path from the URL.
        String,
    ),
    /// A filter type name is not one of the supported filter types.
    #[error("Unknown filter type '{0}'. Valid filter types are: {1}")]
    UnknownFilter(
        /// The rejected name.
        String,
        /// The supported names, space separated.
        String,
    ),
    /// A required system dependency is not installed.
    #[error("Please install the package providing '{0}' and try again.")]
    MissingDependency(
        /// The missing executable.
        String,
    ),
    /// A required option was given neither as a flag nor in the environment.
    #[error("Required option {0} is missing. Set it with its flag or the {0} environment variable.")]
    MissingOption(
        /// The environment variable naming the option.
        &'static str,
    ),
    /// An option was given a value it can't take.
    #[error("Invalid value '{1}' for option {0}")]
    InvalidOption(
        /// The environment variable naming the option.
        &'static str,
        /// The rejected value.
        String,
    ),
    /// The Privoxy config file does not exist.
    #[error("Privoxy config {0} does not exist")]
    ConfigNotFound(PathBuf),
    /// The Privoxy config contains a broken block of lines managed by this tool.
    #[error("Privoxy config is malformed: {0}")]
    MalformedConfig(String),
    /// No list sources were configured when building a new runner.
    #[error("No list URLs were configured")]
    NoSources,
    /// No filter types were configured when building a new runner.
    #[error("No filter types were configured")]
    NoFilters,

    /// Transparent wrapper for an [IO error](std::io::Error).
    #[error(transparent)]
    IO(#[from] std::io::Error),
    /// Transparent wrapper for an [`ureq` error](ureq::Error).
    #[error(transparent)]
    HTTP(#[from] Box<ureq::Error>),
    /// Transparent wrapper for an [URL parsing error](url::ParseError).
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    /// Reading or writing the persisted options failed.
    #[error("Failed to access options file: {0}")]
    Options(#[from] confy::ConfyError),
}

impl BlocklistError {
    /// Returns the process exit status this error maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            BlocklistError::MissingOption(_) => EXIT_MISSING_OPTION,
            BlocklistError::RequestFailed(..) | BlocklistError::HTTP(_) | BlocklistError::UnsupportedUrlScheme(_) => {
                EXIT_FETCH_FAILED
            }
            _ => EXIT_FAILURE,
        }
    }

    /// Returns whether this error happened while retrieving a list.
    pub fn is_fetch_error(&self) -> bool {
        self.exit_code() == EXIT_FETCH_FAILED || matches!(self, BlocklistError::InvalidFilePath(_))
    }
}

impl From<ureq::Error> for BlocklistError {
    fn from(e: ureq::Error) -> Self {
        BlocklistError::HTTP(Box::new(e))
    }
}

impl From<tempfile::PersistError> for BlocklistError {
    fn from(e: tempfile::PersistError) -> Self {
        BlocklistError::IO(e.error)
    }
}
