//! Error types for the setup and launch harness.

/// Top-level error type covering provisioning, patching, and launch.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// A remote archive could not be fetched.
    #[error("download failed for {url}: {reason}")]
    Download {
        /// The URL that was being fetched.
        url: String,
        /// Why the transfer failed.
        reason: String,
    },

    /// Two dependency constraints cannot both be satisfied.
    #[error("version conflict for {package}: pinned {pinned}, also requires {conflicting}")]
    VersionConflict {
        /// The package with conflicting constraints.
        package: String,
        /// The version the manifest pins.
        pinned: String,
        /// The other version that was requested.
        conflicting: String,
    },

    /// A dependency specifier could not be parsed.
    #[error("invalid dependency specifier: {spec}")]
    InvalidSpecifier {
        /// The specifier string that failed to parse.
        spec: String,
    },

    /// An environment install step exited non-zero for a reason other
    /// than a resolver conflict.
    #[error("install failed ({context}): {detail}")]
    InstallFailed {
        /// Which install step failed.
        context: String,
        /// Trailing stderr lines from the failed command.
        detail: String,
    },

    /// A downloaded archive could not be extracted.
    #[error("archive corrupt ({archive}): {reason}")]
    ArchiveCorrupt {
        /// The archive file name.
        archive: String,
        /// What the extractor reported.
        reason: String,
    },

    /// The application checkout could not be cloned or updated.
    #[error("source unavailable for {target}: {reason}")]
    SourceUnavailable {
        /// The clone destination.
        target: String,
        /// Why the source could not be materialized.
        reason: String,
    },

    /// No usable Python interpreter was found.
    #[error("python interpreter not found: {reason}")]
    InterpreterNotFound {
        /// What was searched and why it failed.
        reason: String,
    },

    /// The discovered interpreter is older than the supported floor.
    #[error("python {found} is too old (need {minimum} or newer)")]
    InterpreterTooOld {
        /// The version that was found.
        found: String,
        /// The minimum supported version.
        minimum: String,
    },

    /// The application entry process could not be started.
    #[error("failed to start application: {reason}")]
    ProcessStart {
        /// Why the launch failed.
        reason: String,
    },

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, HarnessError>;
