use camino::Utf8PathBuf;

/// Errors that can abort startup before any component runs.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Figment(#[from] figment::Error),
}

/// Errors a single upload attempt can fail with.
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("STOW-RS server returned {status}: {body}")]
    Rejected {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Errors that can occur while processing a single discovered instance file.
/// These never abort the study; they are accumulated into the study's outcome.
#[derive(thiserror::Error, Debug)]
pub enum InstanceError {
    #[error("Invalid DICOM file: {0}")]
    Parse(#[from] dicom::object::ReadError),

    #[error("Failed to re-encode DICOM file: {0}")]
    Encode(#[from] dicom::object::WriteError),

    #[error("{0}")]
    Upload(#[from] UploadError),
}

/// Errors that abort a study's per-instance walk entirely and classify it as
/// [crate::study_processor::Outcome::Error].
#[derive(thiserror::Error, Debug)]
pub enum FatalProcessorError {
    #[error("I/O error while discovering instances: {0}")]
    Discovery(#[from] std::io::Error),

    #[error("Failed to move study folder to {dest}: {source}")]
    Move {
        dest: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write error record {path}: {source}")]
    ErrorRecord {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}
