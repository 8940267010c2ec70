use thiserror::Error;

pub type Result<T> = std::result::Result<T, FsError>;

/// Storage engine errors.
///
/// Every variant maps to a distinct negative code via [`FsError::code`] for
/// the message boundary, where any negative reply means failure and
/// non-negative values carry the result.
#[derive(Debug, Error)]
pub enum FsError {
    /// The path resolves to nothing.
    #[error("file not found: {0}")]
    NotFound(String),
    /// Embedded separator, or null/empty input.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),
    /// The operation requires a regular file but the target is a directory
    /// or a special file.
    #[error("not a regular file: {0}")]
    NotRegularFile(String),
    /// Create without truncate on an existing path.
    #[error("file already exists: {0}")]
    AlreadyExists(String),
    /// The target still has open references.
    #[error("file is in use: {0}")]
    InUse(String),
    /// No inode bit or sector run available, even after degradation.
    #[error("no space left on device")]
    SpaceExhausted,
    /// A privileged operation was requested by an unprivileged caller.
    #[error("caller is not authorized")]
    NotAuthorized,
    /// A digest did not match its stored value. Only ever surfaced as a
    /// boundary code; the typed API reports mismatches as `Ok(false)`.
    #[error("digest verification mismatch")]
    VerifyMismatch,
    /// An on-disk invariant was violated. The engine never continues past
    /// one of these.
    #[error("on-disk corruption: {0}")]
    Corruption(String),
    /// The device does not hold a filesystem this engine understands.
    #[error("unrecognized filesystem format: {0}")]
    Format(String),
    #[error("bad file descriptor: {0}")]
    BadDescriptor(String),
    /// The per-process or global descriptor table is full.
    #[error("descriptor table is full")]
    TableFull,
    #[error("sector {0} is out of device range")]
    SectorOutOfRange(usize),
    #[error("device i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FsError {
    /// The negative reply code carried across the message boundary.
    pub fn code(&self) -> i32 {
        match self {
            FsError::NotFound(_) => -2,
            FsError::InvalidPath(_) => -3,
            FsError::NotRegularFile(_) => -4,
            FsError::AlreadyExists(_) => -5,
            FsError::InUse(_) => -6,
            FsError::SpaceExhausted => -7,
            FsError::NotAuthorized => -8,
            FsError::VerifyMismatch => -9,
            FsError::Corruption(_) => -10,
            FsError::Format(_) => -11,
            FsError::BadDescriptor(_) => -12,
            FsError::TableFull => -13,
            FsError::SectorOutOfRange(_) => -14,
            FsError::Io(_) => -15,
            FsError::InvalidArgument(_) => -16,
        }
    }
}

/// Renders caller-supplied path bytes for error messages. Paths are not
/// required to be UTF-8.
pub(crate) fn lossy_path(path: &[u8]) -> String {
    String::from_utf8_lossy(path).into_owned()
}
