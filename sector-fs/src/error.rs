use core::fmt::{self, Display, Formatter};

/// Errors reported by the directory and volume layers.
///
/// The inode layer below them keeps the boolean and short-count contract:
/// a failed grow is `false`, a denied write is zero bytes written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No entry with that name, or a path component is missing
    NotFound,
    /// An entry with that name already exists
    AlreadyExists,
    /// A path component names a regular file
    NotADirectory,
    /// Attempt to remove a directory that still has entries
    DirectoryNotEmpty,
    /// Empty name, or longer than [`crate::NAME_MAX`] bytes
    InvalidName,
    /// The free map ran out of sectors
    NoSpace,
    /// Sector 0 does not hold a valid super block
    InvalidImage,
}

/// Result type of the directory and volume layers
pub type Result<T> = core::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotFound => "no such file or directory",
            Error::AlreadyExists => "file exists",
            Error::NotADirectory => "not a directory",
            Error::DirectoryNotEmpty => "directory not empty",
            Error::InvalidName => "invalid file name",
            Error::NoSpace => "no space left on device",
            Error::InvalidImage => "not a sector-fs image",
        };
        f.write_str(msg)
    }
}
