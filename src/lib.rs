//! Count every entry of a directory tree and time how long it takes.
//!
//! The walker reads directories with `getdents64` and opens subdirectories relative to their
//! parent, so it only works on Linux.
mod getdent;
mod walker;
pub mod cli;
pub mod error;
pub mod timer;
#[cfg(test)]
mod tests;

pub use error::WalkError;
pub use timer::{measure, Timing};
pub use walker::{try_walk, walk, DirEntry, Error, FileType, IntoIter, WalkDir};

#[derive(Clone, Copy, Debug, PartialEq)]
enum UnixFileType {
    BlockDevice = 1,
    CharDevice,
    Directory,
    NamedPipe,
    SymbolicLink,
    File,
    UnixSocket,
}

impl UnixFileType {
    fn new(kind: libc::c_char) -> Option<Self> {
        match kind as u8 {
            libc::DT_BLK => Some(Self::BlockDevice),
            libc::DT_CHR => Some(Self::CharDevice),
            libc::DT_DIR => Some(Self::Directory),
            libc::DT_FIFO => Some(Self::NamedPipe),
            libc::DT_LNK => Some(Self::SymbolicLink),
            libc::DT_REG => Some(Self::File),
            libc::DT_SOCK => Some(Self::UnixSocket),
            // DT_UNKNOWN, the file system did not tell us.
            _ => None,
        }
    }

    /// Recover the type from an `lstat` result.
    fn from_std(kind: std::fs::FileType) -> Option<Self> {
        use std::os::unix::fs::FileTypeExt;

        if kind.is_dir() {
            Some(Self::Directory)
        } else if kind.is_file() {
            Some(Self::File)
        } else if kind.is_symlink() {
            Some(Self::SymbolicLink)
        } else if kind.is_block_device() {
            Some(Self::BlockDevice)
        } else if kind.is_char_device() {
            Some(Self::CharDevice)
        } else if kind.is_fifo() {
            Some(Self::NamedPipe)
        } else if kind.is_socket() {
            Some(Self::UnixSocket)
        } else {
            None
        }
    }
}
