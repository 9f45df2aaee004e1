use crate::getdent::{DirentBuf, More};
use crate::error::WalkError;

use std::collections::VecDeque;
use std::ffi::{CString, OsStr, OsString};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use once_cell::sync::OnceCell;

use super::UnixFileType as FileTypeInner;

/// List every entry below `root`, at any depth.
///
/// Returns an empty list, after logging a diagnostic, if `root` is not an existing directory or
/// can not be opened. Entries that can not be read are still listed but their contents are
/// skipped.
pub fn walk(root: impl AsRef<Path>) -> Vec<PathBuf> {
    match try_walk(root) {
        Ok(paths) => paths,
        Err(err) => {
            tracing::warn!("{}", err);
            Vec::new()
        }
    }
}

/// Like [`walk`] but reports a bad root as an error.
pub fn try_walk(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, WalkError> {
    let iter = WalkDir::new(root).try_build()?;
    Ok(iter.map(DirEntry::into_path).collect())
}

/// Configure walking over all files in a directory tree.
pub struct WalkDir {
    /// The user supplied configuration.
    config: Configuration,
    path: PathBuf,
    on_error: ErrorHandler,
}

type ErrorHandler = Box<dyn FnMut(&Error) + Send>;

/// The main iterator.
///
/// Yields every entry exactly once, parents before their children.
pub struct IntoIter {
    /// The user supplied configuration.
    config: Configuration,
    /// The current 'finger' within the tree of directories.
    stack: Vec<WorkItem>,
    /// The number of `Open` items on the stack.
    pub(crate) open: usize,
    /// Where skipped entries are reported.
    on_error: ErrorHandler,
    /// Statistics about the system calls etc.
    pub(crate) stats: Stats,
}

/// Describes a file that was found.
///
/// All parents of this entry have already been yielded before.
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// The file type reported by the call to `getdent`.
    file_type: FileType,
    /// The depth at which this entry was found.
    depth: usize,
    /// The file name of this entry.
    file_name: EntryPath,
    /// The normalized full path of the entry.
    full_path: OnceCell<PathBuf>,
}

#[derive(Debug, Clone)]
enum EntryPath {
    /// We have already allocate the whole path in its own buffer.
    Full(PathBuf),
    /// The path is given as the filename alone.
    Name {
        name: OsString,
        /// The parent directory of the entry.
        parent: Arc<Node>,
    },
}

/// An entry below the root that could not be read.
///
/// The traversal continues after handing this to the error handler.
#[derive(Debug, thiserror::Error)]
#[error("{}: {}", .path.display(), .source)]
pub struct Error {
    path: PathBuf,
    depth: usize,
    #[source]
    source: io::Error,
}

/// The type of a file entry.
///
/// Accessing this will not cause any system calls and is very cheap. However, the type may not
/// always be known, in which case the walker asked `lstat` and it failed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FileType {
    inner: Option<FileTypeInner>,
}

#[derive(Copy, Clone, Debug)]
struct Configuration {
    max_depth: usize,
    max_open: usize,
    buffer_size: usize,
}

#[derive(Debug, Default, Clone)]
pub(crate) struct Stats {
    pub(crate) nr_close: usize,
    pub(crate) nr_getdent: usize,
    pub(crate) nr_open: usize,
    pub(crate) nr_openat: usize,
    pub(crate) nr_stat: usize,
    pub(crate) nr_spill: usize,
}

/// Completed directory nodes that are parents of still open nodes or active entries.
#[derive(Debug)]
struct Node {
    /// The depth at which this node occurs.
    depth: usize,
    /// The path of this node.
    path: EntryPath,
}

enum WorkItem {
    /// A directory which is still open.
    Open(Open),
    /// A directory that was closed, and its entries read to memory.
    Closed(Closed),
}

/// Directories with a file descriptor.
struct Open {
    /// The open file descriptor.
    fd: DirFd,
    /// The buffer for reading entries of this directory.
    buffer: DirentBuf,
    /// The parent representation of this node.
    /// Not to be confused with the potentially still open parent directory.
    as_parent: Arc<Node>,
}

/// Describes a directory that had to be closed, and its entries read to memory.
struct Closed {
    /// The entries not yet yielded.
    children: VecDeque<Backlog>,
    /// The parent representation of this node.
    as_parent: Arc<Node>,
}

struct DirFd(libc::c_int);

/// Describes an item of a closed directory.
///
/// The parent is known from the `Closed` item holding it. Since the file descriptor was closed
/// we can't use `openat` for its children but need to reconstruct the full path.
struct Backlog {
    name: OsString,
    file_type: Option<FileTypeInner>,
}

// Public interfaces.

impl WalkDir {
    pub fn new(path: impl AsRef<Path>) -> Self {
        WalkDir {
            config: Configuration::default(),
            path: path.as_ref().to_owned(),
            on_error: Box::new(|err: &Error| {
                tracing::debug!(path = %err.path().display(), "skipping unreadable entry: {}", err.source);
            }),
        }
    }

    /// Do not report or descend into entries deeper than `n`.
    ///
    /// Direct children of the root have depth 1.
    pub fn max_depth(mut self, n: usize) -> Self {
        self.config.max_depth = n;
        self
    }

    /// The number of directories that may be open at the same time.
    ///
    /// At least one directory is always held open.
    pub fn max_open(mut self, n: usize) -> Self {
        self.config.max_open = n.max(1);
        self
    }

    /// The size of the buffer for each `getdents64` call, per open directory.
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.config.buffer_size = bytes;
        self
    }

    /// Replace the handler for entries that can not be read.
    pub fn on_error<F>(mut self, handler: F) -> Self where
        F: FnMut(&Error) + Send + 'static,
    {
        self.on_error = Box::new(handler);
        self
    }

    /// Check the root and open it.
    pub fn try_build(self) -> Result<IntoIter, WalkError> {
        let is_dir = std::fs::metadata(&self.path)
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(WalkError::NotADirectory(self.path));
        }

        let mut stats = Stats::default();
        stats.nr_open += 1;
        let fd = match DirFd::open(&self.path) {
            Ok(fd) => fd,
            Err(source) => return Err(WalkError::Enumerator { path: self.path, source }),
        };

        let root = Open {
            fd,
            buffer: DirentBuf::with_size(self.config.buffer_size),
            as_parent: Arc::new(Node {
                depth: 0,
                path: EntryPath::Full(self.path),
            }),
        };

        // The root's children are already too deep.
        let stack = match self.config.max_depth {
            0 => vec![],
            _ => vec![WorkItem::Open(root)],
        };
        let open = stack.len();

        Ok(IntoIter {
            config: self.config,
            stack,
            open,
            on_error: self.on_error,
            stats,
        })
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            max_depth: usize::MAX,
            max_open: 32,
            buffer_size: 1 << 14,
        }
    }
}

impl IntoIter {
    pub fn stats(&self) -> &dyn core::fmt::Debug {
        &self.stats
    }
}

impl FileType {
    pub fn is_dir(&self) -> bool {
        self.inner == Some(FileTypeInner::Directory)
    }

    pub fn is_file(&self) -> bool {
        self.inner == Some(FileTypeInner::File)
    }

    pub fn is_symlink(&self) -> bool {
        self.inner == Some(FileTypeInner::SymbolicLink)
    }

    /// If neither the kernel nor `lstat` could tell.
    pub fn is_unknown(&self) -> bool {
        self.inner.is_none()
    }
}

impl DirEntry {
    /// Inspect the path of this entry.
    pub fn path(&self) -> &Path {
        self.full_path.get_or_init(|| {
            self.file_name.make_path()
        })
    }

    pub fn path_is_symlink(&self) -> bool {
        self.file_type.is_symlink()
    }

    /// Read the full meta data, without following links.
    pub fn metadata(&self) -> io::Result<std::fs::Metadata> {
        std::fs::symlink_metadata(self.path())
    }

    /// Convert the entry into a path
    ///
    /// Potentially more efficient than `as_path().to_owned()`.
    pub fn into_path(self) -> PathBuf {
        let file_name = self.file_name;
        self.full_path.into_inner().unwrap_or_else(|| {
            file_name.make_path()
        })
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    /// Return the filename of this entry.
    pub fn file_name(&self) -> &OsStr {
        self.file_name.name()
    }

    /// The depth at which this entry is in the directory tree.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Error {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn io_error(&self) -> &io::Error {
        &self.source
    }

    pub fn into_io_error(self) -> io::Error {
        self.source
    }
}

// Private implementation items.

impl Open {
    fn openat(&self, name: &OsStr, as_parent: Arc<Node>, buffer_size: usize) -> io::Result<Self> {
        let fd = self.fd.openat(name)?;
        Ok(Open::with_fd(fd, as_parent, buffer_size))
    }

    fn with_fd(fd: DirFd, as_parent: Arc<Node>, buffer_size: usize) -> Self {
        Open {
            fd,
            buffer: DirentBuf::with_size(buffer_size),
            as_parent,
        }
    }

    /// Get the next item from the buffer, without refilling it.
    fn ready_entry(&mut self) -> Option<DirEntry> {
        let depth = self.as_parent.depth + 1;
        let mut drain = self.buffer.drain();

        loop {
            let entry = match drain.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::debug!(?err, "dropping malformed getdents64 records");
                    continue;
                }
            };

            if entry.is_dot() {
                continue;
            }

            return Some(DirEntry {
                file_name: EntryPath::Name {
                    name: entry.file_name().to_owned(),
                    parent: self.as_parent.clone(),
                },
                depth,
                file_type: FileType {
                    inner: entry.file_type(),
                },
                full_path: OnceCell::new(),
            });
        }
    }

    fn fill_buffer(&mut self, stats: &mut Stats) -> io::Result<More> {
        stats.nr_getdent += 1;
        self.buffer.fill_buf(self.fd.0)
    }

    /// Read all remaining entries to memory and close the descriptor.
    ///
    /// A read error ends the directory early; whatever was read before is kept.
    fn spill(mut self, stats: &mut Stats) -> (Closed, Option<io::Error>) {
        let mut children = VecDeque::new();
        let mut failure = None;

        loop {
            let entries = self.buffer
                .drain()
                .filter_map(Result::ok)
                .filter(|entry| !entry.is_dot())
                .map(|entry| Backlog {
                    name: entry.file_name().to_owned(),
                    file_type: entry.file_type(),
                });
            children.extend(entries);

            match self.fill_buffer(stats) {
                Ok(More::More) => {},
                Ok(More::Blocked) => unreachable!("Just drained buffer is blocked"),
                Ok(More::Done) => break,
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        stats.nr_spill += 1;
        stats.nr_close += 1;
        let closed = Closed {
            children,
            as_parent: self.as_parent,
        };

        (closed, failure)
    }
}

impl DirFd {
    /// Open the root, following a symlink.
    fn open(path: &Path) -> io::Result<Self> {
        Self::open_with(path, libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC)
    }

    /// Open a directory below the root by its full path, never through a symlink.
    fn open_nofollow(path: &Path) -> io::Result<Self> {
        Self::open_with(
            path,
            libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
        )
    }

    fn open_with(path: &Path, flags: libc::c_int) -> io::Result<Self> {
        let unix_name = c_path(path.as_os_str())?;

        let result = unsafe { libc::open(unix_name.as_ptr(), flags) };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(DirFd(result))
    }

    fn openat(&self, name: &OsStr) -> io::Result<Self> {
        let unix_name = c_path(name)?;

        let result = unsafe {
            libc::openat(
                self.0,
                unix_name.as_ptr(),
                libc::O_RDONLY | libc::O_DIRECTORY | libc::O_NOFOLLOW | libc::O_CLOEXEC,
            )
        };

        if result == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(DirFd(result))
    }
}

impl Drop for DirFd {
    fn drop(&mut self) {
        // Nothing sensible to do about a failed close of a read-only descriptor.
        let _ = unsafe { libc::close(self.0) };
    }
}

/// Ask the file system for a type the kernel did not report, without following links.
fn lstat_type(path: &Path) -> io::Result<FileType> {
    let meta = std::fs::symlink_metadata(path)?;
    Ok(FileType {
        inner: FileTypeInner::from_std(meta.file_type()),
    })
}

fn c_path(path: &OsStr) -> io::Result<CString> {
    CString::new(path.as_bytes()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "path contains an interior null byte")
    })
}

impl Closed {
    fn ready_entry(&mut self) -> Option<DirEntry> {
        let backlog = self.children.pop_front()?;
        Some(DirEntry {
            file_name: EntryPath::Name {
                name: backlog.name,
                parent: self.as_parent.clone(),
            },
            file_type: FileType {
                inner: backlog.file_type,
            },
            depth: self.as_parent.depth + 1,
            full_path: OnceCell::new(),
        })
    }
}

impl EntryPath {
    fn make_path(&self) -> PathBuf {
        match self {
            EntryPath::Full(buf) => buf.clone(),
            EntryPath::Name { name, parent } => {
                let mut buf = parent.make_path();
                buf.push(name);
                buf
            }
        }
    }

    fn name(&self) -> &OsStr {
        match self {
            EntryPath::Full(buf) => buf.file_name().unwrap_or(buf.as_os_str()),
            EntryPath::Name { name, .. } => name,
        }
    }
}

impl Node {
    /// Allocate a path buffer for the path described.
    fn make_path(&self) -> PathBuf {
        self.path.make_path()
    }
}

impl IntoIter {
    /// See if we should descend to the newly found entry, and do so.
    fn iter_entry(&mut self, entry: &mut DirEntry) {
        if entry.depth >= self.config.max_depth {
            return;
        }

        let is_dir = match entry.file_type.inner {
            Some(FileTypeInner::Directory) => true,
            Some(_) => false,
            None => {
                self.stats.nr_stat += 1;
                match lstat_type(entry.path()) {
                    Ok(file_type) => {
                        entry.file_type = file_type;
                        file_type.is_dir()
                    }
                    Err(source) => {
                        self.report(entry.path(), entry.depth, source);
                        false
                    }
                }
            }
        };

        if !is_dir {
            return;
        }

        if self.open >= self.config.max_open {
            self.spill_shallowest();
        }

        let as_parent = Arc::new(Node {
            depth: entry.depth,
            path: entry.file_name.clone(),
        });

        let buffer_size = self.config.buffer_size;
        let opened = match self.stack.last() {
            Some(WorkItem::Open(parent)) => {
                self.stats.nr_openat += 1;
                parent.openat(entry.file_name(), as_parent, buffer_size)
            }
            _ => {
                self.stats.nr_open += 1;
                DirFd::open_nofollow(entry.path())
                    .map(|fd| Open::with_fd(fd, as_parent, buffer_size))
            }
        };

        match opened {
            Ok(open) => {
                self.open += 1;
                self.stack.push(WorkItem::Open(open));
            }
            Err(source) => self.report(entry.path(), entry.depth, source),
        }
    }

    /// Close the open directory closest to the root, keeping its remaining entries.
    fn spill_shallowest(&mut self) {
        let position = self.stack
            .iter()
            .position(|item| matches!(item, WorkItem::Open(_)));
        let index = match position {
            Some(index) => index,
            None => return,
        };

        // Temporarily put an empty placeholder in its slot.
        let placeholder = WorkItem::Closed(Closed {
            children: VecDeque::new(),
            as_parent: self.current_parent(index),
        });

        let open = match core::mem::replace(&mut self.stack[index], placeholder) {
            WorkItem::Open(open) => open,
            WorkItem::Closed(_) => unreachable!("Position points to an open directory"),
        };

        let path = open.as_parent.make_path();
        let depth = open.as_parent.depth;
        let (closed, failure) = open.spill(&mut self.stats);
        self.stack[index] = WorkItem::Closed(closed);
        self.open -= 1;

        if let Some(source) = failure {
            self.report(&path, depth, source);
        }
    }

    fn current_parent(&self, index: usize) -> Arc<Node> {
        match &self.stack[index] {
            WorkItem::Open(open) => open.as_parent.clone(),
            WorkItem::Closed(closed) => closed.as_parent.clone(),
        }
    }

    /// Finish the directory on top of the stack.
    fn pop(&mut self) {
        if let Some(WorkItem::Open(_)) = self.stack.pop() {
            self.open -= 1;
            self.stats.nr_close += 1;
        }
    }

    fn report(&mut self, path: &Path, depth: usize, source: io::Error) {
        let error = Error {
            path: path.to_owned(),
            depth,
            source,
        };
        (self.on_error)(&error);
    }
}

impl IntoIterator for WalkDir {
    type IntoIter = IntoIter;
    type Item = DirEntry;

    /// Build the iterator, logging a bad root and yielding nothing for it.
    fn into_iter(self) -> IntoIter {
        let config = self.config;
        self.try_build().unwrap_or_else(|err| {
            tracing::warn!("{}", err);
            IntoIter {
                config,
                stack: vec![],
                open: 0,
                on_error: Box::new(|_: &Error| {}),
                stats: Stats::default(),
            }
        })
    }
}

impl Iterator for IntoIter {
    type Item = DirEntry;

    fn next(&mut self) -> Option<DirEntry> {
        loop {
            let current = self.stack.last_mut()?;

            // First try to get an item that is ripe for reaping.
            let mut found = match current {
                WorkItem::Open(open) => match open.ready_entry() {
                    Some(entry) => entry,
                    // No more items, try refilling.
                    None => match open.fill_buffer(&mut self.stats) {
                        Ok(More::More) => continue,
                        Ok(More::Blocked) => unreachable!("Empty buffer blocked"),
                        Ok(More::Done) => {
                            self.pop();
                            continue;
                        }
                        Err(source) => {
                            let path = open.as_parent.make_path();
                            let depth = open.as_parent.depth;
                            self.pop();
                            self.report(&path, depth, source);
                            continue;
                        }
                    },
                },
                WorkItem::Closed(closed) => match closed.ready_entry() {
                    Some(entry) => entry,
                    None => {
                        // Nothing to do, try the next entry.
                        self.pop();
                        continue;
                    }
                },
            };

            self.iter_entry(&mut found);
            return Some(found);
        }
    }
}
