use bytemuck::{Pod, Zeroable};
use core::mem;
use index_ext::Int;
use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;

use crate::UnixFileType;

/// The smallest buffer we hand to the kernel.
///
/// A record is the header, a name of at most 255 bytes, its terminating null byte and padding.
/// `getdents64` fails with `EINVAL` if not even one record fits.
pub const MIN_BUFFER: usize = 1 << 10;

/// A buffer for collecting results of `getdents`.
pub struct DirentBuf {
    inner: Box<[u8]>,
    /// The number of bytes the kernel wrote on the last call.
    filled: usize,
    /// The number of bytes already handed out as entries.
    consumed: usize,
}

/// A reference to a single entry.
pub struct Entry<'buf> {
    head: dirent64,
    /// The name, without its terminating null byte.
    name: &'buf [u8],
}

/// A consistency error of the result buffer.
#[derive(Debug, PartialEq)]
pub enum DirentErr {
    TooShort,
    InvalidLength,
    Unterminated,
}

/// The result of refilling the buffer.
#[derive(Debug, PartialEq)]
pub enum More {
    /// New entries were read.
    More,
    /// There are still unread entries, nothing was done.
    Blocked,
    /// The directory has no more entries.
    Done,
}

/// Hands out the unread entries, marking them as consumed.
pub struct Drain<'a> {
    remaining: &'a [u8],
    consumed: &'a mut usize,
}

/// This is just an ffi descriptor type.
#[allow(non_camel_case_types, dead_code)]
// FFI type
// Be careful that this struct is actually zeroable and a Pod. In particular we want to avoid
// having any padding bytes.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct dirent64 {
    d_ino: u64,
    d_off: i64,
    /// The length of the record, including the name and its padding.
    d_reclen: libc::c_ushort,
    /// The type indicated by the kernel, or unknown.
    d_type: libc::c_char,
    /// var length name, but we also have an array of such structs.
    d_name: [libc::c_char; 0],
}

// SAFETY: no padding due to packed.
unsafe impl Zeroable for dirent64 {}
unsafe impl Pod for dirent64 {}

impl DirentBuf {
    pub fn with_size(length: usize) -> Self {
        let length = length.clamp(MIN_BUFFER, libc::c_int::MAX as usize);

        DirentBuf {
            inner: vec![0; length].into(),
            filled: 0,
            consumed: 0,
        }
    }

    /// Ask the kernel for the next batch of entries of `fd`.
    ///
    /// Refuses to overwrite entries that have not been drained yet.
    pub fn fill_buf(&mut self, fd: libc::c_int) -> io::Result<More> {
        if self.consumed < self.filled {
            return Ok(More::Blocked);
        }

        self.filled = 0;
        self.consumed = 0;

        let read = sys_getdents64(fd, &mut self.inner);
        if read < 0 {
            return Err(io::Error::last_os_error());
        }

        self.filled = read as usize;
        Ok(match self.filled {
            0 => More::Done,
            _ => More::More,
        })
    }

    pub fn drain(&mut self) -> Drain<'_> {
        Drain {
            remaining: &self.inner[self.consumed..self.filled],
            consumed: &mut self.consumed,
        }
    }
}

fn sys_getdents64(fd: libc::c_int, into: &mut [u8]) -> libc::c_long {
    // Buffer length was clamped on construction.
    let length = into.len() as libc::c_uint;
    unsafe {
        libc::syscall(
            libc::SYS_getdents64,
            fd,
            into.as_mut_ptr() as *mut libc::c_char,
            length,
        )
    }
}

impl<'buf> Entry<'buf> {
    /// Split the first record off the start of `buf`.
    ///
    /// Returns the entry and the length of its record.
    fn from_start(buf: &'buf [u8]) -> Result<(Self, usize), DirentErr> {
        let head_len = mem::size_of::<dirent64>();
        let speculate = buf.get(..head_len).ok_or(DirentErr::TooShort)?;
        let head: dirent64 = *bytemuck::from_bytes(speculate);
        let d_reclen = head.d_reclen;

        if usize::from(d_reclen) <= head_len {
            return Err(DirentErr::InvalidLength);
        }

        let record = buf.get_int(..d_reclen).ok_or(DirentErr::InvalidLength)?;
        let padded_name = &record[head_len..];
        let name_len = padded_name
            .iter()
            .position(|&byte| byte == 0)
            .ok_or(DirentErr::Unterminated)?;

        let entry = Entry {
            head,
            name: &padded_name[..name_len],
        };

        Ok((entry, usize::from(d_reclen)))
    }

    pub fn file_name(&self) -> &'buf OsStr {
        OsStr::from_bytes(self.name)
    }

    pub fn file_type(&self) -> Option<UnixFileType> {
        let d_type = self.head.d_type;
        UnixFileType::new(d_type)
    }

    /// Never recurse into current or parent directory.
    pub fn is_dot(&self) -> bool {
        self.name == b"." || self.name == b".."
    }
}

impl<'a> Iterator for Drain<'a> {
    type Item = Result<Entry<'a>, DirentErr>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }

        match Entry::from_start(self.remaining) {
            Ok((entry, len)) => {
                self.remaining = &self.remaining[len..];
                *self.consumed += len;
                Some(Ok(entry))
            }
            Err(err) => {
                // The rest of the buffer can not be trusted.
                *self.consumed += self.remaining.len();
                self.remaining = <&'_ [u8]>::default();
                Some(Err(err))
            }
        }
    }
}
