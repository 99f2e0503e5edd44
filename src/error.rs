/*
    deb-ar - Rust library for taking apart and rebuilding Deb packages
    Copyright (C) 2023  NotSludgeBomb

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU General Public License as published by
    the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU General Public License for more details.

    You should have received a copy of the GNU General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using [`DebError`].
pub type Result<T> = std::result::Result<T, DebError>;

/// Errors produced while reading, writing or (re)assembling Deb packages.
#[derive(Error, Debug)]
pub enum DebError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream does not start with `!<arch>\n`.
    #[error("not an ar archive (bad magic)")]
    NotAnArArchive,

    /// A member header is corrupt or incomplete.
    #[error("malformed ar header: {0}")]
    MalformedHeader(String),

    /// A header field holds bytes outside printable ASCII.
    #[error("invalid encoding in ar header field `{field}`")]
    InvalidEncoding {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A member's payload ends before its declared size.
    #[error("truncated ar archive: member `{name}` declares {expected} bytes, {actual} available")]
    TruncatedArchive {
        /// Member name from the header.
        name: String,
        /// Size declared in the header.
        expected: u64,
        /// Bytes actually read.
        actual: u64,
    },

    /// A member name does not fit the 16-byte name field.
    #[error("member name `{name}` is {len} bytes, the limit is 16")]
    NameTooLong {
        /// The rejected name.
        name: String,
        /// Its encoded length.
        len: usize,
    },

    /// A numeric value does not fit its fixed-width header field.
    #[error("value {value} does not fit the `{field}` header field")]
    FieldOverflow {
        /// Name of the field.
        field: &'static str,
        /// The rendered value.
        value: String,
    },

    /// A member name cannot be used as a plain file name.
    #[error("refusing to extract member with unsafe name `{0}`")]
    UnsafeMemberName(String),

    /// The tar collaborator failed to unpack a member.
    #[error("failed to unpack `{member}`: {source}")]
    TarUnpack {
        /// Member name.
        member: String,
        /// Cause.
        #[source]
        source: std::io::Error,
    },

    /// The tar collaborator failed to pack a directory.
    #[error("failed to pack `{}`: {source}", dir.display())]
    TarPack {
        /// Source directory.
        dir: PathBuf,
        /// Cause.
        #[source]
        source: std::io::Error,
    },

    /// The writer already emitted the archive magic.
    #[error("ar writer is already initialized")]
    AlreadyInitialized,
}

impl DebError {
    /// Returns `true` for errors that only spoil a single member and leave
    /// the ar framing intact, so disassembly can carry on past them.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DebError::TarUnpack { .. })
    }
}
