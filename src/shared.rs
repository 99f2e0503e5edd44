/*
    deb-ar - Rust library for taking apart and rebuilding Deb packages
    Copyright (C) 2022  NotSludgeBomb

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

/// Name of the version-stamp member that leads every Deb package.
pub const DEBIAN_BINARY: &str = "debian-binary";

/// Contents written for `debian-binary` when none is supplied.
pub const DEBIAN_BINARY_CONTENTS: &[u8] = b"2.0\n";

// Magic numbers used to sniff a tarball's compression
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const XZ_MAGIC: &[u8] = &[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00];
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

// Used to configure which compression format is used for data and control archives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebCompression {
    None,
    Gzip,
    Xz,
    Bzip2,
    Zstd,
}

impl DebCompression {
    // Converts DebCompression to &str
    pub fn as_str(&self) -> &str {
        match self {
            DebCompression::None => "none",
            DebCompression::Gzip => "gzip",
            DebCompression::Xz => "xz",
            DebCompression::Bzip2 => "bzip2",
            DebCompression::Zstd => "zstd",
        }
    }

    // The suffix used for `control.tar` and `data.tar` members
    pub fn extension(&self) -> &str {
        match self {
            DebCompression::None => "",
            DebCompression::Gzip => ".gz",
            DebCompression::Xz => ".xz",
            DebCompression::Bzip2 => ".bz2",
            DebCompression::Zstd => ".zst",
        }
    }

    /// Guesses the compression of a tarball from its leading bytes.
    ///
    /// Member names are never trusted for this, since repackers routinely
    /// leave a stale extension behind. Anything without a known magic number
    /// is assumed to be a plain tar stream.
    pub fn detect(head: &[u8]) -> Self {
        if head.starts_with(XZ_MAGIC) {
            DebCompression::Xz
        } else if head.starts_with(ZSTD_MAGIC) {
            DebCompression::Zstd
        } else if head.starts_with(GZIP_MAGIC) {
            DebCompression::Gzip
        } else if head.starts_with(BZIP2_MAGIC) {
            DebCompression::Bzip2
        } else {
            DebCompression::None
        }
    }
}

// The role a member plays inside a Deb package, decided by its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Control,
    Data,
    Passthrough,
}

impl MemberKind {
    // Classifies an ar member by its name prefix
    pub fn classify(name: &str) -> Self {
        if name.starts_with("control.tar") {
            MemberKind::Control
        } else if name.starts_with("data.tar") {
            MemberKind::Data
        } else {
            MemberKind::Passthrough
        }
    }

    // Directory under the extraction root that receives the unpacked tarball
    pub fn dir_name(&self) -> Option<&'static str> {
        match self {
            MemberKind::Control => Some(crate::package::CONTROL_DIR),
            MemberKind::Data => Some(crate::package::DATA_DIR),
            MemberKind::Passthrough => None,
        }
    }
}
