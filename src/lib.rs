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

//! A pure Rust library for taking apart and rebuilding Deb packages.
//!
//! deb-ar owns the `ar` container format outright (see [`ar`]) and builds the
//! package-level operations on top of it (see [`package`]). The compressed
//! tarballs inside a package are handled through the [`tarball::TarCodec`]
//! seam.

use std::path::Path;

pub mod ar;
mod error;
pub mod package;
mod shared;
pub mod tarball;
#[cfg(test)]
mod test;

pub use error::*;
pub use shared::*;

/// Disassembles the package at `deb` into `out_dir` with default settings.
///
/// See [`package::PackageAssembler::disassemble`].
pub fn disassemble<P, Q>(deb: P, out_dir: Q) -> Result<package::DisassembleReport>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    package::PackageAssembler::new().disassemble(deb, out_dir)
}

/// Reassembles the tree at `src_dir` into a package at `out` with default
/// settings.
///
/// See [`package::PackageAssembler::reassemble`].
pub fn reassemble<P, Q>(src_dir: P, out: Q) -> Result<package::ReassembleReport>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    package::PackageAssembler::new().reassemble(src_dir, out)
}
