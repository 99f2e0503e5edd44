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

//! Packing and unpacking of the compressed tarballs inside a package.

use std::io::{BufRead, BufReader, Error, ErrorKind, Read, Write};
use std::path::Path;

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use log::debug;
use xz::read::XzDecoder;
use xz::write::XzEncoder;

use crate::shared::DebCompression;

/// The tar and compression work the package assembler hands off.
///
/// [`NativeTar`] is the implementation used unless another is supplied, for
/// example one that records calls in tests.
pub trait TarCodec {
    /// Unpacks a possibly compressed tar stream into `dest`, returning the
    /// compression that was detected.
    fn unpack(&self, input: &mut dyn Read, dest: &Path) -> std::io::Result<DebCompression>;

    /// Writes the contents of `src` as a tar stream compressed with
    /// `compression`. Entry paths are relative to `src`.
    fn pack(&self, src: &Path, output: &mut dyn Write, compression: DebCompression) -> std::io::Result<()>;
}

/// Pure Rust tar codec built on the `tar` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTar;

impl TarCodec for NativeTar {
    fn unpack(&self, input: &mut dyn Read, dest: &Path) -> std::io::Result<DebCompression> {
        let mut buffered = BufReader::new(input);
        // Peeking doesn't consume, so the decoder still sees the magic
        let compression = DebCompression::detect(buffered.fill_buf()?);
        debug!("unpacking {} tarball into {}", compression.as_str(), dest.display());

        let decoded: Box<dyn Read + '_> = match compression {
            DebCompression::None => Box::new(buffered),
            DebCompression::Gzip => Box::new(MultiGzDecoder::new(buffered)),
            DebCompression::Xz => Box::new(XzDecoder::new(buffered)),
            DebCompression::Bzip2 => Box::new(BzDecoder::new(buffered)),
            DebCompression::Zstd => Box::new(zstd::stream::read::Decoder::with_buffer(buffered)?),
        };

        std::fs::create_dir_all(dest)?;
        let mut archive = tar::Archive::new(decoded);
        archive.set_preserve_permissions(true);
        archive.unpack(dest)?;
        Ok(compression)
    }

    fn pack(&self, src: &Path, output: &mut dyn Write, compression: DebCompression) -> std::io::Result<()> {
        if !src.is_dir() {
            return Err(Error::new(
                ErrorKind::NotFound,
                format!("{} is not a directory", src.display()),
            ));
        }

        // Compressing tar archive into `output`
        match compression {
            DebCompression::None => {
                build_tar(src, &mut *output)?;
            }
            DebCompression::Gzip => {
                let encoder = build_tar(src, GzEncoder::new(&mut *output, flate2::Compression::best()))?;
                encoder.finish()?;
            }
            DebCompression::Xz => {
                let encoder = build_tar(src, XzEncoder::new(&mut *output, 9))?;
                encoder.finish()?;
            }
            DebCompression::Bzip2 => {
                let encoder = build_tar(src, BzEncoder::new(&mut *output, bzip2::Compression::best()))?;
                encoder.finish()?;
            }
            DebCompression::Zstd => {
                let encoder = build_tar(src, zstd::stream::write::Encoder::new(&mut *output, 0)?)?;
                encoder.finish()?;
            }
        }
        Ok(())
    }
}

// Writes every entry below `src` into a tar stream and hands back the writer
fn build_tar<W: Write>(src: &Path, output: W) -> std::io::Result<W> {
    let mut builder = tar::Builder::new(output);
    // Packages ship symlinks as symlinks
    builder.follow_symlinks(false);

    for entry_result in walkdir::WalkDir::new(src)
        .min_depth(1)
        .sort_by_file_name()
    {
        let entry = entry_result?;
        // Cutting the `src` directory out of the path
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::new(ErrorKind::Other, e))?;
        if entry.file_type().is_dir() {
            builder.append_dir(relative, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), relative)?;
        }
        debug!("  added {}", relative.display());
    }

    builder.into_inner()
}
