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

//! Take Deb packages apart into a directory tree and put them back together.
//!
//! Disassembly produces this layout, which reassembly reads back:
//!
//! ```text
//! out_dir/
//!     ar_contents/   raw ar members, one file per member
//!     control/       unpacked control.tar.*
//!     data/          unpacked data.tar.*
//! ```
//!
//! # Example
//!
//! ```
//! use deb_ar::package::PackageAssembler;
//!
//! fn main() -> deb_ar::Result<()> {
//!     let assembler = PackageAssembler::new();
//!     let report = assembler.disassemble("example.deb", "extracted")?;
//!     for failure in report.failures() {
//!         eprintln!("warning: {}", failure);
//!     }
//!
//!     // ...edit files under extracted/control and extracted/data...
//!
//!     assembler.reassemble("extracted", "example-repacked.deb")?;
//!     Ok(())
//! }
//! ```

use std::fs;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tempfile::NamedTempFile;

use crate::ar::{ArHeader, ArReader, ArWriter, MemberOptions};
use crate::error::{DebError, Result};
use crate::shared::*;
use crate::tarball::{NativeTar, TarCodec};

/// Directory holding the raw ar members.
pub const AR_CONTENTS_DIR: &str = "ar_contents";
/// Directory holding the unpacked control tarball.
pub const CONTROL_DIR: &str = "control";
/// Directory holding the unpacked data tarball.
pub const DATA_DIR: &str = "data";

// Compression each rebuilt tarball gets; dpkg is happiest with these
const CONTROL_COMPRESSION: DebCompression = DebCompression::Gzip;
const DATA_COMPRESSION: DebCompression = DebCompression::Xz;

/// Progress of a single disassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisassembleState {
    Opened,
    MagicChecked,
    MemberExtracted,
    Done,
    Failed,
}

// Records state transitions so a failed run says how far it got
#[derive(Debug, Default)]
struct StateLog {
    state: Option<DisassembleState>,
    extracted: usize,
}

impl StateLog {
    fn advance(&mut self, next: DisassembleState) {
        debug!("disassemble: {:?} -> {:?}", self.state, next);
        if next == DisassembleState::MemberExtracted {
            self.extracted += 1;
        }
        self.state = Some(next);
    }
}

/// One member written out by [`PackageAssembler::disassemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMember {
    header: ArHeader,
    kind: MemberKind,
    path: PathBuf,
    compression: Option<DebCompression>,
}

impl ExtractedMember {
    pub fn name(&self) -> &str {
        self.header.name()
    }

    pub fn size(&self) -> u64 {
        self.header.size()
    }

    pub fn header(&self) -> &ArHeader {
        &self.header
    }

    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    // Where the raw member was written
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The compression detected while unpacking, if this member was a
    /// tarball that unpacked cleanly.
    pub fn compression(&self) -> Option<DebCompression> {
        self.compression
    }
}

/// Outcome of [`PackageAssembler::disassemble`].
#[derive(Debug, Default)]
pub struct DisassembleReport {
    state: Option<DisassembleState>,
    members: Vec<ExtractedMember>,
    failures: Vec<DebError>,
}

impl DisassembleReport {
    /// Final state of the run.
    pub fn state(&self) -> Option<DisassembleState> {
        self.state
    }

    pub fn members(&self) -> &[ExtractedMember] {
        &self.members
    }

    /// Tarball members that could not be unpacked.
    pub fn failures(&self) -> &[DebError] {
        &self.failures
    }

    /// Names of the members listed in [`DisassembleReport::failures`].
    pub fn failed_members(&self) -> Vec<&str> {
        self.failures
            .iter()
            .filter_map(|failure| match failure {
                DebError::TarUnpack { member, .. } => Some(member.as_str()),
                _ => None,
            })
            .collect()
    }

    /// True if at least one member made it to disk.
    pub fn is_success(&self) -> bool {
        !self.members.is_empty()
    }

    /// True if every tarball unpacked as well.
    pub fn is_complete(&self) -> bool {
        self.is_success() && self.failures.is_empty()
    }
}

/// Outcome of [`PackageAssembler::reassemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassembleReport {
    output: PathBuf,
    members: Vec<ArHeader>,
    size: u64,
}

impl ReassembleReport {
    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Headers of the written members, in archive order.
    pub fn members(&self) -> &[ArHeader] {
        &self.members
    }

    /// Size of the finished package in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Splits packages into their members and builds them back up.
///
/// The tar work is delegated to a [`TarCodec`], [`NativeTar`] by default.
#[derive(Debug, Clone, Default)]
pub struct PackageAssembler<C: TarCodec = NativeTar> {
    tar: C,
    mtime: Option<u64>,
}

impl PackageAssembler<NativeTar> {
    /// Creates an assembler using the built-in tar codec.
    pub fn new() -> Self {
        Self {
            tar: NativeTar,
            mtime: None,
        }
    }
}

impl<C: TarCodec> PackageAssembler<C> {
    /// Swaps in a different tar codec.
    pub fn with_tar_codec<T: TarCodec>(self, tar: T) -> PackageAssembler<T> {
        PackageAssembler {
            tar,
            mtime: self.mtime,
        }
    }

    /// Sets the timestamp stamped on rebuilt members.
    ///
    /// Without it, the current time is used.
    pub fn set_mtime(mut self, mtime: u64) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Extracts every member of the package at `deb` into `out_dir`.
    ///
    /// Members land in `out_dir/ar_contents`, then `control.tar.*` and
    /// `data.tar.*` are unpacked into `out_dir/control` and `out_dir/data`.
    ///
    /// # Errors
    ///
    /// Any problem with the ar framing aborts the whole run. A tarball that
    /// fails to unpack does not; it is logged and listed in the report's
    /// [`failures`](DisassembleReport::failures) instead.
    pub fn disassemble<P, Q>(&self, deb: P, out_dir: Q) -> Result<DisassembleReport>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let mut states = StateLog::default();
        match self.run_disassemble(deb.as_ref(), out_dir.as_ref(), &mut states) {
            Ok(mut report) => {
                states.advance(DisassembleState::Done);
                report.state = states.state;
                info!(
                    "extracted {} members, {} failed to unpack",
                    states.extracted,
                    report.failures.len()
                );
                Ok(report)
            }
            Err(e) => {
                states.advance(DisassembleState::Failed);
                debug!("disassemble failed after {} members", states.extracted);
                Err(e)
            }
        }
    }

    fn run_disassemble(&self, deb: &Path, out_dir: &Path, states: &mut StateLog) -> Result<DisassembleReport> {
        let file = fs::File::open(deb)?;
        states.advance(DisassembleState::Opened);
        let mut reader = ArReader::new(BufReader::new(file))?;
        states.advance(DisassembleState::MagicChecked);

        let ar_dir = out_dir.join(AR_CONTENTS_DIR);
        fs::create_dir_all(&ar_dir)?;

        let mut report = DisassembleReport::default();
        while let Some((header, (staged, path))) = reader.next_member_with(|header, payload| {
            let path = ar_dir.join(checked_member_name(header.name())?);
            info!("extracting {} ({} bytes)", header.name(), header.size());
            // Staged beside the target and deleted on drop, so a truncated
            // payload never shows up under its real name
            let mut staged = NamedTempFile::new_in(&ar_dir)?;
            {
                let mut out = BufWriter::new(staged.as_file_mut());
                io::copy(payload, &mut out)?;
                out.flush()?;
            }
            Ok((staged, path))
        })? {
            staged.persist(&path).map_err(|e| DebError::Io(e.error))?;
            states.advance(DisassembleState::MemberExtracted);
            report.members.push(ExtractedMember {
                kind: MemberKind::classify(header.name()),
                header,
                path,
                compression: None,
            });
        }

        // Unpacking tarballs only once the whole ar frame has been read
        for member in report.members.iter_mut() {
            let dir_name = match member.kind.dir_name() {
                Some(dir_name) => dir_name,
                None => continue,
            };
            match self.unpack_member(member, &out_dir.join(dir_name)) {
                Ok(compression) => member.compression = Some(compression),
                Err(e) if e.is_recoverable() => {
                    warn!("{}", e);
                    report.failures.push(e);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    fn unpack_member(&self, member: &ExtractedMember, dest: &Path) -> Result<DebCompression> {
        let mut file = fs::File::open(&member.path)?;
        info!("unpacking {} into {}", member.name(), dest.display());
        self.tar
            .unpack(&mut file, dest)
            .map_err(|source| DebError::TarUnpack {
                member: member.name().to_string(),
                source,
            })
    }

    /// Builds a package at `out` from a directory laid out by
    /// [`PackageAssembler::disassemble`].
    ///
    /// Members are always written as `debian-binary`, `control.tar.gz`, then
    /// `data.tar.xz`. A missing `ar_contents/debian-binary` is replaced with
    /// `2.0\n`.
    ///
    /// The package is written to a temporary file beside `out` and only
    /// renamed into place once complete, so a failure never leaves a
    /// half-written package behind.
    pub fn reassemble<P, Q>(&self, src_dir: P, out: Q) -> Result<ReassembleReport>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let (src_dir, out) = (src_dir.as_ref(), out.as_ref());

        let debian_binary = match fs::read(src_dir.join(AR_CONTENTS_DIR).join(DEBIAN_BINARY)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("no {} found, writing version 2.0", DEBIAN_BINARY);
                DEBIAN_BINARY_CONTENTS.to_vec()
            }
            Err(e) => return Err(e.into()),
        };
        let control = self.pack_dir(&src_dir.join(CONTROL_DIR), CONTROL_COMPRESSION)?;
        let data = self.pack_dir(&src_dir.join(DATA_DIR), DATA_COMPRESSION)?;

        let members = [
            (DEBIAN_BINARY.to_string(), debian_binary),
            (format!("control.tar{}", CONTROL_COMPRESSION.extension()), control),
            (format!("data.tar{}", DATA_COMPRESSION.extension()), data),
        ];

        let parent = match out.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;
        // Dropped, and so deleted, on every early return below
        let temp = NamedTempFile::new_in(parent)?;

        let mtime = self.mtime.unwrap_or_else(now);
        let options = MemberOptions::default();
        let mut headers = Vec::with_capacity(members.len());
        let size = {
            let mut writer = ArWriter::create(BufWriter::new(temp.as_file()))?.set_default_mtime(mtime);
            for (name, payload) in &members {
                info!("adding {} ({} bytes)", name, payload.len());
                headers.push(writer.add_member(name, payload, &options)?);
            }
            let size = writer.bytes_written();
            writer.into_inner()?;
            size
        };
        temp.as_file().sync_all()?;
        temp.persist(out).map_err(|e| DebError::Io(e.error))?;
        info!("wrote {} ({} bytes)", out.display(), size);

        Ok(ReassembleReport {
            output: out.to_path_buf(),
            members: headers,
            size,
        })
    }

    fn pack_dir(&self, dir: &Path, compression: DebCompression) -> Result<Vec<u8>> {
        info!("packing {} with {}", dir.display(), compression.as_str());
        let mut buf = Vec::new();
        self.tar
            .pack(dir, &mut buf, compression)
            .map_err(|source| DebError::TarPack {
                dir: dir.to_path_buf(),
                source,
            })?;
        Ok(buf)
    }
}

/// Lists the member headers of an ar archive without buffering payloads.
pub fn list_members<R: Read>(input: R) -> Result<Vec<ArHeader>> {
    let mut reader = ArReader::new(input)?;
    let mut headers = Vec::new();
    while let Some(header) = reader.next_header()? {
        headers.push(header);
    }
    Ok(headers)
}

// Member names become file names, so anything that could escape the
// extraction directory is refused
fn checked_member_name(name: &str) -> Result<&str> {
    if name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(DebError::UnsafeMemberName(name.to_string()));
    }
    Ok(name)
}

fn now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}
