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

//! Read and write the `ar` container that wraps every Deb package.
//!
//! Only the plain fixed-width header layout used by dpkg is understood:
//!
//! | field     | offset | width | encoding                 |
//! |-----------|--------|-------|--------------------------|
//! | name      | 0      | 16    | ASCII, space padded      |
//! | mtime     | 16     | 12    | decimal, space padded    |
//! | uid       | 28     | 6     | decimal, space padded    |
//! | gid       | 34     | 6     | decimal, space padded    |
//! | mode      | 40     | 8     | octal, space padded      |
//! | size      | 48     | 10    | decimal, space padded    |
//! | terminator| 58     | 2     | `` `\n ``                |
//!
//! Each payload is followed by a single `\n` when its size is odd. A GNU
//! style trailing `/` on a name is dropped when reading.
//!
//! # Example
//!
//! ```
//! use deb_ar::ar::*;
//!
//! fn main() -> deb_ar::Result<()> {
//!     let mut writer = ArWriter::create(Vec::new())?;
//!     writer.add_member("debian-binary", b"2.0\n", &MemberOptions::default())?;
//!     let bytes = writer.into_inner()?;
//!
//!     for member in ArReader::new(bytes.as_slice())? {
//!         let member = member?;
//!         println!("{} ({} bytes)", member.name(), member.data().len());
//!     }
//!     Ok(())
//! }
//! ```

use std::io::{self, ErrorKind, Read, Write};

use log::{debug, warn};

use crate::error::{DebError, Result};

/// Global signature at the start of every ar archive.
pub const MAGIC: &[u8; 8] = b"!<arch>\n";

/// Size of a member header in bytes.
pub const HEADER_LEN: usize = 60;

/// Widest name the header can hold.
pub const NAME_LEN: usize = 16;

const TERMINATOR: &[u8; 2] = b"`\n";
const PAD_BYTE: u8 = b'\n';

// (offset, width) of each header field
const NAME_FIELD: (usize, usize) = (0, NAME_LEN);
const MTIME_FIELD: (usize, usize) = (16, 12);
const UID_FIELD: (usize, usize) = (28, 6);
const GID_FIELD: (usize, usize) = (34, 6);
const MODE_FIELD: (usize, usize) = (40, 8);
const SIZE_FIELD: (usize, usize) = (48, 10);
const TERMINATOR_FIELD: (usize, usize) = (58, 2);

/// What to do with a member name longer than [`NAME_LEN`] bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamePolicy {
    /// Fail with [`DebError::NameTooLong`].
    #[default]
    Reject,
    /// Cut the name down to 16 bytes, as older tools silently did.
    Truncate,
}

/// Metadata of one ar member, mirroring the on-disk header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArHeader {
    name: String,
    mtime: u64,
    uid: u32,
    gid: u32,
    mode: u32,
    size: u64,
}

impl ArHeader {
    /// Creates a header for a member called `name` holding `size` bytes.
    ///
    /// Owner and group default to `0`, the mode to `0o644` and the
    /// timestamp to the epoch.
    pub fn new(name: &str, size: u64) -> Self {
        Self {
            name: name.to_string(),
            mtime: 0,
            uid: 0,
            gid: 0,
            mode: 0o644,
            size,
        }
    }

    /// Sets the modification time, in seconds since the epoch.
    pub fn set_mtime(mut self, mtime: u64) -> Self {
        self.mtime = mtime;
        self
    }

    /// Sets the owner id.
    pub fn set_uid(mut self, uid: u32) -> Self {
        self.uid = uid;
        self
    }

    /// Sets the group id.
    pub fn set_gid(mut self, gid: u32) -> Self {
        self.gid = gid;
        self
    }

    /// Sets the permission bits.
    pub fn set_mode(mut self, mode: u32) -> Self {
        self.mode = mode;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes this member occupies on disk: header, payload and padding.
    pub fn encoded_len(&self) -> u64 {
        HEADER_LEN as u64 + self.size + self.size % 2
    }

    /// Serializes the header into its fixed 60-byte form.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty or not printable ASCII, if the name is too
    /// long under [`NamePolicy::Reject`], or if a number is too wide for its
    /// field.
    pub fn encode(&self, policy: NamePolicy) -> Result<[u8; HEADER_LEN]> {
        let mut raw = [b' '; HEADER_LEN];
        put_field(&mut raw, NAME_FIELD, "name", self.encoded_name(policy)?)?;
        put_field(&mut raw, MTIME_FIELD, "mtime", &self.mtime.to_string())?;
        put_field(&mut raw, UID_FIELD, "uid", &self.uid.to_string())?;
        put_field(&mut raw, GID_FIELD, "gid", &self.gid.to_string())?;
        put_field(&mut raw, MODE_FIELD, "mode", &format!("{:o}", self.mode))?;
        put_field(&mut raw, SIZE_FIELD, "size", &self.size.to_string())?;
        raw[TERMINATOR_FIELD.0..].copy_from_slice(TERMINATOR);
        Ok(raw)
    }

    /// Parses a 60-byte header.
    ///
    /// Blank timestamp, owner, group and mode fields read as `0`; a blank
    /// size does not.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() != HEADER_LEN {
            return Err(DebError::MalformedHeader(format!(
                "expected {} header bytes, found {}",
                HEADER_LEN,
                raw.len()
            )));
        }
        if &raw[TERMINATOR_FIELD.0..] != TERMINATOR {
            return Err(DebError::MalformedHeader(format!(
                "bad header terminator {:?}",
                String::from_utf8_lossy(&raw[TERMINATOR_FIELD.0..])
            )));
        }

        let name = decode_name(field(raw, NAME_FIELD))?;
        let size = parse_number(field(raw, SIZE_FIELD), "size", 10)?
            .ok_or_else(|| DebError::MalformedHeader(format!("member `{}` has no size", name)))?;

        Ok(Self {
            mtime: parse_number(field(raw, MTIME_FIELD), "mtime", 10)?.unwrap_or(0),
            uid: narrow(parse_number(field(raw, UID_FIELD), "uid", 10)?, "uid")?,
            gid: narrow(parse_number(field(raw, GID_FIELD), "gid", 10)?, "gid")?,
            mode: narrow(parse_number(field(raw, MODE_FIELD), "mode", 8)?, "mode")?,
            name,
            size,
        })
    }

    fn encoded_name(&self, policy: NamePolicy) -> Result<&str> {
        if self.name.is_empty() {
            return Err(DebError::MalformedHeader("empty member name".to_string()));
        }
        if !self.name.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(DebError::InvalidEncoding { field: "name" });
        }
        if self.name.len() <= NAME_LEN {
            return Ok(&self.name);
        }
        match policy {
            NamePolicy::Reject => Err(DebError::NameTooLong {
                name: self.name.clone(),
                len: self.name.len(),
            }),
            NamePolicy::Truncate => {
                // Safe to slice, the name is pure ASCII at this point
                let truncated = &self.name[..NAME_LEN];
                warn!("truncating member name `{}` to `{}`", self.name, truncated);
                Ok(truncated)
            }
        }
    }
}

fn field(raw: &[u8], (offset, width): (usize, usize)) -> &[u8] {
    &raw[offset..offset + width]
}

// Writes `value` left-justified into its field; the rest stays space padded
fn put_field(
    raw: &mut [u8; HEADER_LEN],
    (offset, width): (usize, usize),
    name: &'static str,
    value: &str,
) -> Result<()> {
    if value.len() > width {
        return Err(DebError::FieldOverflow {
            field: name,
            value: value.to_string(),
        });
    }
    raw[offset..offset + value.len()].copy_from_slice(value.as_bytes());
    Ok(())
}

fn decode_name(raw: &[u8]) -> Result<String> {
    if !raw.is_ascii() {
        return Err(DebError::InvalidEncoding { field: "name" });
    }
    let end = raw.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let mut name = &raw[..end];
    // GNU ar terminates names with a slash
    if name.len() > 1 && name.ends_with(b"/") {
        name = &name[..name.len() - 1];
    }
    if name.is_empty() {
        return Err(DebError::MalformedHeader("empty member name".to_string()));
    }
    if name.iter().any(|b| b.is_ascii_control()) {
        return Err(DebError::InvalidEncoding { field: "name" });
    }
    Ok(name.iter().map(|&b| char::from(b)).collect())
}

// Parses a space padded number, returning `None` for an all-blank field
fn parse_number(raw: &[u8], name: &'static str, radix: u32) -> Result<Option<u64>> {
    let text = std::str::from_utf8(raw).map_err(|_| DebError::InvalidEncoding { field: name })?;
    let text = text.trim_matches(' ');
    if text.is_empty() {
        return Ok(None);
    }
    let malformed = || DebError::MalformedHeader(format!("`{}` field is not a number: {:?}", name, text));
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    u64::from_str_radix(text, radix)
        .map(Some)
        .map_err(|_| malformed())
}

fn narrow(value: Option<u64>, name: &'static str) -> Result<u32> {
    let value = value.unwrap_or(0);
    u32::try_from(value).map_err(|_| DebError::FieldOverflow {
        field: name,
        value: value.to_string(),
    })
}

// Reads until `buf` is full or the stream ends, returning the byte count
fn read_full<R: Read>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A member read from, or destined for, an ar archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArMember {
    header: ArHeader,
    data: Vec<u8>,
}

impl ArMember {
    /// Creates a member with default metadata whose size matches `data`.
    pub fn new(name: &str, data: Vec<u8>) -> Self {
        Self {
            header: ArHeader::new(name, data.len() as u64),
            data,
        }
    }

    pub fn header(&self) -> &ArHeader {
        &self.header
    }

    pub fn name(&self) -> &str {
        self.header.name()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Streams the members of an ar archive in on-disk order.
///
/// The reader is also an [`Iterator`] over `Result<ArMember>`; it stops for
/// good after the first error, since member boundaries cannot be recovered
/// from a broken frame.
pub struct ArReader<R: Read> {
    inner: R,
    offset: u64,
    done: bool,
}

impl<R: Read> ArReader<R> {
    /// Opens `inner`, checking the archive magic.
    ///
    /// # Errors
    ///
    /// Returns [`DebError::NotAnArArchive`] if the first eight bytes are not
    /// `!<arch>\n`, which includes empty and shorter streams.
    pub fn new(mut inner: R) -> Result<Self> {
        let mut magic = [0u8; MAGIC.len()];
        let read = read_full(&mut inner, &mut magic)?;
        if read != MAGIC.len() || &magic != MAGIC {
            return Err(DebError::NotAnArArchive);
        }
        Ok(Self {
            inner,
            offset: MAGIC.len() as u64,
            done: false,
        })
    }

    /// Byte offset of the next unread header.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads the next member, or `None` once the archive is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`DebError::TruncatedArchive`] if the stream ends inside the
    /// payload; no partial member is returned. Fewer than 60 bytes left
    /// where a header should start simply ends the archive.
    pub fn next_member(&mut self) -> Result<Option<ArMember>> {
        let member = self.next_member_with(|header, payload| {
            // Capacity is capped so a lying size field can't force a huge allocation
            let mut data = Vec::with_capacity(header.size().min(1 << 20) as usize);
            payload.read_to_end(&mut data)?;
            Ok(data)
        })?;
        Ok(member.map(|(header, data)| ArMember { header, data }))
    }

    /// Reads the next header and skips over its payload without buffering it.
    pub fn next_header(&mut self) -> Result<Option<ArHeader>> {
        let member = self.next_member_with(|_, _| Ok(()))?;
        Ok(member.map(|(header, ())| header))
    }

    /// Reads the next header and lets `visit` stream the payload.
    ///
    /// `visit` sees a reader limited to the member's payload. Whatever it
    /// leaves unread is skipped, and the size check happens afterwards, so a
    /// truncated member still fails even if `visit` succeeded.
    pub fn next_member_with<T, F>(&mut self, visit: F) -> Result<Option<(ArHeader, T)>>
    where
        F: FnOnce(&ArHeader, &mut dyn Read) -> Result<T>,
    {
        self.guarded(|reader| {
            let header = match reader.read_header()? {
                Some(header) => header,
                None => return Ok(None),
            };
            let mut payload = (&mut reader.inner).take(header.size());
            let value = visit(&header, &mut payload)?;
            io::copy(&mut payload, &mut io::sink())?;
            let read = header.size() - payload.limit();
            reader.check_payload(&header, read)?;
            reader.consume_pad(&header)?;
            Ok(Some((header, value)))
        })
    }

    /// Reads members up to and including the first one matching `stop`.
    ///
    /// Useful when only the leading members of a package are needed, e.g.
    /// stopping at `control.tar.*` to skip the much larger data tarball.
    pub fn read_until<F>(&mut self, mut stop: F) -> Result<Vec<ArMember>>
    where
        F: FnMut(&ArHeader) -> bool,
    {
        let mut members = Vec::new();
        while let Some(member) = self.next_member()? {
            let matched = stop(member.header());
            members.push(member);
            if matched {
                break;
            }
        }
        Ok(members)
    }

    /// Returns the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }

    // Runs a read step, fusing the reader on the first failure
    fn guarded<T, F>(&mut self, step: F) -> Result<Option<T>>
    where
        F: FnOnce(&mut Self) -> Result<Option<T>>,
    {
        if self.done {
            return Ok(None);
        }
        let result = step(self);
        if !matches!(result, Ok(Some(_))) {
            self.done = true;
        }
        result
    }

    fn read_header(&mut self) -> Result<Option<ArHeader>> {
        let mut raw = [0u8; HEADER_LEN];
        let read = read_full(&mut self.inner, &mut raw)?;
        if read == 0 {
            debug!("end of ar archive at offset {}", self.offset);
            return Ok(None);
        }
        if read < HEADER_LEN {
            // Trailing junk shorter than a header ends the archive, as dpkg-deb does
            debug!("ignoring {} trailing bytes at offset {}", read, self.offset);
            return Ok(None);
        }
        let header = ArHeader::decode(&raw)?;
        debug!(
            "member `{}` ({} bytes) at offset {}",
            header.name(),
            header.size(),
            self.offset
        );
        self.offset += HEADER_LEN as u64;
        Ok(Some(header))
    }

    fn check_payload(&mut self, header: &ArHeader, read: u64) -> Result<()> {
        if read < header.size() {
            return Err(DebError::TruncatedArchive {
                name: header.name().to_string(),
                expected: header.size(),
                actual: read,
            });
        }
        self.offset += read;
        Ok(())
    }

    fn consume_pad(&mut self, header: &ArHeader) -> Result<()> {
        if header.size() % 2 == 0 {
            return Ok(());
        }
        let mut pad = [0u8; 1];
        match read_full(&mut self.inner, &mut pad)? {
            // A missing pad byte right at the end of the stream is tolerated
            0 => debug!("no pad byte after final member `{}`", header.name()),
            _ => {
                if pad[0] != PAD_BYTE {
                    debug!("unexpected pad byte {:#04x} after `{}`", pad[0], header.name());
                }
                self.offset += 1;
            }
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ArReader<R> {
    type Item = Result<ArMember>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_member().transpose()
    }
}

/// Per-member metadata accepted by [`ArWriter::add_member`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberOptions {
    /// Timestamp override; the writer's default mtime is used when `None`.
    pub mtime: Option<u64>,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

impl Default for MemberOptions {
    fn default() -> Self {
        Self {
            mtime: None,
            uid: 0,
            gid: 0,
            mode: 0o644,
        }
    }
}

/// Appends members to an ar archive in a single forward pass.
pub struct ArWriter<W: Write> {
    inner: W,
    initialized: bool,
    name_policy: NamePolicy,
    default_mtime: u64,
    written: u64,
}

impl<W: Write> ArWriter<W> {
    /// Wraps `inner` without writing anything yet.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            initialized: false,
            name_policy: NamePolicy::default(),
            default_mtime: 0,
            written: 0,
        }
    }

    /// Wraps `inner` and immediately writes the archive magic.
    pub fn create(inner: W) -> Result<Self> {
        let mut writer = Self::new(inner);
        writer.init()?;
        Ok(writer)
    }

    /// Sets how over-long member names are handled.
    pub fn set_name_policy(mut self, policy: NamePolicy) -> Self {
        self.name_policy = policy;
        self
    }

    /// Sets the timestamp given to members that don't carry their own.
    pub fn set_default_mtime(mut self, mtime: u64) -> Self {
        self.default_mtime = mtime;
        self
    }

    /// Writes the archive magic.
    ///
    /// # Errors
    ///
    /// Returns [`DebError::AlreadyInitialized`] if the magic was already
    /// written, either by an earlier call or by [`ArWriter::add_member`].
    pub fn init(&mut self) -> Result<()> {
        if self.initialized {
            return Err(DebError::AlreadyInitialized);
        }
        self.inner.write_all(MAGIC)?;
        self.initialized = true;
        self.written += MAGIC.len() as u64;
        Ok(())
    }

    /// Appends a member and returns the header as it was written, so a
    /// truncated name shows up truncated. Members land on disk in call order.
    ///
    /// The header is validated before anything is written, so a rejected
    /// name leaves the stream untouched.
    pub fn add_member(&mut self, name: &str, payload: &[u8], options: &MemberOptions) -> Result<ArHeader> {
        let header = ArHeader::new(name, payload.len() as u64)
            .set_mtime(options.mtime.unwrap_or(self.default_mtime))
            .set_uid(options.uid)
            .set_gid(options.gid)
            .set_mode(options.mode);
        let raw = header.encode(self.name_policy)?;
        let written = ArHeader::decode(&raw)?;

        if !self.initialized {
            self.init()?;
        }
        self.inner.write_all(&raw)?;
        self.inner.write_all(payload)?;
        if payload.len() % 2 == 1 {
            self.inner.write_all(&[PAD_BYTE])?;
        }
        self.written += header.encoded_len();
        debug!("wrote member `{}` ({} bytes)", written.name(), payload.len());
        Ok(written)
    }

    /// Total bytes emitted so far, magic included.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Flushes and returns the underlying stream.
    ///
    /// An archive with no members still gets its magic.
    pub fn into_inner(mut self) -> Result<W> {
        if !self.initialized {
            self.init()?;
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}
