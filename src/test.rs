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

use std::fs;
use std::io::{Error, ErrorKind, Read, Write};
use std::path::Path;

use crate::ar::*;
use crate::package::*;
use crate::tarball::*;
use crate::*;

// Builds a header the way dpkg lays it out, independently of ArHeader::encode
fn raw_header(name: &str, size: &str) -> Vec<u8> {
    format!("{:<16}{:<12}{:<6}{:<6}{:<8}{:<10}`\n", name, 0, 0, 0, 644, size).into_bytes()
}

fn archive(members: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut writer = ArWriter::create(Vec::new())?;
    for (name, data) in members {
        writer.add_member(name, data, &MemberOptions::default())?;
    }
    writer.into_inner()
}

fn read_all(bytes: &[u8]) -> Result<Vec<ArMember>> {
    ArReader::new(bytes)?.collect()
}

// Lays out a directory the way `disassemble` leaves it
fn package_tree(root: &Path) -> std::io::Result<()> {
    fs::create_dir_all(root.join("control"))?;
    fs::create_dir_all(root.join("data/usr/bin"))?;
    fs::write(
        root.join("control/control"),
        "Package: hello\nVersion: 0.1.0\nArchitecture: amd64\n",
    )?;
    fs::write(root.join("data/usr/bin/hello"), "#!/usr/bin/bash\necho hello world!")?;
    Ok(())
}

#[test]
fn reads_two_member_archive() -> Result<()> {
    let mut bytes = MAGIC.to_vec();
    bytes.extend(raw_header("x", "3"));
    bytes.extend(b"abc\n");
    bytes.extend(raw_header("yy", "2"));
    bytes.extend(b"de");

    let mut reader = ArReader::new(bytes.as_slice())?;
    let members = reader.by_ref().collect::<Result<Vec<_>>>()?;

    assert_eq!(members.len(), 2);
    assert_eq!((members[0].name(), members[0].data()), ("x", &b"abc"[..]));
    assert_eq!((members[1].name(), members[1].data()), ("yy", &b"de"[..]));
    assert!(reader.into_inner().is_empty());
    Ok(())
}

#[test]
fn encodes_header_layout() -> Result<()> {
    let raw = ArHeader::new("debian-binary", 4)
        .set_mtime(1700000000)
        .set_mode(0o100644)
        .encode(NamePolicy::Reject)?;

    assert_eq!(raw.len(), HEADER_LEN);
    assert_eq!(
        &raw[..],
        &b"debian-binary   1700000000  0     0     100644  4         `\n"[..]
    );
    Ok(())
}

#[test]
fn header_round_trip() -> Result<()> {
    let headers = [
        ArHeader::new("debian-binary", 4),
        ArHeader::new("control.tar.gz", 0).set_mtime(1).set_uid(1000).set_gid(100),
        ArHeader::new("0123456789abcdef", 9999999999)
            .set_mtime(999999999999)
            .set_mode(0o100755),
    ];
    for header in headers {
        assert_eq!(ArHeader::decode(&header.encode(NamePolicy::Reject)?)?, header);
    }
    Ok(())
}

#[test]
fn archive_length_matches_padding_rule() -> Result<()> {
    let payloads: [&[u8]; 5] = [b"", b"a", b"ab", b"abc", b"abcdefg"];
    let names = ["empty", "one", "two", "three", "seven"];
    let members = names
        .iter()
        .copied()
        .zip(payloads.iter().copied())
        .collect::<Vec<_>>();
    let bytes = archive(&members)?;

    let expected = payloads
        .iter()
        .map(|p| HEADER_LEN + p.len() + p.len() % 2)
        .sum::<usize>()
        + MAGIC.len();
    assert_eq!(bytes.len(), expected);

    let read = read_all(&bytes)?;
    assert_eq!(read.len(), members.len());
    for (member, (name, data)) in read.iter().zip(&members) {
        assert_eq!(member.name(), *name);
        assert_eq!(member.data(), *data);
    }
    Ok(())
}

#[test]
fn rejects_bad_magic() {
    let inputs: [&[u8]; 4] = [b"", b"!<arch>", b"!<arch>X", b"PK\x03\x04 not an ar file"];
    for input in inputs {
        assert!(matches!(
            ArReader::new(input),
            Err(DebError::NotAnArArchive)
        ));
    }
}

#[test]
fn truncated_payload_yields_no_member() -> Result<()> {
    let mut bytes = MAGIC.to_vec();
    bytes.extend(raw_header("ok", "2"));
    bytes.extend(b"hi");
    bytes.extend(raw_header("short", "10"));
    bytes.extend(b"four");

    let mut reader = ArReader::new(bytes.as_slice())?;
    assert_eq!(reader.next().transpose()?.map(|m| m.into_data()), Some(b"hi".to_vec()));
    match reader.next() {
        Some(Err(DebError::TruncatedArchive { name, expected, actual })) => {
            assert_eq!(name, "short");
            assert_eq!(expected, 10);
            assert_eq!(actual, 4);
        }
        other => panic!("expected truncation error, got {:?}", other),
    }
    // The reader is fused once the frame is broken
    assert!(reader.next().is_none());
    Ok(())
}

#[test]
fn missing_final_pad_is_tolerated() -> Result<()> {
    let mut bytes = MAGIC.to_vec();
    bytes.extend(raw_header("odd", "3"));
    bytes.extend(b"abc");

    let members = read_all(&bytes)?;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].data(), b"abc");
    Ok(())
}

#[test]
fn short_trailing_header_ends_archive() -> Result<()> {
    let mut bytes = MAGIC.to_vec();
    bytes.extend(raw_header("x", "2"));
    bytes.extend(b"ab\n");
    let members = read_all(&bytes)?;
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].data(), b"ab");

    let mut bytes = MAGIC.to_vec();
    bytes.extend(&raw_header("cut", "1")[..30]);
    assert!(read_all(&bytes)?.is_empty());
    Ok(())
}

#[test]
fn strips_gnu_name_terminator() -> Result<()> {
    let mut bytes = MAGIC.to_vec();
    bytes.extend(raw_header("debian-binary/", "4"));
    bytes.extend(b"2.0\n");
    bytes.extend(raw_header("/", "0"));

    let members = read_all(&bytes)?;
    assert_eq!(members[0].name(), "debian-binary");
    // A bare slash is left alone
    assert_eq!(members[1].name(), "/");
    Ok(())
}

#[test]
fn rejects_corrupt_header_fields() {
    let bad_size = raw_header("x", "12a");
    assert!(matches!(ArHeader::decode(&bad_size), Err(DebError::MalformedHeader(_))));

    let blank_size = raw_header("x", "");
    assert!(matches!(ArHeader::decode(&blank_size), Err(DebError::MalformedHeader(_))));

    let mut bad_terminator = raw_header("x", "1");
    bad_terminator[59] = b' ';
    assert!(matches!(ArHeader::decode(&bad_terminator), Err(DebError::MalformedHeader(_))));

    let mut non_ascii = raw_header("x", "1");
    non_ascii[1] = 0xc3;
    assert!(matches!(
        ArHeader::decode(&non_ascii),
        Err(DebError::InvalidEncoding { field: "name" })
    ));

    assert!(matches!(ArHeader::decode(&non_ascii[..59]), Err(DebError::MalformedHeader(_))));
}

#[test]
fn name_policy() -> Result<()> {
    let long = "a-rather-long-member-name";

    let mut writer = ArWriter::create(Vec::new())?;
    assert!(matches!(
        writer.add_member(long, b"data", &MemberOptions::default()),
        Err(DebError::NameTooLong { len: 25, .. })
    ));
    // Nothing past the magic was written
    assert_eq!(writer.into_inner()?, MAGIC.to_vec());

    let mut writer = ArWriter::create(Vec::new())?.set_name_policy(NamePolicy::Truncate);
    let written = writer.add_member(long, b"data", &MemberOptions::default())?;
    assert_eq!(written.name(), &long[..NAME_LEN]);
    let members = read_all(&writer.into_inner()?)?;
    assert_eq!(members[0].header(), &written);
    Ok(())
}

#[test]
fn rejects_unencodable_names_and_values() {
    for name in ["", "has space", "tab\there", "caf\u{e9}"] {
        assert!(ArHeader::new(name, 0).encode(NamePolicy::Truncate).is_err());
    }
    assert!(matches!(
        ArHeader::new("x", 0).set_uid(1_000_000).encode(NamePolicy::Reject),
        Err(DebError::FieldOverflow { field: "uid", .. })
    ));
}

#[test]
fn writer_initializes_once() -> Result<()> {
    let mut writer = ArWriter::create(Vec::new())?;
    assert!(matches!(writer.init(), Err(DebError::AlreadyInitialized)));

    let mut writer = ArWriter::new(Vec::new());
    writer.add_member("a", b"1", &MemberOptions::default())?;
    assert!(matches!(writer.init(), Err(DebError::AlreadyInitialized)));

    // An empty archive is just the magic
    assert_eq!(ArWriter::new(Vec::new()).into_inner()?, MAGIC.to_vec());
    Ok(())
}

#[test]
fn writer_timestamps_and_options() -> Result<()> {
    let mut writer = ArWriter::create(Vec::new())?.set_default_mtime(42);
    writer.add_member("default", b"", &MemberOptions::default())?;
    writer.add_member(
        "custom",
        b"",
        &MemberOptions {
            mtime: Some(7),
            uid: 1000,
            gid: 1000,
            mode: 0o100755,
        },
    )?;
    let members = read_all(&writer.into_inner()?)?;

    assert_eq!(members[0].header(), &ArHeader::new("default", 0).set_mtime(42));
    assert_eq!(
        members[1].header(),
        &ArHeader::new("custom", 0)
            .set_mtime(7)
            .set_uid(1000)
            .set_gid(1000)
            .set_mode(0o100755)
    );
    Ok(())
}

#[test]
fn headers_and_partial_reads() -> Result<()> {
    let bytes = archive(&[
        ("debian-binary", b"2.0\n"),
        ("control.tar.gz", b"control"),
        ("data.tar.xz", b"data"),
    ])?;

    let names = list_members(bytes.as_slice())?
        .iter()
        .map(|h| h.name().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, ["debian-binary", "control.tar.gz", "data.tar.xz"]);

    let mut reader = ArReader::new(bytes.as_slice())?;
    let leading = reader.read_until(|h| h.name().starts_with("control.tar"))?;
    assert_eq!(leading.len(), 2);
    assert_eq!(leading[1].data(), b"control");
    assert_eq!(reader.next_member()?.map(|m| m.into_data()), Some(b"data".to_vec()));
    Ok(())
}

#[test]
fn detects_compression() {
    assert_eq!(DebCompression::detect(&[0x1f, 0x8b, 0x08]), DebCompression::Gzip);
    assert_eq!(
        DebCompression::detect(&[0xfd, b'7', b'z', b'X', b'Z', 0x00]),
        DebCompression::Xz
    );
    assert_eq!(DebCompression::detect(b"BZh91AY"), DebCompression::Bzip2);
    assert_eq!(DebCompression::detect(&[0x28, 0xb5, 0x2f, 0xfd]), DebCompression::Zstd);
    assert_eq!(DebCompression::detect(b"usr/"), DebCompression::None);
    assert_eq!(DebCompression::detect(b""), DebCompression::None);
}

#[test]
fn classifies_members() {
    assert_eq!(MemberKind::classify("control.tar.zst"), MemberKind::Control);
    assert_eq!(MemberKind::classify("data.tar"), MemberKind::Data);
    assert_eq!(MemberKind::classify("debian-binary"), MemberKind::Passthrough);
    assert_eq!(MemberKind::classify("_gpgorigin"), MemberKind::Passthrough);
}

#[test]
fn tarballs_round_trip_every_compression() -> std::io::Result<()> {
    let tmp = tempfile::tempdir()?;
    package_tree(tmp.path())?;

    for compression in [
        DebCompression::None,
        DebCompression::Gzip,
        DebCompression::Xz,
        DebCompression::Bzip2,
        DebCompression::Zstd,
    ] {
        let mut packed = Vec::new();
        NativeTar.pack(&tmp.path().join("data"), &mut packed, compression)?;

        let dest = tmp.path().join(format!("out-{}", compression.as_str()));
        let detected = NativeTar.unpack(&mut packed.as_slice(), &dest)?;
        assert_eq!(detected, compression);
        assert_eq!(
            fs::read_to_string(dest.join("usr/bin/hello"))?,
            "#!/usr/bin/bash\necho hello world!"
        );
    }
    Ok(())
}

#[test]
fn reassemble_then_disassemble() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = tmp.path().join("src");
    package_tree(&src)?;
    let deb = tmp.path().join("hello.deb");

    let report = PackageAssembler::new().set_mtime(1234).reassemble(&src, &deb)?;
    assert_eq!(report.size(), fs::metadata(&deb)?.len());

    // Fixed member order, synthesized version stamp
    let members = read_all(&fs::read(&deb)?)?;
    let names = members.iter().map(|m| m.name()).collect::<Vec<_>>();
    assert_eq!(names, ["debian-binary", "control.tar.gz", "data.tar.xz"]);
    assert_eq!(members[0].data(), b"2.0\n");
    assert!(members.iter().all(|m| m.header().mtime() == 1234));
    assert!(members.iter().all(|m| m.header().mode() == 0o644));
    let headers = members.iter().map(|m| m.header().clone()).collect::<Vec<_>>();
    assert_eq!(report.members(), headers.as_slice());

    let out = tmp.path().join("out");
    let report = disassemble(&deb, &out)?;
    assert!(report.is_complete());
    assert_eq!(report.state(), Some(DisassembleState::Done));

    let compressions = report
        .members()
        .iter()
        .map(|m| (m.kind(), m.compression()))
        .collect::<Vec<_>>();
    assert_eq!(
        compressions,
        [
            (MemberKind::Passthrough, None),
            (MemberKind::Control, Some(DebCompression::Gzip)),
            (MemberKind::Data, Some(DebCompression::Xz)),
        ]
    );
    assert_eq!(fs::read(out.join("ar_contents/debian-binary"))?, b"2.0\n");
    assert_eq!(
        fs::read_to_string(out.join("control/control"))?,
        "Package: hello\nVersion: 0.1.0\nArchitecture: amd64\n"
    );
    assert_eq!(
        fs::read_to_string(out.join("data/usr/bin/hello"))?,
        "#!/usr/bin/bash\necho hello world!"
    );
    Ok(())
}

#[test]
fn reassemble_keeps_existing_debian_binary() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    package_tree(tmp.path())?;
    fs::create_dir_all(tmp.path().join("ar_contents"))?;
    fs::write(tmp.path().join("ar_contents/debian-binary"), "2.1\n")?;
    let deb = tmp.path().join("pkg.deb");

    reassemble(tmp.path(), &deb)?;
    let members = read_all(&fs::read(&deb)?)?;
    assert_eq!(members[0].data(), b"2.1\n");
    Ok(())
}

#[test]
fn failed_reassemble_leaves_no_output() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let src = tmp.path().join("src");
    fs::create_dir_all(src.join("control"))?;
    let out_dir = tmp.path().join("out");
    fs::create_dir_all(&out_dir)?;

    let result = reassemble(&src, out_dir.join("pkg.deb"));
    match result {
        Err(DebError::TarPack { dir, .. }) => assert_eq!(dir, src.join("data")),
        other => panic!("expected pack error, got {:?}", other),
    }
    assert_eq!(fs::read_dir(&out_dir)?.count(), 0);
    Ok(())
}

#[test]
fn corrupt_tarball_does_not_abort_disassembly() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    package_tree(tmp.path())?;
    let mut data = Vec::new();
    NativeTar.pack(&tmp.path().join("data"), &mut data, DebCompression::Zstd)?;

    let deb = tmp.path().join("broken.deb");
    fs::write(
        &deb,
        archive(&[
            ("debian-binary", b"2.0\n"),
            ("control.tar.gz", b"\x1f\x8bthis is not gzip"),
            ("data.tar.zst", &data),
        ])?,
    )?;

    let out = tmp.path().join("out");
    let report = disassemble(&deb, &out)?;
    assert!(report.is_success());
    assert!(!report.is_complete());
    assert_eq!(report.failed_members(), ["control.tar.gz"]);
    assert_eq!(report.members()[2].compression(), Some(DebCompression::Zstd));
    assert!(out.join("ar_contents/control.tar.gz").is_file());
    assert!(out.join("data/usr/bin/hello").is_file());
    Ok(())
}

// Tar codec that refuses everything, to exercise the failure paths
struct FailingTar;

impl TarCodec for FailingTar {
    fn unpack(&self, _input: &mut dyn Read, _dest: &Path) -> std::io::Result<DebCompression> {
        Err(Error::new(ErrorKind::Other, "unpack refused"))
    }

    fn pack(&self, _src: &Path, _output: &mut dyn Write, _compression: DebCompression) -> std::io::Result<()> {
        Err(Error::new(ErrorKind::Other, "pack refused"))
    }
}

#[test]
fn tar_codec_failures() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    package_tree(tmp.path())?;
    let deb = tmp.path().join("pkg.deb");
    fs::write(
        &deb,
        archive(&[
            ("debian-binary", b"2.0\n"),
            ("control.tar.xz", b"x"),
            ("data.tar.xz", b"y"),
        ])?,
    )?;

    let assembler = PackageAssembler::new().with_tar_codec(FailingTar);
    let report = assembler.disassemble(&deb, tmp.path().join("out"))?;
    assert_eq!(report.members().len(), 3);
    assert_eq!(report.failed_members(), ["control.tar.xz", "data.tar.xz"]);
    assert!(report.failures().iter().all(|e| e.is_recoverable()));

    let out = tmp.path().join("rebuilt.deb");
    assert!(matches!(
        assembler.reassemble(tmp.path(), &out),
        Err(DebError::TarPack { .. })
    ));
    assert!(!out.exists());
    Ok(())
}

#[test]
fn disassemble_rejects_broken_frames() -> Result<()> {
    let tmp = tempfile::tempdir()?;

    let not_ar = tmp.path().join("not-ar.deb");
    fs::write(&not_ar, "definitely not an archive")?;
    assert!(matches!(
        disassemble(&not_ar, tmp.path().join("a")),
        Err(DebError::NotAnArArchive)
    ));

    let unsafe_name = tmp.path().join("unsafe.deb");
    fs::write(&unsafe_name, archive(&[("../escape", b"x")])?)?;
    assert!(matches!(
        disassemble(&unsafe_name, tmp.path().join("b")),
        Err(DebError::UnsafeMemberName(_))
    ));
    assert!(!tmp.path().join("escape").exists());
    Ok(())
}

#[test]
fn disassembles_gnu_style_names() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut bytes = MAGIC.to_vec();
    bytes.extend(raw_header("debian-binary/", "4"));
    bytes.extend(b"2.0\n");
    let deb = tmp.path().join("gnu.deb");
    fs::write(&deb, bytes)?;

    let out = tmp.path().join("out");
    let report = disassemble(&deb, &out)?;
    assert_eq!(report.members()[0].name(), "debian-binary");
    assert_eq!(fs::read(out.join("ar_contents/debian-binary"))?, b"2.0\n");
    Ok(())
}

#[test]
fn truncated_member_is_not_left_on_disk() -> Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut bytes = MAGIC.to_vec();
    bytes.extend(raw_header("debian-binary", "10"));
    bytes.extend(b"2.0\n");
    let deb = tmp.path().join("short.deb");
    fs::write(&deb, bytes)?;

    let out = tmp.path().join("out");
    assert!(matches!(
        disassemble(&deb, &out),
        Err(DebError::TruncatedArchive { expected: 10, actual: 4, .. })
    ));
    let ar_dir = out.join("ar_contents");
    assert!(!ar_dir.join("debian-binary").exists());
    // The staging file is gone too
    assert_eq!(fs::read_dir(&ar_dir)?.count(), 0);
    Ok(())
}
