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

//! deb-ar - take Deb packages apart and put them back together.

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use deb_ar::package::{list_members, PackageAssembler};

#[derive(Parser)]
#[command(name = "deb-ar")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a package's members and unpack its tarballs
    Disassemble {
        /// The package to take apart
        #[arg(value_name = "DEB")]
        deb: PathBuf,

        /// Directory to extract into
        #[arg(value_name = "OUT_DIR")]
        out_dir: PathBuf,

        /// Remove OUT_DIR before extracting
        #[arg(long)]
        clean: bool,
    },
    /// Build a package from a disassembled directory
    Reassemble {
        /// Directory produced by `disassemble`
        #[arg(value_name = "SRC_DIR")]
        src_dir: PathBuf,

        /// Where to write the package
        #[arg(value_name = "OUT_DEB")]
        out: PathBuf,

        /// Timestamp for the package's members, in seconds since the epoch
        #[arg(long, env = "SOURCE_DATE_EPOCH")]
        mtime: Option<u64>,
    },
    /// List the members of a package
    List {
        /// The package to inspect
        #[arg(value_name = "DEB")]
        deb: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"));
    if cli.verbose {
        logger
            .format_level(false)
            .format_target(false)
            .filter_module("deb_ar", log::LevelFilter::Debug);
    }
    logger.init();

    match cli.command {
        Commands::Disassemble { deb, out_dir, clean } => disassemble(&deb, &out_dir, clean),
        Commands::Reassemble { src_dir, out, mtime } => reassemble(&src_dir, &out, mtime),
        Commands::List { deb } => list(&deb),
    }
}

fn disassemble(deb: &Path, out_dir: &Path, clean: bool) -> Result<()> {
    if clean && out_dir.exists() {
        fs::remove_dir_all(out_dir)
            .with_context(|| format!("Failed to remove '{}'", out_dir.display()))?;
    }

    let report = PackageAssembler::new()
        .disassemble(deb, out_dir)
        .with_context(|| format!("Failed to disassemble '{}'", deb.display()))?;

    println!("Extracted ar contents:");
    for member in report.members() {
        println!("  {} ({} bytes)", member.name(), member.size());
    }
    for failure in report.failures() {
        println!("Warning: {}", failure);
    }

    if !report.is_success() {
        bail!("'{}' contains no members", deb.display());
    }

    println!();
    print_tree(out_dir)?;
    if report.is_complete() {
        println!("\nSuccessfully extracted {}", deb.display());
    } else {
        println!(
            "\nExtracted {} with failures: {}",
            deb.display(),
            report.failed_members().join(", ")
        );
    }
    Ok(())
}

fn reassemble(src_dir: &Path, out: &Path, mtime: Option<u64>) -> Result<()> {
    if !src_dir.is_dir() {
        bail!("'{}' is not a directory", src_dir.display());
    }

    let mut assembler = PackageAssembler::new();
    if let Some(mtime) = mtime {
        assembler = assembler.set_mtime(mtime);
    }
    let report = assembler
        .reassemble(src_dir, out)
        .with_context(|| format!("Failed to reassemble '{}'", src_dir.display()))?;

    for member in report.members() {
        println!("  Added: {} ({} bytes)", member.name(), member.size());
    }
    println!(
        "Successfully created {} ({} bytes)",
        report.output().display(),
        report.size()
    );
    Ok(())
}

fn list(deb: &Path) -> Result<()> {
    let file = fs::File::open(deb).with_context(|| format!("Failed to open '{}'", deb.display()))?;
    let headers = list_members(BufReader::new(file))
        .with_context(|| format!("Failed to read '{}'", deb.display()))?;

    for header in headers {
        let mtime = chrono::DateTime::from_timestamp(header.mtime() as i64, 0)
            .map(|time| time.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| header.mtime().to_string());
        println!(
            "{:o} {}/{} {:>10} {} {}",
            header.mode(),
            header.uid(),
            header.gid(),
            header.size(),
            mtime,
            header.name()
        );
    }
    Ok(())
}

// Prints the extracted tree with file sizes
fn print_tree(root: &Path) -> Result<()> {
    for entry_result in walkdir::WalkDir::new(root).sort_by_file_name() {
        let entry = entry_result?;
        let indent = "  ".repeat(entry.depth());
        let name = entry.file_name().to_string_lossy();
        if entry.file_type().is_dir() {
            println!("{}{}/", indent, name);
        } else {
            println!("{}{} ({} bytes)", indent, name, entry.metadata()?.len());
        }
    }
    Ok(())
}
