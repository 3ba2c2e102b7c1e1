//! Archive creation, digest and integrity record publication.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use walkdir::WalkDir;

use super::clean::remove_entry;
use crate::config::{ArchiveTool, CompressionFormat, DigestTool};
use crate::module::integrity::{is_sha256_base64, sha256_base64_file};
use crate::module::SourceRecord;
use crate::pipeline::{FatalCause, PipelineEvent, Stage, StageContext};
use crate::process::{shell_quote, Cmd};

const ZSTD_LEVEL: i32 = 19;

pub(crate) fn run(ctx: &mut StageContext<'_>) -> Result<SourceRecord, FatalCause> {
    let (workspace, plan) = (ctx.workspace, ctx.plan);
    let staging = workspace.staging_dir();
    let tarball = workspace.tarball_path();
    let format = workspace.layout().config().compression;

    if !plan.tools.archive.supports(format) {
        return Err(FatalCause::UnsupportedFormat {
            tool: "native archive",
            format,
        });
    }

    // The old record goes first: a registry entry must never outlive the
    // archive it describes.
    remove_entry(&workspace.source_record_path())?;
    remove_entry(&tarball)?;
    if let Some(parent) = tarball.parent() {
        fs::create_dir_all(parent).map_err(FatalCause::io("creating tarball dir", parent))?;
    }

    let partial = partial_path(&tarball);
    remove_entry(&partial)?;
    let digest = match build_and_digest(ctx, staging, &partial, format) {
        Ok(digest) => digest,
        Err(cause) => {
            let _ = remove_entry(&partial);
            return Err(cause);
        }
    };
    fs::rename(&partial, &tarball).map_err(FatalCause::io("publishing archive", &tarball))?;

    let record = SourceRecord::for_archive(&tarball, &digest);
    record.write(&workspace.source_record_path())?;
    ctx.emit(PipelineEvent::ItemSucceeded {
        stage: Stage::ArchiveAndDigest,
        item: tarball.display().to_string(),
    });
    Ok(record)
}

/// Sibling path the archive is built at before it is renamed into place.
pub(crate) fn partial_path(tarball: &Path) -> PathBuf {
    let mut name = tarball.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

fn build_and_digest(
    ctx: &StageContext<'_>,
    staging: &Path,
    out: &Path,
    format: CompressionFormat,
) -> Result<String, FatalCause> {
    match ctx.plan.tools.archive {
        ArchiveTool::Tar => {
            Cmd::new("tar")
                .args([
                    "--sort=name",
                    "--mtime=@0",
                    "--owner=0",
                    "--group=0",
                    "--numeric-owner",
                    format.tar_flag(),
                    "-cf",
                ])
                .arg_path(out)
                .arg("-C")
                .arg_path(staging)
                .arg(".")
                .error_msg("creating module archive")
                .run_on(ctx.executor)?;
        }
        ArchiveTool::Native => {
            write_archive(staging, out, format).map_err(FatalCause::io("writing archive", out))?
        }
    }

    let digest = match ctx.plan.tools.digest {
        DigestTool::Openssl => {
            let script = format!(
                "openssl dgst -binary -sha256 < {} | openssl base64 -A",
                shell_quote(out)
            );
            Cmd::shell(script)
                .error_msg("computing archive digest")
                .run_on(ctx.executor)?
                .stdout
                .trim()
                .to_string()
        }
        DigestTool::Native => sha256_base64_file(out).map_err(FatalCause::io("hashing", out))?,
    };
    if !is_sha256_base64(&digest) {
        return Err(FatalCause::BadDigest(digest));
    }
    Ok(digest)
}

/// Compressed, reproducible tarball of everything under `root`.
pub(crate) fn write_archive(
    root: &Path,
    out_path: &Path,
    format: CompressionFormat,
) -> io::Result<()> {
    let out = File::create(out_path)?;
    match format {
        CompressionFormat::Zstd => {
            let encoder = zstd::stream::Encoder::new(out, ZSTD_LEVEL)?;
            write_tar(root, encoder)?.finish()?;
        }
        CompressionFormat::Gzip => {
            let encoder = GzEncoder::new(out, Compression::best());
            write_tar(root, encoder)?.finish()?;
        }
        CompressionFormat::Xz => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "xz archives need the tar backend",
            ))
        }
    }
    Ok(())
}

/// Entries are sorted by path with zeroed mtimes and owners, so the same
/// tree always yields the same bytes. Hard-linked files are stored once.
fn write_tar<W: Write>(root: &Path, out: W) -> io::Result<W> {
    let mut builder = tar::Builder::new(out);

    let mut entries = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        entries.push((rel, entry.into_path()));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let mut first_links: HashMap<(u64, u64), String> = HashMap::new();
    for (rel, path) in entries {
        let md = fs::symlink_metadata(&path)?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(mode_of(&md));
        header.set_size(0);

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            builder.append_data(&mut header, &rel, io::empty())?;
        } else if md.file_type().is_symlink() {
            let target = fs::read_link(&path)?;
            header.set_entry_type(tar::EntryType::Symlink);
            builder.append_link(&mut header, &rel, &target)?;
        } else if md.is_file() {
            if let Some(key) = link_key(&md) {
                if let Some(first) = first_links.get(&key) {
                    header.set_entry_type(tar::EntryType::Link);
                    builder.append_link(&mut header, &rel, first)?;
                    continue;
                }
                first_links.insert(key, rel.clone());
            }
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            builder.append_data(&mut header, &rel, File::open(&path)?)?;
        }
    }

    builder.into_inner()
}

#[cfg(unix)]
fn mode_of(md: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    md.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn mode_of(md: &fs::Metadata) -> u32 {
    if md.is_dir() {
        0o755
    } else {
        0o644
    }
}

#[cfg(unix)]
fn link_key(md: &fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    (md.nlink() > 1).then(|| (md.dev(), md.ino()))
}

#[cfg(not(unix))]
fn link_key(_md: &fs::Metadata) -> Option<(u64, u64)> {
    None
}
