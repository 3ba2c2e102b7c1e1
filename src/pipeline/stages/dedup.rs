//! Replace identical files in the workspace with hard links.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::config::DedupTool;
use crate::module::integrity::sha256_file;
use crate::pipeline::{FatalCause, PipelineEvent, Stage, StageContext};
use crate::process::Cmd;

pub(crate) fn run(ctx: &mut StageContext<'_>) -> Result<(), FatalCause> {
    let staging = ctx.workspace.staging_dir().to_path_buf();
    match ctx.plan.tools.dedup {
        DedupTool::Rdfind => {
            Cmd::new("rdfind")
                .args(["-makehardlinks", "true", "-makeresultsfile", "false"])
                .arg_path(&staging)
                .error_msg("deduplicating workspace")
                .run_on(ctx.executor)?;
        }
        DedupTool::Native => {
            for linked in hard_link_duplicates(&staging)? {
                ctx.emit(PipelineEvent::ItemSucceeded {
                    stage: Stage::Deduplicate,
                    item: linked,
                });
            }
        }
    }
    Ok(())
}

/// Link every duplicate regular file to the first copy (in path order).
///
/// Files are grouped by size and permissions, then by SHA-256. Empty files
/// and files already sharing an inode are left alone. Returns the relative
/// paths that were replaced.
pub(crate) fn hard_link_duplicates(root: &Path) -> Result<Vec<String>, FatalCause> {
    let mut by_shape: BTreeMap<(u64, u32), Vec<PathBuf>> = BTreeMap::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.len() == 0 {
            continue;
        }
        by_shape
            .entry((meta.len(), mode_of(&meta)))
            .or_default()
            .push(entry.into_path());
    }

    let mut replaced = Vec::new();
    for candidates in by_shape.into_values().filter(|c| c.len() > 1) {
        let mut by_digest: BTreeMap<[u8; 32], Vec<PathBuf>> = BTreeMap::new();
        for path in candidates {
            let digest = sha256_file(&path).map_err(FatalCause::io("hashing", &path))?;
            by_digest.entry(digest).or_default().push(path);
        }

        for group in by_digest.into_values().filter(|g| g.len() > 1) {
            let Some((first, rest)) = group.split_first() else {
                continue;
            };
            for dup in rest {
                if same_inode(first, dup)? {
                    continue;
                }
                link_over(first, dup)?;
                replaced.push(
                    dup.strip_prefix(root)
                        .unwrap_or(dup)
                        .to_string_lossy()
                        .into_owned(),
                );
            }
        }
    }
    Ok(replaced)
}

/// Swap `dup` for a hard link to `keep` via a sibling temp name, so `dup`
/// is never missing.
fn link_over(keep: &Path, dup: &Path) -> Result<(), FatalCause> {
    let name = dup
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dup.with_file_name(format!(".{name}.dedup-tmp"));
    if tmp.exists() {
        fs::remove_file(&tmp).map_err(FatalCause::io("removing", &tmp))?;
    }
    fs::hard_link(keep, &tmp).map_err(FatalCause::io("linking", &tmp))?;
    fs::rename(&tmp, dup).map_err(FatalCause::io("replacing", dup))
}

#[cfg(unix)]
fn mode_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode()
}

#[cfg(not(unix))]
fn mode_of(meta: &fs::Metadata) -> u32 {
    u32::from(meta.permissions().readonly())
}

#[cfg(unix)]
fn same_inode(a: &Path, b: &Path) -> Result<bool, FatalCause> {
    use std::os::unix::fs::MetadataExt;
    let ma = fs::metadata(a).map_err(FatalCause::io("inspecting", a))?;
    let mb = fs::metadata(b).map_err(FatalCause::io("inspecting", b))?;
    Ok(ma.dev() == mb.dev() && ma.ino() == mb.ino())
}

#[cfg(not(unix))]
fn same_inode(_a: &Path, _b: &Path) -> Result<bool, FatalCause> {
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::test_support::{Harness, ScriptedExecutor};
    use crate::pipeline::RecordingObserver;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn duplicates_become_links_and_contents_survive() {
        use std::os::unix::fs::MetadataExt;

        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        write(root, "bin/gcc", "compiler driver");
        write(root, "bin/x86_64-linux-gnu-gcc", "compiler driver");
        write(root, "lib/libfoo.so", "different");
        write(root, "lib/libbar.so", "different!");
        write(root, "empty-a", "");
        write(root, "empty-b", "");

        let replaced = hard_link_duplicates(root).unwrap();
        assert_eq!(replaced, vec!["bin/x86_64-linux-gnu-gcc"]);

        let a = fs::metadata(root.join("bin/gcc")).unwrap();
        let b = fs::metadata(root.join("bin/x86_64-linux-gnu-gcc")).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(
            fs::read_to_string(root.join("bin/x86_64-linux-gnu-gcc")).unwrap(),
            "compiler driver"
        );
        assert_eq!(fs::read_to_string(root.join("lib/libbar.so")).unwrap(), "different!");
        assert_ne!(
            fs::metadata(root.join("empty-a")).unwrap().ino(),
            fs::metadata(root.join("empty-b")).unwrap().ino()
        );

        // Second pass finds nothing left to do.
        assert!(hard_link_duplicates(root).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn files_with_different_modes_stay_separate() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path();
        write(root, "a", "same");
        write(root, "b", "same");
        fs::set_permissions(root.join("a"), fs::Permissions::from_mode(0o755)).unwrap();
        fs::set_permissions(root.join("b"), fs::Permissions::from_mode(0o644)).unwrap();

        assert!(hard_link_duplicates(root).unwrap().is_empty());
    }

    #[test]
    fn rdfind_backend_runs_over_the_workspace() {
        let mut harness = Harness::new();
        harness.plan.tools.dedup = DedupTool::Rdfind;
        let mut observer = RecordingObserver::new();
        run(&mut harness.context(&mut observer)).unwrap();

        let calls = harness.executor.calls.borrow();
        assert_eq!(
            calls[0],
            format!(
                "rdfind -makehardlinks true -makeresultsfile false {}",
                harness.workspace.staging_dir().display()
            )
        );
    }

    #[test]
    fn rdfind_failure_is_fatal() {
        let mut harness = Harness::new();
        harness.plan.tools.dedup = DedupTool::Rdfind;
        harness.executor = ScriptedExecutor::default().exit_when("rdfind", 1);
        let mut observer = RecordingObserver::new();
        let err = run(&mut harness.context(&mut observer)).unwrap_err();
        assert!(matches!(err, FatalCause::Command(_)));
    }
}
