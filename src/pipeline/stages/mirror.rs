//! Selective copy of the install tree into the workspace.
//!
//! The workspace ends up holding exactly the selected entries: anything the
//! rules reject, or that vanished from the source, is deleted. Symlinks are
//! copied as links, hard-linked files stay hard-linked and permissions are
//! preserved.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, FileType};
use std::io::Write;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::clean::remove_entry;
use crate::config::MirrorTool;
use crate::pipeline::{FatalCause, StageContext};
use crate::process::Cmd;
use crate::rules::{Decision, RuleSet};

pub(crate) fn run(ctx: &mut StageContext<'_>) -> Result<(), FatalCause> {
    let src = &ctx.plan.install_dir;
    if !src.is_dir() {
        return Err(FatalCause::MissingSource(src.clone()));
    }
    let dst = ctx.workspace.staging_dir();

    match ctx.plan.tools.mirror {
        MirrorTool::Rsync => mirror_with_rsync(ctx, src, dst),
        MirrorTool::Native => mirror_tree(&ctx.plan.selection, src, dst),
    }
}

fn mirror_with_rsync(ctx: &StageContext<'_>, src: &Path, dst: &Path) -> Result<(), FatalCause> {
    let mut rules = tempfile::Builder::new()
        .prefix("toolchain-rules-")
        .suffix(".filter")
        .tempfile()
        .map_err(FatalCause::io("creating rule file in", std::env::temp_dir()))?;
    rules
        .write_all(ctx.plan.selection.to_filter_text().as_bytes())
        .and_then(|()| rules.flush())
        .map_err(FatalCause::io("writing rule file", rules.path()))?;

    Cmd::new("rsync")
        .args(["-ravH", "--delete", "--delete-excluded"])
        .arg(format!("--include-from={}", rules.path().display()))
        .arg(format!("{}/", src.display()))
        .arg(format!("{}/", dst.display()))
        .error_msg("mirroring install tree")
        .run_on(ctx.executor)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Dir,
    File,
    Symlink,
}

impl Kind {
    fn of(file_type: FileType) -> Option<Self> {
        if file_type.is_symlink() {
            Some(Kind::Symlink)
        } else if file_type.is_dir() {
            Some(Kind::Dir)
        } else if file_type.is_file() {
            Some(Kind::File)
        } else {
            None
        }
    }
}

fn rel_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// In-process mirror of `src` into `dst` under `rules`.
pub(crate) fn mirror_tree(rules: &RuleSet, src: &Path, dst: &Path) -> Result<(), FatalCause> {
    let selected = select_entries(rules, src)?;
    delete_stale(&selected, dst)?;

    let mut linked: HashMap<(u64, u64), PathBuf> = HashMap::new();
    let mut dir_modes = Vec::new();

    for (rel, kind) in &selected {
        let from = src.join(rel);
        let to = dst.join(rel);
        match kind {
            Kind::Dir => {
                fs::create_dir_all(&to).map_err(FatalCause::io("creating directory", &to))?;
                let meta =
                    fs::metadata(&from).map_err(FatalCause::io("inspecting", &from))?;
                dir_modes.push((to, meta.permissions()));
            }
            Kind::Symlink => {
                remove_entry(&to)?;
                let target = fs::read_link(&from).map_err(FatalCause::io("reading link", &from))?;
                symlink(&target, &to).map_err(FatalCause::io("creating symlink", &to))?;
            }
            Kind::File => {
                // Replace rather than overwrite so a stale hard link in the
                // workspace never writes through to another path.
                remove_entry(&to)?;
                let meta = fs::symlink_metadata(&from)
                    .map_err(FatalCause::io("inspecting", &from))?;
                if let Some(key) = hard_link_key(&meta) {
                    if let Some(first) = linked.get(&key) {
                        fs::hard_link(first, &to).map_err(FatalCause::io("linking", &to))?;
                        continue;
                    }
                    linked.insert(key, to.clone());
                }
                fs::copy(&from, &to).map_err(FatalCause::io("copying to", &to))?;
            }
        }
    }

    // Deepest first, so a read-only directory never blocks its children.
    for (dir, perms) in dir_modes.into_iter().rev() {
        fs::set_permissions(&dir, perms).map_err(FatalCause::io("setting permissions on", &dir))?;
    }
    Ok(())
}

/// Selected source entries in walk order. Rejected directories are pruned,
/// which gives ancestor gating for free.
fn select_entries(rules: &RuleSet, src: &Path) -> Result<BTreeMap<String, Kind>, FatalCause> {
    let mut selected = BTreeMap::new();
    let walker = WalkDir::new(src)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let rel = rel_str(src, entry.path());
            rules.decide(&rel, entry.file_type().is_dir()) == Decision::Include
        });

    for entry in walker {
        let entry = entry?;
        if let Some(kind) = Kind::of(entry.file_type()) {
            selected.insert(rel_str(src, entry.path()), kind);
        }
    }
    Ok(selected)
}

fn delete_stale(selected: &BTreeMap<String, Kind>, dst: &Path) -> Result<(), FatalCause> {
    let mut stale = Vec::new();
    let mut walker = WalkDir::new(dst).min_depth(1).follow_links(false).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        let rel = rel_str(dst, entry.path());
        let kind = Kind::of(entry.file_type());
        if kind.is_some() && selected.get(&rel).copied() == kind {
            continue;
        }
        if entry.file_type().is_dir() {
            walker.skip_current_dir();
        }
        stale.push(entry.into_path());
    }
    for path in stale {
        remove_entry(&path)?;
    }
    Ok(())
}

#[cfg(unix)]
fn hard_link_key(meta: &fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    (meta.nlink() > 1).then(|| (meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn hard_link_key(_meta: &fs::Metadata) -> Option<(u64, u64)> {
    None
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks in install trees need a unix host",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::test_support::{Harness, ScriptedExecutor};
    use crate::pipeline::RecordingObserver;

    fn mirror(harness: &Harness) {
        let mut observer = RecordingObserver::new();
        run(&mut harness.context(&mut observer)).unwrap();
    }

    #[test]
    fn copies_exactly_the_selected_tree() {
        let mut harness = Harness::new();
        harness.plan.selection = RuleSet::parse("+ lib\n- lib/*.a\n+ lib/**\n").unwrap();
        harness.install_file("lib/foo.a", "archive");
        harness.install_file("lib/bar.so", "shared");
        harness.install_file("lib/sub/baz.a", "nested archive");
        harness.install_file("share/doc/README", "docs");

        mirror(&harness);

        assert!(harness.staged("lib/bar.so").is_file());
        assert!(harness.staged("lib/sub/baz.a").is_file());
        assert!(!harness.staged("lib/foo.a").exists());
        assert!(!harness.staged("share").exists());
    }

    #[test]
    fn excluded_directories_are_not_descended() {
        let mut harness = Harness::new();
        harness.plan.selection = RuleSet::parse("- share/\n+ **\n").unwrap();
        harness.install_file("share/locale/gcc.mo", "x");
        harness.install_file("bin/gcc", "x");

        mirror(&harness);

        assert!(harness.staged("bin/gcc").is_file());
        assert!(!harness.staged("share").exists());
    }

    #[test]
    fn stale_and_newly_excluded_entries_are_deleted() {
        let mut harness = Harness::new();
        harness.install_file("bin/gcc", "v1");
        harness.install_file("lib/libgcc.a", "a");
        mirror(&harness);
        assert!(harness.staged("lib/libgcc.a").is_file());

        fs::remove_file(harness.plan.install_dir.join("bin/gcc")).unwrap();
        harness.plan.selection = RuleSet::parse("- lib/*.a\n+ **\n").unwrap();
        fs::write(harness.staged("leftover.txt"), "old run").unwrap();
        mirror(&harness);

        assert!(!harness.staged("bin/gcc").exists());
        assert!(!harness.staged("lib/libgcc.a").exists());
        assert!(!harness.staged("leftover.txt").exists());
        assert!(harness.staged("lib").is_dir());
    }

    #[test]
    fn updated_contents_replace_old_copies() {
        let harness = Harness::new();
        harness.install_file("bin/gcc", "v1");
        mirror(&harness);
        harness.install_file("bin/gcc", "v2");
        mirror(&harness);
        assert_eq!(fs::read_to_string(harness.staged("bin/gcc")).unwrap(), "v2");
    }

    #[test]
    fn missing_source_is_fatal() {
        let mut harness = Harness::new();
        harness.plan.install_dir = harness.temp.path().join("nope");
        let mut observer = RecordingObserver::new();
        let err = run(&mut harness.context(&mut observer)).unwrap_err();
        assert!(matches!(err, FatalCause::MissingSource(_)));
    }

    #[cfg(unix)]
    #[test]
    fn preserves_symlinks_hard_links_and_modes() {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};

        let harness = Harness::new();
        harness.install_file("bin/gcc-15", "compiler");
        let install = &harness.plan.install_dir;
        std::os::unix::fs::symlink("gcc-15", install.join("bin/gcc")).unwrap();
        fs::hard_link(install.join("bin/gcc-15"), install.join("bin/cc")).unwrap();
        fs::set_permissions(install.join("bin/gcc-15"), fs::Permissions::from_mode(0o755))
            .unwrap();

        mirror(&harness);

        let link = harness.staged("bin/gcc");
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&link).unwrap(), PathBuf::from("gcc-15"));

        let a = fs::metadata(harness.staged("bin/gcc-15")).unwrap();
        let b = fs::metadata(harness.staged("bin/cc")).unwrap();
        assert_eq!(a.ino(), b.ino());
        assert_eq!(a.permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn rsync_backend_passes_rules_through_a_temp_file() {
        let mut harness = Harness::new();
        harness.plan.tools.mirror = MirrorTool::Rsync;
        mirror(&harness);

        let calls = harness.executor.calls.borrow();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert!(call.starts_with("rsync -ravH --delete --delete-excluded --include-from="));
        assert!(call.ends_with(&format!(
            "{}/ {}/",
            harness.plan.install_dir.display(),
            harness.workspace.staging_dir().display()
        )));

        let rules_path = call
            .split_whitespace()
            .find_map(|arg| arg.strip_prefix("--include-from="))
            .unwrap();
        assert!(!Path::new(rules_path).exists(), "rule file must be removed");
    }

    #[test]
    fn rsync_failure_is_fatal() {
        let mut harness = Harness::new();
        harness.plan.tools.mirror = MirrorTool::Rsync;
        harness.executor = ScriptedExecutor::default().exit_when("rsync", 23);
        let mut observer = RecordingObserver::new();
        let err = run(&mut harness.context(&mut observer)).unwrap_err();
        assert!(err.to_string().contains("mirroring install tree"));
    }
}
