use std::fs;
use std::io;
use std::path::Path;

use super::CLEANED_SUBTREES;
use crate::pipeline::{FatalCause, PipelineEvent, Stage, StageContext};

/// Remove the output of earlier runs from the staging dir.
///
/// Only the toolchain subtrees, the build-target subtree and the descriptor
/// files go; anything else in the staging dir and the dir itself stay.
pub(crate) fn run(ctx: &mut StageContext<'_>) -> Result<(), FatalCause> {
    let (workspace, plan) = (ctx.workspace, ctx.plan);
    let staging = workspace.staging_dir();
    let build_target = workspace.identity().build_target();

    let targets = CLEANED_SUBTREES
        .iter()
        .copied()
        .chain(std::iter::once(build_target))
        .chain(plan.descriptors.iter().map(String::as_str))
        .collect::<Vec<_>>();

    for name in targets {
        if remove_entry(&staging.join(name))? {
            ctx.emit(PipelineEvent::ItemSucceeded {
                stage: Stage::Clean,
                item: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Returns whether something was removed.
pub(crate) fn remove_entry(path: &Path) -> Result<bool, FatalCause> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(FatalCause::io("inspecting", path)(err)),
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(FatalCause::io("removing", path)(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::test_support::Harness;

    #[test]
    fn removes_toolchain_subtrees_and_descriptors_only() {
        let harness = Harness::new();
        let staging = harness.workspace.staging_dir().to_path_buf();
        for dir in ["bin", "lib/gcc", "x86_64-linux-gnu/lib", "keep/me"] {
            fs::create_dir_all(staging.join(dir)).unwrap();
        }
        fs::write(staging.join("lib/gcc/libgcc.a"), "a").unwrap();
        fs::write(staging.join("MODULE.bazel"), "module()").unwrap();
        fs::write(staging.join("BUILD"), "").unwrap();
        fs::write(staging.join("notes.txt"), "kept").unwrap();

        let mut observer = crate::pipeline::RecordingObserver::new();
        run(&mut harness.context(&mut observer)).unwrap();

        assert!(staging.is_dir());
        for gone in ["bin", "lib", "x86_64-linux-gnu", "MODULE.bazel", "BUILD"] {
            assert!(!staging.join(gone).exists(), "{gone} should be removed");
        }
        assert!(staging.join("keep/me").is_dir());
        assert!(staging.join("notes.txt").is_file());
    }

    #[test]
    fn cleaning_an_empty_workspace_is_fine() {
        let harness = Harness::new();
        let mut observer = crate::pipeline::RecordingObserver::new();
        run(&mut harness.context(&mut observer)).unwrap();
        assert!(observer.events.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_subtree_is_unlinked_not_followed() {
        let harness = Harness::new();
        let outside = harness.temp.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("precious"), "x").unwrap();
        std::os::unix::fs::symlink(&outside, harness.workspace.staging_dir().join("lib")).unwrap();

        let mut observer = crate::pipeline::RecordingObserver::new();
        run(&mut harness.context(&mut observer)).unwrap();

        assert!(!harness.workspace.staging_dir().join("lib").exists());
        assert!(outside.join("precious").is_file());
    }
}
