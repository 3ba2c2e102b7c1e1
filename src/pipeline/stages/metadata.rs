use std::fs;

use crate::pipeline::{FatalCause, PipelineEvent, Stage, StageContext};

/// Copy the Bazel descriptor files into the workspace and the registry
/// module dir. All descriptors are checked before anything is copied.
pub(crate) fn run(ctx: &mut StageContext<'_>) -> Result<(), FatalCause> {
    let plan = ctx.plan;
    let sources = plan
        .descriptors
        .iter()
        .map(|name| (name, plan.descriptor_dir.join(name)))
        .collect::<Vec<_>>();
    if let Some((_, missing)) = sources.iter().find(|(_, path)| !path.is_file()) {
        return Err(FatalCause::MissingDescriptor(missing.clone()));
    }

    let staging = ctx.workspace.staging_dir().to_path_buf();
    let module_dir = ctx.workspace.module_dir();
    fs::create_dir_all(&module_dir)
        .map_err(FatalCause::io("creating registry module dir", &module_dir))?;

    for (name, src) in &sources {
        for dest in [staging.join(name), module_dir.join(name)] {
            fs::copy(src, &dest).map_err(FatalCause::io("copying descriptor to", &dest))?;
        }
        ctx.emit(PipelineEvent::ItemSucceeded {
            stage: Stage::MetadataAttach,
            item: name.to_string(),
        });
    }
    Ok(())
}
