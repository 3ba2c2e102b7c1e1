//! Host and target binary stripping.
//!
//! Each listed item is stripped on its own; a failure is recorded against
//! that item and the stage moves on.

use std::path::{Component, Path};

use crate::pipeline::{FatalCause, ItemFailure, PipelineEvent, Stage, StageContext};
use crate::process::Cmd;
use crate::rules::StripList;

pub(crate) fn run_host(ctx: &mut StageContext<'_>) -> Result<Vec<ItemFailure>, FatalCause> {
    let plan = ctx.plan;
    Ok(strip_items(
        ctx,
        Stage::StripHost,
        &plan.tools.host_strip,
        &plan.strip_host,
    ))
}

pub(crate) fn run_target(ctx: &mut StageContext<'_>) -> Result<Vec<ItemFailure>, FatalCause> {
    let plan = ctx.plan;
    if plan.strip_target.is_empty() {
        return Ok(Vec::new());
    }
    let prefix = plan
        .target_prefix
        .as_deref()
        .ok_or(FatalCause::MissingTargetPrefix {
            count: plan.strip_target.len(),
        })?;
    let program = format!("{prefix}strip");
    Ok(strip_items(ctx, Stage::StripTarget, &program, &plan.strip_target))
}

fn strip_items(
    ctx: &mut StageContext<'_>,
    stage: Stage,
    program: &str,
    items: &StripList,
) -> Vec<ItemFailure> {
    let mut failures = Vec::new();
    let staging = ctx.workspace.staging_dir().to_path_buf();

    for item in items.iter() {
        let outcome = if !is_workspace_relative(item) {
            Err("path leaves the workspace".to_string())
        } else {
            let path = staging.join(item);
            if !path.exists() {
                Err("not present in the workspace".to_string())
            } else {
                match Cmd::new(program).arg_path(&path).allow_fail().run_on(ctx.executor) {
                    Ok(result) if result.success() => Ok(()),
                    Ok(result) => Err(format!(
                        "{program} exited with code {}: {}",
                        result.exit_code,
                        result.stderr.trim()
                    )),
                    Err(err) => Err(err.to_string()),
                }
            }
        };

        match outcome {
            Ok(()) => ctx.emit(PipelineEvent::ItemSucceeded {
                stage,
                item: item.to_string(),
            }),
            Err(cause) => {
                ctx.emit(PipelineEvent::ItemFailed {
                    stage,
                    item: item.to_string(),
                    message: cause.clone(),
                });
                failures.push(ItemFailure {
                    stage,
                    item: item.to_string(),
                    cause,
                });
            }
        }
    }
    failures
}

fn is_workspace_relative(item: &str) -> bool {
    Path::new(item)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
