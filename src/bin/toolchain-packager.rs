use std::path::Path;

use anyhow::{bail, Context, Result};
use toolchain_packager::module::integrity::verify_archive;
use toolchain_packager::preflight::{check_packaging_tools, check_required_tools, required_tools};
use toolchain_packager::{
    load_job, Pipeline, RegistryLock, SourceRecord, SystemExecutor, TracingObserver,
};

fn usage() -> &'static str {
    "Usage:\n  toolchain-packager package <job.toml>\n  toolchain-packager verify <job.toml>\n  toolchain-packager explain <job.toml> <path>...\n  toolchain-packager preflight <job.toml>"
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("toolchain_packager=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let args: Vec<String> = std::env::args().skip(1).collect();

    match args.as_slice() {
        [cmd, job] if cmd == "package" => package(Path::new(job)),
        [cmd, job] if cmd == "verify" => verify(Path::new(job)),
        [cmd, job, paths @ ..] if cmd == "explain" && !paths.is_empty() => {
            explain(Path::new(job), paths)
        }
        [cmd, job] if cmd == "preflight" => preflight(Path::new(job)),
        _ => bail!(usage()),
    }
}

fn package(job_path: &Path) -> Result<()> {
    let job = load_job(job_path)?;
    let tools = required_tools(&job.plan);
    let skipped = check_packaging_tools(&tools)?;

    let workspace = job.workspace()?;
    let _lock = RegistryLock::try_acquire(&workspace.layout().lock_path(&job.identity))?;

    println!("Packaging {}", job.identity);
    for tool in &skipped {
        println!(
            "  warning: {} not found, {} will report every item as failed",
            tool.program, tool.used_by
        );
    }
    let mut observer = TracingObserver::new();
    let report = Pipeline::new(&workspace, &job.plan, &SystemExecutor, &mut observer)
        .run_all()
        .with_context(|| format!("packaging {}", job.identity))?;

    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    println!("  archive:   {}", report.archive.display());
    println!("  integrity: {}", report.record.integrity);
    println!("  record:    {}", workspace.source_record_path().display());
    Ok(())
}

fn verify(job_path: &Path) -> Result<()> {
    let job = load_job(job_path)?;
    let layout = toolchain_packager::module::RegistryLayout::new(job.registry.clone());
    let record_path = layout.source_record_path(&job.identity);
    let record = SourceRecord::read(&record_path)?;
    let archive = record
        .archive_path()
        .unwrap_or_else(|| layout.tarball_path(&job.identity));

    let verification = verify_archive(&record, &archive)?;
    if !verification.matches() {
        bail!(
            "integrity mismatch for '{}': record says sha256-{}, archive hashes to sha256-{}",
            archive.display(),
            verification.expected,
            verification.actual
        );
    }
    println!("OK {} sha256-{}", archive.display(), verification.actual);
    Ok(())
}

fn explain(job_path: &Path, paths: &[String]) -> Result<()> {
    let job = load_job(job_path)?;
    for raw in paths {
        let is_dir = raw.ends_with('/') || job.plan.install_dir.join(raw).is_dir();
        println!("{}", job.plan.selection.explain(raw, is_dir));
    }
    Ok(())
}

fn preflight(job_path: &Path) -> Result<()> {
    let job = load_job(job_path)?;
    let tools = required_tools(&job.plan);
    check_required_tools(&tools)?;
    for tool in &tools {
        println!("found {} ({})", tool.program, tool.used_by);
    }
    if !job.plan.install_dir.is_dir() {
        bail!(
            "install dir '{}' does not exist",
            job.plan.install_dir.display()
        );
    }
    println!("preflight OK for {}", job.identity);
    Ok(())
}
