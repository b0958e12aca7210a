use std::fs;
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use uuid::Uuid;

use strata_dump::{
    DumpConfig, DumpEngine, DumpScope, DumpTracker, FailurePolicy, RegistryKind, SAFEGUARD_FILE,
};
use strata_query::{MemoryQuerySource, Profile, QuerySource};
use strata_store::{FsBackend, MemoryBackend, StoreBackend};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Dump(args) => cmd_dump(args),
        Command::Status(args) => cmd_status(args),
        Command::Verify(args) => cmd_verify(args),
    }
}

fn cmd_dump(args: DumpArgs) -> anyhow::Result<()> {
    let raw = fs::read_to_string(&args.profile)
        .with_context(|| format!("reading profile {}", args.profile.display()))?;
    let profile = Profile::from_json(&raw)?;
    let query: Arc<dyn QuerySource> = Arc::new(MemoryQuerySource::from_profile(profile));

    let backend: Arc<dyn StoreBackend> = match &args.store {
        Some(dir) => Arc::new(FsBackend::new(dir)?),
        None => Arc::new(MemoryBackend::new()),
    };

    let scope = resolve_scope(query.as_ref(), &args)?;
    let config = DumpConfig {
        organize_by_group: !args.flat,
        symlink_duplicates: args.symlink_duplicates,
        include_nested: args.include_nested,
        also_ungrouped: !args.skip_ungrouped,
        failure_policy: if args.continue_on_error {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        },
    };

    let mut engine = DumpEngine::new(query, backend, config, &args.output)?;
    let report = engine.dump(&scope)?;

    println!(
        "{} Dumped to {}",
        "✓".green().bold(),
        args.output.display().to_string().bold()
    );
    println!(
        "  Written: {} primary, {} updated, {} symlinked, {} duplicated",
        report.primary.to_string().bold(),
        report.updated,
        report.symlinked,
        report.duplicated
    );
    println!(
        "  Removed: {} entities, {} groups; renamed {} groups; skipped {}",
        report.deleted_entities, report.deleted_groups, report.renamed_groups, report.skipped
    );
    if !report.failures.is_empty() {
        println!("  {} {} failed:", "!".red().bold(), report.failures.len());
        for failure in &report.failures {
            println!("    {} {}", failure.uuid.to_string().yellow(), failure.error);
        }
    }
    Ok(())
}

fn resolve_scope(query: &dyn QuerySource, args: &DumpArgs) -> anyhow::Result<DumpScope> {
    if let Some(label) = &args.group {
        let groups = query.groups()?;
        let Some(group) = groups.iter().find(|g| g.label == *label) else {
            bail!("no group labelled {label:?} in the profile");
        };
        return Ok(DumpScope::Group(group.uuid));
    }
    if let Some(node) = &args.node {
        let uuid: Uuid = node
            .parse()
            .with_context(|| format!("parsing entity UUID {node:?}"))?;
        return Ok(DumpScope::Entity(uuid));
    }
    Ok(DumpScope::All)
}

fn cmd_status(args: StatusArgs) -> anyhow::Result<()> {
    let tracker = DumpTracker::load(&args.output)?;
    println!("Output root {}", args.output.display().to_string().bold());
    match tracker.last_dump_time {
        Some(instant) => println!("Last dump: {}", instant.to_rfc3339().cyan()),
        None => println!("Last dump: {}", "never".dimmed()),
    }
    for (name, registry) in registries() {
        println!(
            "  {:>12}: {}",
            name,
            tracker.uuids(registry).len().to_string().bold()
        );
    }
    Ok(())
}

fn cmd_verify(args: VerifyArgs) -> anyhow::Result<()> {
    let tracker = DumpTracker::load(&args.output)?;
    let mut issues = 0usize;

    for (_, registry) in registries() {
        for uuid in tracker.uuids(registry) {
            let Some(record) = tracker.get_record(registry, &uuid) else {
                continue;
            };
            if !record.path.exists() {
                println!(
                    "  {} {} primary path missing: {}",
                    "!".red(),
                    uuid.to_string().yellow(),
                    record.path.display()
                );
                issues += 1;
            } else if !record.path.join(SAFEGUARD_FILE).exists() {
                println!(
                    "  {} {} safeguard marker missing: {}",
                    "!".red(),
                    uuid.to_string().yellow(),
                    record.path.display()
                );
                issues += 1;
            }
            for symlink in &record.symlinks {
                if symlink.symlink_metadata().is_err() {
                    println!(
                        "  {} {} symlink missing: {}",
                        "!".red(),
                        uuid.to_string().yellow(),
                        symlink.display()
                    );
                    issues += 1;
                }
            }
            for duplicate in &record.duplicates {
                if !duplicate.exists() {
                    println!(
                        "  {} {} duplicate missing: {}",
                        "!".red(),
                        uuid.to_string().yellow(),
                        duplicate.display()
                    );
                    issues += 1;
                }
            }
        }
    }

    if issues == 0 {
        println!("{} Tracker and filesystem agree", "✓".green().bold());
    } else {
        println!("{} {} issues found", "!".red().bold(), issues);
    }
    Ok(())
}

fn registries() -> [(&'static str, RegistryKind); 4] {
    [
        ("calculations", RegistryKind::Calculations),
        ("workflows", RegistryKind::Workflows),
        ("data", RegistryKind::Data),
        ("groups", RegistryKind::Groups),
    ]
}
