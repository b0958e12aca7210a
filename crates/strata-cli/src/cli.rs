use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata — incremental entity store dumps",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Dump entities and groups to a filesystem tree
    Dump(DumpArgs),
    /// Show what the tracker at an output root knows
    Status(StatusArgs),
    /// Check tracked paths against the filesystem
    Verify(VerifyArgs),
}

#[derive(Args)]
pub struct DumpArgs {
    /// Profile JSON describing entities, groups, memberships, and links
    pub profile: PathBuf,
    /// Output root directory
    pub output: PathBuf,
    /// Object store directory backing the entity repositories
    #[arg(long)]
    pub store: Option<PathBuf>,
    /// Restrict the pass to one group, by label
    #[arg(short, long)]
    pub group: Option<String>,
    /// Restrict the pass to one entity, by UUID
    #[arg(long, conflicts_with = "group")]
    pub node: Option<String>,
    /// Do not organize output by group; everything at the root
    #[arg(long)]
    pub flat: bool,
    /// Place secondary calculation copies as symlinks
    #[arg(long)]
    pub symlink_duplicates: bool,
    /// Also dump called sub-entities that are not group members
    #[arg(long)]
    pub include_nested: bool,
    /// Skip entities without any group membership
    #[arg(long)]
    pub skip_ungrouped: bool,
    /// Record per-entity failures and keep going instead of aborting
    #[arg(long)]
    pub continue_on_error: bool,
}

#[derive(Args)]
pub struct StatusArgs {
    /// Output root directory
    pub output: PathBuf,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Output root directory
    pub output: PathBuf,
}
