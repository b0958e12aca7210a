/// What to do when a single entity's dump fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Clean up the failed entity's partial directory and abort the run.
    #[default]
    Abort,
    /// Record the failure in the report and continue with the next entity.
    Continue,
}

/// Configuration for a dump pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DumpConfig {
    /// Organize output under per-group directories. When off, everything
    /// lands flat under the output root.
    pub organize_by_group: bool,
    /// Place secondary copies of calculations as symlinks to the primary
    /// path instead of full duplicates.
    pub symlink_duplicates: bool,
    /// Also dump called sub-entities that are not explicit group members.
    pub include_nested: bool,
    /// Dump entities that belong to no group under an `ungrouped` root.
    pub also_ungrouped: bool,
    /// Per-entity failure handling.
    pub failure_policy: FailurePolicy,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            organize_by_group: true,
            symlink_duplicates: false,
            include_nested: false,
            also_ungrouped: true,
            failure_policy: FailurePolicy::Abort,
        }
    }
}
