// opts.rs — Flattening options bundle
//
// All knobs are passed explicitly; the core reads no environment variables.

use serde::{Deserialize, Serialize};

/// Shape of the output section carried through flattening.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    /// Keep the model's output item as written.
    #[default]
    Item,
    /// Rebuild the output section as data declarations.
    Dzn,
    /// Rebuild the output section as a JSON object.
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlatteningOptions {
    /// Forbid multi-range integer domains; excess ranges are extracted into
    /// an explicit set-membership constraint over a covering range.
    pub only_range_domains: bool,
    /// Prefer `_imp` (half-reified) call variants under `pos` context.
    pub enable_half_reification: bool,
    /// Post explicit domain constraints for every domain narrowing instead
    /// of silently tightening the declaration.
    pub record_domain_changes: bool,
    /// Copy the output item into the flat model rather than rebuilding it.
    pub keep_output_in_fzn: bool,
    /// Record per-location wall-clock budgets during flattening.
    pub detailed_timing: bool,
    /// Attach source-path annotations to all introduced variables, not just
    /// deeply nested ones.
    pub collect_paths: bool,
    /// Elide call frames from source paths, keeping top-level segments only.
    pub only_toplevel_paths: bool,
    /// Seed for the environment's PRNG.
    pub random_seed: u64,
    pub output_mode: OutputMode,
    /// Wrap rebuilt JSON output in a single enclosing object.
    pub encapsulate_json: bool,
}

impl Default for FlatteningOptions {
    fn default() -> Self {
        FlatteningOptions {
            only_range_domains: false,
            enable_half_reification: false,
            record_domain_changes: false,
            keep_output_in_fzn: false,
            detailed_timing: false,
            collect_paths: false,
            only_toplevel_paths: false,
            random_seed: 0,
            output_mode: OutputMode::default(),
            encapsulate_json: false,
        }
    }
}
