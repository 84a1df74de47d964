//! Names for migration artifacts, bounded to platform limits.

/// Kubernetes object names are DNS subdomains of at most 253 characters
const MAX_NAME_LEN: usize = 253;

/// Length of the migration-id slice embedded in names
const FRAGMENT_LEN: usize = 10;

/// The slice of a migration id used in generated names
pub fn id_fragment(migration_id: &str) -> &str {
    &migration_id[..migration_id.len().min(FRAGMENT_LEN)]
}

/// Name for the replacement pod of a standalone migration
pub fn standalone_target_name(original: &str, fragment: &str) -> String {
    bounded_name(original, &format!("-migrated-{}", fragment), "")
}

/// Name for artifacts of a replicated-workload migration. The distinct
/// prefix avoids collision with the workload controller's own pod naming.
pub fn rescheduled_name(original: &str, fragment: &str) -> String {
    bounded_name(original, &format!("-{}", fragment), "rescheduled-")
}

fn bounded_name(original: &str, suffix: &str, prefix: &str) -> String {
    let budget = MAX_NAME_LEN - suffix.len() - prefix.len();
    let mut base = original;
    if base.len() > budget {
        base = &base[..budget];
    }
    format!("{}{}{}", prefix, base, suffix)
}
