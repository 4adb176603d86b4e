//! Slice profile names from container resource keys.
//!
//! A workload asks for a slice through a resource limit keyed like
//! `nvidia.com/mig-1g.5gb`; the profile is the `<compute>g.<memory>gb`
//! suffix.

use std::sync::LazyLock;

use regex::Regex;

static PROFILE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+g\.\d+gb)").expect("profile pattern is a valid regex")
});

/// Whether a resource key names an accelerator slice for the given vendor.
pub fn is_accelerator_resource(key: &str, vendor: &str) -> bool {
    key.contains(vendor) && PROFILE_PATTERN.is_match(key)
}

/// Extract the profile name from a set of resource keys.
///
/// Returns the profile of the first key (in iteration order) that is an
/// accelerator resource, or `None` when no key carries a profile.
pub fn extract_profile<'a, I>(keys: I, vendor: &str) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    keys.into_iter()
        .filter(|key| key.contains(vendor))
        .find_map(|key| PROFILE_PATTERN.captures(key))
        .map(|caps| caps[1].to_string())
}
