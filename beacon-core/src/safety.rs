//! Channel safety gating
//!
//! A channel is safe for a project only if an admin explicitly allow-listed it
//! as internal-only. Every failure mode (blank input, lookup error, missing
//! configuration) answers "not safe".

use crate::store::ChannelAllowlist;
use std::collections::HashSet;
use std::sync::Mutex;

/// Decides whether a channel is an approved internal target.
///
/// The all-projects view is cached until [`invalidate_cache`](Self::invalidate_cache);
/// per-project lookups always hit the store.
pub struct ChannelSafetyValidator<'a, A: ?Sized> {
    allowlist: &'a A,
    all_channels: Mutex<Option<HashSet<String>>>,
}

impl<'a, A: ChannelAllowlist + ?Sized> ChannelSafetyValidator<'a, A> {
    pub fn new(allowlist: &'a A) -> Self {
        Self {
            allowlist,
            all_channels: Mutex::new(None),
        }
    }

    /// True iff `channel_id` is explicitly allow-listed.
    ///
    /// With a project key only that project's list counts. Without one, any
    /// project's list counts.
    pub fn is_safe(&self, channel_id: &str, project_key: Option<&str>) -> bool {
        let channel_id = channel_id.trim();
        if channel_id.is_empty() {
            return false;
        }

        match project_key.map(str::trim) {
            Some("") => false,
            Some(project) => self
                .safe_channels_for_project(project)
                .iter()
                .any(|c| c == channel_id),
            None => self.is_safe_anywhere(channel_id),
        }
    }

    /// The project's allow-list, or empty when unconfigured or on error.
    pub fn safe_channels_for_project(&self, project_key: &str) -> Vec<String> {
        let project_key = project_key.trim();
        if project_key.is_empty() {
            return Vec::new();
        }

        match self.allowlist.safe_channels(project_key) {
            Ok(channels) => channels,
            Err(e) => {
                tracing::warn!(
                    project_key,
                    error = %e,
                    "Failed to load channel allow-list, treating project as unconfigured"
                );
                Vec::new()
            }
        }
    }

    /// Drop the cached all-projects view so the next lookup reloads it.
    pub fn invalidate_cache(&self) {
        *self.all_channels.lock().unwrap() = None;
    }

    fn is_safe_anywhere(&self, channel_id: &str) -> bool {
        let mut cache = self.all_channels.lock().unwrap();

        if cache.is_none() {
            match self.allowlist.all_safe_channels() {
                Ok(by_project) => {
                    *cache = Some(by_project.into_values().flatten().collect());
                }
                Err(e) => {
                    // Leave the cache empty so a later call can retry
                    tracing::warn!(error = %e, "Failed to load channel allow-lists");
                    return false;
                }
            }
        }

        cache
            .as_ref()
            .is_some_and(|channels| channels.contains(channel_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use std::cell::Cell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeAllowlist {
        lists: HashMap<String, Vec<String>>,
        fail: bool,
        all_lookups: Cell<usize>,
    }

    impl FakeAllowlist {
        fn with(mut self, project: &str, channels: &[&str]) -> Self {
            self.lists.insert(
                project.to_string(),
                channels.iter().map(|c| c.to_string()).collect(),
            );
            self
        }
    }

    impl ChannelAllowlist for FakeAllowlist {
        fn safe_channels(&self, project_key: &str) -> Result<Vec<String>> {
            if self.fail {
                return Err(Error::Config("allow-list unavailable".to_string()));
            }
            Ok(self.lists.get(project_key).cloned().unwrap_or_default())
        }

        fn all_safe_channels(&self) -> Result<HashMap<String, Vec<String>>> {
            self.all_lookups.set(self.all_lookups.get() + 1);
            if self.fail {
                return Err(Error::Config("allow-list unavailable".to_string()));
            }
            Ok(self.lists.clone())
        }
    }

    #[test]
    fn test_project_scoped_lookup() {
        let store = FakeAllowlist::default()
            .with("ACME", &["C-acme-eng"])
            .with("CORE", &["C-core"]);
        let validator = ChannelSafetyValidator::new(&store);

        assert!(validator.is_safe("C-acme-eng", Some("ACME")));
        assert!(!validator.is_safe("C-core", Some("ACME")));
        assert!(!validator.is_safe("C-client", Some("ACME")));
        assert!(!validator.is_safe("C-acme-eng", Some("NONE")));
    }

    #[test]
    fn test_blank_inputs_are_unsafe() {
        let store = FakeAllowlist::default().with("ACME", &["C1"]);
        let validator = ChannelSafetyValidator::new(&store);

        assert!(!validator.is_safe("", Some("ACME")));
        assert!(!validator.is_safe("   ", None));
        assert!(!validator.is_safe("C1", Some(" ")));
        assert!(validator.safe_channels_for_project("").is_empty());
    }

    #[test]
    fn test_lookup_errors_fail_closed() {
        let store = FakeAllowlist {
            fail: true,
            ..FakeAllowlist::default()
        }
        .with("ACME", &["C1"]);
        let validator = ChannelSafetyValidator::new(&store);

        assert!(!validator.is_safe("C1", Some("ACME")));
        assert!(!validator.is_safe("C1", None));
        assert!(validator.safe_channels_for_project("ACME").is_empty());
    }

    #[test]
    fn test_global_lookup_is_cached_until_invalidated() {
        let store = FakeAllowlist::default()
            .with("ACME", &["C1"])
            .with("CORE", &["C2"]);
        let validator = ChannelSafetyValidator::new(&store);

        assert!(validator.is_safe("C1", None));
        assert!(validator.is_safe("C2", None));
        assert!(!validator.is_safe("C3", None));
        assert_eq!(store.all_lookups.get(), 1);

        validator.invalidate_cache();
        assert!(validator.is_safe("C1", None));
        assert_eq!(store.all_lookups.get(), 2);
    }

    #[test]
    fn test_unconfigured_everything_is_unsafe() {
        let store = FakeAllowlist::default();
        let validator = ChannelSafetyValidator::new(&store);
        assert!(!validator.is_safe("C1", None));
        assert!(!validator.is_safe("C1", Some("ACME")));
    }
}
