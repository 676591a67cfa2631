use std::collections::BTreeSet;

/// Which log `target` values a run is allowed to ship.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedTargetSet {
    /// No allow-list configured
    All,
    /// Allow-list intersected with the targets seen in the log
    Only(BTreeSet<String>),
}

impl AllowedTargetSet {
    /// Intersect the configured allow-list with the observed targets.
    ///
    /// An empty allow-list, or one that matches no observed target, allows
    /// everything.
    pub fn resolve<I>(allow_list: &[String], observed: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        if allow_list.is_empty() {
            return AllowedTargetSet::All;
        }

        let allowed: BTreeSet<&str> = allow_list.iter().map(String::as_str).collect();
        let matched: BTreeSet<String> = observed
            .into_iter()
            .filter(|target| allowed.contains(target.as_str()))
            .collect();

        if matched.is_empty() {
            AllowedTargetSet::All
        } else {
            AllowedTargetSet::Only(matched)
        }
    }

    pub fn allows(&self, target: &str) -> bool {
        match self {
            AllowedTargetSet::All => true,
            AllowedTargetSet::Only(targets) => targets.contains(target),
        }
    }
}

/// Split the comma-separated `log_targets` setting.
pub fn parse_allow_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observed() -> Vec<String> {
        vec!["course".to_string(), "course_module".to_string(), "user".to_string()]
    }

    #[test]
    fn test_empty_allow_list_allows_all() {
        let set = AllowedTargetSet::resolve(&[], observed());
        assert_eq!(set, AllowedTargetSet::All);
        assert!(set.allows("anything"));
    }

    #[test]
    fn test_intersection_with_observed() {
        let allow = vec!["course".to_string(), "never_seen".to_string()];
        let set = AllowedTargetSet::resolve(&allow, observed());
        assert_eq!(
            set,
            AllowedTargetSet::Only(BTreeSet::from(["course".to_string()]))
        );
        assert!(set.allows("course"));
        assert!(!set.allows("user"));
        assert!(!set.allows("never_seen"));
    }

    #[test]
    fn test_disjoint_allow_list_falls_back_to_all() {
        let allow = vec!["never_seen".to_string()];
        let set = AllowedTargetSet::resolve(&allow, observed());
        assert_eq!(set, AllowedTargetSet::All);
        assert!(set.allows("course"));
        assert!(set.allows("user"));
    }

    #[test]
    fn test_allow_list_before_any_logs_allows_all() {
        let allow = vec!["course".to_string()];
        assert_eq!(
            AllowedTargetSet::resolve(&allow, Vec::new()),
            AllowedTargetSet::All
        );
    }

    #[test]
    fn test_parse_allow_list() {
        assert_eq!(
            parse_allow_list(" course, user ,,course_module "),
            vec!["course", "user", "course_module"]
        );
        assert!(parse_allow_list("  ").is_empty());
    }
}
