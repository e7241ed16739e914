use crate::config::ServiceConfig;

/// The difference between the running service set and a freshly loaded one.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ReloadPlan {
    pub added: Vec<ServiceConfig>,
    pub removed: Vec<String>,
    pub changed: Vec<ServiceConfig>,
    pub unchanged: Vec<String>,
}

/// Diffs by service name; a name present on both sides with a different
/// config counts as changed.
pub(crate) fn diff(old: &[ServiceConfig], new: &[ServiceConfig]) -> ReloadPlan {
    let mut plan = ReloadPlan::default();

    for service in new {
        match old.iter().find(|s| s.name == service.name) {
            None => plan.added.push(service.clone()),
            Some(existing) if existing != service => plan.changed.push(service.clone()),
            Some(_) => plan.unchanged.push(service.name.clone()),
        }
    }
    for service in old {
        if !new.iter().any(|s| s.name == service.name) {
            plan.removed.push(service.name.clone());
        }
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(name: &str, arg: &str) -> ServiceConfig {
        ServiceConfig::new(name, vec!["/bin/run".to_string(), arg.to_string()])
    }

    #[test]
    fn identical_sets_are_all_unchanged() {
        let old = vec![service("a", "1"), service("b", "2")];
        let plan = diff(&old, &old.clone());
        assert!(plan.added.is_empty());
        assert!(plan.removed.is_empty());
        assert!(plan.changed.is_empty());
        assert_eq!(plan.unchanged, vec!["a", "b"]);
    }

    #[test]
    fn add_remove_change_are_separated() {
        let old = vec![service("a", "1"), service("b", "2")];
        let new = vec![service("a", "other"), service("c", "3")];
        let plan = diff(&old, &new);

        assert_eq!(plan.added, vec![service("c", "3")]);
        assert_eq!(plan.removed, vec!["b"]);
        assert_eq!(plan.changed, vec![service("a", "other")]);
        assert!(plan.unchanged.is_empty());
    }

    #[test]
    fn any_field_difference_counts_as_changed() {
        let old = vec![service("a", "1")];
        let mut tweaked = service("a", "1");
        tweaked.user = "nobody".to_string();
        let plan = diff(&old, &[tweaked.clone()]);
        assert_eq!(plan.changed, vec![tweaked]);
    }

    #[test]
    fn empty_new_set_removes_everything() {
        let old = vec![service("a", "1"), service("b", "2")];
        let plan = diff(&old, &[]);
        assert_eq!(plan.removed, vec!["a", "b"]);
        assert!(plan.added.is_empty());
    }
}
