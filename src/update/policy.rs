// ABOUTME: Update policy fixed at coordinator construction, plus the label vocabulary.
// ABOUTME: Labels are read from each snapshot and never written back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::runtime::traits::ContainerRecord;
use crate::types::ContainerName;

/// `false` opts a container out; `true` opts it in when `label_enable` is set.
pub const ENABLE_LABEL: &str = "lookout.enable";
/// Comma separated names of containers this one needs running first.
pub const DEPENDS_ON_LABEL: &str = "lookout.depends-on";
/// `true` reports staleness without replacing.
pub const MONITOR_ONLY_LABEL: &str = "lookout.monitor-only";

/// What the dependency cascade does with a dependent that opted out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OptOutPrecedence {
    /// Leave it alone.
    #[default]
    FavorSkip,
    /// Recreate it with the rest of its chain.
    FavorForce,
}

/// Bounds on each runtime call of a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Grace period before a stop escalates to a kill.
    pub stop_grace: Duration,
    /// Any single create/start/rename/remove/inspect call.
    pub operation: Duration,
    /// Resolving the latest digest, including the pull.
    pub pull: Duration,
    /// Wait between start and the liveness check.
    pub settle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            stop_grace: Duration::from_secs(10),
            operation: Duration::from_secs(60),
            pull: Duration::from_secs(300),
            settle: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    pub watch_stopped: bool,
    /// Only containers labelled `lookout.enable=true` are watched.
    pub label_enable: bool,
    pub monitor_only: bool,
    /// Remove the old image after a successful replacement.
    pub cleanup: bool,
    pub restart_dependents: bool,
    pub opt_out_precedence: OptOutPrecedence,
    /// Allow-list of container names. Empty watches everything.
    pub containers: BTreeSet<String>,
    /// Components replaced at the same time.
    pub worker_limit: usize,
    pub timeouts: Timeouts,
}

impl Default for UpdatePolicy {
    fn default() -> Self {
        Self {
            watch_stopped: false,
            label_enable: false,
            monitor_only: false,
            cleanup: false,
            restart_dependents: false,
            opt_out_precedence: OptOutPrecedence::default(),
            containers: BTreeSet::new(),
            worker_limit: 1,
            timeouts: Timeouts::default(),
        }
    }
}

impl UpdatePolicy {
    pub fn is_monitor_only(&self, record: &ContainerRecord) -> bool {
        record
            .label_flag(MONITOR_ONLY_LABEL)
            .unwrap_or(self.monitor_only)
    }

    pub fn is_filtered_out(&self, record: &ContainerRecord) -> bool {
        !self.containers.is_empty() && !self.containers.contains(record.name.as_str())
    }
}

/// Dependencies a record declares: runtime links plus the depends-on label.
///
/// Returns the offending label value if any entry is not a valid name.
pub fn declared_dependencies(
    record: &ContainerRecord,
) -> Result<BTreeSet<ContainerName>, String> {
    let mut deps = record.links.clone();
    if let Some(raw) = record.label(DEPENDS_ON_LABEL) {
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let name = ContainerName::new(entry).map_err(|_| raw.to_string())?;
            deps.insert(name);
        }
    }
    Ok(deps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::traits::ContainerState;
    use crate::types::{ContainerId, ImageId, ImageRef};
    use std::collections::HashMap;

    fn record(labels: &[(&str, &str)]) -> ContainerRecord {
        ContainerRecord {
            id: ContainerId::new("c1"),
            name: ContainerName::new("web").unwrap(),
            image: ImageRef::parse("nginx").unwrap(),
            image_id: ImageId::new("sha256:01"),
            digest: None,
            links: BTreeSet::from([ContainerName::new("cache").unwrap()]),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            state: ContainerState::Running,
        }
    }

    #[test]
    fn depends_on_label_merges_with_links() {
        let deps = declared_dependencies(&record(&[(DEPENDS_ON_LABEL, "db, queue")])).unwrap();
        let names: Vec<&str> = deps.iter().map(ContainerName::as_str).collect();
        assert_eq!(names, vec!["cache", "db", "queue"]);
    }

    #[test]
    fn malformed_depends_on_is_reported() {
        let err = declared_dependencies(&record(&[(DEPENDS_ON_LABEL, "db,bad name")])).unwrap_err();
        assert_eq!(err, "db,bad name");
    }

    #[test]
    fn monitor_only_label_overrides_global_setting() {
        let policy = UpdatePolicy {
            monitor_only: true,
            ..Default::default()
        };
        assert!(policy.is_monitor_only(&record(&[])));
        assert!(!policy.is_monitor_only(&record(&[(MONITOR_ONLY_LABEL, "false")])));
    }

    #[test]
    fn allow_list_filters_other_names() {
        let policy = UpdatePolicy {
            containers: BTreeSet::from(["api".to_string()]),
            ..Default::default()
        };
        assert!(policy.is_filtered_out(&record(&[])));
        assert!(!UpdatePolicy::default().is_filtered_out(&record(&[])));
    }
}
