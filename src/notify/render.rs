// ABOUTME: Plain-text session summary shared by every notifier.

use serde::Serialize;
use std::fmt::Write;

use crate::update::{ContainerOutcome, SessionResult};

/// What a notifier sends.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub title: String,
    pub body: String,
    pub session: SessionResult,
}

pub fn render(session: &SessionResult, host: &str) -> Message {
    let mut body = String::new();
    let counts = &session.counts;
    let _ = writeln!(
        body,
        "Session {} on {} ({} trigger): {}",
        session.id, session.provider, session.trigger, session.status
    );
    let _ = writeln!(
        body,
        "Scanned {}, updated {}, failed {}, skipped {}.",
        counts.scanned, counts.updated, counts.failed, counts.skipped
    );

    let updated: Vec<_> = session.updated().collect();
    if !updated.is_empty() {
        body.push_str("\nUpdated:\n");
        for report in updated {
            let detail = match &report.outcome {
                ContainerOutcome::Updated {
                    from,
                    to: Some(to),
                    forced,
                } => format!(
                    " {} -> {}{}",
                    from.as_ref().map(|d| d.short()).unwrap_or("unknown"),
                    to.short(),
                    if *forced { " (forced)" } else { "" }
                ),
                ContainerOutcome::Updated { forced: true, .. } => {
                    " (restarted for a dependency)".to_string()
                }
                _ => String::new(),
            };
            let _ = writeln!(body, "- {} ({}){}", report.name, report.image, detail);
        }
    }

    let failed: Vec<_> = session.failed().collect();
    if !failed.is_empty() {
        body.push_str("\nFailed:\n");
        for report in failed {
            if let ContainerOutcome::Failed {
                error, rolled_back, ..
            } = &report.outcome
            {
                let note = if *rolled_back { " (rolled back)" } else { "" };
                let _ = writeln!(body, "- {} ({}): {}{}", report.name, report.image, error, note);
            }
        }
    }

    let skipped: Vec<_> = session.skipped().collect();
    if !skipped.is_empty() {
        body.push_str("\nSkipped:\n");
        for report in skipped {
            if let ContainerOutcome::Skipped { reason } = &report.outcome {
                let _ = writeln!(body, "- {}: {}", report.name, reason);
            }
        }
    }

    if !session.component_failures.is_empty() {
        body.push_str("\nNot attempted:\n");
        for failure in &session.component_failures {
            let names: Vec<&str> = failure.containers.iter().map(|n| n.as_str()).collect();
            let _ = writeln!(body, "- {}: {}", names.join(", "), failure.error);
        }
    }

    Message {
        title: format!("lookout on {host}"),
        body,
        session: session.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContainerName, Digest, ImageRef};
    use crate::update::{ContainerReport, SessionCounts, SessionStatus, SkipReason, Trigger};
    use chrono::Utc;

    fn report(name: &str, outcome: ContainerOutcome) -> ContainerReport {
        ContainerReport {
            name: ContainerName::new(name).unwrap(),
            image: ImageRef::parse("nginx:1.25").unwrap(),
            outcome,
        }
    }

    #[test]
    fn lists_each_outcome_group() {
        let digest =
            |c: char| Digest::parse(&format!("sha256:{}", c.to_string().repeat(64))).unwrap();
        let session = SessionResult {
            id: 7,
            provider: "local".into(),
            trigger: Trigger::Schedule,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            containers: vec![
                report(
                    "web",
                    ContainerOutcome::Updated {
                        from: Some(digest('a')),
                        to: Some(digest('b')),
                        forced: false,
                    },
                ),
                report(
                    "db",
                    ContainerOutcome::Failed {
                        error: "start failed".into(),
                        state: None,
                        rolled_back: true,
                    },
                ),
                report(
                    "cache",
                    ContainerOutcome::Skipped {
                        reason: SkipReason::OptedOut,
                    },
                ),
            ],
            component_failures: Vec::new(),
            counts: SessionCounts {
                scanned: 3,
                updated: 1,
                failed: 1,
                skipped: 1,
                up_to_date: 0,
            },
            status: SessionStatus::PartiallyFailed,
        };

        let message = render(&session, "edge-1");
        assert_eq!(message.title, "lookout on edge-1");
        assert!(message.body.contains("Session 7 on local (schedule trigger): partially failed"));
        assert!(message.body.contains("- web (nginx:1.25)"));
        assert!(message.body.contains("- db (nginx:1.25): start failed (rolled back)"));
        assert!(message.body.contains("- cache: "));
    }
}
