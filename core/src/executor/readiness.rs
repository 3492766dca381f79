use std::collections::HashMap;

use crate::store::TaskStatus;

use super::graph::{TaskGraph, TaskLike};

/// What the scheduler should do next for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// Pending tasks whose dependencies all succeeded, in dispatch order.
    pub ready: Vec<String>,
    /// Pending tasks to mark skipped, with the reason.
    pub skip: Vec<(String, String)>,
}

/// Pure readiness evaluation over the graph and the current statuses.
///
/// Walks the tiers once; a task skipped here counts as skipped for its
/// dependents in the same pass, so skips cascade without recursion.
/// Calling it again after applying the result yields no further skips.
pub fn evaluate<T: TaskLike>(
    graph: &TaskGraph<T>,
    tiers: &[Vec<String>],
    statuses: &HashMap<String, TaskStatus>,
) -> Readiness {
    let mut effective = statuses.clone();
    let mut out = Readiness::default();

    for tier in tiers {
        for name in tier {
            if effective.get(name) != Some(&TaskStatus::Pending) {
                continue;
            }

            let mut blocked_by = None;
            let mut all_done = true;
            for dep in graph.dependencies_of(name) {
                match effective.get(dep) {
                    Some(TaskStatus::Succeeded) => {}
                    Some(s @ (TaskStatus::Failed | TaskStatus::Skipped)) => {
                        blocked_by = Some((dep.clone(), *s));
                        break;
                    }
                    _ => all_done = false,
                }
            }

            if let Some((dep, status)) = blocked_by {
                effective.insert(name.clone(), TaskStatus::Skipped);
                out.skip
                    .push((name.clone(), format!("dependency '{dep}' {status}")));
            } else if all_done {
                out.ready.push(name.clone());
            }
        }
    }

    // Tiers are already in (priority, declaration) order.
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::manifest::TaskDefinition;
    use crate::store::Priority;
    use crate::worker::WorkerKind;
    use pretty_assertions::assert_eq;

    fn graph(spec: &[(&str, &[&str], Priority)]) -> (TaskGraph<TaskDefinition>, Vec<Vec<String>>) {
        let tasks: Vec<TaskDefinition> = spec
            .iter()
            .map(|(name, deps, p)| {
                let mut t = TaskDefinition::new(*name, WorkerKind::Gemini, "p");
                t.dependencies = deps.iter().map(|d| d.to_string()).collect();
                t.priority = *p;
                t
            })
            .collect();
        let g = TaskGraph::from_tasks(&tasks).unwrap();
        let tiers = g.validate().unwrap();
        (g, tiers)
    }

    fn statuses(pairs: &[(&str, TaskStatus)]) -> HashMap<String, TaskStatus> {
        pairs.iter().map(|(n, s)| (n.to_string(), *s)).collect()
    }

    #[test]
    fn failure_cascades_through_a_chain_in_one_pass() {
        let (g, tiers) = graph(&[
            ("a", &[], Priority::P2),
            ("b", &["a"], Priority::P2),
            ("c", &["b"], Priority::P2),
        ]);
        let st = statuses(&[
            ("a", TaskStatus::Failed),
            ("b", TaskStatus::Pending),
            ("c", TaskStatus::Pending),
        ]);
        let r = evaluate(&g, &tiers, &st);
        assert!(r.ready.is_empty());
        assert_eq!(
            r.skip,
            vec![
                ("b".to_string(), "dependency 'a' failed".to_string()),
                ("c".to_string(), "dependency 'b' skipped".to_string()),
            ]
        );
    }

    #[test]
    fn ready_tasks_follow_priority_then_declaration() {
        let (g, tiers) = graph(&[
            ("p2", &[], Priority::P2),
            ("p1", &[], Priority::P1),
            ("p2b", &[], Priority::P2),
            ("later", &["p1"], Priority::P0),
        ]);
        let st = statuses(&[
            ("p2", TaskStatus::Pending),
            ("p1", TaskStatus::Pending),
            ("p2b", TaskStatus::Pending),
            ("later", TaskStatus::Pending),
        ]);
        let r = evaluate(&g, &tiers, &st);
        assert_eq!(r.ready, vec!["p1", "p2", "p2b"]);
        assert!(r.skip.is_empty());
    }

    #[test]
    fn waits_for_running_dependencies_and_is_idempotent() {
        let (g, tiers) = graph(&[
            ("a", &[], Priority::P2),
            ("b", &[], Priority::P2),
            ("c", &["a", "b"], Priority::P2),
        ]);
        let mut st = statuses(&[
            ("a", TaskStatus::Succeeded),
            ("b", TaskStatus::Running),
            ("c", TaskStatus::Pending),
        ]);
        assert_eq!(evaluate(&g, &tiers, &st), Readiness::default());

        st.insert("b".into(), TaskStatus::Succeeded);
        assert_eq!(evaluate(&g, &tiers, &st).ready, vec!["c"]);

        st.insert("c".into(), TaskStatus::Skipped);
        assert_eq!(evaluate(&g, &tiers, &st), Readiness::default());
    }
}
