//! Dependency resolution for the steps of a task.

use std::collections::HashSet;

use agentflow_core::{Error, Step, StepId, StepStatus};

/// Result of dependency resolution.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// These pending steps have all dependencies completed
    Ready(Vec<StepId>),
    /// Nothing is ready yet, but steps are still running
    Waiting,
    /// No step is pending or running
    Done,
    /// Steps remain pending and can never become ready
    Stalled(Vec<StepId>),
}

/// Resolves step dependencies, one round at a time.
///
/// Cycles, self-dependencies and references to steps that do not exist are
/// not detected separately: all of them leave pending steps that never become
/// ready, and a round with no progress is reported as [`Resolution::Stalled`].
pub struct DependencyResolver;

impl DependencyResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self
    }

    /// Find the steps that can start now.
    pub fn resolve(&self, steps: &[Step]) -> Resolution {
        let completed: HashSet<&StepId> = steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| &s.id)
            .collect();

        let pending: Vec<&Step> = steps
            .iter()
            .filter(|s| s.status == StepStatus::Pending)
            .collect();

        let ready: Vec<StepId> = pending
            .iter()
            .filter(|s| s.dependencies.iter().all(|d| completed.contains(d)))
            .map(|s| s.id.clone())
            .collect();

        if !ready.is_empty() {
            return Resolution::Ready(ready);
        }

        if steps.iter().any(|s| s.status == StepStatus::Running) {
            return Resolution::Waiting;
        }

        if pending.is_empty() {
            Resolution::Done
        } else {
            Resolution::Stalled(pending.iter().map(|s| s.id.clone()).collect())
        }
    }

    /// Lay out the rounds a fresh copy of `steps` would run in.
    ///
    /// Ignores current statuses. Fails with
    /// [`Error::DeadlockOrMissingStep`] when some steps can never run.
    pub fn plan_rounds(&self, steps: &[Step]) -> Result<Vec<Vec<StepId>>, Error> {
        let mut done: HashSet<&StepId> = HashSet::new();
        let mut remaining: Vec<&Step> = steps.iter().collect();
        let mut rounds = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Step>, Vec<&Step>) = remaining
                .into_iter()
                .partition(|s| s.dependencies.iter().all(|d| done.contains(d)));

            if ready.is_empty() {
                return Err(Error::DeadlockOrMissingStep {
                    pending: blocked.iter().map(|s| s.id.clone()).collect(),
                });
            }

            done.extend(ready.iter().map(|s| &s.id));
            rounds.push(ready.iter().map(|s| s.id.clone()).collect());
            remaining = blocked;
        }

        Ok(rounds)
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::{AgentId, Parameters};

    fn step(id: &str, deps: &[&str]) -> Step {
        Step::new(
            StepId::new(id),
            id,
            AgentId::new("executor"),
            "noop",
            Parameters::new(),
            deps.iter().map(|d| StepId::new(*d)).collect(),
        )
    }

    fn finish(step: &mut Step) {
        let now = chrono::Utc::now();
        step.start(now).unwrap();
        step.complete(serde_json::Value::Null, now).unwrap();
    }

    #[test]
    fn test_independent_steps_ready_together() {
        let steps = vec![step("a", &[]), step("b", &[]), step("c", &[])];
        let resolver = DependencyResolver::new();
        assert_eq!(
            resolver.resolve(&steps),
            Resolution::Ready(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_chain_resolves_one_at_a_time() {
        let mut steps = vec![step("a", &[]), step("b", &["a"]), step("c", &["b"])];
        let resolver = DependencyResolver::new();

        assert_eq!(resolver.resolve(&steps), Resolution::Ready(vec!["a".into()]));
        finish(&mut steps[0]);
        assert_eq!(resolver.resolve(&steps), Resolution::Ready(vec!["b".into()]));
        finish(&mut steps[1]);
        finish(&mut steps[2]);
        assert_eq!(resolver.resolve(&steps), Resolution::Done);
    }

    #[test]
    fn test_missing_dependency_stalls() {
        let steps = vec![step("a", &[]), step("b", &["ghost"])];
        let resolver = DependencyResolver::new();

        let mut steps = steps;
        assert_eq!(resolver.resolve(&steps), Resolution::Ready(vec!["a".into()]));
        finish(&mut steps[0]);
        assert_eq!(resolver.resolve(&steps), Resolution::Stalled(vec!["b".into()]));
    }

    #[test]
    fn test_self_dependency_and_cycle_stall() {
        let resolver = DependencyResolver::new();
        let steps = vec![step("a", &["a"])];
        assert_eq!(resolver.resolve(&steps), Resolution::Stalled(vec!["a".into()]));

        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        assert_eq!(
            resolver.resolve(&steps),
            Resolution::Stalled(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_running_steps_are_not_a_stall() {
        let mut steps = vec![step("a", &[]), step("b", &["a"])];
        steps[0].start(chrono::Utc::now()).unwrap();
        assert_eq!(DependencyResolver::new().resolve(&steps), Resolution::Waiting);
    }

    #[test]
    fn test_empty_is_done() {
        assert_eq!(DependencyResolver::new().resolve(&[]), Resolution::Done);
    }

    #[test]
    fn test_plan_rounds() {
        let resolver = DependencyResolver::new();
        let steps = vec![
            step("a", &[]),
            step("b", &[]),
            step("c", &["a", "b"]),
            step("d", &["c"]),
        ];
        let rounds = resolver.plan_rounds(&steps).unwrap();
        assert_eq!(
            rounds,
            vec![
                vec![StepId::new("a"), StepId::new("b")],
                vec![StepId::new("c")],
                vec![StepId::new("d")],
            ]
        );

        let broken = vec![step("a", &[]), step("b", &["zzz"])];
        assert_eq!(
            resolver.plan_rounds(&broken),
            Err(Error::DeadlockOrMissingStep { pending: vec![StepId::new("b")] })
        );
    }
}
