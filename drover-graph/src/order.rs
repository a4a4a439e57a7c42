//! Deterministic ordering of stages and subtasks
//!
//! Both sort by [`TaskKind::order`], which encodes the dependency order of
//! a run: a build precedes the deploy of the image it produces.

use drover_core::SubTask;
use drover_core::domain::stage::Stage;

/// Stable sort of stages by kind priority
pub fn sort_stages(stages: &mut [Stage]) {
    stages.sort_by_key(|s| s.kind.order());
}

/// Stable sort of subtasks by kind priority
pub fn sort_subtasks(sub_tasks: &mut [SubTask]) {
    sub_tasks.sort_by_key(|s| s.kind().order());
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::TaskKind;
    use proptest::prelude::*;

    fn kind_strategy() -> impl Strategy<Value = TaskKind> {
        (0..TaskKind::ALL.len()).prop_map(|i| TaskKind::ALL[i])
    }

    #[test]
    fn test_build_precedes_deploy_precedes_reset() {
        let mut stages = vec![
            Stage::new(TaskKind::ResetImage),
            Stage::new(TaskKind::Deploy),
            Stage::new(TaskKind::Build),
            Stage::new(TaskKind::Jira),
        ];
        sort_stages(&mut stages);
        let kinds: Vec<_> = stages.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![TaskKind::Jira, TaskKind::Build, TaskKind::Deploy, TaskKind::ResetImage]
        );
    }

    proptest! {
        #[test]
        fn test_order_depends_only_on_kind_set(kinds in proptest::collection::vec(kind_strategy(), 0..17)) {
            let mut forward: Vec<Stage> = kinds.iter().copied().map(Stage::new).collect();
            let mut backward: Vec<Stage> = kinds.iter().rev().copied().map(Stage::new).collect();
            sort_stages(&mut forward);
            sort_stages(&mut backward);

            let forward_kinds: Vec<_> = forward.iter().map(|s| s.kind).collect();
            let backward_kinds: Vec<_> = backward.iter().map(|s| s.kind).collect();
            prop_assert_eq!(&forward_kinds, &backward_kinds);

            let again = serde_json::to_string(&forward).unwrap();
            sort_stages(&mut forward);
            prop_assert_eq!(again, serde_json::to_string(&forward).unwrap());
        }

        #[test]
        fn test_sorted_stages_are_non_decreasing(kinds in proptest::collection::vec(kind_strategy(), 0..32)) {
            let mut stages: Vec<Stage> = kinds.into_iter().map(Stage::new).collect();
            sort_stages(&mut stages);
            prop_assert!(stages.windows(2).all(|w| w[0].kind.order() <= w[1].kind.order()));
        }
    }
}
