//! Merging subtasks into stages

use drover_core::domain::stage::Stage;
use drover_core::{SubTask, TaskKind};
use regex::Regex;
use tracing::debug;

/// Adds `sub_task` to the stage of its kind under `target`, creating the stage
/// when the run has none yet
///
/// Deploy and reset-image subtasks never replace each other: a key that is
/// taken, or was ever handed out, gets a numeric suffix instead. Other kinds
/// replace the subtask already stored under the key.
///
/// # Returns
/// The key the subtask was stored under
pub fn add_subtask_to_stage(stages: &mut Vec<Stage>, sub_task: SubTask, target: &str) -> String {
    let kind = sub_task.kind();
    let index = match stages.iter().position(|s| s.kind == kind) {
        Some(index) => index,
        None => {
            stages.push(Stage::new(kind));
            stages.len() - 1
        }
    };
    let stage = &mut stages[index];

    let key = if kind.allows_duplicate_targets() {
        let handed_out = stage.key_counters.get(target).copied().unwrap_or(0);
        let key = if handed_out > 0 || stage.sub_tasks.contains_key(target) {
            suffixed_key(stage, target)
        } else {
            target.to_string()
        };
        *stage.key_counters.entry(target.to_string()).or_default() += 1;
        key
    } else {
        target.to_string()
    };

    debug!("Adding {} subtask under key {}", kind, key);
    stage.sub_tasks.insert(key.clone(), sub_task);
    key
}

/// Removes a subtask from the stage of `kind`
///
/// The stage keeps its key counters, so the freed key's suffix is not
/// handed out again.
pub fn remove_subtask(stages: &mut [Stage], kind: TaskKind, key: &str) -> Option<SubTask> {
    stages
        .iter_mut()
        .find(|s| s.kind == kind)
        .and_then(|s| s.sub_tasks.remove(key))
}

/// Next numeric suffix for `target` within a stage
///
/// Counts the keys `target` and `target_<n>` currently present, and never
/// goes below the number of keys ever handed out for `target`.
pub fn next_target_id(stage: &Stage, target: &str) -> usize {
    let pattern = format!(r"^{}(_\d+)?$", regex::escape(target));
    let present = match Regex::new(&pattern) {
        Ok(re) => stage.sub_tasks.keys().filter(|k| re.is_match(k)).count(),
        Err(_) => 0,
    };
    let handed_out = stage.key_counters.get(target).copied().unwrap_or(0);
    present.max(handed_out)
}

fn suffixed_key(stage: &Stage, target: &str) -> String {
    let mut id = next_target_id(stage, target).max(1);
    loop {
        let key = format!("{}_{}", target, id);
        if !stage.sub_tasks.contains_key(&key) {
            return key;
        }
        id += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::subtask::{BuildTask, DeployTask, TaskCommon};

    fn deploy(container: &str) -> SubTask {
        SubTask::Deploy(DeployTask {
            common: TaskCommon::enabled(),
            service_name: "web".to_string(),
            container_name: container.to_string(),
            ..Default::default()
        })
    }

    fn build(name: &str) -> SubTask {
        SubTask::Build(BuildTask {
            common: TaskCommon::enabled(),
            service_name: name.to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_first_subtask_creates_stage() {
        let mut stages = Vec::new();
        let key = add_subtask_to_stage(&mut stages, build("api"), "api_web");

        assert_eq!(key, "api_web");
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].kind, TaskKind::Build);
        assert!(stages[0].run_parallel);
    }

    #[test]
    fn test_build_subtask_replaces_same_key() {
        let mut stages = Vec::new();
        add_subtask_to_stage(&mut stages, build("first"), "api_web");
        add_subtask_to_stage(&mut stages, build("second"), "api_web");

        assert_eq!(stages[0].sub_tasks.len(), 1);
        let stored = stages[0].sub_tasks["api_web"].as_typed::<BuildTask>().unwrap();
        assert_eq!(stored.service_name, "second");
    }

    #[test]
    fn test_deploy_keys_get_increasing_suffixes() {
        let mut stages = Vec::new();
        let keys: Vec<String> = (0..4)
            .map(|i| add_subtask_to_stage(&mut stages, deploy(&format!("c{}", i)), "api_web"))
            .collect();

        assert_eq!(keys, vec!["api_web", "api_web_1", "api_web_2", "api_web_3"]);
        assert_eq!(stages[0].sub_tasks.len(), 4);
    }

    #[test]
    fn test_suffixes_not_reused_after_removal() {
        let mut stages = Vec::new();
        add_subtask_to_stage(&mut stages, deploy("a"), "api_web");
        add_subtask_to_stage(&mut stages, deploy("b"), "api_web");
        add_subtask_to_stage(&mut stages, deploy("c"), "api_web");

        assert!(remove_subtask(&mut stages, TaskKind::Deploy, "api_web_1").is_some());
        assert!(remove_subtask(&mut stages, TaskKind::Deploy, "api_web").is_some());

        let next = add_subtask_to_stage(&mut stages, deploy("d"), "api_web");
        assert_eq!(next, "api_web_3");
        let after = add_subtask_to_stage(&mut stages, deploy("e"), "api_web");
        assert_eq!(after, "api_web_4");
    }

    #[test]
    fn test_similar_targets_do_not_collide() {
        let mut stages = Vec::new();
        add_subtask_to_stage(&mut stages, deploy("a"), "api_web");
        add_subtask_to_stage(&mut stages, deploy("a"), "api_web_extra");
        let key = add_subtask_to_stage(&mut stages, deploy("b"), "api_web");

        assert_eq!(key, "api_web_1");
        assert_eq!(next_target_id(&stages[0], "api.web"), 0);
    }

    #[test]
    fn test_reset_image_stage_runs_after_all() {
        let mut stages = Vec::new();
        let mut reset = DeployTask {
            common: TaskCommon::enabled(),
            service_name: "web".to_string(),
            container_name: "web".to_string(),
            ..Default::default()
        };
        reset.skip_waiting = true;
        add_subtask_to_stage(&mut stages, SubTask::ResetImage(reset), "api_web");

        assert!(stages[0].after_all);
        assert!(stages[0].run_parallel);
    }
}
