//! Object keys of job outputs

/// Object key of a file a subtask run produced
///
/// Keys live under `{subfolder}/{pipeline}/{task_id}/{dir}/`, with the
/// pipeline lowercased and no prefix when `subfolder` is empty.
pub fn task_object_key(
    subfolder: &str,
    pipeline_name: &str,
    task_id: i64,
    dir: &str,
    file_name: &str,
) -> String {
    let key = format!("{}/{}/{}/{}", pipeline_name.to_lowercase(), task_id, dir, file_name);
    let subfolder = subfolder.trim_matches('/');
    if subfolder.is_empty() {
        key
    } else {
        format!("{}/{}", subfolder, key)
    }
}

/// Object key of a subtask log
pub fn log_key(subfolder: &str, pipeline_name: &str, task_id: i64, file_name: &str) -> String {
    task_object_key(subfolder, pipeline_name, task_id, "log", &format!("{}.log", file_name))
}

/// Object key of a package archived by a build
pub fn package_key(subfolder: &str, pipeline_name: &str, task_id: i64, file_name: &str) -> String {
    task_object_key(subfolder, pipeline_name, task_id, "dist", file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_key() {
        assert_eq!(
            log_key("ci/", "Demo-Workflow", 12, "demo-workflow-12-buildv2-api"),
            "ci/demo-workflow/12/log/demo-workflow-12-buildv2-api.log"
        );
        assert_eq!(log_key("", "demo", 1, "f"), "demo/1/log/f.log");
        assert_eq!(package_key("/", "Demo", 3, "api.tgz"), "demo/3/dist/api.tgz");
    }
}
