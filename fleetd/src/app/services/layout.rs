// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Component, Path};

use crate::app::errors::{AppError, AppResult};

pub const SCRATCH_DIR: &str = "/tmp";

/// Per-user directory conventions on a host:
/// `<home_root>/<user>/{projects,envs,outputs}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLayout {
    root: String,
}

impl UserLayout {
    pub fn new(home_root: &str, username: &str) -> Self {
        Self {
            root: join(home_root, username),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn projects_dir(&self) -> String {
        join(&self.root, "projects")
    }

    pub fn project_dir(&self, project: &str) -> String {
        join(&self.projects_dir(), project)
    }

    pub fn envs_dir(&self) -> String {
        join(&self.root, "envs")
    }

    pub fn env_dir(&self, env: &str) -> String {
        join(&self.envs_dir(), env)
    }

    pub fn activate_script(&self, env: &str) -> String {
        activate_script(&self.env_dir(env))
    }

    pub fn outputs_dir(&self) -> String {
        join(&self.root, "outputs")
    }

    pub fn output_dir(&self, project: &str) -> String {
        join(&self.outputs_dir(), project)
    }

    pub fn run_output_dir(&self, project: &str, run_id: &str) -> String {
        join(&self.output_dir(project), run_id)
    }

    pub fn run_log(&self, project: &str, run_id: &str) -> String {
        join(&self.output_dir(project), &format!("{run_id}.log"))
    }
}

pub fn activate_script(env_dir: &str) -> String {
    join(env_dir, "bin/activate")
}

/// `/tmp/<project>_<pid>.log`, written by detached jobs.
pub fn detached_log(project: &str, pid: u32) -> String {
    format!("{}{pid}.log", detached_log_prefix(project))
}

pub fn detached_log_prefix(project: &str) -> String {
    format!("{SCRATCH_DIR}/{project}_")
}

/// Recovers the PID from a `<project>_<pid>.log` path.
pub fn pid_from_detached_log(project: &str, path: &str) -> Option<u32> {
    basename(path)
        .strip_prefix(project)?
        .strip_prefix('_')?
        .strip_suffix(".log")?
        .parse()
        .ok()
}

/// Accepts user, project and environment names as single path components.
pub fn validate_name(what: &str, value: &str) -> AppResult<()> {
    let problem = if value.trim().is_empty() {
        Some("must not be empty")
    } else if value.contains('/') || value.contains('\0') {
        Some("must not contain '/' or NUL")
    } else if value == "." || value == ".." {
        Some("must not be '.' or '..'")
    } else if value.starts_with('-') {
        Some("must not start with '-'")
    } else {
        None
    };
    match problem {
        Some(problem) => Err(AppError::invalid_argument(format!(
            "invalid {what} '{value}': {problem}"
        ))),
        None => Ok(()),
    }
}

pub fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), name.trim_start_matches('/'))
}

/// Strips trailing slashes, keeping `/` itself.
pub fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

pub fn parent(path: &str) -> Option<String> {
    let trimmed = normalize(path);
    let (head, _) = trimmed.rsplit_once('/')?;
    if head.is_empty() {
        Some("/".to_string())
    } else {
        Some(head.to_string())
    }
}

/// Every ancestor of `dir` from the root down, `dir` included.
pub fn dir_chain(dir: &str) -> Vec<String> {
    let mut paths = Vec::new();
    let mut cur = String::new();
    for comp in Path::new(dir).components() {
        let seg = match comp {
            Component::Normal(os) => os.to_string_lossy().to_string(),
            _ => continue,
        };
        if seg.is_empty() {
            continue;
        }
        cur = format!("{}/{}", cur.trim_end_matches('/'), seg);
        paths.push(cur.clone());
    }
    paths
}

/// Path segments after resolving `.`, `..` and repeated slashes lexically.
fn segments(path: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for comp in Path::new(path).components() {
        match comp {
            Component::Normal(os) => out.push(os.to_string_lossy().to_string()),
            Component::ParentDir => {
                out.pop();
            }
            _ => {}
        }
    }
    out
}

/// Whether one of the two paths is the other or lies inside it.
pub fn overlaps(a: &str, b: &str) -> bool {
    let (a, b) = (segments(a), segments(b));
    let shared = a.len().min(b.len());
    a[..shared] == b[..shared]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_paths() {
        assert!(overlaps("/data", "/data/"));
        assert!(overlaps("/data", "/data/copy"));
        assert!(overlaps("/data/./copy", "//data"));
        assert!(overlaps("/data/x/../copy", "/data/copy/inner"));
        assert!(!overlaps("/data", "/database"));
        assert!(!overlaps("/data/a", "/data/b"));
    }

    #[test]
    fn user_layout_paths() {
        let layout = UserLayout::new("/home/user", "alice");
        assert_eq!(layout.project_dir("demo"), "/home/user/alice/projects/demo");
        assert_eq!(layout.env_dir("py"), "/home/user/alice/envs/py");
        assert_eq!(
            layout.activate_script("py"),
            "/home/user/alice/envs/py/bin/activate"
        );
        assert_eq!(layout.output_dir("demo"), "/home/user/alice/outputs/demo");
        assert_eq!(
            layout.run_output_dir("demo", "run_20250101_120000"),
            "/home/user/alice/outputs/demo/run_20250101_120000"
        );
        assert_eq!(
            layout.run_log("demo", "run_20250101_120000"),
            "/home/user/alice/outputs/demo/run_20250101_120000.log"
        );
    }

    #[test]
    fn detached_log_round_trips_pid() {
        let path = detached_log("demo", 4242);
        assert_eq!(path, "/tmp/demo_4242.log");
        assert_eq!(pid_from_detached_log("demo", &path), Some(4242));
        assert_eq!(pid_from_detached_log("demo", "/tmp/demo_x.log"), None);
        assert_eq!(pid_from_detached_log("other", &path), None);
    }

    #[test]
    fn validate_name_rejects_traversal() {
        assert!(validate_name("project", "demo-1").is_ok());
        assert!(validate_name("project", "").is_err());
        assert!(validate_name("project", "..").is_err());
        assert!(validate_name("project", "a/b").is_err());
        assert!(validate_name("project", "-rf").is_err());
    }

    #[test]
    fn path_helpers() {
        assert_eq!(normalize("/a/b///"), "/a/b");
        assert_eq!(normalize("///"), "/");
        assert_eq!(basename("/a/b/"), "b");
        assert_eq!(parent("/a/b").as_deref(), Some("/a"));
        assert_eq!(parent("/a").as_deref(), Some("/"));
        assert_eq!(join("/a/", "/b"), "/a/b");
    }

    #[test]
    fn dir_chain_lists_every_ancestor() {
        assert_eq!(dir_chain("/a/b/c"), vec!["/a", "/a/b", "/a/b/c"]);
        assert_eq!(dir_chain("/a/./b/"), vec!["/a", "/a/b"]);
        assert!(dir_chain("/").is_empty());
    }
}
