// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Every shell command fleetd sends to a host is built here. Values that
//! come from callers (paths, names, job commands) only ever reach a shell
//! through [`quote`].

use crate::app::types::SudoMode;

/// POSIX single-quote escaping.
pub fn quote(value: &str) -> String {
    let mut out = String::from("'");
    out.push_str(&value.replace('\'', r"'\''"));
    out.push('\'');
    out
}

/// A privileged command plus what has to be written to its stdin first.
#[derive(Clone, PartialEq, Eq)]
pub struct Elevated {
    pub command: String,
    pub stdin_prefix: Option<Vec<u8>>,
}

/// Wraps `command` for privileged execution. The password never appears in
/// the returned command line; `sudo -S` reads it from stdin.
pub fn elevate(command: &str, mode: SudoMode, password: Option<&str>) -> Elevated {
    match (mode, password) {
        (SudoMode::Password, Some(password)) => Elevated {
            command: format!("sudo -k -S -p '' -- sh -c {}", quote(command)),
            stdin_prefix: Some(format!("{password}\n").into_bytes()),
        },
        (SudoMode::Password, None) | (SudoMode::Passwordless, _) => Elevated {
            command: format!("sudo -n -- sh -c {}", quote(command)),
            stdin_prefix: None,
        },
        (SudoMode::Disabled, _) => Elevated {
            command: command.to_string(),
            stdin_prefix: None,
        },
    }
}

pub fn bash(script: &str) -> String {
    format!("bash -c {}", quote(script))
}

pub fn list_long(path: &str) -> String {
    format!("ls -la -- {}", quote(path))
}

pub fn mkdir_p(path: &str) -> String {
    format!("mkdir -p -- {}", quote(path))
}

pub fn chmod(mode: &str, path: &str) -> String {
    format!("chmod {mode} -- {}", quote(path))
}

pub fn chmod_recursive(mode: &str, path: &str) -> String {
    format!("chmod -R {mode} -- {}", quote(path))
}

pub fn chown_recursive(owner: &str, path: &str) -> String {
    format!("chown -R {} -- {}", quote(&format!("{owner}:{owner}")), quote(path))
}

/// Makes `<project_dir>/output` group-writable and owned by `owner`.
pub fn prepare_output_dir(project_dir: &str, owner: &str) -> String {
    format!(
        "cd {} && mkdir -p output && chmod -R 775 output && chown -R {} output",
        quote(project_dir),
        quote(&format!("{owner}:{owner}"))
    )
}

/// Deletes everything inside `path`, hidden entries included, keeping `path`.
pub fn clear_dir(path: &str) -> String {
    format!(
        "find {} -mindepth 1 -maxdepth 1 -exec rm -rf -- {{}} +",
        quote(path)
    )
}

pub fn remove_tree(path: &str) -> String {
    format!("rm -rf -- {}", quote(path))
}

pub fn remove_file(path: &str) -> String {
    format!("rm -f -- {}", quote(path))
}

/// Prints the `stat` file type, e.g. `directory` or `regular file`.
pub fn file_type(path: &str) -> String {
    format!("stat -c %F -- {}", quote(path))
}

pub fn file_size(path: &str) -> String {
    format!("stat -L -c %s -- {}", quote(path))
}

/// Prints `directory`, `file` or `missing`.
pub fn existence_probe(path: &str) -> String {
    let q = quote(path);
    format!(
        "if [ -d {q} ]; then echo directory; elif [ -e {q} ]; then echo file; else echo missing; fi"
    )
}

pub fn base64_encode(path: &str) -> String {
    format!("base64 < {}", quote(path))
}

/// Decodes stdin into `temp` and renames it over `destination`.
pub fn base64_decode_into(temp: &str, destination: &str) -> String {
    format!(
        "base64 -d > {tmp} && mv -f -- {tmp} {dst}",
        tmp = quote(temp),
        dst = quote(destination)
    )
}

/// Copies the contents of `source` into the existing directory `destination`.
pub fn copy_contents(source: &str, destination: &str) -> String {
    format!(
        "cp -a -- {} {}",
        quote(&format!("{}/.", source.trim_end_matches('/'))),
        quote(&format!("{}/", destination.trim_end_matches('/')))
    )
}

pub fn activate_and_run(activate: Option<&str>, command: &str) -> String {
    match activate {
        Some(activate) => bash(&format!("source {} && {}", quote(activate), command)),
        None => bash(command),
    }
}

pub fn newest_log(dir: &str, prefix: &str) -> String {
    let base = format!("{}/{}", dir.trim_end_matches('/'), prefix);
    format!("ls -t -- {}*.log 2>/dev/null | head -n 1", quote(&base))
}

pub fn process_table() -> &'static str {
    "ps -eo pid=,args="
}

pub fn process_state(pid: u32) -> String {
    format!("ps -o stat= -p {pid}")
}

pub fn launch_detached(script_path: &str) -> String {
    format!(
        "nohup setsid bash {} > /dev/null 2>&1 < /dev/null & echo $!",
        quote(script_path)
    )
}

/// `--index-url`/`--trusted-host` arguments for a private package index.
pub fn pip_index_args(index_url: Option<&str>) -> String {
    let Some(url) = index_url.map(str::trim).filter(|url| !url.is_empty()) else {
        return String::new();
    };
    let host = url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or_default();
    let host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    format!(
        " --index-url {} --trusted-host {}",
        quote(url),
        quote(host)
    )
}

fn install_requirements(index_url: Option<&str>) -> String {
    format!(
        "if [ -f requirements.txt ]; then pip install -r requirements.txt{} || exit $?; fi",
        pip_index_args(index_url)
    )
}

/// The foreground job: output of dependency install and the command itself
/// goes to stdout and to `log_file`. The first log line is the command.
pub struct JobScript<'a> {
    pub project_dir: &'a str,
    pub activate: &'a str,
    pub package_index: Option<&'a str>,
    pub command: &'a str,
    pub log_file: &'a str,
}

impl JobScript<'_> {
    pub fn render(&self) -> String {
        let cmd = quote(self.command);
        [
            "set -o pipefail".to_string(),
            format!("cd {} || exit 1", quote(self.project_dir)),
            "{ mkdir -p output && chmod -R 775 output; } || true".to_string(),
            format!("source {} || exit 1", quote(self.activate)),
            "{".to_string(),
            format!("printf '+ %s\\n' {cmd}"),
            install_requirements(self.package_index),
            format!("bash -c {cmd}"),
            format!("}} 2>&1 | tee {}", quote(self.log_file)),
        ]
        .join("\n")
    }
}

/// The detached job. It records its own PID in `sentinel`, redirects its
/// output to `<log_prefix><pid>.log` and then execs the command.
pub struct DetachedScript<'a> {
    pub sentinel: &'a str,
    pub log_prefix: &'a str,
    pub project_dir: &'a str,
    pub activate: &'a str,
    pub package_index: Option<&'a str>,
    pub command: &'a str,
}

impl DetachedScript<'_> {
    pub fn render(&self) -> String {
        let cmd = quote(self.command);
        [
            "#!/bin/bash".to_string(),
            format!("echo $$ > {}", quote(self.sentinel)),
            format!("exec > {}\"$$\".log 2>&1 < /dev/null", quote(self.log_prefix)),
            format!("cd {} || exit 1", quote(self.project_dir)),
            format!("source {} || exit 1", quote(self.activate)),
            install_requirements(self.package_index),
            format!("printf '+ %s\\n' {cmd}"),
            format!("exec bash -c {cmd}"),
        ]
        .join("\n")
            + "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_wraps_and_escapes_single_quotes() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn elevate_with_password_keeps_secret_out_of_command() {
        let elevated = elevate("chmod 777 /data", SudoMode::Password, Some("s3cret"));
        assert_eq!(elevated.command, "sudo -k -S -p '' -- sh -c 'chmod 777 /data'");
        assert!(!elevated.command.contains("s3cret"));
        assert_eq!(elevated.stdin_prefix.as_deref(), Some(b"s3cret\n".as_slice()));
    }

    #[test]
    fn elevate_without_password_uses_non_interactive_sudo() {
        let elevated = elevate("id", SudoMode::Password, None);
        assert_eq!(elevated.command, "sudo -n -- sh -c 'id'");
        assert!(elevated.stdin_prefix.is_none());

        let elevated = elevate("id", SudoMode::Disabled, Some("ignored"));
        assert_eq!(elevated.command, "id");
        assert!(elevated.stdin_prefix.is_none());
    }

    #[test]
    fn pip_index_args_derive_trusted_host() {
        assert_eq!(
            pip_index_args(Some("http://192.168.10.2:8087/simple/")),
            " --index-url 'http://192.168.10.2:8087/simple/' --trusted-host '192.168.10.2'"
        );
        assert_eq!(pip_index_args(None), "");
        assert_eq!(pip_index_args(Some("  ")), "");
    }

    #[test]
    fn job_script_logs_command_and_quotes_it() {
        let script = JobScript {
            project_dir: "/home/user/alice/projects/demo",
            activate: "/home/user/alice/envs/py/bin/activate",
            package_index: None,
            command: "echo 'hi'; exit 3",
            log_file: "/tmp/run_1.log",
        }
        .render();
        assert!(script.starts_with("set -o pipefail\n"));
        assert!(script.contains(r"printf '+ %s\n' 'echo '\''hi'\''; exit 3'"));
        assert!(script.contains(r"bash -c 'echo '\''hi'\''; exit 3'"));
        assert!(script.ends_with("} 2>&1 | tee '/tmp/run_1.log'"));
    }

    #[test]
    fn detached_script_writes_sentinel_before_redirecting() {
        let script = DetachedScript {
            sentinel: "/tmp/fleetd_demo_abc.pid",
            log_prefix: "/tmp/demo_",
            project_dir: "/p",
            activate: "/e/bin/activate",
            package_index: None,
            command: "python train.py",
        }
        .render();
        let sentinel = script.find("echo $$ >").unwrap();
        let redirect = script.find("exec > '/tmp/demo_'\"$$\".log").unwrap();
        assert!(sentinel < redirect);
        assert!(script.contains("exec bash -c 'python train.py'"));
    }

    #[test]
    fn newest_log_keeps_glob_outside_quotes() {
        assert_eq!(
            newest_log("/tmp/", "demo_"),
            "ls -t -- '/tmp/demo_'*.log 2>/dev/null | head -n 1"
        );
    }

    #[test]
    fn copy_contents_targets_directory_contents() {
        assert_eq!(
            copy_contents("/base/venv/", "/home/user/a/envs/x"),
            "cp -a -- '/base/venv/.' '/home/user/a/envs/x/'"
        );
    }
}
