#![allow(dead_code)]

use chrono::{Duration, Local, NaiveDate};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

/// A running `ledgerd` with its own scratch directory as working directory,
/// so no stray `ledgerd.toml` is picked up.
pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    dir: TempDir,
}

impl Sidecar {
    pub fn spawn() -> Self {
        Self::spawn_with_env(&[])
    }

    pub fn spawn_with_env(env: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let exe = env!("CARGO_BIN_EXE_ledgerd");
        let mut cmd = Command::new(exe);
        cmd.current_dir(dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        for (key, value) in env {
            cmd.env(key, value);
        }
        let mut child = cmd.spawn().expect("spawn ledgerd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
            dir,
        }
    }

    /// Spawns and selects a fresh workspace under the scratch directory.
    pub fn with_workspace() -> Self {
        let mut sidecar = Self::spawn();
        let path = sidecar.path("workspace");
        sidecar.request_ok("workspace.select", json!({ "path": path }));
        sidecar
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut buf = String::new();
        self.reader.read_line(&mut buf).expect("read response line");
        assert!(!buf.trim().is_empty(), "empty response for {}", line);
        serde_json::from_str(buf.trim()).expect("parse response json")
    }

    pub fn request(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn request_ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.request(method, params);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or(json!({}))
    }

    /// Expects a failure and returns the `error` object.
    pub fn request_err(
        &mut self,
        method: &str,
        params: serde_json::Value,
        code: &str,
    ) -> serde_json::Value {
        let value = self.request(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        let error = value.get("error").cloned().expect("error object");
        assert_eq!(
            error.get("code").and_then(|v| v.as_str()),
            Some(code),
            "{}: {}",
            method,
            error
        );
        error
    }

    pub fn create_cycle(&mut self, name: &str, start: NaiveDate, end: NaiveDate) -> String {
        let result = self.request_ok(
            "cycles.create",
            json!({ "name": name, "startDate": start, "endDate": end }),
        );
        result["cycle"]["id"].as_str().expect("cycle id").to_string()
    }

    pub fn create_student(&mut self, code: &str, last: &str, first: &str) {
        self.request_ok(
            "students.create",
            json!({
                "code": code,
                "firstName": first,
                "lastName": last,
                "email": format!("{}@school.test", code.to_ascii_lowercase()),
            }),
        );
    }

    pub fn enroll(&mut self, code: &str, cycle_id: &str) -> serde_json::Value {
        self.request_ok(
            "enrollment.enrollOne",
            json!({ "studentCode": code, "cycleId": cycle_id }),
        )
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn days_from_today(n: i64) -> NaiveDate {
    today() + Duration::days(n)
}
