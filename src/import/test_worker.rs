//! Scripted stand-in for the import worker binary used by tests.
//!
//! The script echoes `<input>` to stdout, `<input>.stderr` to stderr, keeps
//! echoing `<input>` while `<input>.repeat` exists, waits while `<input>.hold`
//! exists and exits with the code in `<input>.exit`.
//!
//! Only std is used here: integration tests include this file directly.

#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;

const SCRIPT: &str = r#"#!/bin/sh
input="$2"
if [ -f "$input.stderr" ]; then cat "$input.stderr" >&2; fi
cat "$input"
while [ -f "$input.repeat" ]; do cat "$input"; sleep 0.01; done
while [ -f "$input.hold" ]; do sleep 0.05; done
code=0
if [ -f "$input.exit" ]; then code=$(cat "$input.exit"); fi
exit "$code"
"#;

const ETXTBSY: i32 = 26;

pub fn script_path() -> &'static Path {
    static PATH: OnceLock<PathBuf> = OnceLock::new();
    PATH.get_or_init(|| {
        use std::os::unix::fs::PermissionsExt;

        let path = std::env::temp_dir().join(format!("comp-ledger-worker-{}", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(SCRIPT.as_bytes()).unwrap();
        }
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        // A concurrently forked child may still hold the write handle
        for _ in 0..100 {
            match Command::new(&path).arg("--input").arg("/dev/null").output() {
                Ok(_) => return path,
                Err(e) if e.raw_os_error() == Some(ETXTBSY) => {
                    std::thread::sleep(Duration::from_millis(10))
                }
                Err(e) => panic!("test worker script is not executable: {}", e),
            }
        }
        panic!("test worker script stayed busy");
    })
}

/// Input file plus the side files steering the scripted worker
pub struct WorkerScript {
    input: PathBuf,
    records: Vec<String>,
    stderr: Option<String>,
    exit_code: Option<i32>,
    hold: bool,
    repeat: bool,
}

impl WorkerScript {
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            input: dir.join(format!("{}.ndjson", name)),
            records: Vec::new(),
            stderr: None,
            exit_code: None,
            hold: false,
            repeat: false,
        }
    }

    pub fn records(mut self, lines: &[&str]) -> Self {
        self.records.extend(lines.iter().map(|l| l.to_string()));
        self
    }

    pub fn stderr(mut self, text: &str) -> Self {
        self.stderr = Some(text.to_string());
        self
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Keep the worker alive until `release` is called
    pub fn hold(mut self) -> Self {
        self.hold = true;
        self
    }

    /// Keep writing the records until the worker is killed
    pub fn repeat(mut self) -> Self {
        self.repeat = true;
        self
    }

    pub fn write(self) -> PathBuf {
        let mut body = self.records.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        std::fs::write(&self.input, body).unwrap();
        if let Some(stderr) = &self.stderr {
            std::fs::write(side_file(&self.input, "stderr"), format!("{}\n", stderr)).unwrap();
        }
        if let Some(code) = self.exit_code {
            std::fs::write(side_file(&self.input, "exit"), code.to_string()).unwrap();
        }
        if self.hold {
            std::fs::write(side_file(&self.input, "hold"), "").unwrap();
        }
        if self.repeat {
            std::fs::write(side_file(&self.input, "repeat"), "").unwrap();
        }
        self.input
    }
}

pub fn release(input: &Path) {
    let _ = std::fs::remove_file(side_file(input, "hold"));
}

pub fn side_file(input: &Path, suffix: &str) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
