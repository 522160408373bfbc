//! Real filesystem/process-backed runtime.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::traits::{ProcessHandle, Runtime};

/// Runtime backed by the real filesystem and OS process table.
pub struct SystemRuntime {
    workdir: PathBuf,
}

impl SystemRuntime {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self { workdir: workdir.into() }
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.workdir.join(rel)
    }
}

impl Runtime for SystemRuntime {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn read_text(&self, rel: &str) -> Result<String> {
        let p = self.abs(rel);
        std::fs::read_to_string(&p).with_context(|| format!("read {}", p.display()))
    }

    fn write_text(&mut self, rel: &str, content: &str) -> Result<()> {
        let p = self.abs(rel);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&p, content.as_bytes()).with_context(|| format!("write {}", p.display()))
    }

    fn which(&self, program: &str) -> Result<PathBuf> {
        let path_var = std::env::var_os("PATH").context("PATH not set")?;
        for dir in std::env::split_paths(&path_var) {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        anyhow::bail!("could not find `{program}` on PATH")
    }

    fn spawn(&mut self, program: &str, args: &[String], cwd: Option<&str>) -> Result<Box<dyn ProcessHandle>> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());
        match cwd {
            Some(c) => {
                cmd.current_dir(self.abs(c));
            }
            None => {
                cmd.current_dir(&self.workdir);
            }
        }
        let child = cmd.spawn().with_context(|| format!("spawn `{program}`"))?;
        Ok(Box::new(ChildHandle { child }))
    }

    fn read_line(&mut self, prompt: &str) -> Result<String> {
        print!("{prompt}");
        std::io::stdout().flush().ok();
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).context("read stdin")?;
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }
}

struct ChildHandle {
    child: Child,
}

impl ProcessHandle for ChildHandle {
    fn poll(&mut self) -> Result<Option<i32>> {
        match self.child.try_wait().context("poll child process")? {
            Some(status) => Ok(Some(status.code().unwrap_or(-1))),
            None => Ok(None),
        }
    }
}
