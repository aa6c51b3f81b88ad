use std::process::Command;

use anyhow::{anyhow, Context, Result};

pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Thin wrapper over the `git` CLI for a single working copy.
pub struct Git {
    pub repo_path: String,
}

impl Git {
    pub fn new(repo_path: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
        }
    }

    pub fn exec(&self, args: &[&str]) -> Result<ExecResult> {
        self.exec_env(args, &[])
    }

    pub fn exec_env(&self, args: &[&str], env: &[(&str, &str)]) -> Result<ExecResult> {
        let mut cmd = Command::new("git");
        cmd.arg("-C").arg(&self.repo_path);
        cmd.args(args);
        for (k, v) in env {
            cmd.env(k, v);
        }

        let output = cmd.output().with_context(|| {
            format!("failed to spawn git -C {} {}", self.repo_path, args.join(" "))
        })?;

        Ok(ExecResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(1),
        })
    }

    fn exec_ok(&self, args: &[&str]) -> Result<ExecResult> {
        let result = self.exec(args)?;
        if !result.success() {
            return Err(anyhow!(
                "git {} failed in {}: {}",
                args.join(" "),
                self.repo_path,
                result.combined_output()
            ));
        }
        Ok(result)
    }

    pub fn init(&self) -> Result<()> {
        self.exec_ok(&["init", "--quiet"])?;
        Ok(())
    }

    /// Stage every new, modified and deleted file.
    pub fn add_all(&self) -> Result<()> {
        self.exec_ok(&["add", "--all"])?;
        Ok(())
    }

    /// Stage everything and commit it. Returns false when there was nothing to commit.
    pub fn commit_all(&self, message: &str, author: (&str, &str)) -> Result<bool> {
        self.add_all()?;

        if self.status_clean()? {
            return Ok(false);
        }

        let (name, email) = author;
        let env = [
            ("GIT_AUTHOR_NAME", name),
            ("GIT_AUTHOR_EMAIL", email),
            ("GIT_COMMITTER_NAME", name),
            ("GIT_COMMITTER_EMAIL", email),
        ];
        let result = self.exec_env(&["commit", "--quiet", "--no-verify", "-m", message], &env)?;
        if !result.success() {
            return Err(anyhow!(
                "git commit failed in {}: {}",
                self.repo_path,
                result.combined_output()
            ));
        }
        Ok(true)
    }

    pub fn status_clean(&self) -> Result<bool> {
        let result = self.exec_ok(&["status", "--porcelain"])?;
        Ok(result.stdout.trim().is_empty())
    }

    /// Staged changes against HEAD, binary-safe, as a patch.
    pub fn diff_cached(&self) -> Result<String> {
        Ok(self.exec_ok(&["diff", "--cached", "--binary", "HEAD"])?.stdout)
    }

    pub fn diff_cached_names(&self) -> Result<Vec<String>> {
        let result = self.exec_ok(&["diff", "--cached", "--name-only", "HEAD"])?;
        Ok(result
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}
