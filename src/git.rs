//! The Git Comparator (§4.B): maintains one bare mirror per project and
//! answers ahead/behind, mergeability, and merge-head questions by shelling
//! out to the system `git`. Mirrors are a rebuildable cache, never a source
//! of truth — if one goes missing, `ensure` re-clones it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use anyhow::{Context as _, bail};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::timeout;

const GIT_TIMEOUT: Duration = Duration::from_secs(60);
const CONFLICT_SENTINEL: &str = "changed in both";
const BASE_BRANCH: &str = "origin/master";

/// Owns on-disk bare mirrors under `base_dir/<owner>/<name>` and a per-repo
/// lock so concurrent callers don't run `git` against the same mirror at
/// once. Operations on distinct mirrors proceed in parallel.
pub struct GitComparator {
    base_dir: PathBuf,
    locks: StdMutex<HashMap<PathBuf, std::sync::Arc<Mutex<()>>>>,
}

impl GitComparator {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        GitComparator {
            base_dir: base_dir.into(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    fn mirror_path(&self, owner: &str, name: &str) -> PathBuf {
        self.base_dir.join(owner).join(name)
    }

    fn lock_for(&self, path: &PathBuf) -> std::sync::Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(path.clone())
            .or_insert_with(|| std::sync::Arc::new(Mutex::new(())))
            .clone()
    }

    /// Clones the mirror if absent; no-op if already present.
    pub async fn ensure(&self, owner: &str, name: &str, clone_url: &str) -> anyhow::Result<()> {
        let path = self.mirror_path(owner, name);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;

        if path.is_dir() {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("creating repo base directory")?;
        }

        run_git_in(
            &self.base_dir,
            &[
                "clone",
                "--bare",
                clone_url,
                path.to_str().context("non-utf8 mirror path")?,
            ],
        )
        .await
        .context("cloning bare mirror")?;

        for (remote, spec) in [
            ("origin", "+refs/heads/*:refs/remotes/origin/*"),
            ("pr_head", "+refs/pull/*/head:refs/remotes/pr_head/*"),
            ("pr_merge", "+refs/pull/*/merge:refs/remotes/pr_merge/*"),
        ] {
            if remote != "origin" {
                run_git(&path, &["remote", "add", remote, clone_url])
                    .await
                    .context("adding remote")?;
            }
            run_git(&path, &["config", &format!("remote.{remote}.fetch"), spec])
                .await
                .context("configuring remote fetch spec")?;
        }

        run_git(&path, &["fetch", "--all"])
            .await
            .context("initial fetch")?;
        Ok(())
    }

    /// Fetches all configured remotes for one mirror. Callers handling a
    /// push that touches many pull requests of the same project should call
    /// this exactly once and reuse the result.
    pub async fn fetch(&self, owner: &str, name: &str) -> anyhow::Result<()> {
        let path = self.mirror_path(owner, name);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().await;
        run_git(&path, &["fetch", "--all"])
            .await
            .context("fetching mirror")?;
        Ok(())
    }

    /// `(behind, ahead)`: commits in base not in the PR's head, and vice
    /// versa. Null in both slots if either ref is unknown.
    pub async fn compare(
        &self,
        owner: &str,
        name: &str,
        pr_number: i32,
    ) -> anyhow::Result<(Option<i32>, Option<i32>)> {
        let path = self.mirror_path(owner, name);
        let branch = format!("pr_head/{pr_number}");

        let ahead = rev_list_count(&path, BASE_BRANCH, &branch).await?;
        let behind = rev_list_count(&path, &branch, BASE_BRANCH).await?;
        Ok((behind, ahead))
    }

    /// Tri-state mergeability via an in-memory three-way merge. `null` if
    /// either ref is unknown.
    pub async fn mergeable(
        &self,
        owner: &str,
        name: &str,
        pr_number: i32,
    ) -> anyhow::Result<Option<bool>> {
        let path = self.mirror_path(owner, name);
        let branch = format!("pr_head/{pr_number}");

        let Some(merge_base) = git_output(&path, &["merge-base", BASE_BRANCH, &branch]).await?
        else {
            return Ok(None);
        };
        let merge_base = merge_base.trim();

        let Some(merge_result) = git_output(
            &path,
            &["merge-tree", merge_base, BASE_BRANCH, &branch],
        )
        .await?
        else {
            return Ok(None);
        };

        let mergeable = !merge_result
            .lines()
            .any(|line| line.contains(CONFLICT_SENTINEL));
        Ok(Some(mergeable))
    }

    /// The provider-synthesised merge commit SHA, or `null` if not yet
    /// published.
    pub async fn merge_head(
        &self,
        owner: &str,
        name: &str,
        pr_number: i32,
    ) -> anyhow::Result<Option<String>> {
        let path = self.mirror_path(owner, name);
        let rev = format!("pr_merge/{pr_number}");
        let sha = git_output(&path, &["rev-parse", &rev]).await?;
        Ok(sha.map(|s| s.trim().to_owned()))
    }
}

async fn rev_list_count(
    path: &PathBuf,
    base: &str,
    branch: &str,
) -> anyhow::Result<Option<i32>> {
    let range = format!("{base}..{branch}");
    let Some(output) = git_output(path, &["rev-list", "--count", &range]).await? else {
        return Ok(None);
    };
    let count: i32 = output
        .trim()
        .parse()
        .context("parsing rev-list --count output")?;
    Ok(Some(count))
}

/// Runs `git` in an existing mirror directory, returning stdout on success
/// and `None` if the ref didn't resolve (distinguished from "git isn't
/// installed" or other operational failures, which bubble up as errors).
async fn git_output(git_dir: &PathBuf, args: &[&str]) -> anyhow::Result<Option<String>> {
    let mut full_args = vec!["--git-dir", git_dir.to_str().context("non-utf8 git dir")?];
    full_args.extend_from_slice(args);

    let output = timeout(GIT_TIMEOUT, Command::new("git").args(&full_args).output())
        .await
        .context("git command timed out")?
        .context("spawning git")?;

    if output.status.success() {
        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    } else {
        Ok(None)
    }
}

async fn run_git(git_dir: &PathBuf, args: &[&str]) -> anyhow::Result<()> {
    let mut full_args = vec!["--git-dir", git_dir.to_str().context("non-utf8 git dir")?];
    full_args.extend_from_slice(args);
    run_git_raw(&full_args, None).await
}

async fn run_git_in(cwd: &PathBuf, args: &[&str]) -> anyhow::Result<()> {
    run_git_raw(args, Some(cwd)).await
}

async fn run_git_raw(args: &[&str], cwd: Option<&PathBuf>) -> anyhow::Result<()> {
    let mut cmd = Command::new("git");
    cmd.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let output = timeout(GIT_TIMEOUT, cmd.output())
        .await
        .context("git command timed out")?
        .context("spawning git")?;

    if !output.status.success() {
        bail!(
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_sentinel_detected() {
        let output = "added in both\n  base   100644 aaa file\nchanged in both\n  our    100644 bbb file\n";
        assert!(output.lines().any(|l| l.contains(CONFLICT_SENTINEL)));
    }

    #[test]
    fn clean_merge_has_no_sentinel() {
        let output = "added in local\n  base   100644 aaa file\n";
        assert!(!output.lines().any(|l| l.contains(CONFLICT_SENTINEL)));
    }
}
