use anyhow::Result;
use std::io::{BufRead, IsTerminal};

use crate::shell::{CommandRunner, run_checked};

/// Whether the work tree or the index differ from HEAD.
pub async fn has_local_changes(runner: &dyn CommandRunner) -> Result<bool> {
    let unstaged = runner.run("git", &["diff", "--quiet", "--exit-code"]).await?;
    let staged = runner
        .run("git", &["diff", "--cached", "--quiet", "--exit-code"])
        .await?;
    Ok(!unstaged.success() || !staged.success())
}

/// Refuse to go on with local changes, or ask the operator first.
pub async fn check_git_diff(runner: &dyn CommandRunner, direct_abort: bool) -> Result<()> {
    if !has_local_changes(runner).await? {
        return Ok(());
    }
    if direct_abort {
        anyhow::bail!("Your repository has local changes. Abort.");
    }
    ask_or_abort("Your repository has local changes, are you sure you want to continue? (y/N)")
}

/// Prompt on an interactive stdin. Non-interactive sessions abort.
pub fn ask_or_abort(question: &str) -> Result<()> {
    let stdin = std::io::stdin();
    let interactive = stdin.is_terminal();
    confirm(question, interactive, stdin.lock())
}

fn confirm<R: BufRead>(question: &str, interactive: bool, mut input: R) -> Result<()> {
    if !interactive {
        anyhow::bail!("{question} Not an interactive session. Abort.");
    }
    println!("{question}");
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    if is_yes(&answer) {
        Ok(())
    } else {
        anyhow::bail!("Aborted")
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim(), "y" | "Y" | "yes")
}

pub async fn add(runner: &dyn CommandRunner, paths: &[String]) -> Result<()> {
    if paths.is_empty() {
        return Ok(());
    }
    let mut args = vec!["add"];
    args.extend(paths.iter().map(String::as_str));
    run_checked(runner, "git", &args).await?;
    Ok(())
}

pub async fn mv(runner: &dyn CommandRunner, from: &str, to: &str) -> Result<()> {
    run_checked(runner, "git", &["mv", from, to]).await?;
    Ok(())
}

/// Commit with the editor open so the operator can review the message.
pub async fn commit_with_editor(runner: &dyn CommandRunner, message: &str) -> Result<()> {
    let status = runner
        .interactive("git", &["commit", "-m", message, "-e", "-vv"])
        .await?;
    if status != 0 {
        anyhow::bail!("git commit exited with status {status}");
    }
    Ok(())
}
