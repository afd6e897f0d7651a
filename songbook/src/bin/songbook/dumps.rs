//! Database dumps and the shared dumps bag.
//!
//! A dump is produced with `pg_dump`, encrypted with gpg for every key
//! published on the dumps-bag key server, and uploaded with the AWS CLI.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::shell::{CommandRunner, run_checked};

pub fn dump_file_name(user: &str, project: &str, at: NaiveDateTime) -> String {
    format!("{user}_{project}-{}.pg", at.format("%Y%m%d-%H%M%S"))
}

/// Connection parameters of the local dump.
pub struct DumpTarget<'a> {
    pub port: u16,
    pub db_user: &'a str,
    pub db_name: &'a str,
}

/// Dump `target` in custom format into `dir/file_name`. The source database is not modified.
pub async fn local_dump(
    runner: &dyn CommandRunner,
    target: &DumpTarget<'_>,
    dir: &Path,
    file_name: &str,
) -> Result<PathBuf> {
    let path = dir.join(file_name);
    let port = target.port.to_string();
    let file = path.to_string_lossy();
    run_checked(
        runner,
        "pg_dump",
        &[
            "-h",
            "localhost",
            "-p",
            &port,
            "--format=c",
            "-U",
            target.db_user,
            "--file",
            &file,
            target.db_name,
        ],
    )
    .await
    .with_context(|| format!("Failed to dump {}", target.db_name))?;
    Ok(path)
}

/// Download the armored public keys of the dumps-bag recipients.
pub async fn fetch_keys(url: &str) -> Result<String> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to fetch keys from {url}"))?
        .error_for_status()?;
    Ok(response.text().await?)
}

/// Primary-key fingerprints from `gpg --with-colons --list-keys` output.
pub fn parse_fingerprints(colons: &str) -> Vec<String> {
    let mut fingerprints = Vec::new();
    let mut after_primary = false;
    for line in colons.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        match fields.first().copied() {
            Some("pub") => after_primary = true,
            Some("fpr") if after_primary => {
                if let Some(fpr) = fields.get(9).filter(|f| !f.is_empty()) {
                    fingerprints.push(fpr.to_string());
                }
                after_primary = false;
            }
            Some("sub") | Some("ssb") | Some("sec") => after_primary = false,
            _ => {}
        }
    }
    fingerprints
}

/// Encrypt `dump` for every key in `keys` into `<dump>.gpg`.
///
/// Keys are imported into a throw-away keyring that is removed on return.
pub async fn encrypt_for_dump_bags(runner: &dyn CommandRunner, keys: &str, dump: &Path) -> Result<PathBuf> {
    let home = TempDir::new().context("Failed to create a temporary GnuPG home")?;
    let homedir = home.path().to_string_lossy().into_owned();
    let keys_file = home.path().join("dump-bag-keys.asc");
    std::fs::write(&keys_file, keys)?;
    let keys_path = keys_file.to_string_lossy().into_owned();

    run_checked(runner, "gpg", &["--homedir", &homedir, "--batch", "--import", &keys_path])
        .await
        .context("Failed to import dumps-bag keys")?;

    let listing = run_checked(runner, "gpg", &["--homedir", &homedir, "--batch", "--with-colons", "--list-keys"]).await?;
    let fingerprints = parse_fingerprints(&listing.stdout);
    if fingerprints.is_empty() {
        anyhow::bail!("No recipient key could be imported");
    }

    let encrypted = PathBuf::from(format!("{}.gpg", dump.display()));
    let encrypted_arg = encrypted.to_string_lossy().into_owned();
    let dump_arg = dump.to_string_lossy().into_owned();

    let mut args: Vec<&str> = vec![
        "--homedir",
        homedir.as_str(),
        "--batch",
        "--yes",
        "--trust-model",
        "always",
        "--output",
        encrypted_arg.as_str(),
    ];
    for fingerprint in &fingerprints {
        args.push("--recipient");
        args.push(fingerprint);
    }
    args.push("--encrypt");
    args.push(&dump_arg);

    run_checked(runner, "gpg", &args).await.context("Failed to encrypt dump")?;
    Ok(encrypted)
}

/// Object-storage location of the dumps bag.
pub struct DumpBag<'a> {
    pub bucket: &'a str,
    pub profile: &'a str,
    pub user: &'a str,
}

impl DumpBag<'_> {
    fn profile_arg(&self) -> String {
        format!("--profile={}", self.profile)
    }

    pub fn key_for(&self, file: &Path) -> Result<String> {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid dump path {}", file.display()))?;
        Ok(format!("{}/{name}", self.user))
    }

    /// Upload `encrypted` and tag it for short expiry.
    pub async fn upload(&self, runner: &dyn CommandRunner, encrypted: &Path) -> Result<String> {
        let key = self.key_for(encrypted)?;
        let profile = self.profile_arg();
        let source = encrypted.to_string_lossy();
        let destination = format!("s3://{}/{key}", self.bucket);

        run_checked(runner, "aws", &[&profile, "s3", "cp", &source, &destination]).await?;
        run_checked(
            runner,
            "aws",
            &[
                &profile,
                "s3api",
                "put-object-tagging",
                "--bucket",
                self.bucket,
                "--key",
                &key,
                "--tagging",
                "TagSet=[{Key=ShortExpire,Value=True}]",
            ],
        )
        .await?;
        Ok(destination)
    }

    pub async fn empty(&self, runner: &dyn CommandRunner) -> Result<()> {
        let profile = self.profile_arg();
        let prefix = format!("s3://{}/{}/", self.bucket, self.user);
        run_checked(runner, "aws", &[&profile, "s3", "rm", &prefix, "--recursive"]).await?;
        Ok(())
    }
}

/// Removes local dump files on drop unless asked to keep them.
pub struct LocalDumpFiles {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl LocalDumpFiles {
    pub fn new(keep: bool) -> Self {
        Self {
            paths: Vec::new(),
            keep,
        }
    }

    pub fn track(&mut self, path: PathBuf) {
        self.paths.push(path);
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for LocalDumpFiles {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for path in &self.paths {
            if let Err(err) = std::fs::remove_file(path)
                && err.kind() != std::io::ErrorKind::NotFound
            {
                log::warn!("Failed to remove {}: {err}", path.display());
            }
        }
    }
}
