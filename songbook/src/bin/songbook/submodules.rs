use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::shell::{CommandRunner, run_checked};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submodule {
    pub name: String,
    pub path: String,
    pub url: String,
}

/// One repository entry of the pending-merges manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct PendingMerge {
    /// `<remote> <branch>`
    pub target: String,
    #[serde(default)]
    pub remotes: BTreeMap<String, String>,
}

impl PendingMerge {
    pub fn target_remote(&self) -> Option<&str> {
        let remote = self.target.split_whitespace().next()?;
        self.remotes.get(remote).map(String::as_str)
    }
}

pub type PendingMerges = BTreeMap<String, PendingMerge>;

pub fn load_pending_merges(path: &Path) -> Result<PendingMerges> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_pending_merges(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn parse_pending_merges(content: &str) -> Result<PendingMerges> {
    let merges: Option<PendingMerges> = serde_yaml::from_str(content)?;
    Ok(merges.unwrap_or_default())
}

/// Lowercase https form without `.git`, so URLs can be compared.
pub fn normalize_git_url(url: &str) -> String {
    let mut url = url.to_lowercase();
    if let Some(rest) = url.strip_prefix("git@github.com:") {
        url = format!("https://github.com/{rest}");
    }
    if let Some(stripped) = url.strip_suffix(".git") {
        url = stripped.to_string();
    }
    url
}

/// Key of a submodule in the pending-merges manifest: `odoo/x` becomes `./x`.
pub fn pending_merges_key(path: &str) -> String {
    format!(".{}", path.get(4..).unwrap_or_default())
}

/// Parse `git config --get-regexp` output over `.gitmodules`.
pub fn parse_gitmodules(config: &str) -> Vec<Submodule> {
    let mut by_name: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();
    for line in config.lines() {
        let Some((key, value)) = line.split_once(' ') else {
            continue;
        };
        let Some((name, attribute)) = key
            .strip_prefix("submodule.")
            .and_then(|rest| rest.rsplit_once('.'))
        else {
            continue;
        };
        let entry = by_name.entry(name.to_string()).or_default();
        match attribute {
            "path" => entry.0 = Some(value.trim().to_string()),
            "url" => entry.1 = Some(value.trim().to_string()),
            _ => {}
        }
    }
    by_name
        .into_iter()
        .filter_map(|(name, (path, url))| {
            Some(Submodule {
                name,
                path: path?,
                url: url?,
            })
        })
        .collect()
}

pub async fn list_submodules(runner: &dyn CommandRunner) -> Result<Vec<Submodule>> {
    let output = runner
        .run(
            "git",
            &["config", "--file", ".gitmodules", "--get-regexp", r"^submodule\..*\.(path|url)$"],
        )
        .await?;
    // exit status 1 means no matching key
    if output.status > 1 {
        anyhow::bail!("Failed to read .gitmodules: {}", output.stderr.trim());
    }
    Ok(parse_gitmodules(&output.stdout))
}

#[derive(Debug, Clone, Serialize)]
pub struct UrlMismatch {
    pub path: String,
    pub submodule_url: String,
    pub target_url: String,
}

impl fmt::Display for UrlMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "In .gitmodules {}: remote url {} does not match target url {} in pending-merges.yaml",
            self.path, self.submodule_url, self.target_url
        )
    }
}

/// Submodules whose URL differs from their pending-merges target remote.
pub fn check_consistency(submodules: &[Submodule], pending: &PendingMerges) -> Result<Vec<UrlMismatch>> {
    let mut mismatches = Vec::new();
    for submodule in submodules {
        let Some(merge) = pending.get(&pending_merges_key(&submodule.path)) else {
            continue;
        };
        let target_url = merge.target_remote().with_context(|| {
            format!("Target remote '{}' of {} is not declared in its remotes", merge.target, submodule.path)
        })?;
        if normalize_git_url(target_url) != normalize_git_url(&submodule.url) {
            mismatches.push(UrlMismatch {
                path: submodule.path.clone(),
                submodule_url: submodule.url.clone(),
                target_url: target_url.to_string(),
            });
        }
    }
    Ok(mismatches)
}

pub async fn init(runner: &dyn CommandRunner) -> Result<()> {
    run_checked(runner, "git", &["submodule", "init"]).await?;
    Ok(())
}

pub async fn update(runner: &dyn CommandRunner, submodule: &Submodule) -> Result<()> {
    run_checked(runner, "git", &["submodule", "update", submodule.path.as_str()]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::scripted::{ScriptedRunner, ok};

    const MERGES: &str = "
./external-src/server-tools:
  remotes:
    oca: https://github.com/OCA/server-tools.git
    camptocamp: git@github.com:camptocamp/server-tools.git
  merges:
    - oca 14.0
    - camptocamp 14.0-fix
  target: camptocamp merge-branch-1234
";

    fn submodule(path: &str, url: &str) -> Submodule {
        Submodule {
            name: path.to_string(),
            path: path.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn normalizes_urls() {
        assert_eq!(
            normalize_git_url("git@github.com:Camptocamp/Server-Tools.git"),
            "https://github.com/camptocamp/server-tools"
        );
        assert_eq!(
            normalize_git_url("https://github.com/OCA/web"),
            "https://github.com/oca/web"
        );
    }

    #[test]
    fn pending_key_replaces_odoo_prefix() {
        assert_eq!(pending_merges_key("odoo/external-src/web"), "./external-src/web");
        assert_eq!(pending_merges_key("odoo/src"), "./src");
    }

    #[test]
    fn parses_git_config_listing() {
        let listing = "\
submodule.odoo/src.path odoo/src
submodule.odoo/src.url git@github.com:odoo/odoo.git
submodule.odoo/external-src/web.path odoo/external-src/web
submodule.odoo/external-src/web.url https://github.com/OCA/web.git
";
        assert_eq!(
            parse_gitmodules(listing),
            vec![
                Submodule {
                    name: "odoo/external-src/web".into(),
                    path: "odoo/external-src/web".into(),
                    url: "https://github.com/OCA/web.git".into(),
                },
                Submodule {
                    name: "odoo/src".into(),
                    path: "odoo/src".into(),
                    url: "git@github.com:odoo/odoo.git".into(),
                },
            ]
        );
    }

    #[test]
    fn matching_target_is_consistent() {
        let pending = parse_pending_merges(MERGES).unwrap();
        let subs = vec![
            submodule("odoo/external-src/server-tools", "https://github.com/camptocamp/server-tools"),
            submodule("odoo/src", "git@github.com:odoo/odoo.git"),
        ];
        assert!(check_consistency(&subs, &pending).unwrap().is_empty());
    }

    #[test]
    fn forgotten_fork_is_reported() {
        let pending = parse_pending_merges(MERGES).unwrap();
        let subs = vec![submodule("odoo/external-src/server-tools", "git@github.com:OCA/server-tools.git")];
        let mismatches = check_consistency(&subs, &pending).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert!(mismatches[0].to_string().contains("does not match target url git@github.com:camptocamp/server-tools.git"));
    }

    #[test]
    fn empty_manifest() {
        assert!(parse_pending_merges("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_and_updates() {
        let runner = ScriptedRunner::new(|line| {
            if line.starts_with("git config") {
                ok("submodule.odoo/src.path odoo/src\nsubmodule.odoo/src.url git@github.com:odoo/odoo.git\n")
            } else {
                ok("")
            }
        });
        let subs = list_submodules(&runner).await.unwrap();
        init(&runner).await.unwrap();
        update(&runner, &subs[0]).await.unwrap();

        let calls = runner.calls();
        assert_eq!(calls[1], "git submodule init");
        assert_eq!(calls[2], "git submodule update odoo/src");
    }
}
