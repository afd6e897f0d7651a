//! End-to-end migration runs against the in-memory catalog.
//!
//! Shell operations go through `sh -c`, so the descriptors below only use
//! `echo`, `exit` and `true`.

use std::sync::Arc;

use async_trait::async_trait;
use songbook::{
    MemoryCatalog, MigrationContext, MigrationDescriptor, MigrationRunner, RunEnvironment, Song, SongError,
    SongRegistry, SongResult, SongSettings,
};

const DESCRIPTOR: &str = r#"
migration:
  options:
    install_command: "true"
  versions:
    - version: setup
      operations:
        pre: [migration.pre]
        post:
          - migration.post
          - shell: echo setup done
      addons:
        upgrade: [base]
    - version: 14.0.1
      operations:
        post:
          - shell: echo one
    - version: 14.0.2
      modes:
        sample:
          operations:
            post:
              - shell: echo sample data
"#;

fn descriptor(source: &str) -> MigrationDescriptor {
    MigrationDescriptor::from_yaml(source).expect("descriptor should parse")
}

fn version_log<'c>(catalog: &'c MemoryCatalog, number: &str) -> &'c str {
    catalog
        .versions
        .iter()
        .find(|v| v.number == number)
        .and_then(|v| v.log.as_deref())
        .unwrap_or_default()
}

struct Flaky;

#[async_trait]
impl Song for Flaky {
    fn name(&self) -> &str {
        "songs.flaky"
    }

    async fn play(&self, _ctx: &mut MigrationContext<'_>) -> SongResult<()> {
        Err(SongError::user("record still referenced"))
    }
}

// ============================================================================
// History bookkeeping
// ============================================================================

#[tokio::test]
async fn fresh_database_runs_every_version_once() {
    let descriptor = descriptor(DESCRIPTOR);
    let registry = SongRegistry::with_builtin();
    let mut catalog = MemoryCatalog::new();

    {
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        let stats = MigrationRunner::new(&descriptor, &registry)
            .run(&mut ctx)
            .await
            .expect("first run should succeed");

        assert_eq!(stats.versions_applied, vec!["setup", "14.0.1", "14.0.2"]);
        assert_eq!(stats.versions_skipped, 0);
        assert_eq!(stats.report.soft_failures().count(), 0);
    }

    assert_eq!(catalog.versions.len(), 3);
    assert!(catalog.versions.iter().all(|v| v.is_done()));
    assert!(version_log(&catalog, "setup").contains("setup done"));
    assert!(version_log(&catalog, "14.0.1").contains("one"));
    assert!(!version_log(&catalog, "14.0.2").contains("sample data"));

    let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
    let stats = MigrationRunner::new(&descriptor, &registry)
        .run(&mut ctx)
        .await
        .expect("second run should succeed");

    assert!(stats.versions_applied.is_empty());
    assert_eq!(stats.versions_skipped, 3);
    assert!(ctx.log.lines().iter().any(|l| l == "Database is up to date"));
}

#[tokio::test]
async fn forced_version_replays_with_its_mode() {
    let descriptor = descriptor(DESCRIPTOR);
    let registry = SongRegistry::with_builtin();
    let mut catalog = MemoryCatalog::new();

    {
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        MigrationRunner::new(&descriptor, &registry)
            .run(&mut ctx)
            .await
            .expect("first run should succeed");
    }

    {
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        let stats = MigrationRunner::new(&descriptor, &registry)
            .with_mode(Some("sample".to_string()))
            .with_force(vec!["14.0.2".to_string()])
            .run(&mut ctx)
            .await
            .expect("forced run should succeed");
        assert_eq!(stats.versions_applied, vec!["14.0.2"]);
    }

    assert_eq!(catalog.versions.len(), 3);
    assert!(version_log(&catalog, "14.0.2").contains("sample data"));
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn steps_run_pre_then_addons_then_post() {
    let descriptor = descriptor(
        r#"
migration:
  options:
    install_command: "true"
  versions:
    - version: setup
      operations:
        pre:
          - shell: echo first
          - shell: echo second
        post:
          - shell: echo fourth
      addons:
        upgrade: [sale, purchase]
"#,
    );
    let registry = SongRegistry::with_builtin();
    let mut catalog = MemoryCatalog::new();
    let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());

    let stats = MigrationRunner::new(&descriptor, &registry)
        .run(&mut ctx)
        .await
        .expect("run should succeed");

    let names: Vec<&str> = stats.report.outcomes.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "shell: echo first",
            "shell: echo second",
            "shell: true -u sale,purchase --stop-after-init",
            "shell: echo fourth",
        ]
    );

    let output: Vec<&str> = ctx
        .log
        .lines()
        .iter()
        .map(|l| l.trim())
        .filter(|l| ["first", "second", "fourth"].contains(l))
        .collect();
    assert_eq!(output, vec!["first", "second", "fourth"]);
}

// ============================================================================
// Soft and hard errors
// ============================================================================

#[tokio::test]
async fn soft_error_is_logged_and_version_completes() {
    let descriptor = descriptor(
        r#"
migration:
  versions:
    - version: 14.0.1
      operations:
        pre: [songs.flaky]
        post:
          - shell: echo after flaky
"#,
    );
    let mut registry = SongRegistry::with_builtin();
    registry.register(Arc::new(Flaky));
    let mut catalog = MemoryCatalog::new();

    {
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        let stats = MigrationRunner::new(&descriptor, &registry)
            .run(&mut ctx)
            .await
            .expect("soft errors do not fail the run");

        let failed: Vec<&str> = stats.report.soft_failures().map(|o| o.name.as_str()).collect();
        assert_eq!(failed, vec!["songs.flaky"]);
        assert_eq!(stats.report.completed(), 1);
    }

    assert!(catalog.versions[0].is_done());
    let log = version_log(&catalog, "14.0.1");
    assert!(log.contains("record still referenced"));
    assert!(log.contains("after flaky"));
}

#[tokio::test]
async fn hard_error_leaves_version_unfinished() {
    let descriptor = descriptor(
        r#"
migration:
  versions:
    - version: 14.0.1
      operations:
        pre:
          - shell: exit 3
        post:
          - shell: echo never printed
    - version: 14.0.2
"#,
    );
    let registry = SongRegistry::with_builtin();
    let mut catalog = MemoryCatalog::new();

    let err = {
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        let err = MigrationRunner::new(&descriptor, &registry)
            .run(&mut ctx)
            .await
            .expect_err("a failing shell step stops the run");
        assert!(!ctx.log.lines().iter().any(|l| l.contains("never printed")));
        err
    };

    assert!(matches!(err, SongError::Command { status: 3, .. }));
    assert_eq!(catalog.versions.len(), 1);
    assert!(!catalog.versions[0].is_done());

    let pending = MigrationRunner::new(&descriptor, &registry)
        .plan(&catalog.versions)
        .expect("plan should resolve");
    let numbers: Vec<&str> = pending.iter().map(|p| p.version.as_str()).collect();
    assert_eq!(numbers, vec!["14.0.1", "14.0.2"]);
}

#[tokio::test]
async fn unknown_song_fails_before_any_change() {
    let descriptor = descriptor(
        r#"
migration:
  versions:
    - version: 14.0.1
      operations:
        post:
          - shell: echo fine
    - version: 14.0.2
      operations:
        pre: [songs.missing]
"#,
    );
    let registry = SongRegistry::with_builtin();
    let mut catalog = MemoryCatalog::new();

    {
        let mut ctx = MigrationContext::new(&mut catalog, RunEnvironment::default(), SongSettings::default());
        let err = MigrationRunner::new(&descriptor, &registry)
            .run(&mut ctx)
            .await
            .expect_err("unknown songs are rejected");
        assert!(matches!(err, SongError::UnknownSong { ref name } if name == "songs.missing"));
    }

    assert!(catalog.versions.is_empty());
}

// ============================================================================
// Descriptor validation
// ============================================================================

#[test]
fn descriptor_rejects_out_of_order_versions() {
    let err = MigrationDescriptor::from_yaml(
        r#"
migration:
  versions:
    - version: 14.0.2
    - version: 14.0.1
"#,
    )
    .expect_err("decreasing versions are invalid");
    assert!(matches!(err, SongError::Descriptor { .. }));

    let err = MigrationDescriptor::from_yaml(
        r#"
migration:
  versions:
    - version: 14.0.1
    - version: setup
"#,
    )
    .expect_err("setup must come first");
    assert!(matches!(err, SongError::Descriptor { .. }));
}

#[test]
fn descriptor_compares_version_components_numerically() {
    let descriptor = descriptor(
        r#"
migration:
  versions:
    - version: 14.0.9
    - version: 14.0.10
"#,
    );
    assert_eq!(descriptor.versions().len(), 2);
}
