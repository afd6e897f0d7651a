use anyhow::Result;
use clap::Subcommand;

use crate::context::ProjectContext;
use crate::examples::ExampleGroup;
use crate::output::OutputManager;
use crate::shell::SystemShell;
use crate::submodules::{self, Submodule, load_pending_merges};

pub const EXAMPLES: &[ExampleGroup] = &[ExampleGroup {
    title: "Submodules",
    commands: &[
        "songbook submodule check     # Compare .gitmodules with pending-merges.yaml",
        "songbook submodule update    # Check, then init and update every submodule",
    ],
}];

#[derive(Subcommand)]
pub enum SubmoduleCommands {
    /// Check submodule URLs against their pending-merges target
    #[command(name = "check")]
    Check,

    /// Initialize and update every submodule
    #[command(name = "update")]
    Update,
}

pub async fn handle_submodule_commands(command: SubmoduleCommands, output: &OutputManager) -> Result<()> {
    let ctx = ProjectContext::find()?;
    let shell = SystemShell::new().in_dir(&ctx.project_root);

    let list = submodules::list_submodules(&shell).await?;
    check(&ctx, &list, output)?;

    if let SubmoduleCommands::Update = command {
        submodules::init(&shell).await?;
        for submodule in &list {
            output.progress(&format!("Getting submodule {}", submodule.path));
            let updated = submodules::update(&shell, submodule).await;
            output.clear_line();
            updated?;
            output.success(&submodule.path);
        }
    }
    Ok(())
}

fn check(ctx: &ProjectContext, list: &[Submodule], output: &OutputManager) -> Result<()> {
    let pending_path = ctx.path(&ctx.config.project.pending_merges);
    let pending = if pending_path.exists() {
        load_pending_merges(&pending_path)?
    } else {
        output.verbose(&format!("No {}", pending_path.display()));
        Default::default()
    };

    let mismatches = submodules::check_consistency(list, &pending)?;
    if mismatches.is_empty() {
        output.success(&format!("{} submodule(s) consistent with pending merges", list.len()));
        return Ok(());
    }

    for mismatch in &mismatches {
        output.error(&mismatch.to_string());
    }
    output.info(
        "If you added pending merges entries you probably forgot to edit the target in .gitmodules \
         to match the fork repository.",
    );
    anyhow::bail!("{} submodule(s) do not match pending-merges.yaml", mismatches.len())
}
