mod progress;
mod shell;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use text2model_core::settings::TomlFileStore;
use text2model_core::{telemetry, Settings, SettingsStore, Workflow, WorkflowController};

#[derive(Parser)]
#[command(author, version, about = "Turn a text prompt into images and a 3D mesh")]
struct Args {
    /// Directory relative paths in the settings are resolved against
    #[arg(long, global = true, default_value = ".")]
    project_root: PathBuf,

    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Generate candidate images, optionally meshing one of them
    Images {
        #[arg(long)]
        prompt: String,
        /// Number of images (1-10), overrides the saved setting
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10))]
        count: Option<u32>,
        /// Image size such as 1024x1024, overrides the saved setting
        #[arg(long)]
        size: Option<String>,
        /// Run mesh generation on this image index afterwards
        #[arg(long)]
        select: Option<usize>,
    },
    /// Prompt to model in one step, using the first generated image
    Model {
        #[arg(long)]
        prompt: String,
        /// Output mesh name, overrides the saved setting
        #[arg(long)]
        name: Option<String>,
    },
    /// Inspect or edit saved settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
    /// Interactive session with selection between steps
    Shell,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print every setting, credentials masked
    Show,
    /// Change one setting and save
    Set { key: String, value: String },
    /// Restore defaults and save
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing_with_default("text2model_core=info,text2model=info");
    let args = Args::parse();

    let mut store = open_store(args.settings.as_ref())?;
    let mut settings = store.load();
    settings.apply_env_overrides();

    match args.command.unwrap_or(Command::Shell) {
        Command::Images {
            prompt,
            count,
            size,
            select,
        } => {
            if let Some(size) = size {
                settings.image_size = size;
            }
            let count = count.unwrap_or(settings.image_count);
            run_images(&settings, &args.project_root, &prompt, count, select).await
        }
        Command::Model { prompt, name } => {
            if let Some(name) = name {
                settings.output_name = name;
            }
            run_model(&settings, &args.project_root, &prompt).await
        }
        Command::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => {
                print_settings(&settings, store.store().path());
                Ok(())
            }
            SettingsAction::Set { key, value } => {
                // Saved values only; env overrides must not leak into the file.
                let mut saved = store.load();
                saved.set_field(&key, &value)?;
                store.save(&saved).context("failed to save settings")?;
                println!("{key} updated");
                Ok(())
            }
            SettingsAction::Reset => {
                store
                    .save(&Settings::default())
                    .context("failed to save settings")?;
                println!("Settings reset to defaults");
                Ok(())
            }
        },
        Command::Shell => shell::run_shell(store, settings, args.project_root).await,
    }
}

pub(crate) fn open_store(path: Option<&PathBuf>) -> Result<SettingsStore<TomlFileStore>> {
    let path = match path {
        Some(path) => path.clone(),
        None => TomlFileStore::default_path()
            .ok_or_else(|| anyhow!("no user config directory; pass --settings"))?,
    };
    let store = TomlFileStore::open(&path)
        .with_context(|| format!("failed to open settings at {}", path.display()))?;
    Ok(SettingsStore::new(store))
}

pub(crate) fn print_settings(settings: &Settings, path: &std::path::Path) {
    println!("Settings ({})", path.display());
    for (key, value) in settings.display_entries() {
        println!("  {key:<28} {value}");
    }
}

async fn run_images(
    settings: &Settings,
    project_root: &std::path::Path,
    prompt: &str,
    count: u32,
    select: Option<usize>,
) -> Result<()> {
    let (tx, rx) = flume::unbounded();
    let printer = progress::spawn_printer(rx);
    let controller = WorkflowController::openai(settings, project_root)?.with_events(tx);
    let mut workflow = Workflow::new();

    let stored = controller.generate_images(&mut workflow, prompt, count).await?;
    println!("Generated {stored} images from your prompt.");
    for record in workflow.records() {
        println!("  [{}] {}", record.index, record.path.display());
    }

    if let Some(index) = select {
        workflow.select(index)?;
        let outcome = controller.generate_mesh_from_selection(&mut workflow).await?;
        progress::print_outcome(&outcome);
    }

    drop(controller);
    let _ = printer.await;
    Ok(())
}

async fn run_model(settings: &Settings, project_root: &std::path::Path, prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    let (tx, rx) = flume::unbounded();
    let printer = progress::spawn_printer(rx);
    let controller = WorkflowController::openai(settings, project_root)?.with_events(tx);
    let mut workflow = Workflow::new();

    let outcome = controller.generate_model_from_prompt(&mut workflow, prompt).await?;
    progress::print_outcome(&outcome);

    drop(controller);
    let _ = printer.await;
    Ok(())
}
