use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use flume::Sender;
use text2model_core::settings::TomlFileStore;
use text2model_core::{
    OpenAiImageClient, Settings, SettingsStore, Workflow, WorkflowController, WorkflowEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::progress;

/// Interactive loop: generate, inspect, select, mesh, tweak settings.
pub async fn run_shell(
    store: SettingsStore<TomlFileStore>,
    settings: Settings,
    project_root: PathBuf,
) -> Result<()> {
    let (tx, rx) = flume::unbounded();
    let printer = progress::spawn_printer(rx);

    let mut session = ShellSession {
        controller: WorkflowController::openai(&settings, &project_root)?.with_events(tx.clone()),
        store,
        settings,
        project_root,
        workflow: Workflow::new(),
        events: tx,
    };

    println!("Text2Model shell ready. Type 'help' for a list of commands.");

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);

    loop {
        print!("text2model> ");
        io::stdout().flush()?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            println!("Exiting");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let tokens = match shell_words::split(trimmed) {
            Ok(tokens) if !tokens.is_empty() => tokens,
            Ok(_) => continue,
            Err(err) => {
                println!("Unable to parse command: {err}");
                continue;
            }
        };

        match session.handle_command(&tokens).await {
            Ok(LoopAction::Continue) => {}
            Ok(LoopAction::Exit) => break,
            Err(err) => println!("Error: {err:#}"),
        }
    }

    drop(session);
    let _ = printer.await;
    Ok(())
}

struct ShellSession {
    controller: WorkflowController<OpenAiImageClient>,
    store: SettingsStore<TomlFileStore>,
    settings: Settings,
    project_root: PathBuf,
    workflow: Workflow,
    events: Sender<WorkflowEvent>,
}

#[derive(Debug, PartialEq, Eq)]
enum LoopAction {
    Continue,
    Exit,
}

impl ShellSession {
    async fn handle_command(&mut self, tokens: &[String]) -> Result<LoopAction> {
        match tokens[0].as_str() {
            "help" => self.print_help(),
            "generate" | "images" => {
                let Some(prompt) = joined_prompt(tokens) else {
                    println!("Usage: generate <prompt>");
                    return Ok(LoopAction::Continue);
                };
                let stored = self
                    .controller
                    .generate_images_from_prompt(&mut self.workflow, &prompt)
                    .await?;
                println!("Generated {stored} images from your prompt.");
                self.list_images();
            }
            "list" | "ls" => self.list_images(),
            "select" => {
                let Some(index) = tokens.get(1).and_then(|raw| raw.parse::<usize>().ok()) else {
                    println!("Usage: select <index>");
                    return Ok(LoopAction::Continue);
                };
                self.workflow.select(index)?;
                println!("Selected image {index}");
            }
            "deselect" => {
                self.workflow.clear_selection();
                println!("Selection cleared");
            }
            "mesh" | "model" => {
                let outcome = self
                    .controller
                    .generate_mesh_from_selection(&mut self.workflow)
                    .await?;
                progress::print_outcome(&outcome);
            }
            "oneshot" => {
                let Some(prompt) = joined_prompt(tokens) else {
                    println!("Usage: oneshot <prompt>");
                    return Ok(LoopAction::Continue);
                };
                let outcome = self
                    .controller
                    .generate_model_from_prompt(&mut self.workflow, &prompt)
                    .await?;
                progress::print_outcome(&outcome);
            }
            "settings" => crate::print_settings(&self.settings, self.store.store().path()),
            "set" => {
                if tokens.len() < 3 {
                    println!("Usage: set <key> <value>");
                    return Ok(LoopAction::Continue);
                }
                self.settings.set_field(&tokens[1], &tokens[2..].join(" "))?;
                self.rebuild()?;
                println!("{} updated (not saved yet)", tokens[1]);
            }
            "save" => {
                let persisted = self.store.load();
                self.store
                    .save(&self.settings.without_env_overrides(&persisted))
                    .context("failed to save settings")?;
                println!("Your settings have been saved for future sessions.");
            }
            "load" => {
                self.settings = self.store.load();
                self.settings.apply_env_overrides();
                self.rebuild()?;
                println!("Saved settings loaded.");
            }
            "quit" | "exit" => return Ok(LoopAction::Exit),
            other => println!("Unknown command '{other}'. Type 'help' for usage."),
        }
        Ok(LoopAction::Continue)
    }

    /// Settings feed the controller at construction, so edits need a new one.
    /// The workflow (images and selection) survives.
    fn rebuild(&mut self) -> Result<()> {
        self.controller = WorkflowController::openai(&self.settings, &self.project_root)?
            .with_events(self.events.clone());
        Ok(())
    }

    fn list_images(&self) {
        let records = self.workflow.records();
        if records.is_empty() {
            println!("No images yet. Use 'generate <prompt>'.");
            return;
        }
        for record in records {
            let marker = if self.workflow.selection() == Some(record.index) {
                "*"
            } else {
                " "
            };
            println!(
                "{marker}[{}] {} ({}x{})",
                record.index,
                record.path.display(),
                record.bitmap.width(),
                record.bitmap.height()
            );
        }
    }

    fn print_help(&self) {
        println!("Commands:");
        println!("  generate <prompt>   Generate images using the configured count and size");
        println!("  list                Show generated images (* marks the selection)");
        println!("  select <index>      Select an image for mesh generation");
        println!("  deselect            Clear the current selection");
        println!("  mesh                Generate a 3D model from the selected image");
        println!("  oneshot <prompt>    Prompt to model using the first image");
        println!("  settings            Show current settings");
        println!("  set <key> <value>   Change a setting for this session");
        println!("  save | load         Persist or reload settings");
        println!("  quit                Leave the shell");
    }
}

fn joined_prompt(tokens: &[String]) -> Option<String> {
    let prompt = tokens.get(1..)?.join(" ");
    let prompt = prompt.trim();
    (!prompt.is_empty()).then(|| prompt.to_string())
}
