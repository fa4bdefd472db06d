use std::path::PathBuf;
use std::sync::Arc;

use eframe::egui;
use flume::{Receiver, Sender};
use text2model_core::settings::TomlFileStore;
use text2model_core::{
    MeshOutcome, OpenAiImageClient, Settings, SettingsStore, Workflow, WorkflowController,
    WorkflowEvent,
};
use tokio::runtime::Runtime;

use super::gallery::render_gallery;
use super::settings::{render_settings, SettingsAction};

enum TaskOutput {
    Images(usize),
    Mesh(MeshOutcome),
}

enum TaskError {
    Workflow(text2model_core::Error),
    /// The task panicked and took its workflow with it.
    Aborted,
}

/// A finished background operation hands the workflow back to the UI.
struct TaskDone {
    workflow: Workflow,
    result: Result<TaskOutput, TaskError>,
}

/// Runs `future` as its own task so a panic still yields a [`TaskDone`].
async fn join_task<Fut>(future: Fut) -> TaskDone
where
    Fut: std::future::Future<Output = TaskDone> + Send + 'static,
{
    match tokio::spawn(future).await {
        Ok(done) => done,
        Err(err) => {
            tracing::error!(error = %err, "background task aborted");
            TaskDone {
                workflow: Workflow::new(),
                result: Err(TaskError::Aborted),
            }
        }
    }
}

struct Dialog {
    title: String,
    message: String,
}

pub struct Text2ModelApp {
    runtime: Runtime,
    store: SettingsStore<TomlFileStore>,
    settings: Settings,
    project_root: PathBuf,
    prompt: String,
    /// `None` while a background task owns it.
    workflow: Option<Workflow>,
    textures: Vec<egui::TextureHandle>,
    progress: Option<(String, f32)>,
    dialog: Option<Dialog>,
    event_tx: Sender<WorkflowEvent>,
    event_rx: Receiver<WorkflowEvent>,
    done_tx: Sender<TaskDone>,
    done_rx: Receiver<TaskDone>,
}

impl Text2ModelApp {
    pub fn new(runtime: Runtime, store: SettingsStore<TomlFileStore>, project_root: PathBuf) -> Self {
        let mut settings = store.load();
        settings.apply_env_overrides();
        let (event_tx, event_rx) = flume::unbounded();
        let (done_tx, done_rx) = flume::unbounded();
        Self {
            runtime,
            store,
            settings,
            project_root,
            prompt: "Enter your prompt here...".to_string(),
            workflow: Some(Workflow::new()),
            textures: Vec::new(),
            progress: None,
            dialog: None,
            event_tx,
            event_rx,
            done_tx,
            done_rx,
        }
    }

    fn busy(&self) -> bool {
        self.workflow.is_none()
    }

    /// Built per operation so edits in the settings foldout apply right away.
    fn controller(&self) -> text2model_core::Result<Arc<WorkflowController<OpenAiImageClient>>> {
        let controller = WorkflowController::openai(&self.settings, &self.project_root)?
            .with_events(self.event_tx.clone());
        Ok(Arc::new(controller))
    }

    fn start_generate_images(&mut self, ctx: &egui::Context) {
        let prompt = self.prompt.clone();
        self.textures.clear();
        self.spawn_task(ctx, move |controller, mut workflow| async move {
            let result = controller
                .generate_images_from_prompt(&mut workflow, &prompt)
                .await
                .map(TaskOutput::Images)
                .map_err(TaskError::Workflow);
            TaskDone { workflow, result }
        });
    }

    fn start_generate_mesh(&mut self, ctx: &egui::Context) {
        self.spawn_task(ctx, |controller, mut workflow| async move {
            let result = controller
                .generate_mesh_from_selection(&mut workflow)
                .await
                .map(TaskOutput::Mesh)
                .map_err(TaskError::Workflow);
            TaskDone { workflow, result }
        });
    }

    fn spawn_task<F, Fut>(&mut self, ctx: &egui::Context, task: F)
    where
        F: FnOnce(Arc<WorkflowController<OpenAiImageClient>>, Workflow) -> Fut,
        Fut: std::future::Future<Output = TaskDone> + Send + 'static,
    {
        let controller = match self.controller() {
            Ok(controller) => controller,
            Err(err) => {
                self.show_error(&err);
                return;
            }
        };
        let Some(workflow) = self.workflow.take() else {
            return;
        };
        let done_tx = self.done_tx.clone();
        let ctx = ctx.clone();
        let future = task(controller, workflow);
        self.runtime.spawn(async move {
            let done = join_task(future).await;
            if done_tx.send(done).is_err() {
                tracing::error!("failed to hand workflow back to the UI");
            }
            ctx.request_repaint();
        });
    }

    fn poll_background(&mut self, ctx: &egui::Context) {
        while let Ok(event) = self.event_rx.try_recv() {
            match event {
                WorkflowEvent::Progress { message, fraction, .. } => {
                    self.progress = Some((message, fraction));
                }
                WorkflowEvent::Finished => self.progress = None,
                WorkflowEvent::AssetsRefreshed => {
                    tracing::debug!("assets refreshed on disk");
                }
                _ => {}
            }
        }

        while let Ok(done) = self.done_rx.try_recv() {
            match done.result {
                Ok(TaskOutput::Images(count)) => {
                    self.rebuild_textures(ctx, &done.workflow);
                    self.dialog = Some(Dialog {
                        title: "Success".into(),
                        message: format!("Generated {count} images from your prompt."),
                    });
                }
                Ok(TaskOutput::Mesh(outcome)) => {
                    let mut message = format!("Model written to {}", outcome.expected_artifact.display());
                    if !outcome.artifact_present {
                        message.push_str(" (file not found, check the script output)");
                    }
                    self.dialog = Some(Dialog {
                        title: "3D Model Generated".into(),
                        message,
                    });
                }
                Err(err) => {
                    if done.workflow.records().is_empty() {
                        self.textures.clear();
                    }
                    match err {
                        TaskError::Workflow(err) => self.show_error(&err),
                        TaskError::Aborted => {
                            self.dialog = Some(Dialog {
                                title: "Error".into(),
                                message: "The operation stopped unexpectedly. See log for details.".into(),
                            });
                        }
                    }
                }
            }
            self.workflow = Some(done.workflow);
            self.progress = None;
        }
    }

    fn rebuild_textures(&mut self, ctx: &egui::Context, workflow: &Workflow) {
        self.textures = workflow
            .records()
            .iter()
            .map(|record| {
                let size = [record.bitmap.width() as usize, record.bitmap.height() as usize];
                let color = egui::ColorImage::from_rgba_unmultiplied(size, record.bitmap.as_raw());
                ctx.load_texture(
                    format!("generated_{}", record.index),
                    color,
                    egui::TextureOptions::default(),
                )
            })
            .collect();
    }

    fn show_error(&mut self, err: &text2model_core::Error) {
        tracing::error!(error = %err, "operation failed");
        self.dialog = Some(Dialog {
            title: "Error".into(),
            message: err.user_message(),
        });
    }

    fn handle_settings_action(&mut self, action: SettingsAction) {
        match action {
            SettingsAction::Save => {
                let persisted = self.store.load();
                let settings = self.settings.without_env_overrides(&persisted);
                self.save_settings(&settings);
            }
            SettingsAction::Load => {
                self.settings = self.store.load();
                self.settings.apply_env_overrides();
            }
        }
    }

    fn save_settings(&mut self, settings: &Settings) {
        match self.store.save(settings) {
            Ok(()) => {
                self.dialog = Some(Dialog {
                    title: "Settings Saved".into(),
                    message: "Your settings have been saved for future sessions.".into(),
                });
            }
            Err(err) => self.show_error(&err),
        }
    }

    fn render_dialog(&mut self, ctx: &egui::Context) {
        let Some(dialog) = &self.dialog else {
            return;
        };
        let mut close = false;
        egui::Window::new(&dialog.title)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(&dialog.message);
                if ui.button("OK").clicked() {
                    close = true;
                }
            });
        if close {
            self.dialog = None;
        }
    }
}

impl eframe::App for Text2ModelApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_background(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Text to 3D Model Generator");
            ui.add_space(4.0);

            ui.add_enabled_ui(!self.busy(), |ui| {
                if let Some(action) = render_settings(ui, &mut self.settings) {
                    self.handle_settings_action(action);
                }
            });

            ui.add_space(10.0);
            ui.label(egui::RichText::new("Step 1: Generate Images from Text").strong());
            ui.horizontal(|ui| {
                ui.label("Prompt");
                ui.add(egui::TextEdit::singleline(&mut self.prompt).desired_width(f32::INFINITY));
            });
            if ui
                .add_enabled(!self.busy(), egui::Button::new("Generate Images"))
                .clicked()
            {
                self.start_generate_images(ctx);
            }

            if let Some((message, fraction)) = &self.progress {
                ui.add(egui::ProgressBar::new(*fraction).text(message.as_str()).animate(true));
            } else if self.busy() {
                ui.spinner();
            }

            ui.add_space(10.0);
            if self.textures.is_empty() {
                return;
            }

            ui.label(egui::RichText::new("Step 2: Select an Image and Generate 3D Model").strong());
            let selected = self.workflow.as_ref().and_then(Workflow::selection);
            let clicked = render_gallery(
                ui,
                &self.textures,
                selected,
                self.settings.images_per_row as usize,
                self.settings.ui_image_size as f32,
            );
            if let Some(index) = clicked {
                let result = match self.workflow.as_mut() {
                    Some(workflow) => workflow.select(index),
                    None => Ok(()),
                };
                if let Err(err) = result {
                    self.show_error(&err);
                }
            }

            ui.add_space(10.0);
            let has_selection = self.workflow.as_ref().and_then(Workflow::selection).is_some();
            let can_mesh = !self.busy() && has_selection;
            if ui
                .add_enabled(can_mesh, egui::Button::new("Generate 3D Model from Selected Image"))
                .clicked()
            {
                self.start_generate_mesh(ctx);
            }
        });

        self.render_dialog(ctx);

        if self.busy() {
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }
    }
}
