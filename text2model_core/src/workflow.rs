use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use flume::Sender;
use tracing::{error, info};

use crate::asset_cache::{AssetCache, GeneratedImageRecord};
use crate::error::{Error, Result};
use crate::image_client::{ImageBackend, ImageGenerator, OpenAiImageClient};
use crate::mesh::{MeshInvoker, MeshOutcome, MeshRequest};
use crate::settings::{ResolvedPaths, Settings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkflowState {
    #[default]
    Idle,
    ImagesReady,
    MeshRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    GeneratingImages,
    GeneratingModel,
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StateChanged(WorkflowState),
    Progress {
        phase: Phase,
        message: String,
        fraction: f32,
    },
    ImagesStored(Vec<PathBuf>),
    /// Files under the temp or model folders changed on disk.
    AssetsRefreshed,
    MeshFinished(MeshOutcome),
    /// Progress indicator should be cleared.
    Finished,
    Error(String),
}

/// Per-session workflow data: generated images, selection and state.
#[derive(Debug, Default)]
pub struct Workflow {
    records: Vec<GeneratedImageRecord>,
    selection: Option<usize>,
    state: WorkflowState,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &[GeneratedImageRecord] {
        &self.records
    }

    pub fn selection(&self) -> Option<usize> {
        self.selection
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    pub fn select(&mut self, index: usize) -> Result<()> {
        if index >= self.records.len() {
            return Err(Error::InvalidSelection {
                index,
                len: self.records.len(),
            });
        }
        self.selection = Some(index);
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    pub fn selected_record(&self) -> Result<&GeneratedImageRecord> {
        let index = self.selection.ok_or(Error::NoSelection)?;
        self.records.get(index).ok_or(Error::InvalidSelection {
            index,
            len: self.records.len(),
        })
    }

    /// Selection goes first so it never points into a cleared list.
    fn reset(&mut self) {
        self.clear_selection();
        self.records.clear();
        self.state = WorkflowState::Idle;
    }
}

/// Knobs the controller reads from settings once, at construction.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub image_count: u32,
    pub image_size: String,
    pub output_name: String,
    pub models_folder: PathBuf,
}

impl WorkflowOptions {
    pub fn from_settings(settings: &Settings, paths: &ResolvedPaths) -> Self {
        Self {
            image_count: settings.image_count,
            image_size: settings.image_size.clone(),
            output_name: settings.output_name.clone(),
            models_folder: paths.models_folder.clone(),
        }
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Sequences image generation, selection and mesh generation.
pub struct WorkflowController<B> {
    generator: ImageGenerator<B>,
    cache: AssetCache,
    invoker: MeshInvoker,
    options: WorkflowOptions,
    events: Option<Sender<WorkflowEvent>>,
    busy: AtomicBool,
}

impl WorkflowController<OpenAiImageClient> {
    /// Controller talking to the configured OpenAI-compatible endpoint.
    pub fn openai(settings: &Settings, project_root: &Path) -> Result<Self> {
        let backend = OpenAiImageClient::from_settings(settings)?;
        Ok(Self::new(backend, settings, project_root))
    }
}

impl<B: ImageBackend> WorkflowController<B> {
    pub fn new(backend: B, settings: &Settings, project_root: &Path) -> Self {
        let paths = settings.resolve(project_root);
        Self::from_parts(
            ImageGenerator::new(backend),
            AssetCache::new(&paths.temp_dir),
            MeshInvoker::from_paths(&paths, settings.mesh_timeout()),
            WorkflowOptions::from_settings(settings, &paths),
        )
    }

    pub fn from_parts(
        generator: ImageGenerator<B>,
        cache: AssetCache,
        invoker: MeshInvoker,
        options: WorkflowOptions,
    ) -> Self {
        Self {
            generator,
            cache,
            invoker,
            options,
            events: None,
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_events(mut self, events: Sender<WorkflowEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.options
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Generates the configured number of images.
    pub async fn generate_images_from_prompt(&self, workflow: &mut Workflow, prompt: &str) -> Result<usize> {
        self.generate_images(workflow, prompt, self.options.image_count).await
    }

    /// Clears previous results, then generates and stores `count` images.
    /// On failure the list stays empty; files already written are kept.
    pub async fn generate_images(&self, workflow: &mut Workflow, prompt: &str, count: u32) -> Result<usize> {
        let _guard = self.begin()?;
        let result = self.images_step(workflow, prompt, count).await;
        self.finish("image generation", &result);
        result
    }

    /// Runs the mesh program on the selected image.
    pub async fn generate_mesh_from_selection(&self, workflow: &mut Workflow) -> Result<MeshOutcome> {
        let _guard = self.begin()?;
        let result = self.mesh_step(workflow, &self.options.output_name).await;
        self.finish("mesh generation", &result);
        result
    }

    /// One image, no interactive selection: always uses index 0.
    pub async fn generate_model_from_prompt(&self, workflow: &mut Workflow, prompt: &str) -> Result<MeshOutcome> {
        self.generate_model_named(workflow, prompt, &self.options.output_name).await
    }

    pub async fn generate_model_named(
        &self,
        workflow: &mut Workflow,
        prompt: &str,
        output_name: &str,
    ) -> Result<MeshOutcome> {
        let _guard = self.begin()?;
        let result = self.one_shot_step(workflow, prompt, output_name).await;
        self.finish("prompt to model", &result);
        result
    }

    async fn images_step(&self, workflow: &mut Workflow, prompt: &str, count: u32) -> Result<usize> {
        workflow.reset();
        self.emit(WorkflowEvent::StateChanged(WorkflowState::Idle));
        self.progress(Phase::GeneratingImages, "Sending request to image service...", 0.3);

        let images = self
            .generator
            .generate_many(prompt, &self.options.image_size, count)
            .await?;

        self.progress(Phase::GeneratingImages, "Processing images...", 0.6);
        let mut records = Vec::with_capacity(images.len());
        for (index, image) in images.into_iter().enumerate() {
            records.push(self.cache.record(image.bitmap, index)?);
        }

        let stored = records.len();
        self.publish_records(workflow, records);
        info!(count = stored, "generated images from prompt");
        Ok(stored)
    }

    async fn one_shot_step(&self, workflow: &mut Workflow, prompt: &str, output_name: &str) -> Result<MeshOutcome> {
        workflow.reset();
        self.emit(WorkflowEvent::StateChanged(WorkflowState::Idle));
        self.progress(Phase::GeneratingImages, "Sending request to image service...", 0.3);

        let image = self.generator.generate(prompt, &self.options.image_size).await?;

        self.progress(Phase::GeneratingImages, "Processing images...", 0.6);
        let record = self.cache.record(image.bitmap, 0)?;
        self.publish_records(workflow, vec![record]);
        workflow.select(0)?;

        self.mesh_step(workflow, output_name).await
    }

    async fn mesh_step(&self, workflow: &mut Workflow, output_name: &str) -> Result<MeshOutcome> {
        let record = workflow.selected_record()?;
        info!(index = record.index, path = %record.path.display(), "generating mesh from image");

        self.progress(Phase::GeneratingModel, "Processing image...", 0.2);
        self.cache.ensure_stored(record)?;
        let request = MeshRequest {
            image_path: record.path.clone(),
            output_name: output_name.to_string(),
            destination_folder: self.options.models_folder.clone(),
        };

        self.set_state(workflow, WorkflowState::MeshRequested);
        self.progress(Phase::GeneratingModel, "Running mesh script...", 0.4);

        match self.invoker.invoke(&request).await {
            Ok(outcome) => {
                self.progress(Phase::GeneratingModel, "Importing model...", 0.8);
                self.emit(WorkflowEvent::AssetsRefreshed);
                self.emit(WorkflowEvent::MeshFinished(outcome.clone()));
                Ok(outcome)
            }
            Err(err) => {
                self.set_state(workflow, WorkflowState::ImagesReady);
                Err(err)
            }
        }
    }

    fn publish_records(&self, workflow: &mut Workflow, records: Vec<GeneratedImageRecord>) {
        let paths = records.iter().map(|record| record.path.clone()).collect();
        workflow.records = records;
        self.set_state(workflow, WorkflowState::ImagesReady);
        self.emit(WorkflowEvent::ImagesStored(paths));
        self.emit(WorkflowEvent::AssetsRefreshed);
    }

    fn set_state(&self, workflow: &mut Workflow, state: WorkflowState) {
        workflow.state = state;
        self.emit(WorkflowEvent::StateChanged(state));
    }

    fn begin(&self) -> Result<BusyGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(BusyGuard(&self.busy))
    }

    fn finish<T>(&self, operation: &str, result: &Result<T>) {
        if let Err(err) = result {
            error!(operation, error = %err, "workflow step failed");
            self.emit(WorkflowEvent::Error(err.user_message()));
        }
        self.emit(WorkflowEvent::Finished);
    }

    fn progress(&self, phase: Phase, message: &str, fraction: f32) {
        self.emit(WorkflowEvent::Progress {
            phase,
            message: message.to_string(),
            fraction,
        });
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::ProcessError;
    use crate::image_client::tests::ScriptedBackend;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::atomic::Ordering as AtomicOrdering;
    use tempfile::{tempdir, TempDir};

    /// Writes its arguments one per line into `<folder>/args.txt`.
    const RECORDING_SCRIPT: &str = "mkdir -p \"$3\"\nprintf '%s\\n' \"$1\" \"$2\" \"$3\" > \"$3/args.txt\"\n";

    struct Fixture {
        temp: TempDir,
        controller: WorkflowController<ScriptedBackend>,
        events: flume::Receiver<WorkflowEvent>,
    }

    impl Fixture {
        fn models(&self) -> PathBuf {
            self.temp.path().join("Models")
        }

        fn recorded_args(&self) -> Option<Vec<String>> {
            fs::read_to_string(self.models().join("args.txt"))
                .ok()
                .map(|raw| raw.lines().map(str::to_string).collect())
        }

        fn drain(&self) -> Vec<WorkflowEvent> {
            self.events.try_iter().collect()
        }
    }

    fn fixture(backend: ScriptedBackend, script_body: &str) -> Fixture {
        let temp = tempdir().expect("tempdir");
        let script = temp.path().join("mesh.sh");
        fs::write(&script, script_body).expect("script");

        let (tx, rx) = flume::unbounded();
        let controller = WorkflowController::from_parts(
            ImageGenerator::new(backend),
            AssetCache::new(temp.path().join("Temp")),
            MeshInvoker::new("sh", script),
            WorkflowOptions {
                image_count: 2,
                image_size: "256x256".into(),
                output_name: "chair".into(),
                models_folder: temp.path().join("Models"),
            },
        )
        .with_events(tx);

        Fixture {
            temp,
            controller,
            events: rx,
        }
    }

    #[tokio::test]
    async fn red_chair_scenario_runs_mesh_on_selected_image() {
        let fx = fixture(ScriptedBackend::always(1), RECORDING_SCRIPT);
        let mut workflow = Workflow::new();

        let stored = fx
            .controller
            .generate_images_from_prompt(&mut workflow, "a red chair")
            .await
            .expect("images");
        assert_eq!(stored, 2);
        assert_eq!(workflow.state(), WorkflowState::ImagesReady);

        let temp_dir = fx.temp.path().join("Temp");
        let paths: Vec<PathBuf> = workflow.records().iter().map(|r| r.path.clone()).collect();
        assert_eq!(
            paths,
            vec![temp_dir.join("generated_0.png"), temp_dir.join("generated_1.png")]
        );

        workflow.select(1).expect("select");
        let outcome = fx
            .controller
            .generate_mesh_from_selection(&mut workflow)
            .await
            .expect("mesh");
        assert_eq!(workflow.state(), WorkflowState::MeshRequested);
        assert!(outcome.command_line.contains("generated_1.png"));

        let args = fx.recorded_args().expect("script ran");
        assert_eq!(
            args,
            vec![
                temp_dir.join("generated_1.png").display().to_string(),
                "chair".to_string(),
                fx.models().display().to_string(),
            ]
        );

        let events = fx.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkflowEvent::ImagesStored(paths) if paths.len() == 2)));
        assert!(events.iter().any(|e| matches!(e, WorkflowEvent::MeshFinished(_))));
    }

    #[tokio::test]
    async fn out_of_range_selection_never_reaches_subprocess() {
        let fx = fixture(ScriptedBackend::always(1), RECORDING_SCRIPT);
        let mut workflow = Workflow::new();
        fx.controller
            .generate_images(&mut workflow, "a lamp", 2)
            .await
            .expect("images");

        assert!(matches!(
            workflow.select(2),
            Err(Error::InvalidSelection { index: 2, len: 2 })
        ));
        assert_eq!(workflow.selection(), None);

        let err = fx
            .controller
            .generate_mesh_from_selection(&mut workflow)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSelection));
        assert!(fx.recorded_args().is_none());
    }

    #[tokio::test]
    async fn new_generation_resets_selection_and_records() {
        let backend = ScriptedBackend {
            fail_on_call: Some(2),
            ..ScriptedBackend::always(1)
        };
        let fx = fixture(backend, RECORDING_SCRIPT);
        let mut workflow = Workflow::new();
        fx.controller
            .generate_images(&mut workflow, "a lamp", 2)
            .await
            .expect("first batch");
        workflow.select(1).expect("select");

        let err = fx
            .controller
            .generate_images(&mut workflow, "a lamp", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteService(_)));
        assert_eq!(workflow.selection(), None);
        assert!(workflow.records().is_empty());
        assert_eq!(workflow.state(), WorkflowState::Idle);
        assert!(fx
            .drain()
            .iter()
            .any(|e| matches!(e, WorkflowEvent::Error(msg) if msg.contains("Failed to generate images"))));
    }

    #[tokio::test]
    async fn one_shot_with_empty_result_fails_cleanly() {
        let fx = fixture(ScriptedBackend::always(0), RECORDING_SCRIPT);
        let mut workflow = Workflow::new();
        let err = fx
            .controller
            .generate_model_from_prompt(&mut workflow, "a red chair")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyResult));
        assert!(workflow.records().is_empty());
        assert_eq!(workflow.selection(), None);
        assert!(fx.recorded_args().is_none());
        assert!(!fx.controller.is_busy());
    }

    #[tokio::test]
    async fn one_shot_uses_first_image() {
        let fx = fixture(ScriptedBackend::always(1), RECORDING_SCRIPT);
        let mut workflow = Workflow::new();
        fx.controller
            .generate_model_named(&mut workflow, "a red chair", "red chair")
            .await
            .expect("model");
        assert_eq!(workflow.selection(), Some(0));
        assert_eq!(workflow.records().len(), 1);
        assert_eq!(fx.controller.generator.backend().calls.load(AtomicOrdering::SeqCst), 1);

        let args = fx.recorded_args().expect("script ran");
        assert!(args[0].ends_with("generated_0.png"));
        assert_eq!(args[1], "red chair");
    }

    #[tokio::test]
    async fn failing_script_returns_to_images_ready() {
        let fx = fixture(ScriptedBackend::always(1), "echo boom >&2\nexit 1\n");
        let mut workflow = Workflow::new();
        fx.controller
            .generate_images(&mut workflow, "a lamp", 1)
            .await
            .expect("images");
        workflow.select(0).expect("select");

        let err = fx
            .controller
            .generate_mesh_from_selection(&mut workflow)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ExternalProcess(ProcessError::Failed { code: Some(1), .. })
        ));
        assert_eq!(workflow.state(), WorkflowState::ImagesReady);
        assert_eq!(workflow.selection(), Some(0));
    }

    #[tokio::test]
    async fn second_operation_is_rejected_while_busy() {
        let fx = fixture(ScriptedBackend::always(1), RECORDING_SCRIPT);
        let mut workflow = Workflow::new();

        let guard = fx.controller.begin().expect("first");
        let err = fx
            .controller
            .generate_images(&mut workflow, "a lamp", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Busy));
        drop(guard);

        fx.controller
            .generate_images(&mut workflow, "a lamp", 1)
            .await
            .expect("after release");
    }
}
