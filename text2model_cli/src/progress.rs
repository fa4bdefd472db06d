use flume::Receiver;
use text2model_core::{MeshOutcome, Phase, WorkflowEvent};
use tokio::task::JoinHandle;

/// Prints progress events to stderr until every sender is dropped.
pub fn spawn_printer(events: Receiver<WorkflowEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Ok(event) = events.recv_async().await {
            if let Some(line) = describe(&event) {
                eprintln!("{line}");
            }
        }
    })
}

/// One-line rendering of an event, `None` for events not worth printing.
pub fn describe(event: &WorkflowEvent) -> Option<String> {
    match event {
        WorkflowEvent::Progress {
            phase,
            message,
            fraction,
        } => {
            let title = match phase {
                Phase::GeneratingImages => "Generating Images",
                Phase::GeneratingModel => "Generating 3D Model",
            };
            Some(format!("[{:>3.0}%] {title}: {message}", fraction * 100.0))
        }
        WorkflowEvent::ImagesStored(paths) => Some(format!("Stored {} image(s)", paths.len())),
        WorkflowEvent::MeshFinished(outcome) if !outcome.artifact_present => Some(format!(
            "warning: {} was not produced",
            outcome.expected_artifact.display()
        )),
        _ => None,
    }
}

pub fn print_outcome(outcome: &MeshOutcome) {
    println!(
        "Mesh generation finished in {:.1}s",
        outcome.elapsed.as_secs_f64()
    );
    println!("  command: {}", outcome.command_line);
    println!("  output:  {}", outcome.expected_artifact.display());
    let stdout = outcome.stdout.trim();
    if !stdout.is_empty() {
        println!("{stdout}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    #[test]
    fn progress_lines_show_percentage_and_phase() {
        let event = WorkflowEvent::Progress {
            phase: Phase::GeneratingModel,
            message: "Running mesh script...".into(),
            fraction: 0.4,
        };
        assert_eq!(
            describe(&event).as_deref(),
            Some("[ 40%] Generating 3D Model: Running mesh script...")
        );
    }

    #[test]
    fn quiet_events_are_skipped() {
        assert_eq!(describe(&WorkflowEvent::AssetsRefreshed), None);
        assert_eq!(describe(&WorkflowEvent::Finished), None);
        assert_eq!(
            describe(&WorkflowEvent::ImagesStored(vec![PathBuf::from("a.png")])).as_deref(),
            Some("Stored 1 image(s)")
        );
    }
}
