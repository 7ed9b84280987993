use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tidyup_core::events::{Phase, ProgressEvent};
use tidyup_core::{CleaningEngine, EngineEvent, EventKind, Subscription};

/// Progress bar driven by the engine's `progress` and `done` events.
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    /// Subscribes to `engine`. Keep the returned subscriptions until the run ends.
    pub fn attach(reporter: &Arc<Self>, engine: &CleaningEngine) -> Vec<Subscription> {
        let on_progress = Arc::clone(reporter);
        let on_done = Arc::clone(reporter);
        vec![
            engine.on(EventKind::Progress, move |event| {
                if let EngineEvent::Progress(update) = event {
                    on_progress.update(update);
                }
            }),
            engine.on(EventKind::Done, move |_| on_done.finish_bar()),
        ]
    }

    fn start_bar(&self) -> ProgressBar {
        let pb = ProgressBar::new(100);
        let style = ProgressStyle::with_template(
            "  {spinner:.cyan} [{bar:30.cyan/dim}] {pos:>3}% {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }

    fn update(&self, update: &ProgressEvent) {
        let mut guard = self.bar.lock().unwrap_or_else(|err| err.into_inner());
        let pb = guard.get_or_insert_with(|| self.start_bar());
        pb.set_position(u64::from(update.progress));
        match (&update.category, update.processed) {
            (Some(category), _) => pb.set_message(format!("{} {}", phase_label(update.phase), category)),
            (None, Some(processed)) => {
                pb.set_message(format!("{} ({} files)", phase_label(update.phase), processed))
            }
            (None, None) => pb.set_message(phase_label(update.phase)),
        }
    }

    fn finish_bar(&self) {
        let mut guard = self.bar.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(pb) = guard.take() {
            pb.finish_and_clear();
        }
    }
}

fn phase_label(phase: Phase) -> &'static str {
    match phase {
        Phase::Junk => "Scanning junk",
        Phase::DuplicateIndex => "Indexing files",
        Phase::DuplicateHash => "Hashing",
        Phase::Duplicate => "Grouping duplicates",
        Phase::RegistryQuery => "Reading",
        Phase::Registry => "Checking registry",
        Phase::Privacy => "Clearing traces",
        Phase::Complete => "Done",
    }
}
