//! Common utilities for sample-dl integration tests

use sample_dl::{Config, Event, FsStorage, HttpsSource, Pipeline, ProgressSink};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// Progress reports as `(file_number, percent)`
#[derive(Clone, Default)]
pub struct Progress(Arc<Mutex<Vec<(u32, u8)>>>);

impl Progress {
    pub fn percents_for(&self, file_number: u32) -> Vec<u8> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| *n == file_number)
            .map(|(_, p)| *p)
            .collect()
    }
}

impl ProgressSink for Progress {
    fn report_progress(&self, file_number: u32, percent: u8) {
        self.0.lock().unwrap().push((file_number, percent));
    }
}

/// A running pipeline writing into a temporary medium
pub struct TestPipeline {
    pub pipeline: Pipeline,
    pub progress: Progress,
    pub events: broadcast::Receiver<Event>,
    pub medium: TempDir,
    pub config: Config,
}

impl TestPipeline {
    /// Path a file named `name` ends up at
    pub fn sample_path(&self, name: &str) -> std::path::PathBuf {
        self.medium.path().join(&self.config.storage.base_dir).join(name)
    }
}

/// Config pointing at a fresh temporary medium, plain HTTP allowed for the mock server
pub fn test_config(medium: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.mount_point = medium.path().to_path_buf();
    config.storage.reinit_settle_delay = Duration::from_millis(5);
    config.network.https_only = false;
    config.network.connect_timeout = Duration::from_secs(2);
    config.pipeline.shutdown_timeout = Duration::from_secs(10);
    config
}

/// Start a pipeline with the real HTTP client and filesystem storage
pub async fn start(config: Config, medium: TempDir) -> TestPipeline {
    let progress = Progress::default();
    let pipeline = Pipeline::new(
        config.clone(),
        Arc::new(HttpsSource::new(&config.network).unwrap()),
        Box::new(FsStorage::new(config.storage.mount_point.clone())),
        Arc::new(progress.clone()),
    )
    .unwrap();
    let events = pipeline.subscribe();
    pipeline.init(64 * 1024).await.unwrap();

    TestPipeline {
        pipeline,
        progress,
        events,
        medium,
        config,
    }
}

/// Every event received so far
pub fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

/// `len` bytes of a repeating pattern
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
