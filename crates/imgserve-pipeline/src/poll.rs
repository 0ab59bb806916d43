//! Poll mode: classify image files dropped into a directory
//!
//! Each cycle lists the input directory, skips files that are still being
//! written, and classifies the rest one at a time. Every result lands in
//! the output directory as `<stem>.json`. A processed input is then
//! deleted or moved next to its result, whether or not it classified.

use crate::completeness::{CompletenessCheck, TrailerCheck};
use crate::runner::{RunMode, Runner, Trigger};
use crate::source::{InputSource, ResultSink};
use crate::watch::Notifications;
use async_trait::async_trait;
use imgserve_core::{Error, InferenceItem, ItemOutcome, ItemSource, Result};
use imgserve_inference::BatchingEngine;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info};

/// File extensions picked up by discovery (case-insensitive)
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Poll-mode settings
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Directory to read images from
    pub input_dir: PathBuf,

    /// Directory for results and relocated inputs
    pub output_dir: PathBuf,

    /// Staging directory for result files
    pub tmp_dir: Option<PathBuf>,

    /// Delete inputs after processing instead of moving them
    pub delete_input: bool,

    /// Wait between sweeps
    pub poll_wait: Duration,

    /// Keep polling instead of a single sweep
    pub continuous: bool,

    /// React to filesystem notifications
    pub use_watchdog: bool,

    /// Sweep interval alongside notifications
    pub watchdog_check_interval: Duration,
}

impl PollConfig {
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            tmp_dir: None,
            delete_input: false,
            poll_wait: Duration::from_secs(1),
            continuous: false,
            use_watchdog: false,
            watchdog_check_interval: Duration::from_secs(10),
        }
    }

    pub fn with_tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(tmp_dir.into());
        self
    }

    pub fn with_delete_input(mut self, delete_input: bool) -> Self {
        self.delete_input = delete_input;
        self
    }

    pub fn with_poll_wait(mut self, poll_wait: Duration) -> Self {
        self.poll_wait = poll_wait;
        self
    }

    pub fn with_continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }

    pub fn with_watchdog(mut self, check_interval: Duration) -> Self {
        self.use_watchdog = true;
        self.watchdog_check_interval = check_interval;
        self
    }

    /// All configured directories must already exist
    pub fn validate(&self) -> Result<()> {
        let dirs = [
            ("input", Some(&self.input_dir)),
            ("output", Some(&self.output_dir)),
            ("temporary", self.tmp_dir.as_ref()),
        ];
        for (role, dir) in dirs {
            if let Some(dir) = dir {
                if !dir.is_dir() {
                    return Err(Error::config(format!(
                        "{} directory does not exist: {}",
                        role,
                        dir.display()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn run_mode(&self) -> RunMode {
        if self.continuous {
            RunMode::Continuous
        } else {
            RunMode::SinglePass
        }
    }

    /// Interval sweeps, or notifications on the input directory
    pub fn trigger(&self) -> Result<Trigger> {
        if self.use_watchdog {
            Ok(Trigger::Watch {
                notifications: Notifications::watch(&self.input_dir)?,
                fallback: self.watchdog_check_interval,
            })
        } else {
            Ok(Trigger::Interval(self.poll_wait))
        }
    }
}

/// Validate the directories and assemble a poll-mode runner
pub fn build_runner(
    config: &PollConfig,
    engine: BatchingEngine,
) -> Result<Runner<DirectorySource, FileSink>> {
    config.validate()?;

    let trigger = if config.continuous {
        config.trigger()?
    } else {
        Trigger::Immediate
    };

    Ok(Runner::new(
        DirectorySource::new(&config.input_dir),
        FileSink::new(config),
        engine,
        config.run_mode(),
        trigger,
    ))
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_EXTENSIONS
                .iter()
                .any(|supported| ext.eq_ignore_ascii_case(supported))
        })
}

/// Regular files in `dir` with a supported extension, sorted by file name
pub async fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut found = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if entry.file_type().await?.is_file() && has_supported_extension(&path) {
            found.push(path);
        }
    }

    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(found)
}

/// Reads complete image files from the input directory
pub struct DirectorySource {
    dir: PathBuf,
    check: Box<dyn CompletenessCheck>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_check(dir, Box::new(TrailerCheck))
    }

    pub fn with_check(dir: impl Into<PathBuf>, check: Box<dyn CompletenessCheck>) -> Self {
        Self {
            dir: dir.into(),
            check,
        }
    }
}

// Only paths are held per cycle; a file's bytes are read when the runner
// reaches it and dropped once it has been processed.
#[async_trait]
impl InputSource for DirectorySource {
    type Pending = PathBuf;

    async fn poll_once(&mut self) -> Result<Vec<PathBuf>> {
        discover(&self.dir).await
    }

    async fn load(&mut self, path: PathBuf) -> Result<Option<InferenceItem>> {
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} disappeared before processing", path.display());
                return Ok(None);
            }
            Err(e) => {
                error!("Failed to read {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        if !self.check.is_complete(&bytes) {
            debug!("Skipping incomplete file {}", path.display());
            return Ok(None);
        }

        Ok(Some(InferenceItem::new(bytes, ItemSource::File(path))))
    }

    fn describe(&self) -> String {
        format!("poll mode on {}", self.dir.display())
    }
}

/// Writes `<stem>.json` results and relocates processed inputs
pub struct FileSink {
    output_dir: PathBuf,
    tmp_dir: Option<PathBuf>,
    delete_input: bool,
}

impl FileSink {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            output_dir: config.output_dir.clone(),
            tmp_dir: config.tmp_dir.clone(),
            delete_input: config.delete_input,
        }
    }

    /// Where the result for `input` ends up
    pub fn result_path(&self, input: &Path) -> Result<PathBuf> {
        let stem = input
            .file_stem()
            .ok_or_else(|| Error::internal(format!("no file stem: {}", input.display())))?;
        let mut name = stem.to_os_string();
        name.push(".json");
        Ok(self.output_dir.join(name))
    }

    // Observers of the output directory only ever see complete files
    async fn write_result(&self, target: &Path, content: String) -> Result<()> {
        let file_name = target
            .file_name()
            .ok_or_else(|| Error::internal(format!("no file name: {}", target.display())))?;

        let staged = match &self.tmp_dir {
            Some(tmp) => tmp.join(file_name),
            None => {
                let mut hidden = std::ffi::OsString::from(".");
                hidden.push(file_name);
                hidden.push(".part");
                self.output_dir.join(hidden)
            }
        };

        tokio::fs::write(&staged, content).await?;
        move_file(&staged, target).await
    }

    async fn relocate_input(&self, input: &Path) -> Result<()> {
        if self.delete_input {
            debug!("Deleting {}", input.display());
            tokio::fs::remove_file(input).await?;
            return Ok(());
        }

        let file_name = input
            .file_name()
            .ok_or_else(|| Error::internal(format!("no file name: {}", input.display())))?;
        let target = self.output_dir.join(file_name);
        debug!("Moving {} to {}", input.display(), target.display());
        move_file(input, &target).await
    }
}

fn input_path(outcome: &ItemOutcome) -> Result<&Path> {
    match &outcome.source {
        ItemSource::File(path) => Ok(path),
        other => Err(Error::internal(format!("not a file item: {}", other))),
    }
}

#[async_trait]
impl ResultSink for FileSink {
    async fn emit(&mut self, outcome: &ItemOutcome) -> Result<()> {
        let input = input_path(outcome)?;

        if let Ok(result) = &outcome.result {
            let target = self.result_path(input)?;
            let mut content = result.to_json()?;
            content.push('\n');
            self.write_result(&target, content).await?;
            info!("{} -> {}", input.display(), target.display());
        }

        self.relocate_input(input).await
    }

    async fn on_failure(&mut self, outcome: &ItemOutcome) -> Result<()> {
        self.relocate_input(input_path(outcome)?).await
    }
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}
