//! Persistence of scan output: stats checkpoints plus append-only streams
//! of matches, errors, task summaries and scanned templates

use super::stats::Stats;
use crate::error::{GauntletError, Result};
use crate::models::{ErrorRecord, Match, TaskSummary, Template};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

const STREAM_BUFFER: usize = 64;

/// Lazily produced records read back from storage. Call [`close`] when not
/// draining it to stop the producer early.
///
/// [`close`]: RecordStream::close
pub struct RecordStream<T> {
    rx: mpsc::Receiver<Result<T>>,
    producer: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> RecordStream<T> {
    fn from_vec(items: Vec<T>) -> Self {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            // Capacity covers every item
            let _ = tx.try_send(Ok(item));
        }
        Self { rx, producer: None }
    }

    pub async fn next(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self.rx.close();
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }

    /// Drains the stream, failing on the first broken record
    pub async fn collect(mut self) -> Result<Vec<T>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item?);
        }
        Ok(items)
    }
}

impl<T> Drop for RecordStream<T> {
    fn drop(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
    }
}

/// Storage backend used by the runner
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn store_stats(&self, stats: &Stats) -> Result<()>;
    /// Last stored stats, `None` on a fresh output location
    async fn load_stats(&self) -> Result<Option<Stats>>;

    async fn store_match(&self, record: &Match) -> Result<()>;
    async fn store_error(&self, record: &ErrorRecord) -> Result<()>;
    async fn store_summary(&self, record: &TaskSummary) -> Result<()>;
    async fn store_template(&self, record: &Template) -> Result<()>;

    async fn matches(&self) -> Result<RecordStream<Match>>;
    async fn errors(&self) -> Result<RecordStream<ErrorRecord>>;
    async fn summaries(&self) -> Result<RecordStream<TaskSummary>>;
    async fn templates(&self) -> Result<RecordStream<Template>>;
}

/// One JSON document per line per record kind, under a single directory
pub struct JsonlFileSystem {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlFileSystem {
    const STATS: &'static str = "stats.json";
    const MATCHES: &'static str = "matches.jsonl";
    const ERRORS: &'static str = "errors.jsonl";
    const SUMMARIES: &'static str = "summaries.jsonl";
    const TEMPLATES: &'static str = "templates.jsonl";

    /// Opens (creating if needed) an output directory
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Scan output directory: {}", dir.display());
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn append<T: Serialize + Sync>(&self, file: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        handle.write_all(&line).await?;
        handle.flush().await?;
        Ok(())
    }

    async fn stream<T>(&self, file: &str) -> Result<RecordStream<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let path = self.dir.join(file);
        let handle = match tokio::fs::File::open(&path).await {
            Ok(h) => h,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RecordStream::from_vec(Vec::new()))
            }
            Err(e) => return Err(e.into()),
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let producer = tokio::spawn(async move {
            let mut lines = BufReader::new(handle).lines();
            loop {
                let item = match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => serde_json::from_str::<T>(&line).map_err(GauntletError::from),
                    Ok(None) => break,
                    Err(e) => Err(GauntletError::from(e)),
                };
                if tx.send(item).await.is_err() {
                    debug!("Record stream closed by reader: {}", path.display());
                    break;
                }
            }
        });

        Ok(RecordStream {
            rx,
            producer: Some(producer),
        })
    }
}

#[async_trait]
impl FileSystem for JsonlFileSystem {
    async fn store_stats(&self, stats: &Stats) -> Result<()> {
        let data = serde_json::to_vec_pretty(stats)?;
        let tmp = self.dir.join(format!("{}.tmp", Self::STATS));

        let _guard = self.write_lock.lock().await;
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, self.dir.join(Self::STATS)).await?;
        Ok(())
    }

    async fn load_stats(&self) -> Result<Option<Stats>> {
        match tokio::fs::read(self.dir.join(Self::STATS)).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn store_match(&self, record: &Match) -> Result<()> {
        self.append(Self::MATCHES, record).await
    }

    async fn store_error(&self, record: &ErrorRecord) -> Result<()> {
        self.append(Self::ERRORS, record).await
    }

    async fn store_summary(&self, record: &TaskSummary) -> Result<()> {
        self.append(Self::SUMMARIES, record).await
    }

    async fn store_template(&self, record: &Template) -> Result<()> {
        self.append(Self::TEMPLATES, record).await
    }

    async fn matches(&self) -> Result<RecordStream<Match>> {
        self.stream(Self::MATCHES).await
    }

    async fn errors(&self) -> Result<RecordStream<ErrorRecord>> {
        self.stream(Self::ERRORS).await
    }

    async fn summaries(&self) -> Result<RecordStream<TaskSummary>> {
        self.stream(Self::SUMMARIES).await
    }

    async fn templates(&self) -> Result<RecordStream<Template>> {
        self.stream(Self::TEMPLATES).await
    }
}

/// In-memory storage, for tests and dry runs
#[derive(Default)]
pub struct MemoryFileSystem {
    stats: StdMutex<Option<Stats>>,
    matches: StdMutex<Vec<Match>>,
    errors: StdMutex<Vec<ErrorRecord>>,
    summaries: StdMutex<Vec<TaskSummary>>,
    templates: StdMutex<Vec<Template>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously stored stats, as when resuming
    pub fn with_stats(stats: Stats) -> Self {
        Self {
            stats: StdMutex::new(Some(stats)),
            ..Self::default()
        }
    }

    pub fn stored_stats(&self) -> Option<Stats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stored_matches(&self) -> Vec<Match> {
        self.matches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stored_errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stored_summaries(&self) -> Vec<TaskSummary> {
        self.summaries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn stored_templates(&self) -> Vec<Template> {
        self.templates.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

fn push<T: Clone>(slot: &StdMutex<Vec<T>>, record: &T) {
    slot.lock()
        .unwrap_or_else(|e| e.into_inner())
        .push(record.clone());
}

#[async_trait]
impl FileSystem for MemoryFileSystem {
    async fn store_stats(&self, stats: &Stats) -> Result<()> {
        *self.stats.lock().unwrap_or_else(|e| e.into_inner()) = Some(stats.clone());
        Ok(())
    }

    async fn load_stats(&self) -> Result<Option<Stats>> {
        Ok(self.stored_stats())
    }

    async fn store_match(&self, record: &Match) -> Result<()> {
        push(&self.matches, record);
        Ok(())
    }

    async fn store_error(&self, record: &ErrorRecord) -> Result<()> {
        push(&self.errors, record);
        Ok(())
    }

    async fn store_summary(&self, record: &TaskSummary) -> Result<()> {
        push(&self.summaries, record);
        Ok(())
    }

    async fn store_template(&self, record: &Template) -> Result<()> {
        push(&self.templates, record);
        Ok(())
    }

    async fn matches(&self) -> Result<RecordStream<Match>> {
        Ok(RecordStream::from_vec(self.stored_matches()))
    }

    async fn errors(&self) -> Result<RecordStream<ErrorRecord>> {
        Ok(RecordStream::from_vec(self.stored_errors()))
    }

    async fn summaries(&self) -> Result<RecordStream<TaskSummary>> {
        Ok(RecordStream::from_vec(self.stored_summaries()))
    }

    async fn templates(&self) -> Result<RecordStream<Template>> {
        Ok(RecordStream::from_vec(self.stored_templates()))
    }
}
