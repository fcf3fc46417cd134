//! Concurrent, resumable batch processing.
//!
//! A producer fingerprints the input paths and feeds a bounded queue; a fixed
//! pool of workers pulls tasks, runs the extraction strategy with retries,
//! checkpoints the terminal state, files the source document and hands the
//! outcome to the aggregator.

mod progress;
mod report;
mod retry;

pub use progress::{BatchProgress, NoProgress};
pub use report::{BatchReport, BatchStats, TaskOutcome};
pub use retry::RetryPolicy;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::aggregate::ResultAggregator;
use crate::classify::{Classifier, Placement};
use crate::documents::{Document, DocumentLoader, FsDocumentLoader, fingerprint_bytes, fingerprint_or_composite};
use crate::error::{DocumentError, ExtractError, ProviderError, Result};
use crate::extract::{ExtractionContext, Extractor, select_strategy};
use crate::models::config::{BatchConfig, ClassifyMode, InvexConfig, OutputConfig};
use crate::models::invoice::InvoiceRecord;
use crate::models::task::{Fingerprint, ProcessingTask, TaskStatus};
use crate::provider::create_provider;
use crate::resume::{ResumeEntry, ResumeStore};

/// Drives an extraction strategy over a set of documents.
pub struct BatchOrchestrator {
    extractor: Arc<dyn Extractor>,
    loader: Arc<dyn DocumentLoader>,
    store: Option<Arc<ResumeStore>>,
    progress: Arc<dyn BatchProgress>,
    retry: RetryPolicy,
    batch: BatchConfig,
    output: OutputConfig,
}

impl BatchOrchestrator {
    pub fn new(extractor: Arc<dyn Extractor>, loader: Arc<dyn DocumentLoader>, config: &InvexConfig) -> Self {
        Self {
            extractor,
            loader,
            store: None,
            progress: Arc::new(NoProgress),
            retry: RetryPolicy::from_config(&config.batch),
            batch: config.batch.clone(),
            output: config.output.clone(),
        }
    }

    /// Build the provider, strategy, loader and resume store described by `config`.
    pub async fn from_config(config: &InvexConfig) -> Result<Self> {
        let provider = match &config.provider {
            Some(provider) => Some(create_provider(provider)?),
            None => None,
        };
        let strategy = select_strategy(config, provider).await?;
        let loader = Arc::new(FsDocumentLoader::new(config.documents.clone()));

        let mut orchestrator = Self::new(Arc::new(strategy), loader, config);
        if config.batch.resume {
            let store = ResumeStore::open(config.resume_path()).await?;
            orchestrator = orchestrator.with_resume_store(Arc::new(store));
        }
        Ok(orchestrator)
    }

    pub fn with_resume_store(mut self, store: Arc<ResumeStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn BatchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn resume_store(&self) -> Option<&Arc<ResumeStore>> {
        self.store.as_ref()
    }

    pub fn strategy_name(&self) -> &'static str {
        self.extractor.name()
    }

    /// Process `paths` and report every task's terminal state.
    ///
    /// Cancelling `cancel` stops dequeuing; queued tasks are reported as
    /// pending. A provider authentication error cancels the batch and is
    /// returned once the workers have drained.
    pub async fn run(&self, paths: Vec<PathBuf>, cancel: CancellationToken) -> Result<BatchReport> {
        let workers = self.batch.workers.max(1);
        info!(
            "Starting batch of {} documents with {} workers ({} strategy)",
            paths.len(),
            workers,
            self.extractor.name()
        );
        self.progress.batch_started(paths.len());

        let aggregator = Arc::new(ResultAggregator::new());
        let classifier = self.classifier();
        let worker = Arc::new(Worker {
            extractor: self.extractor.clone(),
            loader: self.loader.clone(),
            store: self.store.clone(),
            aggregator: aggregator.clone(),
            progress: self.progress.clone(),
            retry: self.retry,
            attempt_timeout: self.batch.attempt_timeout(),
            classifier,
            stop: cancel.child_token(),
            fatal: Mutex::new(None),
        });

        let (tx, rx) = async_channel::bounded(self.batch.queue_capacity.max(1));
        let mut join_set = JoinSet::new();
        for id in 0..workers {
            let worker = worker.clone();
            let rx = rx.clone();
            join_set.spawn(async move { worker.run(id, rx).await });
        }

        self.produce(paths, &tx, &worker).await;
        drop(tx);

        while let Some(joined) = join_set.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }

        // Still queued: never dequeued.
        while let Ok(task) = rx.try_recv() {
            aggregator.record(TaskOutcome::from_task(&task, None, Placement::NotClassified));
        }

        let cancelled = worker.stop.is_cancelled();
        let fatal = worker.take_fatal();
        drop(worker);

        if let Some(error) = fatal {
            error!("Batch aborted: {}", error);
            return Err(error.into());
        }

        let strategy = self.extractor.name();
        let report = match Arc::try_unwrap(aggregator) {
            Ok(aggregator) => aggregator.into_report(strategy, cancelled),
            Err(aggregator) => aggregator.report(strategy, cancelled),
        };

        info!(
            "Batch finished: {} done, {} failed, {} skipped, {} pending ({} resumed)",
            report.stats.done,
            report.stats.failed,
            report.stats.skipped,
            report.stats.pending,
            report.stats.resumed
        );
        self.progress.batch_completed(&report.stats);
        Ok(report)
    }

    /// Classifier for this run, aware of invoices filed by earlier runs.
    fn classifier(&self) -> Option<Classifier> {
        if !self.output.classify {
            return None;
        }
        let classifier = Classifier::new(&self.output.output_dir, self.output.classify_mode);
        if let (Some(store), false) = (&self.store, self.batch.force) {
            for entry in store.completed() {
                if let Some(record) = &entry.record {
                    classifier.mark_filed(record);
                }
            }
        }
        Some(classifier)
    }

    async fn produce(&self, paths: Vec<PathBuf>, tx: &Sender<ProcessingTask>, worker: &Worker) {
        let mut seen: HashMap<Fingerprint, PathBuf> = HashMap::new();

        for path in paths {
            let fingerprint = fingerprint_path(path.clone()).await;
            let mut task = ProcessingTask::new(&path, fingerprint);

            if worker.stop.is_cancelled() {
                worker.record_pending(&task);
                continue;
            }

            if let Some(first) = seen.get(&task.fingerprint) {
                info!(
                    "Skipping {}: same content as {}",
                    path.display(),
                    first.display()
                );
                task.skip(format!("duplicate of {}", first.display()));
                // Not checkpointed: the entry for this fingerprint belongs to the first copy.
                worker.report(TaskOutcome::from_task(&task, None, Placement::NotClassified));
                continue;
            }
            seen.insert(task.fingerprint.clone(), path.clone());

            if let Some(entry) = self.completed_entry(&task.fingerprint) {
                debug!(
                    "Already done in an earlier run: {} ({})",
                    path.display(),
                    task.fingerprint.short()
                );
                worker.report(TaskOutcome::resumed_at(entry, path));
                continue;
            }

            let queued = task.clone();
            tokio::select! {
                biased;
                _ = worker.stop.cancelled() => worker.record_pending(&queued),
                sent = tx.send(task) => {
                    if let Err(e) = sent {
                        worker.record_pending(&e.into_inner());
                    }
                }
            }
        }
    }

    fn completed_entry(&self, fingerprint: &Fingerprint) -> Option<ResumeEntry> {
        if self.batch.force {
            return None;
        }
        self.store
            .as_ref()
            .and_then(|store| store.entry(fingerprint))
            .filter(|entry| entry.status == TaskStatus::Done)
    }
}

async fn fingerprint_path(path: PathBuf) -> Fingerprint {
    let fallback = fingerprint_bytes(path.to_string_lossy().as_bytes());
    tokio::task::spawn_blocking(move || fingerprint_or_composite(&path))
        .await
        .unwrap_or(fallback)
}

/// State shared by all workers of one run.
struct Worker {
    extractor: Arc<dyn Extractor>,
    loader: Arc<dyn DocumentLoader>,
    store: Option<Arc<ResumeStore>>,
    aggregator: Arc<ResultAggregator>,
    progress: Arc<dyn BatchProgress>,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    classifier: Option<Classifier>,
    stop: CancellationToken,
    fatal: Mutex<Option<ProviderError>>,
}

impl Worker {
    async fn run(&self, id: usize, rx: Receiver<ProcessingTask>) {
        loop {
            let task = tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                received = rx.recv() => match received {
                    Ok(task) => task,
                    Err(_) => break,
                },
            };
            debug!("Worker {} picked up {}", id, task.path.display());
            self.process(task).await;
        }
        debug!("Worker {} shutting down", id);
    }

    async fn process(&self, mut task: ProcessingTask) {
        self.progress.task_started(&task.path);
        task.begin_attempt();
        info!(
            "Processing {} ({})",
            task.path.display(),
            task.fingerprint.short()
        );

        let document = match self.load(&task).await {
            Ok(document) => document,
            Err(e) if e.is_skip() => {
                info!("Skipping {}: {}", task.path.display(), e);
                task.skip(e.to_string());
                return self.finish(task, None).await;
            }
            Err(e) => {
                error!("Failed to load {}: {}", task.path.display(), e);
                task.fail(e.to_string());
                return self.finish(task, None).await;
            }
        };

        let record = self.extract_with_retry(&mut task, &document).await;
        self.finish(task, record).await;
    }

    async fn load(&self, task: &ProcessingTask) -> std::result::Result<Document, DocumentError> {
        let loader = self.loader.clone();
        let path = task.path.clone();
        let fingerprint = task.fingerprint.clone();
        tokio::task::spawn_blocking(move || loader.load(&path, &fingerprint))
            .await
            .map_err(|e| DocumentError::Io(std::io::Error::other(e)))?
    }

    async fn extract_with_retry(&self, task: &mut ProcessingTask, document: &Document) -> Option<InvoiceRecord> {
        let mut previous_delay = Duration::ZERO;
        loop {
            let ctx = ExtractionContext {
                attempt: task.attempt_count,
                max_attempts: self.retry.max_attempts,
            };
            let error = match self.extract_once(document, &ctx).await {
                Ok(record) => {
                    info!(
                        "Extracted {} ({}, {})",
                        task.path.display(),
                        record.extraction_mode,
                        record.validation_status.as_str()
                    );
                    task.complete();
                    return Some(record);
                }
                Err(e) => e,
            };

            match &error {
                ExtractError::Provider(provider_error) if provider_error.is_auth() => {
                    error!("Provider rejected credentials: {}", provider_error);
                    self.abort(provider_error.clone());
                    task.fail(error.to_string());
                    return None;
                }
                ExtractError::Provider(ProviderError::Transient { retry_after_secs, .. }) => {
                    if self.stop.is_cancelled() {
                        task.fail(format!("cancelled: {}", error));
                        return None;
                    }
                    if !self.retry.should_retry(task.attempt_count) {
                        error!(
                            "Giving up on {} after {} attempts: {}",
                            task.path.display(),
                            task.attempt_count,
                            error
                        );
                        task.fail(error.to_string());
                        return None;
                    }

                    let retry_after = (*retry_after_secs).map(Duration::from_secs);
                    let delay = self.retry.delay(task.attempt_count, retry_after, previous_delay);
                    previous_delay = delay;
                    warn!(
                        "Attempt {}/{} for {} failed: {}; retrying in {:?}",
                        task.attempt_count,
                        self.retry.max_attempts,
                        task.path.display(),
                        error,
                        delay
                    );
                    task.requeue(error.to_string());

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.stop.cancelled() => {
                            task.fail(format!("cancelled during retry backoff: {}", error));
                            return None;
                        }
                    }
                    task.begin_attempt();
                }
                ExtractError::UnsupportedDocument { .. } => {
                    info!("Skipping {}: {}", task.path.display(), error);
                    task.skip(error.to_string());
                    return None;
                }
                _ => {
                    error!("Extraction failed for {}: {}", task.path.display(), error);
                    task.fail(error.to_string());
                    return None;
                }
            }
        }
    }

    async fn extract_once(
        &self,
        document: &Document,
        ctx: &ExtractionContext,
    ) -> std::result::Result<InvoiceRecord, ExtractError> {
        match tokio::time::timeout(self.attempt_timeout, self.extractor.extract(document, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::transient(
                self.extractor.name(),
                format!("extraction timed out after {}s", self.attempt_timeout.as_secs()),
            )
            .into()),
        }
    }

    /// Checkpoint, file and report a task that reached a terminal state.
    ///
    /// The checkpoint comes first: a moved source is no longer discovered, so
    /// it may only leave the input tree once its record is durable. When the
    /// checkpoint fails the source is copied instead of moved.
    async fn finish(&self, task: ProcessingTask, record: Option<InvoiceRecord>) {
        let checkpoint_error = self.checkpoint(&task, &record).await;

        let placement = match (&record, &self.classifier) {
            (Some(record), Some(classifier)) => {
                let mode = match classifier.mode() {
                    ClassifyMode::Move if checkpoint_error.is_some() => {
                        warn!(
                            "Copying {} instead of moving it: progress was not saved",
                            task.path.display()
                        );
                        ClassifyMode::Copy
                    }
                    mode => mode,
                };
                classifier.classify(record, mode).await
            }
            _ => Placement::NotClassified,
        };

        let mut outcome = TaskOutcome::from_task(&task, record, placement);
        outcome.checkpoint_error = checkpoint_error;
        self.report(outcome);
    }

    /// Append the terminal state to the resume store, returning the failure if any.
    async fn checkpoint(&self, task: &ProcessingTask, record: &Option<InvoiceRecord>) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.checkpoint(ResumeEntry::from_task(task, record.clone())).await {
            Ok(()) => None,
            Err(e) => {
                error!("Failed to checkpoint {}: {}", task.path.display(), e);
                Some(e.to_string())
            }
        }
    }

    fn report(&self, outcome: TaskOutcome) {
        self.progress.task_finished(&outcome);
        self.aggregator.record(outcome);
    }

    fn record_pending(&self, task: &ProcessingTask) {
        self.aggregator
            .record(TaskOutcome::from_task(task, None, Placement::NotClassified));
    }

    fn abort(&self, error: ProviderError) {
        self.fatal
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get_or_insert(error);
        self.stop.cancel();
    }

    fn take_fatal(&self) -> Option<ProviderError> {
        self.fatal.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{DeterministicExtractor, ModelExtractor, PromptSet, StrategyRouter};
    use crate::models::invoice::{ExtractionMode, ValidationStatus};
    use crate::testing::{ScriptedProvider, rate_limited};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ANSWER: &str = r#"{"invoice_number": "10000000", "total_amount": 100.00}"#;

    /// Deterministic extraction that counts its calls.
    struct Counting {
        inner: DeterministicExtractor,
        calls: AtomicUsize,
        cancel_on_call: Option<CancellationToken>,
    }

    impl Counting {
        fn new() -> Self {
            Self {
                inner: DeterministicExtractor::new(),
                calls: AtomicUsize::new(0),
                cancel_on_call: None,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Extractor for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn extract(
            &self,
            document: &Document,
            ctx: &ExtractionContext,
        ) -> std::result::Result<InvoiceRecord, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            self.inner.extract(document, ctx).await
        }
    }

    fn invoice_text(n: usize, seller: &str, buyer: &str) -> String {
        format!(
            "发票号码：{:08}\n销售方名称：{}\n购买方名称：{}\n价税合计：¥{}.00\n",
            10_000_000 + n,
            seller,
            buyer,
            100 + n
        )
    }

    fn write_invoices(dir: &Path, count: usize) -> Vec<PathBuf> {
        (0..count)
            .map(|n| {
                let path = dir.join(format!("inv-{}.txt", n));
                std::fs::write(&path, invoice_text(n, "Acme", "Globex")).unwrap();
                path
            })
            .collect()
    }

    fn config(dir: &TempDir) -> InvexConfig {
        let mut config = InvexConfig::default();
        config.output.output_dir = dir.path().join("out");
        config.output.classify = false;
        config.batch.workers = 2;
        config.batch.backoff_base_ms = 100;
        config
    }

    fn orchestrator(extractor: Arc<dyn Extractor>, config: &InvexConfig) -> BatchOrchestrator {
        let loader = Arc::new(FsDocumentLoader::new(config.documents.clone()));
        BatchOrchestrator::new(extractor, loader, config)
    }

    fn model_router(provider: Arc<ScriptedProvider>, mode: ExtractionMode) -> Arc<dyn Extractor> {
        let model = ModelExtractor::new(provider, PromptSet::default()).with_known_availability(true);
        Arc::new(StrategyRouter::with_model(
            mode,
            Arc::new(model),
            Default::default(),
        ))
    }

    #[tokio::test]
    async fn test_resumed_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = write_invoices(dir.path(), 5);

        let extractor = Arc::new(Counting::new());
        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());
        let first = orchestrator(extractor.clone(), &config)
            .with_resume_store(store)
            .run(paths.clone(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.stats.done, 5);
        assert_eq!(extractor.calls(), 5);

        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());
        let second = orchestrator(extractor.clone(), &config)
            .with_resume_store(store)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(extractor.calls(), 5);
        assert_eq!(second.stats.done, 5);
        assert_eq!(second.stats.resumed, 5);

        let numbers = |report: &BatchReport| {
            report
                .records()
                .map(|r| r.fields.invoice_number.clone())
                .collect::<Vec<_>>()
        };
        assert_eq!(numbers(&first), numbers(&second));
    }

    #[tokio::test]
    async fn test_interrupted_run_processes_only_remaining() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = write_invoices(dir.path(), 5);

        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());
        orchestrator(Arc::new(Counting::new()), &config)
            .with_resume_store(store.clone())
            .run(paths[..3].to_vec(), CancellationToken::new())
            .await
            .unwrap();

        let extractor = Arc::new(Counting::new());
        let report = orchestrator(extractor.clone(), &config)
            .with_resume_store(store)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(extractor.calls(), 2);
        assert_eq!(report.stats.done, 5);
        assert_eq!(report.records().count(), 5);
    }

    #[tokio::test]
    async fn test_force_reprocesses_done_documents() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        let paths = write_invoices(dir.path(), 2);
        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());

        orchestrator(Arc::new(Counting::new()), &config)
            .with_resume_store(store.clone())
            .run(paths.clone(), CancellationToken::new())
            .await
            .unwrap();

        config.batch.force = true;
        let extractor = Arc::new(Counting::new());
        let report = orchestrator(extractor.clone(), &config)
            .with_resume_store(store)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(extractor.calls(), 2);
        assert_eq!(report.stats.resumed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_backs_off() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = write_invoices(dir.path(), 1);

        let provider = Arc::new(ScriptedProvider::failing(rate_limited()));
        let report = orchestrator(model_router(provider.clone(), ExtractionMode::Llm), &config)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls(), 3);
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.last_error.as_deref().unwrap().contains("429"));

        let times = provider.call_times();
        let first = times[1] - times[0];
        let second = times[2] - times[1];
        assert!(first >= Duration::from_millis(100));
        assert!(second >= Duration::from_millis(200));
        assert!(second > first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_is_honoured() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = write_invoices(dir.path(), 1);

        let provider = Arc::new(ScriptedProvider::answering(ANSWER).then(Err(ProviderError::Transient {
            provider: "scripted".into(),
            detail: "HTTP 429".into(),
            retry_after_secs: Some(5),
        })));
        let report = orchestrator(model_router(provider.clone(), ExtractionMode::Llm), &config)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.done, 1);
        assert_eq!(report.outcomes[0].attempts, 2);
        let times = provider.call_times();
        assert!(times[1] - times[0] >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_auth_error_aborts_batch() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = write_invoices(dir.path(), 3);

        let provider = Arc::new(ScriptedProvider::failing(ProviderError::AuthConfig {
            provider: "scripted".into(),
            detail: "HTTP 401".into(),
        }));
        let err = orchestrator(model_router(provider, ExtractionMode::Llm), &config)
            .run(paths, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::InvexError::Provider(ProviderError::AuthConfig { .. })
        ));
    }

    #[tokio::test]
    async fn test_hybrid_degrades_when_provider_unavailable() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = write_invoices(dir.path(), 2);

        let provider = Arc::new(ScriptedProvider::answering(ANSWER).unavailable());
        let model = ModelExtractor::new(provider.clone(), PromptSet::default());
        let router = StrategyRouter::with_model(ExtractionMode::Hybrid, Arc::new(model), Default::default());

        let report = orchestrator(Arc::new(router), &config)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.done, 2);
        assert_eq!(report.stats.unvalidated, 2);
        assert!(report.records().all(|r| r.extraction_mode == ExtractionMode::Hybrid));
        assert_eq!(provider.probes(), 1);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_hybrid_cross_validation_in_batch() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let path = dir.path().join("inv.txt");
        std::fs::write(&path, invoice_text(0, "Acme", "Globex")).unwrap();

        let agreeing = Arc::new(ScriptedProvider::answering(ANSWER));
        let report = orchestrator(model_router(agreeing, ExtractionMode::Hybrid), &config)
            .run(vec![path.clone()], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.stats.validated, 1);

        let disagreeing = Arc::new(ScriptedProvider::answering(
            r#"{"invoice_number": "10000000", "total_amount": 120.00}"#,
        ));
        let report = orchestrator(model_router(disagreeing, ExtractionMode::Hybrid), &config)
            .run(vec![path], CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.stats.mismatched, 1);
        let record = report.records().next().unwrap();
        assert_eq!(record.validation_status, ValidationStatus::Mismatched);
        assert_eq!(record.mismatches.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicates_and_non_invoices_are_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());

        let original = dir.path().join("a.txt");
        let copy = dir.path().join("b.txt");
        let note = dir.path().join("c.txt");
        let doc = dir.path().join("d.docx");
        std::fs::write(&original, invoice_text(1, "Acme", "Globex")).unwrap();
        std::fs::write(&copy, invoice_text(1, "Acme", "Globex")).unwrap();
        std::fs::write(&note, "shopping list: milk, eggs").unwrap();
        std::fs::write(&doc, "binary").unwrap();

        let report = orchestrator(Arc::new(Counting::new()), &config)
            .with_resume_store(store.clone())
            .run(vec![original.clone(), copy, note, doc], CancellationToken::new())
            .await
            .unwrap();

        let statuses: Vec<_> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Done, TaskStatus::Skipped, TaskStatus::Skipped, TaskStatus::Skipped]
        );
        assert!(report.outcomes[1].last_error.as_deref().unwrap().starts_with("duplicate of"));

        // the duplicate never overwrites the first copy's checkpoint
        let fingerprint = &report.outcomes[0].fingerprint;
        assert!(store.is_done(fingerprint));
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_classification_numbers_collisions() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.output.classify = true;

        let mut paths = Vec::new();
        for (n, sub) in ["one", "two"].iter().enumerate() {
            let sub = dir.path().join(sub);
            std::fs::create_dir_all(&sub).unwrap();
            let path = sub.join("x.txt");
            std::fs::write(&path, invoice_text(n, "A", "B")).unwrap();
            paths.push(path);
        }

        let report = orchestrator(Arc::new(Counting::new()), &config)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.placed, 2);
        let target = config.output.output_dir.join("A").join("B");
        assert!(target.join("x.txt").exists());
        assert!(target.join("x_1.txt").exists());
    }

    #[tokio::test]
    async fn test_cancellation_leaves_queued_tasks_pending() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.batch.workers = 1;
        config.batch.queue_capacity = 1;
        let paths = write_invoices(dir.path(), 5);
        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());

        let cancel = CancellationToken::new();
        let mut extractor = Counting::new();
        extractor.cancel_on_call = Some(cancel.clone());

        let report = orchestrator(Arc::new(extractor), &config)
            .with_resume_store(store.clone())
            .run(paths, cancel)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.stats.done, 1);
        assert_eq!(report.stats.pending, 4);
        assert_eq!(report.outcomes.len(), 5);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hybrid_degrades_when_final_model_call_times_out() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.batch.call_timeout_secs = 1;
        config.batch.max_attempts = 2;
        let paths = write_invoices(dir.path(), 1);

        let provider = Arc::new(ScriptedProvider::answering(ANSWER).delayed(Duration::from_secs(3600)));
        let model = ModelExtractor::new(provider.clone(), PromptSet::default())
            .with_known_availability(true)
            .with_call_timeout(config.batch.call_timeout());
        let router = StrategyRouter::with_model(ExtractionMode::Hybrid, Arc::new(model), Default::default());

        let report = orchestrator(Arc::new(router), &config)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, TaskStatus::Done);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(report.stats.unvalidated, 1);
        let record = outcome.record.as_ref().unwrap();
        assert_eq!(record.extraction_mode, ExtractionMode::Hybrid);
        assert!(record.warnings[0].contains("timed out after 1s"));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_keeps_growing_after_retry_after() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.batch.max_attempts = 4;
        let paths = write_invoices(dir.path(), 1);

        let provider = Arc::new(
            ScriptedProvider::answering(ANSWER)
                .then(Err(ProviderError::Transient {
                    provider: "scripted".into(),
                    detail: "HTTP 429".into(),
                    retry_after_secs: Some(5),
                }))
                .then(Err(rate_limited()))
                .then(Err(rate_limited())),
        );
        let report = orchestrator(model_router(provider.clone(), ExtractionMode::Llm), &config)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.done, 1);
        assert_eq!(report.outcomes[0].attempts, 4);
        let times = provider.call_times();
        let delays: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(delays[0] >= Duration::from_secs(5));
        assert!(delays[1] > delays[0]);
        assert!(delays[2] > delays[1]);
    }

    #[tokio::test]
    async fn test_move_happens_after_checkpoint() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.output.classify = true;
        config.output.classify_mode = ClassifyMode::Move;
        let paths = write_invoices(dir.path(), 1);
        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());

        let report = orchestrator(Arc::new(Counting::new()), &config)
            .with_resume_store(store.clone())
            .run(paths.clone(), CancellationToken::new())
            .await
            .unwrap();

        let outcome = &report.outcomes[0];
        assert!(store.is_done(&outcome.fingerprint));
        assert_eq!(outcome.checkpoint_error, None);
        assert!(outcome.placement.path().unwrap().exists());
        assert!(!paths[0].exists());

        // the durable entry still carries the record of the moved document
        let reopened = ResumeStore::open(config.resume_path()).await.unwrap();
        let entry = reopened.entry(&outcome.fingerprint).unwrap();
        assert_eq!(entry.record.unwrap().fields.invoice_number.as_deref(), Some("10000000"));
    }

    #[tokio::test]
    async fn test_unsaved_progress_copies_instead_of_moving() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.output.classify = true;
        config.output.classify_mode = ClassifyMode::Move;
        let paths = write_invoices(dir.path(), 1);
        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());
        store.reject_writes().await;

        let report = orchestrator(Arc::new(Counting::new()), &config)
            .with_resume_store(store.clone())
            .run(paths.clone(), CancellationToken::new())
            .await
            .unwrap();

        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, TaskStatus::Done);
        assert!(outcome.checkpoint_error.is_some());
        assert_eq!(report.stats.unsaved, 1);
        assert!(!store.is_done(&outcome.fingerprint));
        // source stays for the next run; the tree gets a copy
        assert!(paths[0].exists());
        assert!(outcome.placement.path().unwrap().exists());
    }

    #[tokio::test]
    async fn test_invoice_in_two_formats_is_filed_once() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.output.classify = true;

        let text = invoice_text(7, "Acme", "Globex");
        let first = dir.path().join("inv.txt");
        let second = dir.path().join("inv-export.txt");
        std::fs::write(&first, &text).unwrap();
        std::fs::write(&second, format!("{}备注：export\n", text)).unwrap();

        let report = orchestrator(Arc::new(Counting::new()), &config)
            .run(vec![first, second], CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.done, 2);
        assert_eq!(report.stats.placed, 1);
        assert_eq!(report.stats.not_filed, 1);
        let skipped = report
            .outcomes
            .iter()
            .find(|o| matches!(o.placement, Placement::Skipped { .. }))
            .unwrap();
        assert!(matches!(
            &skipped.placement,
            Placement::Skipped { reason } if reason.contains("10000007")
        ));
    }

    #[tokio::test]
    async fn test_resumed_record_follows_renamed_file() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let paths = write_invoices(dir.path(), 1);
        let store = Arc::new(ResumeStore::open(config.resume_path()).await.unwrap());

        orchestrator(Arc::new(Counting::new()), &config)
            .with_resume_store(store.clone())
            .run(paths.clone(), CancellationToken::new())
            .await
            .unwrap();

        let renamed = dir.path().join("renamed.txt");
        std::fs::rename(&paths[0], &renamed).unwrap();
        let report = orchestrator(Arc::new(Counting::new()), &config)
            .with_resume_store(store)
            .run(vec![renamed.clone()], CancellationToken::new())
            .await
            .unwrap();

        let outcome = &report.outcomes[0];
        assert!(outcome.resumed);
        assert_eq!(outcome.path, renamed);
        assert_eq!(outcome.record.as_ref().unwrap().source.path, renamed);
    }

    #[tokio::test]
    async fn test_ofd_is_listed_as_skipped() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let mut paths = write_invoices(dir.path(), 1);
        let ofd = dir.path().join("e-invoice.ofd");
        std::fs::write(&ofd, b"PK\x03\x04").unwrap();
        paths.push(ofd.clone());

        let report = orchestrator(Arc::new(Counting::new()), &config)
            .run(paths, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.stats.done, 1);
        assert_eq!(report.stats.skipped, 1);
        let skipped = report.outcomes.iter().find(|o| o.path == ofd).unwrap();
        assert_eq!(skipped.status, TaskStatus::Skipped);
        assert!(skipped.last_error.as_deref().unwrap().contains("ofd"));
    }
}
