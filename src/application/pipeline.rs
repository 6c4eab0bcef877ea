//! Run Orchestrators
//!
//! `MemoryPipeline` drives the ingest path: a bounded pool of clip scanners
//! feeding the sequential fuse → refine → reason → persist stages.
//! `AskPipeline` drives the question path: parse → retrieve → materialize →
//! synthesize.

use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::application::error::AppResult;
use crate::application::services::{
    ClipScanner, EvidenceMaterializer, EventFusion, EventPersister, EventReasoner,
    IdentityRefiner, QueryParser, RagAnswer, RagSynthesizer, Retriever,
};
use crate::domain::entities::{ClipRecord, ClipResult};

/// Outcome of one fuse-and-persist run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub clips_scanned: usize,
    pub clips_failed: usize,
    pub events_fused: usize,
    pub events_persisted: Vec<Uuid>,
    pub events_failed: usize,
}

/// The six-stage incremental memory pipeline.
pub struct MemoryPipeline {
    scanner: Arc<ClipScanner>,
    fusion: EventFusion,
    refiner: IdentityRefiner,
    reasoner: EventReasoner,
    persister: EventPersister,
    /// Concurrent clip scanners. Scanning is the only stage that runs with
    /// more than one worker.
    scan_workers: usize,
}

impl MemoryPipeline {
    pub fn new(
        scanner: Arc<ClipScanner>,
        fusion: EventFusion,
        refiner: IdentityRefiner,
        reasoner: EventReasoner,
        persister: EventPersister,
        scan_workers: usize,
    ) -> Self {
        Self {
            scanner,
            fusion,
            refiner,
            reasoner,
            persister,
            scan_workers: scan_workers.max(1),
        }
    }

    /// Scans all clips on the worker pool. Per-clip failures are logged and
    /// skipped; the order of results is irrelevant because fusion re-sorts
    /// by start time.
    pub async fn scan_clips(&self, records: Vec<ClipRecord>) -> Vec<ClipResult> {
        let total = records.len();
        let started = Instant::now();
        info!(clips = total, workers = self.scan_workers, "Scanning clips");

        let scanner = self.scanner.clone();
        let results: Vec<Option<ClipResult>> = stream::iter(records)
            .map(|record| {
                let scanner = scanner.clone();
                async move {
                    match scanner.scan(&record).await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(
                                video = %record.video_path.display(),
                                error = %e,
                                "Clip scan failed, skipping"
                            );
                            None
                        }
                    }
                }
            })
            .buffer_unordered(self.scan_workers)
            .collect()
            .await;

        let scanned: Vec<ClipResult> = results.into_iter().flatten().collect();
        info!(
            scanned = scanned.len(),
            failed = total - scanned.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Clip scanning complete"
        );

        scanned
    }

    /// Fuses scanned clips and persists the resulting events in emission
    /// order. A failed event is rolled back by the store and does not stop
    /// the run.
    pub async fn fuse_and_persist(&self, clips: Vec<ClipResult>) -> AppResult<RunReport> {
        let started = Instant::now();
        let mut report = RunReport {
            clips_scanned: clips.len(),
            ..RunReport::default()
        };

        let mut events = self.fusion.fuse(clips);
        report.events_fused = events.len();

        for (index, event) in events.iter_mut().enumerate() {
            info!(
                event = index + 1,
                total = report.events_fused,
                start = %event.start_time,
                clips = event.clips.len(),
                "Processing event"
            );

            self.refiner.refine(event);
            self.reasoner.summarize(event).await;

            match self.persister.persist(event).await {
                Ok(Some(id)) => report.events_persisted.push(id),
                Ok(None) => {}
                Err(e) => {
                    error!(event = index + 1, error = %e, "Event persistence failed, continuing");
                    report.events_failed += 1;
                }
            }
        }

        info!(
            events = report.events_fused,
            persisted = report.events_persisted.len(),
            failed = report.events_failed,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Fuse-and-persist complete"
        );

        Ok(report)
    }

    /// Full ingest: scan then fuse-and-persist.
    pub async fn run(&self, records: Vec<ClipRecord>) -> AppResult<RunReport> {
        let total = records.len();
        let clips = self.scan_clips(records).await;
        let mut report = self.fuse_and_persist(clips).await?;
        report.clips_failed = total - report.clips_scanned;
        Ok(report)
    }
}

/// The question-answering path over the same store.
pub struct AskPipeline {
    parser: QueryParser,
    retriever: Retriever,
    materializer: EvidenceMaterializer,
    synthesizer: RagSynthesizer,
}

impl AskPipeline {
    pub fn new(
        parser: QueryParser,
        retriever: Retriever,
        materializer: EvidenceMaterializer,
        synthesizer: RagSynthesizer,
    ) -> Self {
        Self {
            parser,
            retriever,
            materializer,
            synthesizer,
        }
    }

    /// Answers one natural-language question. Always returns a user-readable
    /// answer; internal failures degrade to the fixed no-records reply.
    pub async fn answer(&self, question: &str) -> RagAnswer {
        let query = match self.parser.parse(question).await {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, "Query parsing failed");
                return self.synthesizer.answer(question, &fallback_query(), &[]).await;
            }
        };

        let mut evidence = match self.retriever.retrieve(&query).await {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!(error = %e, "Evidence retrieval failed");
                Vec::new()
            }
        };

        self.materializer.materialize(&mut evidence).await;

        self.synthesizer.answer(question, &query, &evidence).await
    }
}

fn fallback_query() -> crate::application::services::ParsedQuery {
    crate::application::services::ParsedQuery {
        person_id: None,
        person_name: None,
        date: None,
        date_range: None,
        keyword: None,
        intent: crate::application::services::QueryIntent::General,
        query_type: crate::application::services::QueryType::Detail,
    }
}
