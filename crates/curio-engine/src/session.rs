//! Caller-side single flight around the pipeline.
//!
//! Every `begin` bumps the generation; an outcome is applied only if its
//! ticket is still the newest, so a slow analysis can never overwrite the
//! result of a later one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use curio_contracts::events::{AnalysisEvent, EventLog};
use curio_contracts::history::{HistoryEntry, HistoryStore};
use curio_contracts::image::EncodedImage;
use curio_contracts::report::AnalysisReport;
use tracing::{debug, info, warn};

use crate::gateway::InferenceGateway;
use crate::image::prepare_for_gateway;
use crate::pipeline::{AnalysisError, AnalysisPipeline, AnalysisRequest, StageObserver};
use crate::stage::Stage;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Running {
        generation: u64,
    },
    Succeeded {
        generation: u64,
        report: Arc<AnalysisReport>,
    },
    Failed {
        generation: u64,
        stage: Option<Stage>,
        message: String,
    },
}

impl SessionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn report(&self) -> Option<&AnalysisReport> {
        match self {
            Self::Succeeded { report, .. } => Some(report.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

impl Ticket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    /// A newer analysis started before this one finished.
    Discarded,
}

struct SessionInner {
    generation: u64,
    state: SessionState,
}

pub struct Session<G> {
    pipeline: Arc<AnalysisPipeline<G>>,
    inner: Arc<Mutex<SessionInner>>,
    history: Arc<Mutex<HistoryStore>>,
    events: Option<EventLog>,
    max_image_dim: Option<u32>,
}

impl<G> Clone for Session<G> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
            inner: Arc::clone(&self.inner),
            history: Arc::clone(&self.history),
            events: self.events.clone(),
            max_image_dim: self.max_image_dim,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<G: InferenceGateway + 'static> Session<G> {
    pub fn new(pipeline: AnalysisPipeline<G>, history: HistoryStore) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            inner: Arc::new(Mutex::new(SessionInner {
                generation: 0,
                state: SessionState::Idle,
            })),
            history: Arc::new(Mutex::new(history)),
            events: None,
            max_image_dim: None,
        }
    }

    pub fn with_event_log(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    /// Images whose longer side exceeds `max_dim` are re-encoded before the
    /// first stage.
    pub fn with_max_image_dim(mut self, max_dim: u32) -> Self {
        self.max_image_dim = Some(max_dim);
        self
    }

    pub fn pipeline(&self) -> &AnalysisPipeline<G> {
        &self.pipeline
    }

    pub fn state(&self) -> SessionState {
        lock(&self.inner).state.clone()
    }

    /// Snapshot of persisted and in-process entries, newest first.
    pub fn history_snapshot(&self) -> Vec<HistoryEntry> {
        lock(&self.history).entries().to_vec()
    }

    /// Clears the previous result and makes any outstanding analysis stale.
    pub fn begin(&self, image: &EncodedImage) -> Ticket {
        let generation = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.state = SessionState::Running {
                generation: inner.generation,
            };
            inner.generation
        };
        self.emit(&AnalysisEvent::AnalysisStarted {
            generation,
            media_type: image.media_type().to_string(),
            image_bytes: image.len(),
        });
        Ticket { generation }
    }

    pub fn finish(
        &self,
        ticket: Ticket,
        image: EncodedImage,
        outcome: Result<AnalysisReport, AnalysisError>,
    ) -> Completion {
        let generation = ticket.generation;
        let mut inner = lock(&self.inner);
        if inner.generation != generation {
            drop(inner);
            debug!(generation, "discarding stale analysis outcome");
            self.emit(&AnalysisEvent::AnalysisDiscarded { generation });
            return Completion::Discarded;
        }

        match outcome {
            Ok(report) => {
                let event = AnalysisEvent::AnalysisSucceeded {
                    generation,
                    category: report.category.to_string(),
                    value: report.value.category.as_str().to_string(),
                    average: report.value.range.average,
                    listings: report.market_analysis.listings.len(),
                };
                let report = Arc::new(report);
                inner.state = SessionState::Succeeded {
                    generation,
                    report: Arc::clone(&report),
                };
                drop(inner);
                info!(generation, "analysis applied");

                let entry = HistoryEntry::new(report.as_ref().clone(), image);
                let mut history = lock(&self.history);
                if let Err(err) = history.append(entry) {
                    warn!(%err, path = %history.path().display(), "history not persisted");
                }
                drop(history);
                self.emit(&event);
            }
            Err(err) => {
                let stage = err.stage();
                let message = err.to_string();
                inner.state = SessionState::Failed {
                    generation,
                    stage,
                    message: message.clone(),
                };
                drop(inner);
                warn!(generation, %message, "analysis failed");
                self.emit(&AnalysisEvent::AnalysisFailed {
                    generation,
                    stage: stage.map(|stage| stage.as_str().to_string()),
                    error: message,
                });
            }
        }
        Completion::Applied
    }

    /// Runs one analysis on the calling thread.
    pub fn analyze(&self, image: EncodedImage) -> Completion {
        let ticket = self.begin(&image);
        self.run(ticket, image)
    }

    /// Runs one analysis on a worker thread. Calling `spawn` or `analyze`
    /// again makes this one stale.
    pub fn spawn(&self, image: EncodedImage) -> JoinHandle<Completion> {
        let ticket = self.begin(&image);
        let session = self.clone();
        std::thread::spawn(move || session.run(ticket, image))
    }

    fn run(&self, ticket: Ticket, image: EncodedImage) -> Completion {
        let prepared = prepare_for_gateway(image.clone(), self.max_image_dim);
        let request = AnalysisRequest::new(prepared);
        let observer = EventObserver {
            events: self.events.as_ref(),
            generation: ticket.generation,
        };
        let outcome = self.pipeline.analyze_observed(&request, &observer);
        self.finish(ticket, image, outcome)
    }

    fn emit(&self, event: &AnalysisEvent) {
        if let Some(events) = &self.events {
            if let Err(err) = events.emit(event) {
                warn!(%err, path = %events.path().display(), "event log write failed");
            }
        }
    }
}

struct EventObserver<'a> {
    events: Option<&'a EventLog>,
    generation: u64,
}

impl EventObserver<'_> {
    fn emit(&self, event: AnalysisEvent) {
        if let Some(events) = self.events {
            if let Err(err) = events.emit(&event) {
                warn!(%err, "event log write failed");
            }
        }
    }
}

impl StageObserver for EventObserver<'_> {
    fn stage_started(&self, stage: Stage) {
        self.emit(AnalysisEvent::StageStarted {
            generation: self.generation,
            stage: stage.as_str().to_string(),
        });
    }

    fn stage_completed(&self, stage: Stage, text: &str, elapsed: Duration) {
        self.emit(AnalysisEvent::StageCompleted {
            generation: self.generation,
            stage: stage.as_str().to_string(),
            chars: text.chars().count(),
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
    }

    fn listings_degraded(&self, reason: &str) {
        self.emit(AnalysisEvent::ListingsDegraded {
            generation: self.generation,
            reason: reason.to_string(),
        });
    }
}
