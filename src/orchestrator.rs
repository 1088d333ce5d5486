//! Generation orchestration: analyze the source image once, then render each
//! view in order, charging one credit per run and failing fast on the first
//! per-view error.
//!
//! The orchestrator owns all run state and publishes progress over an event
//! channel, so any front-end (the bundled CLI, a GUI, a test harness) can
//! render partial completion without reaching into the run loop.

use crate::error::{Result, TurnaroundError};
use crate::image::{GeneratedImage, SourceImage};
use crate::provider::{ViewProvider, ViewRequest};
use crate::quota::QuotaStore;
use crate::storage::KeyValueStore;
use std::time::Duration;
use tokio::sync::mpsc;

/// Ordered view labels rendered by default.
pub const DEFAULT_VIEWS: [&str; 4] = ["front", "back", "left side", "right side"];

/// Spacing between successive generate calls.
///
/// Part of the contract with the remote service, not a tuning knob: the
/// image endpoint throttles bursts, and omitting the delay gets runs
/// rate-limited partway through.
pub const INTER_CALL_DELAY: Duration = Duration::from_secs(1);

/// Fixed stylistic qualifiers appended to every view prompt.
const STYLE_QUALIFIERS: &str = "detailed, cinematic lighting, 4k, trending on artstation";

const NO_IMAGE_MSG: &str = "Please upload an image first.";
const DEPLETED_MSG: &str =
    "You have run out of generation credits. Please set a new credit balance or reset usage.";

/// How each view is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Re-render the uploaded image itself (source image + prompt).
    #[default]
    Edit,
    /// Synthesize from the text prompt alone.
    Generate,
}

impl std::fmt::Display for RenderMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Edit => write!(f, "edit"),
            Self::Generate => write!(f, "generate"),
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunPhase {
    /// No run in flight.
    #[default]
    Idle,
    /// Describing the source image.
    Analyzing,
    /// Rendering views.
    Generating,
}

/// One successfully rendered view.
#[derive(Debug, Clone)]
pub struct GeneratedView {
    /// View label this was rendered for.
    pub view: String,
    /// The rendered image.
    pub image: GeneratedImage,
}

/// Progress events published while a run is in flight.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// The analyze phase started.
    Analyzing,
    /// The analyze phase produced the base description.
    Described {
        /// Base description of the source image's subject.
        description: String,
    },
    /// A view render started.
    GeneratingView {
        /// View label being rendered.
        view: String,
        /// Zero-based position in the view list.
        index: usize,
        /// Total number of views in this run.
        total: usize,
    },
    /// A view render finished; partial results are displayable now.
    ViewCompleted {
        /// The rendered view.
        view: Box<GeneratedView>,
        /// Views completed so far.
        completed: usize,
        /// Total number of views in this run.
        total: usize,
    },
    /// The run finished with every view rendered.
    Completed {
        /// Number of views rendered.
        total: usize,
    },
    /// The run aborted; earlier completed views remain valid.
    Failed {
        /// User-facing error message.
        message: String,
    },
}

/// Drives the describe-then-generate-per-view sequence against a provider,
/// gated by the credit quota.
///
/// Only one run can be active at a time: [`generate`](Self::generate) holds
/// `&mut self` for the whole run.
pub struct Orchestrator<S: KeyValueStore> {
    provider: Box<dyn ViewProvider>,
    quota: QuotaStore<S>,
    views: Vec<String>,
    mode: RenderMode,
    seed: Option<u64>,
    source: Option<SourceImage>,
    description: Option<String>,
    results: Vec<GeneratedView>,
    phase: RunPhase,
    last_error: Option<String>,
    events: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl<S: KeyValueStore> Orchestrator<S> {
    /// Creates an orchestrator over a provider and a loaded quota store,
    /// with the default view list and `Edit` mode.
    pub fn new(provider: Box<dyn ViewProvider>, quota: QuotaStore<S>) -> Self {
        Self {
            provider,
            quota,
            views: DEFAULT_VIEWS.iter().map(|v| v.to_string()).collect(),
            mode: RenderMode::default(),
            seed: None,
            source: None,
            description: None,
            results: Vec::new(),
            phase: RunPhase::Idle,
            last_error: None,
            events: None,
        }
    }

    /// Replaces the ordered view list for subsequent runs.
    pub fn set_views(&mut self, views: Vec<String>) {
        self.views = views;
    }

    /// Sets the render mode for subsequent runs. The mode is immutable for
    /// the duration of a run because `generate` borrows exclusively.
    pub fn set_mode(&mut self, mode: RenderMode) {
        self.mode = mode;
    }

    /// Sets a seed passed through to the provider.
    pub fn set_seed(&mut self, seed: Option<u64>) {
        self.seed = seed;
    }

    /// Replaces the source image, discarding previous results, the base
    /// description, and any prior error.
    pub fn upload(&mut self, image: SourceImage) {
        self.source = Some(image);
        self.results.clear();
        self.description = None;
        self.last_error = None;
    }

    /// Hands out the progress event receiver. Single consumer: calling this
    /// again replaces the previous subscription.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<RunEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx);
        rx
    }

    /// Runs the full generation sequence.
    ///
    /// Preconditions are checked first: a source image must be uploaded and
    /// quota must not be depleted. Violations return
    /// [`TurnaroundError::Validation`] without consuming a credit or touching
    /// existing results. Otherwise one credit is charged up front and is not
    /// refunded on failure.
    ///
    /// Views render strictly sequentially with [`INTER_CALL_DELAY`] between
    /// calls; the first failure aborts the remaining queue. Successfully
    /// rendered views survive an abort and stay accessible via
    /// [`results`](Self::results).
    pub async fn generate(&mut self) -> Result<&[GeneratedView]> {
        let source = match &self.source {
            Some(s) => s.clone(),
            None => return Err(TurnaroundError::Validation(NO_IMAGE_MSG.into())),
        };
        if self.quota.is_depleted() {
            return Err(TurnaroundError::Validation(DEPLETED_MSG.into()));
        }

        self.results.clear();
        self.description = None;
        self.last_error = None;

        // Optimistic charge: one credit per attempt, success or not.
        self.quota.consume_one()?;

        let outcome = self.run(&source).await;
        self.phase = RunPhase::Idle;

        match outcome {
            Ok(()) => {
                self.emit(RunEvent::Completed {
                    total: self.results.len(),
                });
                Ok(self.results.as_slice())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::warn!(error = %message, "generation run aborted");
                self.last_error = Some(message.clone());
                self.emit(RunEvent::Failed { message });
                Err(e)
            }
        }
    }

    async fn run(&mut self, source: &SourceImage) -> Result<()> {
        self.phase = RunPhase::Analyzing;
        self.emit(RunEvent::Analyzing);
        tracing::info!("analyzing source image");

        let description = self
            .provider
            .describe(source)
            .await
            .map_err(|e| TurnaroundError::Analysis(e.to_string()))?;
        self.description = Some(description.clone());
        self.emit(RunEvent::Described {
            description: description.clone(),
        });

        self.phase = RunPhase::Generating;
        let views = self.views.clone();
        let total = views.len();

        for (index, view) in views.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(INTER_CALL_DELAY).await;
            }

            self.emit(RunEvent::GeneratingView {
                view: view.clone(),
                index,
                total,
            });
            tracing::info!(view = %view, index, total, "rendering view");

            let mut request = ViewRequest::new(build_prompt(&description, view));
            if self.mode == RenderMode::Edit {
                request = request.with_source(source.clone());
            }
            if let Some(seed) = self.seed {
                request = request.with_seed(seed);
            }

            let image = self
                .provider
                .generate_view(&request)
                .await
                .map_err(|e| TurnaroundError::Generation {
                    view: view.clone(),
                    message: e.to_string(),
                })?;

            self.results.push(GeneratedView {
                view: view.clone(),
                image,
            });
            self.emit(RunEvent::ViewCompleted {
                view: Box::new(self.results[self.results.len() - 1].clone()),
                completed: self.results.len(),
                total,
            });
        }

        Ok(())
    }

    fn emit(&self, event: RunEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// The current source image, if one was uploaded.
    pub fn source(&self) -> Option<&SourceImage> {
        self.source.as_ref()
    }

    /// Base description from the last run that reached the generating phase.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Views rendered by the last run, in order. Partial after an abort.
    pub fn results(&self) -> &[GeneratedView] {
        &self.results
    }

    /// Current run phase.
    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Render mode for subsequent runs.
    pub fn mode(&self) -> RenderMode {
        self.mode
    }

    /// Message from the last failed run, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The quota store gating this orchestrator.
    pub fn quota(&self) -> &QuotaStore<S> {
        &self.quota
    }

    /// Mutable access to the quota store (set / reset from a front-end).
    pub fn quota_mut(&mut self) -> &mut QuotaStore<S> {
        &mut self.quota
    }
}

/// Builds the prompt for one view: base description, view phrase, fixed
/// qualifiers. The label is lowercased and gets a ` view` suffix unless it
/// already ends in `view`.
pub fn build_prompt(description: &str, view: &str) -> String {
    let view = view.trim().to_lowercase();
    let view_phrase = if view.ends_with("view") {
        view
    } else {
        format!("{view} view")
    };
    format!("{description}, {view_phrase}, {STYLE_QUALIFIERS}")
}
