//! Async driver for a participant run.
//!
//! Wires the pure [`TrialSequencer`](super::TrialSequencer) to real timers,
//! participant input and trial persistence. The driver suspends in exactly
//! four places: the prime exposure timer, the key wait, the inter-trial gap
//! timer, and the persistence round trips at the edges of the run.
//!
//! Trial saves are spawned fire-and-forget so the presentation never waits on
//! the network. A failed save is queued and retried (bounded attempts with a
//! fixed delay) before the run is completed; anything still unsaved is
//! reported in [`RunOutcome::unsaved`] rather than silently dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{Cue, Key, KeyOutcome, TrialResponse, TrialSequencer};
use crate::api::{RecordTrialRequest, StartRunRequest};
use crate::client::ApiClient;
use crate::error::{AppError, AppResult};
use crate::storage::TestDetail;

/// How many times the pending-save buffer is re-flushed at completion.
pub const SAVE_RETRY_ATTEMPTS: u32 = 3;

/// Delay between flush attempts.
pub const SAVE_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Input events fed to the driver by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantInput {
    /// A recognized response key was pressed.
    Key(Key),
    /// The participant chose to end the practice phase.
    FinishPractice,
}

/// What the UI should currently display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScreenView<'a> {
    /// Key instructions with the test's response labels.
    Instructions {
        /// Label of the positive key.
        positive_label: &'a str,
        /// Label of the negative key.
        negative_label: &'a str,
    },
    /// A practice word.
    PracticeWord {
        /// The word to show.
        word: &'a str,
    },
    /// A countdown number.
    Countdown {
        /// Number to display.
        remaining: u8,
    },
    /// The prime image, alone.
    Prime {
        /// Image to display.
        image_url: &'a str,
    },
    /// The trial word.
    Word {
        /// Word to display.
        text: &'a str,
    },
    /// Blank screen (inter-trial gap).
    Blank,
    /// Progress through the sequence.
    Progress {
        /// Pairs answered so far.
        answered: usize,
        /// Total pairs.
        total: usize,
    },
    /// The run is complete.
    Finished,
}

/// Render seam for the driver; the CLI prints, tests record.
pub trait Screen: Send {
    /// Display the given view.
    fn show(&mut self, view: ScreenView<'_>);
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// The run's id.
    pub run_id: i64,
    /// Pairs in the sequence.
    pub total: usize,
    /// Responses captured.
    pub recorded: usize,
    /// Responses that could not be persisted even after retries.
    pub unsaved: usize,
}

/// Drives one participant run from practice through completion.
pub struct RunDriver {
    client: Arc<dyn ApiClient>,
    inputs: mpsc::Receiver<ParticipantInput>,
}

impl RunDriver {
    /// Create a driver over a client and a participant input channel.
    pub fn new(client: Arc<dyn ApiClient>, inputs: mpsc::Receiver<ParticipantInput>) -> Self {
        Self { client, inputs }
    }

    /// Run a full participant session: start the run, cycle practice, count
    /// down, present every pair, then flush saves and complete the run.
    pub async fn run(
        mut self,
        test: &TestDetail,
        participant: StartRunRequest,
        mut sequencer: TrialSequencer,
        screen: &mut dyn Screen,
    ) -> AppResult<RunOutcome> {
        let run_id = self.client.start_run(test.id, &participant).await?;
        info!(test_id = test.id, run_id, "Run started");

        let (positive_label, negative_label) = test.response_labels.labels();
        screen.show(ScreenView::Instructions {
            positive_label,
            negative_label,
        });

        // Practice: untimed, unlimited, nothing persisted. Input ending here
        // (e.g. piped stdin) just means "skip ahead".
        let mut cue = sequencer.begin_practice();
        loop {
            if let Cue::PracticeWord { word } = cue {
                screen.show(ScreenView::PracticeWord { word });
            }
            match self.inputs.recv().await {
                Some(ParticipantInput::Key(key)) => {
                    if let KeyOutcome::Practice(next) =
                        sequencer.handle_key(key, Instant::now())
                    {
                        cue = next;
                    }
                }
                Some(ParticipantInput::FinishPractice) | None => {
                    cue = sequencer.finish_practice();
                    break;
                }
            }
        }

        let pending: Arc<Mutex<Vec<RecordTrialRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let mut saves: Vec<JoinHandle<()>> = Vec::new();
        let mut recorded = 0usize;

        loop {
            cue = match cue {
                Cue::Countdown { remaining, delay } => {
                    screen.show(ScreenView::Countdown { remaining });
                    sleep(delay).await;
                    next_tick(&mut sequencer)?
                }
                Cue::Prime {
                    image_url,
                    exposure,
                } => {
                    screen.show(ScreenView::Prime {
                        image_url: &image_url,
                    });
                    sleep(exposure).await;
                    next_tick(&mut sequencer)?
                }
                Cue::Word { text } => {
                    screen.show(ScreenView::Word { text: &text });
                    self.await_response(
                        &mut sequencer,
                        screen,
                        run_id,
                        &pending,
                        &mut saves,
                        &mut recorded,
                    )
                    .await?
                }
                Cue::Gap { delay } => {
                    screen.show(ScreenView::Blank);
                    sleep(delay).await;
                    next_tick(&mut sequencer)?
                }
                // A stale practice cue can only mean practice was skipped.
                Cue::PracticeWord { .. } => sequencer.finish_practice(),
                Cue::Finished => break,
            };
        }

        // Let in-flight saves land, then re-try anything that failed.
        for handle in saves {
            let _ = handle.await;
        }
        let unsaved = self.flush_pending(run_id, &pending).await;

        self.client.complete_run(run_id).await?;
        screen.show(ScreenView::Finished);

        if unsaved > 0 {
            warn!(run_id, unsaved, "Run completed with unsaved trials");
        } else {
            info!(run_id, recorded, "Run completed");
        }

        Ok(RunOutcome {
            run_id,
            total: sequencer.sequence().len(),
            recorded,
            unsaved,
        })
    }

    /// Wait for the response key of the currently shown word.
    async fn await_response(
        &mut self,
        sequencer: &mut TrialSequencer,
        screen: &mut dyn Screen,
        run_id: i64,
        pending: &Arc<Mutex<Vec<RecordTrialRequest>>>,
        saves: &mut Vec<JoinHandle<()>>,
        recorded: &mut usize,
    ) -> AppResult<Cue> {
        loop {
            match self.inputs.recv().await {
                Some(ParticipantInput::Key(key)) => {
                    match sequencer.handle_key(key, Instant::now()) {
                        KeyOutcome::Answered { response, cue } => {
                            *recorded += 1;
                            self.spawn_save(run_id, response, pending, saves);
                            let (answered, total) = sequencer.progress();
                            screen.show(ScreenView::Progress { answered, total });
                            return Ok(cue);
                        }
                        KeyOutcome::Ignored | KeyOutcome::Practice(_) => continue,
                    }
                }
                Some(ParticipantInput::FinishPractice) => continue,
                None => {
                    return Err(AppError::Internal {
                        message: "participant input ended mid-run".to_string(),
                    })
                }
            }
        }
    }

    /// Persist a response without blocking the presentation; failures are
    /// queued for the completion-time flush.
    fn spawn_save(
        &self,
        run_id: i64,
        response: TrialResponse,
        pending: &Arc<Mutex<Vec<RecordTrialRequest>>>,
        saves: &mut Vec<JoinHandle<()>>,
    ) {
        let client = Arc::clone(&self.client);
        let pending = Arc::clone(pending);
        let request = RecordTrialRequest {
            brand_id: response.brand_id,
            word_id: response.word_id,
            is_positive: response.positive,
            rt_ms: response.rt_ms,
        };

        saves.push(tokio::spawn(async move {
            if let Err(e) = client.record_trial(run_id, &request).await {
                warn!(error = %e, run_id, "Trial save failed; queued for retry");
                pending.lock().await.push(request);
            }
        }));
    }

    /// Re-try queued saves; returns how many are still unsaved afterwards.
    async fn flush_pending(
        &self,
        run_id: i64,
        pending: &Arc<Mutex<Vec<RecordTrialRequest>>>,
    ) -> usize {
        for attempt in 1..=SAVE_RETRY_ATTEMPTS {
            let queued = std::mem::take(&mut *pending.lock().await);
            if queued.is_empty() {
                return 0;
            }

            debug!(attempt, queued = queued.len(), "Retrying failed trial saves");

            for request in queued {
                if let Err(e) = self.client.record_trial(run_id, &request).await {
                    warn!(error = %e, run_id, "Trial save retry failed");
                    pending.lock().await.push(request);
                }
            }

            let still_pending = !pending.lock().await.is_empty();
            if still_pending && attempt < SAVE_RETRY_ATTEMPTS {
                sleep(SAVE_RETRY_DELAY).await;
            }
        }

        pending.lock().await.len()
    }
}

/// Feed the timer expiration the last cue armed; a `None` here is a driver
/// bug, not a participant action.
fn next_tick(sequencer: &mut TrialSequencer) -> AppResult<Cue> {
    sequencer
        .tick(Instant::now())
        .ok_or_else(|| AppError::Internal {
            message: "timer fired in a phase with no timer armed".to_string(),
        })
}
