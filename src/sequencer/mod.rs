//! Participant-side trial sequencer.
//!
//! A run is driven by an explicit state-machine instance: consent/intro,
//! untimed practice, a visible countdown, then one timed presentation per
//! (brand, word) pair — prime image, word, keyed response — separated by a
//! fixed inter-trial gap. The machine is pure and synchronous: callers feed
//! it key presses and timer expirations with a monotonic `Instant`, and it
//! answers with a [`Cue`] describing what to display and how long to wait.
//! The async driver in [`driver`] wires it to real timers, input and
//! persistence.

pub mod driver;

use std::time::{Duration, Instant};

use rand::Rng;

use crate::storage::TestDetail;

/// Number of visible countdown steps before the timed phase.
pub const COUNTDOWN_STEPS: u8 = 5;

/// Delay between countdown decrements.
pub const COUNTDOWN_TICK: Duration = Duration::from_millis(1000);

/// How long a brand image is shown alone before its word appears.
pub const PRIME_EXPOSURE: Duration = Duration::from_millis(300);

/// Blank interval between hiding a word and the next presentation.
pub const INTER_TRIAL_GAP: Duration = Duration::from_millis(150);

/// Rotating practice words shown before the timed phase.
pub const PRACTICE_WORDS: [&str; 3] = ["bom", "ruim", "gostoso"];

/// Key mapped to the positive/yes classification.
pub const POSITIVE_KEY: char = 'e';

/// Key mapped to the negative/no classification.
pub const NEGATIVE_KEY: char = 'o';

/// Presentation timing. The defaults are the fixed durations of the survey;
/// tests shrink them to keep driver runs fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Countdown steps before the first trial.
    pub countdown_steps: u8,
    /// Delay between countdown decrements.
    pub countdown_tick: Duration,
    /// Prime image exposure before the word.
    pub prime_exposure: Duration,
    /// Blank gap between trials.
    pub inter_trial_gap: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            countdown_steps: COUNTDOWN_STEPS,
            countdown_tick: COUNTDOWN_TICK,
            prime_exposure: PRIME_EXPOSURE,
            inter_trial_gap: INTER_TRIAL_GAP,
        }
    }
}

/// A recognized response key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// The positive/yes key.
    Positive,
    /// The negative/no key.
    Negative,
}

impl Key {
    /// Map a pressed character to a response key, case-insensitively.
    /// Unrecognized characters map to `None` and are ignored by the machine.
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            c if c == POSITIVE_KEY => Some(Key::Positive),
            c if c == NEGATIVE_KEY => Some(Key::Negative),
            _ => None,
        }
    }

    /// Whether this key means the positive/yes classification.
    pub fn is_positive(&self) -> bool {
        matches!(self, Key::Positive)
    }
}

/// One (brand, word) presentation in the run's fixed sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StimulusPair {
    /// Brand shown as the prime.
    pub brand_id: i64,
    /// Prime image, if the brand has one.
    pub image_url: Option<String>,
    /// Word shown after the prime.
    pub word_id: i64,
    /// The word itself.
    pub word_text: String,
}

/// Phases of a participant run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Consent/intro; nothing timed yet.
    Intro,
    /// Untimed practice with the rotating word list.
    Practice,
    /// Visible countdown before the first trial.
    Countdown {
        /// Steps still to show.
        remaining: u8,
    },
    /// Prime image on screen; keys are ignored.
    Presenting {
        /// Index into the sequence.
        index: usize,
    },
    /// Word on screen, latency timer running.
    AwaitingResponse {
        /// Index into the sequence.
        index: usize,
    },
    /// Blank inter-trial interval.
    Gap {
        /// Index of the next pair to present.
        next_index: usize,
    },
    /// All pairs answered.
    Complete,
}

/// What the driver should display next, and how long to wait before feeding
/// the machine its next timer expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cue {
    /// Show a practice word; wait for a key.
    PracticeWord {
        /// The word to show.
        word: &'static str,
    },
    /// Show a countdown number, then tick after `delay`.
    Countdown {
        /// Number to display.
        remaining: u8,
        /// Delay before the next tick.
        delay: Duration,
    },
    /// Show the prime image alone, then tick after `exposure`.
    Prime {
        /// Image to display.
        image_url: String,
        /// Prime exposure duration.
        exposure: Duration,
    },
    /// Show the word; the latency timer is running. Wait for a key.
    Word {
        /// Word to display.
        text: String,
    },
    /// Blank the screen, then tick after `delay`.
    Gap {
        /// Gap duration.
        delay: Duration,
    },
    /// The run is complete.
    Finished,
}

/// A captured response, ready to be persisted as a trial.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialResponse {
    /// Brand presented.
    pub brand_id: i64,
    /// Word presented.
    pub word_id: i64,
    /// Participant classification.
    pub positive: bool,
    /// Latency from word display to key press, in milliseconds.
    pub rt_ms: f64,
}

/// Result of feeding a key press to the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    /// Key arrived in a phase that does not accept input (prime showing,
    /// countdown, gap); nothing changed.
    Ignored,
    /// Practice advanced to the next rotating word.
    Practice(Cue),
    /// A timed trial was answered.
    Answered {
        /// The captured response.
        response: TrialResponse,
        /// What to display next.
        cue: Cue,
    },
}

/// The per-run state machine.
///
/// One instance per participant run; the pair sequence is generated once at
/// construction and never reshuffled.
#[derive(Debug)]
pub struct TrialSequencer {
    sequence: Vec<StimulusPair>,
    phase: Phase,
    timing: Timing,
    practice_index: usize,
    answered: usize,
    word_shown_at: Option<Instant>,
}

impl TrialSequencer {
    /// Build a sequencer for a test with the standard timing.
    pub fn new<R: Rng>(test: &TestDetail, rng: &mut R) -> Self {
        Self::with_timing(test, Timing::default(), rng)
    }

    /// Build a sequencer with explicit timing (tests shrink the delays).
    pub fn with_timing<R: Rng>(test: &TestDetail, timing: Timing, rng: &mut R) -> Self {
        Self {
            sequence: build_sequence(test, rng),
            phase: Phase::Intro,
            timing,
            practice_index: 0,
            answered: 0,
            word_shown_at: None,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The run's fixed pair sequence.
    pub fn sequence(&self) -> &[StimulusPair] {
        &self.sequence
    }

    /// Answered and total pair counts.
    pub fn progress(&self) -> (usize, usize) {
        (self.answered, self.sequence.len())
    }

    /// Enter the practice phase and show its first word.
    pub fn begin_practice(&mut self) -> Cue {
        self.phase = Phase::Practice;
        self.practice_index = 1;
        Cue::PracticeWord {
            word: PRACTICE_WORDS[0],
        }
    }

    /// Leave practice and start the countdown.
    pub fn finish_practice(&mut self) -> Cue {
        self.phase = Phase::Countdown {
            remaining: self.timing.countdown_steps,
        };
        Cue::Countdown {
            remaining: self.timing.countdown_steps,
            delay: self.timing.countdown_tick,
        }
    }

    /// Feed a timer expiration to the machine.
    ///
    /// Valid only in the timed phases (countdown, prime, gap); returns `None`
    /// in phases where no timer is armed.
    pub fn tick(&mut self, now: Instant) -> Option<Cue> {
        match self.phase {
            Phase::Countdown { remaining } => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    Some(self.present(0, now))
                } else {
                    self.phase = Phase::Countdown { remaining };
                    Some(Cue::Countdown {
                        remaining,
                        delay: self.timing.countdown_tick,
                    })
                }
            }
            Phase::Presenting { index } => {
                // Prime exposure over: swap to the word and start timing.
                self.phase = Phase::AwaitingResponse { index };
                self.word_shown_at = Some(now);
                Some(Cue::Word {
                    text: self.sequence[index].word_text.clone(),
                })
            }
            Phase::Gap { next_index } => Some(self.present(next_index, now)),
            Phase::Complete => Some(Cue::Finished),
            Phase::Intro | Phase::Practice | Phase::AwaitingResponse { .. } => None,
        }
    }

    /// Feed a recognized key press to the machine.
    pub fn handle_key(&mut self, key: Key, now: Instant) -> KeyOutcome {
        match self.phase {
            Phase::Practice => {
                let word = PRACTICE_WORDS[self.practice_index % PRACTICE_WORDS.len()];
                self.practice_index += 1;
                KeyOutcome::Practice(Cue::PracticeWord { word })
            }
            Phase::AwaitingResponse { index } => {
                let shown_at = match self.word_shown_at.take() {
                    Some(t) => t,
                    None => now,
                };
                let rt_ms = now.saturating_duration_since(shown_at).as_secs_f64() * 1000.0;

                let pair = &self.sequence[index];
                let response = TrialResponse {
                    brand_id: pair.brand_id,
                    word_id: pair.word_id,
                    positive: key.is_positive(),
                    rt_ms,
                };

                self.answered += 1;
                self.phase = Phase::Gap {
                    next_index: index + 1,
                };

                KeyOutcome::Answered {
                    response,
                    cue: Cue::Gap {
                        delay: self.timing.inter_trial_gap,
                    },
                }
            }
            // Keys during the prime, countdown, gap or after completion are
            // ignored without side effects.
            _ => KeyOutcome::Ignored,
        }
    }

    /// Move to pair `index`: prime first if the brand has an image, otherwise
    /// straight to the word with the timer started at `now`. Past the end of
    /// the sequence the run is complete.
    fn present(&mut self, index: usize, now: Instant) -> Cue {
        if index >= self.sequence.len() {
            self.phase = Phase::Complete;
            return Cue::Finished;
        }

        let pair = &self.sequence[index];
        match pair.image_url.clone() {
            Some(image_url) => {
                self.phase = Phase::Presenting { index };
                Cue::Prime {
                    image_url,
                    exposure: self.timing.prime_exposure,
                }
            }
            None => {
                self.phase = Phase::AwaitingResponse { index };
                self.word_shown_at = Some(now);
                Cue::Word {
                    text: pair.word_text.clone(),
                }
            }
        }
    }
}

/// Build the run's pair sequence: the full brand × word cross-product in a
/// uniformly random order.
pub fn build_sequence<R: Rng>(test: &TestDetail, rng: &mut R) -> Vec<StimulusPair> {
    let mut pairs = Vec::with_capacity(test.brands.len() * test.words.len());
    for brand in &test.brands {
        for word in &test.words {
            pairs.push(StimulusPair {
                brand_id: brand.id,
                image_url: brand.image_url.clone(),
                word_id: word.id,
                word_text: word.text.clone(),
            });
        }
    }
    fisher_yates(&mut pairs, rng);
    pairs
}

/// Uniform Fisher–Yates shuffle: for each index from last to first, swap with
/// a uniformly random index at or below it.
fn fisher_yates<T, R: Rng>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use crate::storage::{Brand, ResponseLabels, Word};

    fn test_detail(brands: Vec<Brand>, words: Vec<Word>) -> TestDetail {
        TestDetail {
            id: 1,
            name: "t".to_string(),
            created_at: chrono::Utc::now(),
            response_labels: ResponseLabels::PositiveNegative,
            brands,
            words,
        }
    }

    fn brand(id: i64, image: Option<&str>) -> Brand {
        Brand {
            id,
            name: format!("brand-{}", id),
            image_url: image.map(str::to_string),
        }
    }

    fn word(id: i64, text: &str) -> Word {
        Word {
            id,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_key_mapping_case_insensitive() {
        assert_eq!(Key::from_char('e'), Some(Key::Positive));
        assert_eq!(Key::from_char('E'), Some(Key::Positive));
        assert_eq!(Key::from_char('o'), Some(Key::Negative));
        assert_eq!(Key::from_char('O'), Some(Key::Negative));
        assert_eq!(Key::from_char('x'), None);
        assert_eq!(Key::from_char(' '), None);
    }

    #[test]
    fn test_practice_rotates_through_fixed_words() {
        let detail = test_detail(vec![brand(1, None)], vec![word(1, "bom")]);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut seq = TrialSequencer::new(&detail, &mut rng);

        let first = seq.begin_practice();
        assert_eq!(
            first,
            Cue::PracticeWord {
                word: PRACTICE_WORDS[0]
            }
        );

        let now = Instant::now();
        // Either key advances; the list wraps around indefinitely.
        for i in 1..7 {
            let outcome = seq.handle_key(
                if i % 2 == 0 { Key::Positive } else { Key::Negative },
                now,
            );
            match outcome {
                KeyOutcome::Practice(Cue::PracticeWord { word }) => {
                    assert_eq!(word, PRACTICE_WORDS[i % PRACTICE_WORDS.len()]);
                }
                other => panic!("unexpected outcome: {:?}", other),
            }
        }

        // Practice never records trials.
        assert_eq!(seq.progress(), (0, 1));
    }

    #[test]
    fn test_countdown_runs_five_steps_then_presents() {
        let detail = test_detail(vec![brand(1, None)], vec![word(1, "bom")]);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut seq = TrialSequencer::new(&detail, &mut rng);

        seq.begin_practice();
        let cue = seq.finish_practice();
        assert_eq!(
            cue,
            Cue::Countdown {
                remaining: 5,
                delay: COUNTDOWN_TICK
            }
        );

        let now = Instant::now();
        for expected in [4u8, 3, 2, 1] {
            match seq.tick(now) {
                Some(Cue::Countdown { remaining, .. }) => assert_eq!(remaining, expected),
                other => panic!("unexpected cue: {:?}", other),
            }
        }

        // Reaching zero presents the first pair (no image here, so the word).
        match seq.tick(now) {
            Some(Cue::Word { text }) => assert_eq!(text, "bom"),
            other => panic!("unexpected cue: {:?}", other),
        }
        assert_eq!(seq.phase(), Phase::AwaitingResponse { index: 0 });
    }

    #[test]
    fn test_no_timer_armed_in_practice() {
        let detail = test_detail(vec![brand(1, None)], vec![word(1, "bom")]);
        let mut rng = SmallRng::seed_from_u64(7);
        let mut seq = TrialSequencer::new(&detail, &mut rng);
        seq.begin_practice();
        assert_eq!(seq.tick(Instant::now()), None);
    }
}
