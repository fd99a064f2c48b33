//! Pomodoro focus timer. Pure state machine driven by `tick`; the caller owns
//! the clock.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use ts_rs::TS;

use super::automation::TimerCompletion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, Display)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum TimerPhase {
    Focus,
    ShortBreak,
    LongBreak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerDurations {
    pub focus: Duration,
    pub short_break: Duration,
    pub long_break: Duration,
    /// A long break follows every `long_break_every`-th focus session.
    pub long_break_every: u32,
}

impl Default for TimerDurations {
    fn default() -> Self {
        Self {
            focus: Duration::from_secs(25 * 60),
            short_break: Duration::from_secs(5 * 60),
            long_break: Duration::from_secs(15 * 60),
            long_break_every: 4,
        }
    }
}

impl TimerDurations {
    pub fn of(&self, phase: TimerPhase) -> Duration {
        match phase {
            TimerPhase::Focus => self.focus,
            TimerPhase::ShortBreak => self.short_break,
            TimerPhase::LongBreak => self.long_break,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerEvent {
    FocusCompleted { task: Option<String>, minutes: u32 },
    BreakCompleted { phase: TimerPhase },
}

impl TimerEvent {
    /// Webhook payload for a completed focus session.
    pub fn completion(&self) -> Option<TimerCompletion> {
        match self {
            Self::FocusCompleted { task, minutes } => Some(TimerCompletion::new(
                task.clone().unwrap_or_else(|| "Focus session".to_string()),
                *minutes,
            )),
            Self::BreakCompleted { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FocusTimer {
    durations: TimerDurations,
    phase: TimerPhase,
    remaining: Duration,
    running: bool,
    completed_focus: u32,
    task: Option<String>,
}

impl Default for FocusTimer {
    fn default() -> Self {
        Self::new(TimerDurations::default())
    }
}

impl FocusTimer {
    pub fn new(durations: TimerDurations) -> Self {
        Self {
            durations,
            phase: TimerPhase::Focus,
            remaining: durations.focus,
            running: false,
            completed_focus: 0,
            task: None,
        }
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn completed_focus_sessions(&self) -> u32 {
        self.completed_focus
    }

    /// Task the next focus completions are attributed to.
    pub fn set_task(&mut self, task: Option<String>) {
        self.task = task;
    }

    pub fn start(&mut self) {
        self.running = true;
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    /// Stop and rewind the current phase.
    pub fn reset(&mut self) {
        self.running = false;
        self.remaining = self.durations.of(self.phase);
    }

    /// Move to the next phase without completing this one. A skipped focus
    /// phase does not count towards the long break.
    pub fn skip(&mut self) {
        let next = match self.phase {
            TimerPhase::Focus => TimerPhase::ShortBreak,
            TimerPhase::ShortBreak | TimerPhase::LongBreak => TimerPhase::Focus,
        };
        self.enter(next);
    }

    /// Advance the running timer. When the phase runs out the timer stops at
    /// the start of the next phase and reports what finished.
    pub fn tick(&mut self, elapsed: Duration) -> Option<TimerEvent> {
        if !self.running {
            return None;
        }
        if elapsed < self.remaining {
            self.remaining -= elapsed;
            return None;
        }

        let finished = self.phase;
        let (event, next) = match finished {
            TimerPhase::Focus => {
                self.completed_focus += 1;
                let every = self.durations.long_break_every.max(1);
                let next = if self.completed_focus % every == 0 {
                    TimerPhase::LongBreak
                } else {
                    TimerPhase::ShortBreak
                };
                let minutes = (self.durations.focus.as_secs() / 60) as u32;
                (
                    TimerEvent::FocusCompleted {
                        task: self.task.clone(),
                        minutes,
                    },
                    next,
                )
            }
            phase => (TimerEvent::BreakCompleted { phase }, TimerPhase::Focus),
        };
        self.enter(next);
        Some(event)
    }

    fn enter(&mut self, phase: TimerPhase) {
        self.phase = phase;
        self.remaining = self.durations.of(phase);
        self.running = false;
    }
}
