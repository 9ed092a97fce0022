//! Events a debug session reports to its front-end

use serde::Serialize;

use crate::common::pad_percent;
use crate::gdb::{OutputSource, RunStateEvent, StopReason, ThreadEvent};
use crate::mi::Tuple;

/// Output stream an [`SessionEvent::Output`] belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    Stdout,
    Stderr,
    /// Messages from the session itself
    Console,
}

impl From<OutputSource> for OutputCategory {
    fn from(source: OutputSource) -> Self {
        match source {
            OutputSource::Console | OutputSource::Target | OutputSource::Text => Self::Stdout,
            OutputSource::Log | OutputSource::Stderr => Self::Stderr,
        }
    }
}

/// Asynchronous notification from a session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Stopped {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<u32>,
        all_threads_stopped: bool,
    },
    Continued {
        #[serde(skip_serializing_if = "Option::is_none")]
        thread_id: Option<u32>,
        all_threads_continued: bool,
    },
    ThreadStarted {
        thread_id: u32,
    },
    ThreadExited {
        thread_id: u32,
    },
    Output {
        category: OutputCategory,
        output: String,
    },
    /// GDB dropped a breakpoint the client still shows
    BreakpointRemoved {
        id: i64,
    },
    LoadProgress(LoadProgress),
    Terminated,
}

impl SessionEvent {
    pub fn console(text: impl Into<String>) -> Self {
        Self::Output {
            category: OutputCategory::Console,
            output: text.into(),
        }
    }

    /// Translate a run-state change; repeats of the known state are dropped
    pub fn from_run_state(event: &RunStateEvent) -> Option<Self> {
        if !event.real_change && !event.forced {
            return None;
        }
        if event.is_running {
            return Some(Self::Continued {
                thread_id: event.thread_id,
                all_threads_continued: event.all_threads,
            });
        }
        Some(Self::Stopped {
            reason: event.reason.unwrap_or(StopReason::Unknown).as_str().to_string(),
            description: event.description.clone(),
            thread_id: event.thread_id,
            all_threads_stopped: event.all_threads,
        })
    }

    /// Thread lifecycle; thread-group notifications have no client event
    pub fn from_thread(event: &ThreadEvent) -> Option<Self> {
        match event {
            ThreadEvent::Created { id, .. } => Some(Self::ThreadStarted { thread_id: *id }),
            ThreadEvent::Exited { id, .. } => Some(Self::ThreadExited { thread_id: *id }),
            _ => None,
        }
    }
}

/// Progress of a `-target-download`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadProgress {
    pub section: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_sent: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_size: Option<u64>,
    pub total_sent: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<u64>,
}

impl LoadProgress {
    /// Human readable line, e.g.
    /// `[ 25%] 1024/4096, Section ".text": (50%) 1024/2048 ...`
    pub fn message(&self) -> String {
        let section = match (self.section_sent, self.section_size) {
            (Some(sent), Some(size)) => format!(
                ": ({}%) {}/{} ...",
                if size == 0 { 100 } else { sent.saturating_mul(100) / size },
                sent,
                size
            ),
            (None, Some(size)) => format!(": size = {}", size),
            _ => ".".to_string(),
        };
        let (percent, total) = match self.total_size {
            Some(size) => (pad_percent(self.total_sent, size), size.to_string()),
            None => ("[  ?%]".to_string(), "?".to_string()),
        };
        format!(
            "{} {}/{}, Section \"{}\"{}",
            percent, self.total_sent, total, self.section, section
        )
    }
}

/// Accumulates totals across `+download` records
///
/// GDB leaves out totals on some records; the last known values carry over.
#[derive(Debug, Default)]
pub struct LoadTracker {
    total_sent: u64,
    total_size: Option<u64>,
}

impl LoadTracker {
    pub fn update(&mut self, results: &Tuple) -> LoadProgress {
        if let Some(sent) = results.get_parsed::<u64>("total-sent").filter(|n| *n > 0) {
            self.total_sent = sent;
        }
        if let Some(size) = results.get_parsed::<u64>("total-size").filter(|n| *n > 0) {
            self.total_size = Some(size);
        }
        LoadProgress {
            section: results.get_str("section").unwrap_or_default().to_string(),
            section_sent: results.get_parsed("section-sent"),
            section_size: results.get_parsed("section-size"),
            total_sent: self.total_sent,
            total_size: self.total_size,
        }
    }
}
