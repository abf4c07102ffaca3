//! Per-item playback metrics accumulator.
//!
//! An accumulator exists only once the item actually started playing; items
//! that never reached `Playing` flush just their lifecycle records.

use bridge_traits::metrics::{PlayLogAction, PlayLogActionKind};
use chrono::{DateTime, Utc};

/// Running tallies for one session item while it is current.
#[derive(Debug, Clone)]
pub(crate) struct PlaybackMetrics {
    pub started_at: DateTime<Utc>,
    pub start_position_ms: u64,
    pub last_position_ms: u64,
    pub pause_count: u32,
    pub seek_count: u32,
    pub stall_count: u32,
    pub stall_duration_ms: u64,
    pub listened_ms: u64,
    pub actions: Vec<PlayLogAction>,
    stalled_since: Option<DateTime<Utc>>,
    playing_since: Option<DateTime<Utc>>,
    paused: bool,
    finished: bool,
}

impl PlaybackMetrics {
    /// First `Playing` report for the item.
    pub fn begin(started_at: DateTime<Utc>, now: DateTime<Utc>, position_ms: u64) -> Self {
        Self {
            started_at,
            start_position_ms: position_ms,
            last_position_ms: position_ms,
            pause_count: 0,
            seek_count: 0,
            stall_count: 0,
            stall_duration_ms: 0,
            listened_ms: 0,
            actions: vec![action(PlayLogActionKind::Start, position_ms, now)],
            stalled_since: None,
            playing_since: Some(now),
            paused: false,
            finished: false,
        }
    }

    pub fn playing(&mut self, now: DateTime<Utc>, position_ms: u64) {
        self.close_stall(now);
        if self.paused {
            self.paused = false;
            self.actions
                .push(action(PlayLogActionKind::Resume, position_ms, now));
        }
        if self.playing_since.is_none() {
            self.playing_since = Some(now);
        }
        self.last_position_ms = position_ms;
    }

    pub fn paused(&mut self, now: DateTime<Utc>, position_ms: u64) {
        self.close_listening(now);
        self.last_position_ms = position_ms;
        if self.paused {
            return;
        }
        self.paused = true;
        self.pause_count += 1;
        self.actions
            .push(action(PlayLogActionKind::Pause, position_ms, now));
    }

    pub fn stalled(&mut self, now: DateTime<Utc>, position_ms: u64) {
        self.close_listening(now);
        self.last_position_ms = position_ms;
        if self.stalled_since.is_some() {
            return;
        }
        self.stalled_since = Some(now);
        self.stall_count += 1;
        self.actions
            .push(action(PlayLogActionKind::Stall, position_ms, now));
    }

    pub fn seeked(&mut self, now: DateTime<Utc>, position_ms: u64) {
        if self.playing_since.is_some() {
            self.close_listening(now);
            self.playing_since = Some(now);
        }
        self.seek_count += 1;
        self.last_position_ms = position_ms;
        self.actions
            .push(action(PlayLogActionKind::Seek, position_ms, now));
    }

    /// Close all open intervals. Idempotent.
    pub fn finish(&mut self, now: DateTime<Utc>, position_ms: u64) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.close_stall(now);
        self.close_listening(now);
        self.last_position_ms = position_ms;
        self.actions
            .push(action(PlayLogActionKind::Stop, position_ms, now));
    }

    fn close_stall(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.stalled_since.take() {
            self.stall_duration_ms += elapsed_ms(since, now);
        }
    }

    fn close_listening(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.playing_since.take() {
            self.listened_ms += elapsed_ms(since, now);
        }
    }
}

fn action(kind: PlayLogActionKind, position_ms: u64, timestamp: DateTime<Utc>) -> PlayLogAction {
    PlayLogAction {
        kind,
        position_ms,
        timestamp,
    }
}

fn elapsed_ms(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    u64::try_from((now - since).num_milliseconds()).unwrap_or(0)
}
