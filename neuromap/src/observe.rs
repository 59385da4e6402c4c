// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Structured events reported by the timed steps of the lowering pipeline.
//!
//! Components receive an observer instead of writing to the log directly, so
//! that callers can collect timings and messages without any log setup.

use log::Level;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub severity: Level,
    /// Pipeline step that emitted the event.
    pub scope: &'static str,
    pub message: String,
    pub duration: Option<Duration>,
}

impl Event {
    pub fn new(severity: Level, scope: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity,
            scope,
            message: message.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

pub trait Observer {
    fn observe(&self, event: Event);
}

pub type SharedObserver = Arc<dyn Observer + Send + Sync>;

/// Forwards events to the `log` facade, using the scope as log target.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogObserver;

impl Observer for LogObserver {
    fn observe(&self, event: Event) {
        match event.duration {
            Some(duration) => log::log!(
                target: event.scope,
                event.severity,
                "{} ({:?})",
                event.message,
                duration
            ),
            None => log::log!(target: event.scope, event.severity, "{}", event.message),
        }
    }
}

pub fn log_observer() -> SharedObserver {
    Arc::new(LogObserver)
}

/// Keeps every event, e.g., to inspect timings after a run.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn events_in(&self, scope: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| event.scope == scope)
            .collect()
    }
}

impl Observer for RecordingObserver {
    fn observe(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
