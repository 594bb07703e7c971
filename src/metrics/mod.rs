//! Metric Timer Log
//!
//! A process-wide, append-only metrics sink. Each event is one
//! tab-separated line:
//!
//! ```text
//! <timestamp-ms> \t <thread-id> \t <EVENT> \t <label>
//! ```
//!
//! with `EVENT` one of `START`, `END` or `MARK`. Timers are looked up by
//! name from a lazily-initialised registry and share a single writer. The
//! sink is write-only and best-effort: I/O failures are logged and
//! swallowed, never propagated, and nothing here sits on the repair
//! critical path.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::warn;

/// Default metrics file, relative to the working directory.
pub const DEFAULT_METRICS_PATH: &str = "metrics.txt";

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);

#[derive(Default)]
struct Registry {
    /// Shared writer; `None` before first use and after `shutdown`
    sink: Mutex<SinkState>,
    /// Named timers handed out so far
    timers: DashMap<String, MetricTimer>,
}

#[derive(Default)]
enum SinkState {
    #[default]
    Unopened,
    Open(Arc<Mutex<BufWriter<File>>>),
    Closed,
}

/// Route metric output to `path`, creating or appending to the file.
///
/// Without an explicit `init`, the first recorded event opens
/// [`DEFAULT_METRICS_PATH`]. Calling `init` again redirects subsequent
/// events, including those of already-created timers.
pub fn init(path: impl AsRef<Path>) {
    let state = match open_writer(path.as_ref()) {
        Some(writer) => SinkState::Open(writer),
        None => SinkState::Closed,
    };
    *REGISTRY.sink.lock() = state;
}

/// Fetch or create the named timer.
pub fn timer(name: &str) -> MetricTimer {
    if let Some(existing) = REGISTRY.timers.get(name) {
        return existing.clone();
    }
    REGISTRY
        .timers
        .entry(name.to_string())
        .or_insert_with(|| MetricTimer {
            name: Arc::new(name.to_string()),
        })
        .clone()
}

/// Flush and close the sink. Later events are dropped until [`init`] is
/// called again.
pub fn shutdown() {
    let mut guard = REGISTRY.sink.lock();
    if let SinkState::Open(sink) = &*guard {
        if let Err(error) = sink.lock().flush() {
            warn!(%error, "metrics flush on shutdown failed");
        }
    }
    *guard = SinkState::Closed;
}

fn open_writer(path: &Path) -> Option<Arc<Mutex<BufWriter<File>>>> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(Arc::new(Mutex::new(BufWriter::new(file)))),
        Err(error) => {
            warn!(path = %path.display(), %error, "metrics sink unavailable");
            None
        }
    }
}

/// Resolve the current sink, lazily opening the default path.
fn current_sink() -> Option<Arc<Mutex<BufWriter<File>>>> {
    let mut guard = REGISTRY.sink.lock();
    match &*guard {
        SinkState::Open(sink) => Some(Arc::clone(sink)),
        SinkState::Closed => None,
        SinkState::Unopened => match open_writer(Path::new(DEFAULT_METRICS_PATH)) {
            Some(sink) => {
                *guard = SinkState::Open(Arc::clone(&sink));
                Some(sink)
            }
            None => {
                *guard = SinkState::Closed;
                None
            }
        },
    }
}

/// A named timer appending `START`/`END`/`MARK` events to the shared sink.
#[derive(Clone)]
pub struct MetricTimer {
    name: Arc<String>,
}

impl MetricTimer {
    /// Record the start of the labelled operation.
    pub fn start(&self, label: &str) {
        self.append("START", label);
    }

    /// Record the end of the labelled operation.
    pub fn end(&self, label: &str) {
        self.append("END", label);
    }

    /// Record a point event.
    pub fn mark(&self, label: &str) {
        self.append("MARK", label);
    }

    fn append(&self, event: &str, label: &str) {
        let Some(sink) = current_sink() else {
            return;
        };
        let timestamp = Utc::now().timestamp_millis();
        let thread = format!("{:?}", std::thread::current().id());
        let mut writer = sink.lock();
        let result = writeln!(writer, "{}\t{}\t{}\t{}", timestamp, thread, event, label)
            .and_then(|_| writer.flush());
        if let Err(error) = result {
            warn!(timer = %self.name, %error, "metrics append failed");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
