//! Tracing capture shared by unit tests.

use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Captures (level, keeper, message) of every event
#[derive(Clone, Default)]
pub(crate) struct CaptureLayer {
    lines: Arc<Mutex<Vec<(Level, String, String)>>>,
}

#[derive(Default)]
struct LineVisitor {
    keeper: String,
    message: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "keeper" {
            self.keeper = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        match field.name() {
            "message" => self.message = format!("{value:?}"),
            "keeper" => self.keeper = format!("{value:?}"),
            _ => {}
        }
    }
}

impl CaptureLayer {
    /// Snapshot of captured (level, keeper, message) triples
    pub(crate) fn lines(&self) -> Vec<(Level, String, String)> {
        self.lines.lock().unwrap().clone()
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = LineVisitor::default();
        event.record(&mut visitor);
        self.lines
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.keeper, visitor.message));
    }
}
