//! Records `tracing` events so tests can assert on their fields.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tracing::{
    Event,
    Level,
    Metadata,
    Subscriber,
    field::{Field, Visit},
    span::{Attributes, Id, Record},
};

/// One captured event.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    level: Level,
    fields: HashMap<&'static str, String>,
}

impl RecordedEvent {
    /// Event level.
    #[must_use]
    pub const fn level(&self) -> Level { self.level }

    /// Field value rendered with `Debug`, strings unquoted.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> { self.fields.get(name).map(String::as_str) }
}

struct Fields<'a>(&'a mut HashMap<&'static str, String>);

impl Visit for Fields<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.0.insert(field.name(), format!("{value:?}"));
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name(), value.to_owned());
    }
}

struct Recorder {
    max_level: Level,
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl Subscriber for Recorder {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool { true }

    fn new_span(&self, _attrs: &Attributes<'_>) -> Id { Id::from_u64(1) }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let level = *event.metadata().level();
        if level > self.max_level {
            return;
        }
        let mut fields = HashMap::new();
        event.record(&mut Fields(&mut fields));
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                level,
                fields,
            });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Run `f` and return it with the events it emitted at `level` or more
/// severe.
#[must_use]
pub fn capture_at<T>(level: Level, f: impl FnOnce() -> T) -> (T, Vec<RecordedEvent>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let dispatch = tracing::Dispatch::new(Recorder {
        max_level: level,
        events: Arc::clone(&events),
    });
    let out = tracing::dispatcher::with_default(&dispatch, f);
    let recorded = std::mem::take(&mut *events.lock().unwrap_or_else(PoisonError::into_inner));
    (out, recorded)
}
