use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A warn+ log record kept in memory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WarningRecord {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: serde_json::Map<String, serde_json::Value>,
    pub session_id: Option<String>,
}

/// Bounded ring of the most recent warn+ records.
pub struct WarningLog {
    capacity: usize,
    records: Mutex<VecDeque<WarningRecord>>,
    total: AtomicUsize,
}

impl WarningLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: Mutex::new(VecDeque::new()),
            total: AtomicUsize::new(0),
        }
    }

    fn push(&self, record: WarningRecord) {
        self.total.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    pub fn snapshot(&self) -> Vec<WarningRecord> {
        self.records.lock().iter().cloned().collect()
    }

    /// Number of records seen, including ones evicted from the ring.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

/// tracing Layer that records warn+ events into a [`WarningLog`].
pub struct WarningLayer {
    log: Arc<WarningLog>,
}

impl WarningLayer {
    pub fn new(log: Arc<WarningLog>) -> Self {
        Self { log }
    }
}

/// Session id captured from a span, stored in span extensions.
struct SpanSession(String);

struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    session_id: Option<String>,
}

impl FieldVisitor {
    fn new() -> Self {
        Self {
            message: None,
            fields: serde_json::Map::new(),
            session_id: None,
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let val = format!("{:?}", value);
        match field.name() {
            "message" => self.message = Some(val),
            "session_id" => self.session_id = Some(val.trim_matches('"').to_string()),
            name => {
                self.fields.insert(name.to_string(), serde_json::Value::String(val));
            }
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        match field.name() {
            "message" => self.message = Some(value.to_string()),
            "session_id" => self.session_id = Some(value.to_string()),
            name => {
                self.fields
                    .insert(name.to_string(), serde_json::Value::String(value.to_string()));
            }
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Number(value.into()));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), serde_json::Value::Bool(value));
    }
}

impl<S> Layer<S> for WarningLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::new();
        event.record(&mut visitor);

        if visitor.session_id.is_none() {
            if let Some(scope) = ctx.event_scope(event) {
                for span in scope {
                    if let Some(s) = span.extensions().get::<SpanSession>() {
                        visitor.session_id = Some(s.0.clone());
                        break;
                    }
                }
            }
        }

        self.log.push(WarningRecord {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields: visitor.fields,
            session_id: visitor.session_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::new();
        attrs.record(&mut visitor);

        if let (Some(session_id), Some(span)) = (visitor.session_id, ctx.span(id)) {
            span.extensions_mut().insert(SpanSession(session_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::layer::SubscriberExt;

    fn capture<F: FnOnce()>(capacity: usize, f: F) -> Arc<WarningLog> {
        let log = Arc::new(WarningLog::new(capacity));
        let subscriber = tracing_subscriber::registry().with(WarningLayer::new(log.clone()));
        tracing::subscriber::with_default(subscriber, f);
        log
    }

    #[test]
    fn only_warn_and_error_are_kept() {
        let log = capture(8, || {
            tracing::info!("iteration started");
            tracing::debug!("noise");
            tracing::warn!(tokens = 1300u64, "forced truncation");
            tracing::error!("checkpoint write failed");
        });
        let records = log.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].message, "forced truncation");
        assert_eq!(records[0].fields["tokens"], 1300);
        assert_eq!(records[1].level, "ERROR");
    }

    #[test]
    fn session_id_is_inherited_from_span() {
        let log = capture(8, || {
            let span = tracing::info_span!("session", session_id = "sess_abc");
            let _enter = span.enter();
            tracing::warn!("degraded mode");
        });
        let records = log.snapshot();
        assert_eq!(records[0].session_id.as_deref(), Some("sess_abc"));
    }

    #[test]
    fn ring_evicts_oldest_but_counts_all() {
        let log = capture(2, || {
            for i in 0..5u64 {
                tracing::warn!(n = i, "retry");
            }
        });
        let records = log.snapshot();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fields["n"], 3);
        assert_eq!(log.total(), 5);
    }
}
