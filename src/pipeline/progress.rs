// src/pipeline/progress.rs

//! Fire-and-forget progress reporting.

use serde::Serialize;
use tokio::sync::mpsc;

/// Where a progress event originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    BioSearch,
    List,
    Following,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub source: ProgressSource,
    /// Keyword, list id or user id the event refers to
    pub query_or_list_id: String,
    pub users_found: usize,
    /// Running total for the run (unique seeds, or stored edges when crawling)
    pub total_so_far: usize,
}

impl ProgressEvent {
    pub fn new(
        source: ProgressSource,
        query_or_list_id: impl Into<String>,
        users_found: usize,
        total_so_far: usize,
    ) -> Self {
        Self {
            source,
            query_or_list_id: query_or_list_id.into(),
            users_found,
            total_so_far,
        }
    }
}

/// Sending half of a progress channel. Never blocks; a dropped receiver is ignored.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops every event.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_delivered_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.emit(ProgressEvent::new(ProgressSource::BioSearch, "rust", 3, 3));
        sink.emit(ProgressEvent::new(ProgressSource::List, "42", 2, 5));

        assert_eq!(rx.try_recv().unwrap().query_or_list_id, "rust");
        assert_eq!(rx.try_recv().unwrap().total_so_far, 5);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.emit(ProgressEvent::new(ProgressSource::Following, "1", 0, 0));
        ProgressSink::disabled().emit(ProgressEvent::new(ProgressSource::Following, "1", 0, 0));
    }
}
