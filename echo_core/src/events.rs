use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// Default ring capacity before the oldest events are evicted.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One operator-facing log line. Ordering along the event stream is the
/// only guarantee tied to it.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

impl LogEvent {
    pub fn now(text: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A task has been accepted for launch; usable to toggle affordances.
    TaskStarted,
    Log(LogEvent),
    /// The worker finished; carries the terminal failure, if any.
    TaskEnded { error: Option<String> },
}

/// Producer half of the event channel. Cloned freely into worker tasks;
/// emitting never blocks on the consumer's processing speed.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<EngineEvent>,
}

/// Consumer half; exactly one per channel, drains in FIFO order on its own
/// execution context.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<EngineEvent>,
}

/// Creates a sink/stream pair over a bounded ring. When producers outrun
/// the consumer by more than `capacity` events, the oldest events are
/// evicted (capacity is rounded up to the next power of two).
pub fn channel(capacity: usize) -> (EventSink, EventStream) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (EventSink { tx }, EventStream { rx })
}

impl EventSink {
    /// Enqueues a timestamped log line and returns immediately.
    pub fn log(&self, text: impl Into<String>) {
        self.send(EngineEvent::Log(LogEvent::now(text)));
    }

    pub(crate) fn send(&self, event: EngineEvent) {
        // Err means the stream is gone; events are discarded from then on.
        let _ = self.tx.send(event);
    }
}

impl EventStream {
    /// Receives the next event. Returns `None` once every sink is dropped
    /// and the ring is drained. An evicted span is reported to the consumer
    /// as a synthesized log line carrying the drop count.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(missed)) => Some(EngineEvent::Log(
                LogEvent::now(format!("Event stream lagged, dropped {missed} oldest events.")),
            )),
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain_logs(stream: &mut EventStream) -> Vec<String> {
        let mut texts = Vec::new();
        while let Some(event) = stream.recv().await {
            if let EngineEvent::Log(log) = event {
                texts.push(log.text);
            }
        }
        texts
    }

    #[tokio::test]
    async fn test_events_arrive_in_emission_order() {
        let (sink, mut stream) = channel(64);
        for i in 0..10 {
            sink.log(format!("event {i}"));
        }
        drop(sink);

        let texts = drain_logs(&mut stream).await;
        let expected: Vec<String> = (0..10).map(|i| format!("event {i}")).collect();
        assert_eq!(texts, expected);
    }

    // Retention policy: the ring keeps the newest `capacity` events and
    // drops the oldest, reporting the evicted span to the consumer.
    #[tokio::test]
    async fn test_oldest_events_dropped_when_consumer_lags() {
        let (sink, mut stream) = channel(4);
        for i in 0..10 {
            sink.log(format!("event {i}"));
        }
        drop(sink);

        let first = stream.recv().await.unwrap();
        match first {
            EngineEvent::Log(log) => {
                assert!(log.text.contains("dropped 6 oldest events"), "got: {}", log.text)
            }
            other => panic!("expected lag notice, got {other:?}"),
        }

        let texts = drain_logs(&mut stream).await;
        let expected: Vec<String> = (6..10).map(|i| format!("event {i}")).collect();
        assert_eq!(texts, expected);
    }

    #[tokio::test]
    async fn test_per_producer_order_survives_concurrent_emission() {
        let (sink, mut stream) = channel(4096);

        let mut handles = Vec::new();
        for producer in 0..8u32 {
            let sink = sink.clone();
            handles.push(std::thread::spawn(move || {
                for seq in 0..100u32 {
                    sink.log(format!("{producer}:{seq}"));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        drop(sink);

        let texts = drain_logs(&mut stream).await;
        assert_eq!(texts.len(), 800);

        let mut last_seq = [None::<u32>; 8];
        for text in texts {
            let (producer, seq) = text.split_once(':').unwrap();
            let producer: usize = producer.parse().unwrap();
            let seq: u32 = seq.parse().unwrap();
            if let Some(prev) = last_seq[producer] {
                assert!(seq > prev, "producer {producer} reordered: {prev} then {seq}");
            }
            last_seq[producer] = Some(seq);
        }
    }

    #[tokio::test]
    async fn test_stream_ends_when_all_sinks_are_gone() {
        let (sink, mut stream) = channel(16);
        let clone = sink.clone();
        sink.log("one");
        drop(sink);
        clone.log("two");
        drop(clone);

        assert!(matches!(stream.recv().await, Some(EngineEvent::Log(_))));
        assert!(matches!(stream.recv().await, Some(EngineEvent::Log(_))));
        assert!(stream.recv().await.is_none());
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&EngineEvent::TaskEnded { error: None }).unwrap();
        assert!(json.contains("\"event\":\"task_ended\""));

        let json = serde_json::to_string(&EngineEvent::Log(LogEvent::now("hello"))).unwrap();
        assert!(json.contains("\"text\":\"hello\""));
        assert!(json.contains("timestamp"));
    }
}
