use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::observer::ScanObserver;
use crate::types::ProgressEvent;

/// Producer half of the progress relay, owned by the scanner while it runs.
///
/// The channel is unbounded: events are never dropped or coalesced and the
/// producer never waits on a slow observer.
#[derive(Clone, Debug)]
pub struct ProgressSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressSender {
    pub fn send(&self, event: ProgressEvent) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.tx.send(event);
    }

    pub fn send_percent(&self, percent: f32) {
        self.send(ProgressEvent::from_percent(percent));
    }
}

/// Drain task forwarding relay events to the observer.
///
/// It ends once every `ProgressSender` clone has been dropped and the queue is empty.
#[derive(Debug)]
pub struct ProgressDrain {
    handle: JoinHandle<usize>,
}

impl ProgressDrain {
    /// Wait for the producer side to close and all events to be forwarded.
    /// Returns how many events reached the observer.
    pub async fn finish(self) -> usize {
        self.handle.await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "progress drain task failed");
            0
        })
    }
}

/// Create a relay whose drain task forwards to `observer`. Must be called inside a tokio runtime.
pub fn relay(observer: Arc<dyn ScanObserver>) -> (ProgressSender, ProgressDrain) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
    let handle = tokio::spawn(async move {
        let mut forwarded = 0usize;
        while let Some(event) = rx.recv().await {
            observer.on_progress(event);
            forwarded += 1;
        }
        forwarded
    });
    (ProgressSender { tx }, ProgressDrain { handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<f64>>,
    }

    impl ScanObserver for Collect {
        fn on_progress(&self, event: ProgressEvent) {
            self.seen.lock().unwrap().push(event.fraction());
        }
        fn on_log(&self, _text: &str) {}
        fn on_finished(&self) {}
    }

    #[tokio::test]
    async fn forwards_in_emission_order_and_closes_on_drop() {
        let obs = Arc::new(Collect::default());
        let (tx, drain) = relay(obs.clone());
        for pct in [10.0, 30.0, 20.0, 100.0] {
            tx.send_percent(pct);
        }
        drop(tx);
        assert_eq!(drain.finish().await, 4);
        assert_eq!(*obs.seen.lock().unwrap(), vec![0.1, 0.3, 0.2, 1.0]);
    }

    #[tokio::test]
    async fn waits_for_every_clone() {
        let obs = Arc::new(Collect::default());
        let (tx, drain) = relay(obs.clone());
        let worker = tx.clone();
        drop(tx);
        let producer = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            worker.send_percent(50.0);
        });
        assert_eq!(drain.finish().await, 1);
        producer.await.unwrap();
        assert_eq!(*obs.seen.lock().unwrap(), vec![0.5]);
    }
}
