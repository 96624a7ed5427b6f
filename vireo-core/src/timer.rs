use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use vireo_model::{ScanId, ScanMode};

/// What a timer subscription fires for: a registered autoscan directory or
/// a periodic online-service refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerParameter {
    Autoscan { mode: ScanMode, scan_id: ScanId },
    OnlineContent { service_id: String },
}

/// Interval timer driving timed autoscans and online-service refreshes.
/// Each subscription runs as its own tokio task and delivers its parameter
/// through a channel the core drains on the worker side.
pub struct ScanTimer {
    tx: mpsc::UnboundedSender<TimerParameter>,
    subscriptions: Mutex<HashMap<TimerParameter, JoinHandle<()>>>,
}

impl ScanTimer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerParameter>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                subscriptions: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    /// Subscribe a parameter. `once` fires a single shot after `period`;
    /// otherwise the parameter fires every `period`, first shot one period
    /// from now. Re-subscribing an already known parameter replaces the
    /// old cadence.
    pub fn subscribe(&self, period: Duration, parameter: TimerParameter, once: bool) {
        let tx = self.tx.clone();
        let fired = parameter.clone();
        let handle = tokio::spawn(async move {
            if once {
                tokio::time::sleep(period).await;
                let _ = tx.send(fired);
                return;
            }
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if tx.send(fired.clone()).is_err() {
                    break;
                }
            }
        });
        let mut subscriptions = self.subscriptions.lock().expect("timer subscriptions poisoned");
        if let Some(previous) = subscriptions.insert(parameter, handle) {
            previous.abort();
        }
    }

    /// Drop a subscription. Unknown parameters are ignored.
    pub fn unsubscribe(&self, parameter: &TimerParameter) {
        let mut subscriptions = self.subscriptions.lock().expect("timer subscriptions poisoned");
        if let Some(handle) = subscriptions.remove(parameter) {
            debug!(?parameter, "removing timer subscription");
            handle.abort();
        }
    }

    /// Tear down every subscription.
    pub fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.lock().expect("timer subscriptions poisoned");
        for (_, handle) in subscriptions.drain() {
            handle.abort();
        }
    }
}
