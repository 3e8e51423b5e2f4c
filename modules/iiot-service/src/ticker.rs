//! Fixed-interval timers for the publisher and mirror loops.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

#[async_trait]
pub trait Ticker: Send {
    /// Resolves at the next tick. Returns `false` once the ticker can never
    /// fire again.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticker. The first tick completes immediately.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Self::new(Duration::from_secs_f64(secs.max(0.001)))
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticker that fires only when its [`ManualTrigger`] is pulled.
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<()>,
}

#[derive(Clone)]
pub struct ManualTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl ManualTrigger {
    pub fn fire(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl ManualTicker {
    pub fn pair() -> (ManualTrigger, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ManualTrigger { tx }, Self { rx })
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        self.rx.recv().await.is_some()
    }
}
