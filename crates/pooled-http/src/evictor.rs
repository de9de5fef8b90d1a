//! Background idle connection eviction

use std::{
    panic::{self, AssertUnwindSafe},
    time::Duration,
};

use tokio::{
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument, Span};

use crate::pool::ConnectionPool;

/// Periodic task closing expired and idle pooled connections
///
/// The task stops when [`IdleEvictor::stop`] is called or the evictor is
/// dropped.
pub struct IdleEvictor {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl IdleEvictor {
    /// Start evicting every `interval`; a zero interval starts nothing
    pub fn start(
        component_id: &str,
        pool: ConnectionPool,
        interval: Duration,
        idle_timeout: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        if interval.is_zero() {
            tracing::warn!(component = component_id, "Monitor interval is 0, idle eviction disabled");
            return Self {
                cancel,
                handle: None,
            };
        }

        let span = info_span!("http_client_pool_monitor", component = component_id);
        let handle = spawn_schedule(interval, cancel.clone(), span, move || {
            let expired = pool.close_expired();
            let idle = pool.close_idle(idle_timeout);
            (expired, idle)
        });
        debug!(component = component_id, ?interval, ?idle_timeout, "Idle evictor started");

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancel the schedule; the current cycle, if any, completes first
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for IdleEvictor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Run `cycle` every `interval` until `token` is cancelled
fn spawn_schedule<F>(
    interval: Duration,
    token: CancellationToken,
    span: Span,
    cycle: F,
) -> JoinHandle<()>
where
    F: Fn() -> (usize, usize) + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => run_cycle(&cycle),
                }
            }
            debug!("Idle evictor stopped");
        }
        .instrument(span),
    )
}

/// One eviction pass; a panic is logged and only skips this pass
fn run_cycle<F>(cycle: &F)
where
    F: Fn() -> (usize, usize),
{
    match panic::catch_unwind(AssertUnwindSafe(cycle)) {
        Ok((expired, idle)) => debug!(expired, idle, "Closed expired and idle connections"),
        Err(_) => error!("Idle eviction cycle failed, skipping until next tick"),
    }
}
