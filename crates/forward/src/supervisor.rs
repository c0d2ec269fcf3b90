//! Connect/run/reconnect lifecycle around [`run_cycle`].

use std::sync::Arc;

use {
    chanrelay_config::{ConfigLoader, RelayConfig, SupervisorConfig},
    chanrelay_cursor::CursorStore,
    tokio::{sync::Notify, time::sleep},
    tokio_util::sync::CancellationToken,
    tracing::{error, info, warn},
};

#[cfg(feature = "metrics")]
use chanrelay_metrics::{counter, supervisor as supervisor_metrics};

use crate::{
    counters::Counters,
    error::{Error, Result},
    platform::Platform,
    relay::run_cycle,
};

/// Where the supervisor reads its config snapshot before each cycle.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> Result<RelayConfig>;
}

impl ConfigSource for ConfigLoader {
    fn snapshot(&self) -> Result<RelayConfig> {
        self.load().map_err(|e| Error::config(format!("{e:#}")))
    }
}

impl ConfigSource for RelayConfig {
    fn snapshot(&self) -> Result<RelayConfig> {
        Ok(self.clone())
    }
}

pub struct Supervisor {
    platform: Arc<dyn Platform>,
    store: Arc<dyn CursorStore>,
    config: Arc<dyn ConfigSource>,
    counters: Arc<Counters>,
    reload: Arc<Notify>,
    cancel: CancellationToken,
    stale_session_faults: u32,
    session_resets: u32,
}

impl Supervisor {
    pub fn new(
        platform: Arc<dyn Platform>,
        store: Arc<dyn CursorStore>,
        config: Arc<dyn ConfigSource>,
        counters: Arc<Counters>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            platform,
            store,
            config,
            counters,
            reload: Arc::new(Notify::new()),
            cancel,
            stale_session_faults: 0,
            session_resets: 0,
        }
    }

    /// Notifying this ends the current cycle; the next one starts right away
    /// from a fresh config snapshot.
    #[must_use]
    pub fn reload_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.reload)
    }

    #[must_use]
    pub fn counters(&self) -> Arc<Counters> {
        Arc::clone(&self.counters)
    }

    /// Consecutive stale-session faults since the last reset.
    #[must_use]
    pub fn stale_session_faults(&self) -> u32 {
        self.stale_session_faults
    }

    #[must_use]
    pub fn session_resets(&self) -> u32 {
        self.session_resets
    }

    /// Run cycles until cancelled.
    ///
    /// Returns an error only when the platform rejects our credentials.
    pub async fn run(&mut self) -> Result<()> {
        let mut policy = SupervisorConfig::default();
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let config = match self.config.snapshot() {
                Ok(config) => config,
                Err(e) => {
                    error!(error = %e, "cannot load configuration");
                    if !self.pause(&policy).await {
                        break;
                    }
                    continue;
                },
            };
            policy = config.supervisor.clone();

            match self.cycle(&config).await {
                Ok(()) if self.cancel.is_cancelled() => break,
                Ok(()) => {
                    self.stale_session_faults = 0;
                    info!("cycle ended on reload, restarting");
                    continue;
                },
                Err(e) if e.is_auth() => {
                    error!(error = %e, "authentication rejected, giving up");
                    return Err(e);
                },
                Err(e) => self.on_fault(&e, &policy).await,
            }

            #[cfg(feature = "metrics")]
            counter!(supervisor_metrics::RECONNECTS_TOTAL).increment(1);
            if !self.pause(&policy).await {
                break;
            }
        }
        info!("supervisor stopped");
        Ok(())
    }

    async fn cycle(&self, config: &RelayConfig) -> Result<()> {
        let cycle_cancel = self.cancel.child_token();
        let cycle = run_cycle(
            Arc::clone(&self.platform),
            Arc::clone(&self.store),
            Arc::clone(&self.counters),
            config,
            cycle_cancel.clone(),
        );
        tokio::pin!(cycle);

        tokio::select! {
            result = &mut cycle => result,
            () = self.reload.notified() => {
                info!("configuration reload requested");
                cycle_cancel.cancel();
                cycle.await
            },
        }
    }

    async fn on_fault(&mut self, err: &Error, policy: &SupervisorConfig) {
        if !err.is_stale_session() {
            warn!(
                error = %err,
                backoff_secs = policy.backoff_secs,
                "run cycle failed, reconnecting"
            );
            return;
        }

        self.stale_session_faults += 1;
        warn!(
            error = %err,
            consecutive = self.stale_session_faults,
            threshold = policy.session_reset_threshold,
            "stale session fault"
        );
        if self.stale_session_faults < policy.session_reset_threshold.max(1) {
            return;
        }

        info!(
            faults = self.stale_session_faults,
            "resetting platform session"
        );
        match self.platform.reset_session().await {
            Ok(()) => {
                self.session_resets += 1;
                #[cfg(feature = "metrics")]
                counter!(supervisor_metrics::SESSION_RESETS_TOTAL).increment(1);
            },
            Err(e) => error!(error = %e, "session reset failed"),
        }
        self.stale_session_faults = 0;
    }

    /// Back off before the next attempt. `false` when shutdown interrupted.
    async fn pause(&self, policy: &SupervisorConfig) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = sleep(policy.backoff()) => true,
        }
    }
}
