// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

//! Startup, shutdown and supervision of the long-running server tasks.

use std::future::Future;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Starting,
    Running,
    Draining,
    Stopped,
}

/// Owns every supervised task and the token that tells them to stop.
///
/// Cancelling the token, by a signal or by [`Handle::terminate`], moves
/// the coordinator to [`Phase::Draining`]. So does the exit of any task.
/// Tasks then get `grace` to finish before they are aborted.
#[derive(Debug)]
pub struct Lifecycle {
    token: CancellationToken,
    phase: watch::Sender<Phase>,
    grace: Duration,
    tasks: JoinSet<(&'static str, anyhow::Result<()>)>,
}

/// A cheap, cloneable view of a [`Lifecycle`].
#[derive(Clone, Debug)]
pub struct Handle {
    token: CancellationToken,
    phase: watch::Receiver<Phase>,
}

impl Lifecycle {
    pub fn new(grace: Duration) -> Self {
        let (phase, _) = watch::channel(Phase::Starting);
        Self {
            token: CancellationToken::new(),
            phase,
            grace,
            tasks: JoinSet::new(),
        }
    }

    /// The shutdown broadcast; every task should stop once it fires.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn handle(&self) -> Handle {
        Handle {
            token: self.token.clone(),
            phase: self.phase.subscribe(),
        }
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.tasks
            .spawn(async move { (name, task.await) }.in_current_span());
    }

    fn enter(&self, phase: Phase) {
        info!(?phase, "lifecycle");
        self.phase.send_replace(phase);
    }

    /// Runs until shutdown is requested or a task exits, then drains.
    ///
    /// Returns the first task error, if any, or an error if the grace
    /// period ran out.
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.enter(Phase::Running);

        let mut failure = None;
        tokio::select! {
            _ = self.token.cancelled() => info!("shutdown requested"),
            Some(joined) = self.tasks.join_next() => {
                failure = Self::reap(joined);
                if failure.is_none() {
                    warn!("a task stopped without a shutdown request");
                }
            }
        }

        self.enter(Phase::Draining);
        self.token.cancel();

        let tasks = &mut self.tasks;
        let drained = timeout(self.grace, async {
            let mut first = None;
            while let Some(joined) = tasks.join_next().await {
                let error = Self::reap(joined);
                first = first.or(error);
            }
            first
        })
        .await;

        let result = match drained {
            Ok(error) => match failure.or(error) {
                Some(e) => Err(e),
                None => Ok(()),
            },
            Err(_) => {
                warn!(
                    remaining = self.tasks.len(),
                    grace = ?self.grace,
                    "grace period expired, aborting"
                );
                self.tasks.shutdown().await;
                Err(failure.unwrap_or_else(|| anyhow!("shutdown grace period expired")))
            }
        };

        self.enter(Phase::Stopped);
        result
    }

    fn reap(
        joined: Result<(&'static str, anyhow::Result<()>), tokio::task::JoinError>,
    ) -> Option<anyhow::Error> {
        match joined {
            Ok((name, Ok(()))) => {
                info!(task = name, "stopped");
                None
            }
            Ok((name, Err(e))) => {
                error!(task = name, "failed: {e:#}");
                Some(e.context(format!("{name} failed")))
            }
            Err(e) => {
                error!("task panicked: {e}");
                Some(anyhow!("task panicked: {e}"))
            }
        }
    }
}

impl Handle {
    /// Requests shutdown. Repeated calls are harmless.
    pub fn terminate(&self) {
        self.token.cancel();
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Waits until the coordinator has reached `phase` or a later one.
    pub async fn wait_for(&mut self, phase: Phase) {
        let _ = self.phase.wait_for(|current| *current >= phase).await;
    }
}
