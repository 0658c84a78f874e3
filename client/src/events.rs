//! Chaincode event subscription with a shutdown timer.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use avalon_logger::prelude::*;
use futures_util::StreamExt;
use tokio::sync::watch;

use crate::{
    data_model::{ChaincodeEvent, EventFilter},
    ledger::{EventSource, LedgerError},
};

/// Lifecycle of a subscription. The only transition is `Active -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Events are being delivered
    Active,
    /// No further handler call will happen
    Stopped,
}

/// Why [`EventListener::listen`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The duration elapsed
    Timer,
    /// [`StopHandle::stop`] was called
    Cancelled,
    /// The ledger closed the stream
    StreamClosed,
}

/// Outcome of a subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenReport {
    /// Number of handler calls
    pub delivered: usize,
    /// Block of the last delivered event
    pub last_block: Option<u64>,
    /// Why the subscription stopped
    pub reason: StopReason,
}

/// Failures of [`EventListener::listen`]
#[derive(thiserror::Error, Debug)]
pub enum ListenError {
    /// The subscription could not be opened
    #[error("Failed to subscribe to chaincode events")]
    Subscribe(#[source] LedgerError),
    /// The stream failed while delivering
    #[error("Event stream failed")]
    Stream(#[source] LedgerError),
    /// The block mark could not be read or written
    #[error("Block mark `{path}` is unusable")]
    BlockMark {
        /// Mark file
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: io::Error,
    },
}

/// Stops an [`EventListener`] from another task.
#[derive(Debug, Clone)]
pub struct StopHandle {
    stopped: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    /// Stop the subscription. Idempotent.
    pub fn stop(&self) {
        self.stopped.send_replace(true);
    }

    /// Current state of the subscription
    pub fn state(&self) -> SubscriptionState {
        if *self.stopped.borrow() {
            SubscriptionState::Stopped
        } else {
            SubscriptionState::Active
        }
    }
}

/// Delivers the events selected by a filter to a handler until stopped.
pub struct EventListener<S> {
    source: S,
    filter: EventFilter,
    block_mark: Option<PathBuf>,
    stop: StopHandle,
}

impl<S: EventSource> EventListener<S> {
    /// Listen to `filter` on `source`
    pub fn new(source: S, filter: EventFilter) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            source,
            filter,
            block_mark: None,
            stop: StopHandle {
                stopped: Arc::new(stopped),
            },
        }
    }

    /// Resume after the block stored at `path` and store the last delivered
    /// block there when the subscription stops.
    #[must_use]
    pub fn with_block_mark(mut self, path: impl Into<PathBuf>) -> Self {
        self.block_mark = Some(path.into());
        self
    }

    /// Handle that stops the subscription
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Current state of the subscription
    pub fn state(&self) -> SubscriptionState {
        self.stop.state()
    }

    /// Call `handler` for every matching event, in arrival order, until
    /// `duration` elapses, [`StopHandle::stop`] is called or the stream ends.
    ///
    /// The stop signal and the timer are checked before every delivery, so
    /// a burst of events can't delay the shutdown, and the handler is never
    /// called once the subscription is stopped.
    ///
    /// # Errors
    /// If the subscription can't be opened, the stream fails, or the block
    /// mark can't be used. A stream failure is reported over a block mark
    /// that could not be stored. The subscription is stopped in every case.
    pub async fn listen<F>(
        &self,
        mut handler: F,
        duration: Option<Duration>,
    ) -> Result<ListenReport, ListenError>
    where
        F: FnMut(&ChaincodeEvent),
    {
        let mut stopped = self.stop.stopped.subscribe();
        if *stopped.borrow_and_update() {
            return Ok(ListenReport {
                delivered: 0,
                last_block: None,
                reason: StopReason::Cancelled,
            });
        }

        let result = self.deliver(&mut handler, &mut stopped, duration).await;
        self.stop.stop();

        let (report, failure) = match result {
            Ok(report) => (report, None),
            Err((report, err)) => (report, Some(err)),
        };
        if let Some(block) = report.last_block {
            if let Err(mark_err) = self.write_block_mark(block) {
                // The stream failure takes precedence over the mark
                let Some(err) = failure else {
                    return Err(mark_err);
                };
                error!(error = ?mark_err, "Failed to store the block mark");
                return Err(err);
            }
        }
        info!(
            delivered = report.delivered,
            reason = ?report.reason,
            "Event subscription stopped"
        );
        failure.map_or(Ok(report), Err)
    }

    async fn deliver<F>(
        &self,
        handler: &mut F,
        stopped: &mut watch::Receiver<bool>,
        duration: Option<Duration>,
    ) -> Result<ListenReport, (ListenReport, ListenError)>
    where
        F: FnMut(&ChaincodeEvent),
    {
        let mut report = ListenReport {
            delivered: 0,
            last_block: None,
            reason: StopReason::StreamClosed,
        };

        let mut filter = self.filter.clone();
        match self.read_block_mark() {
            Ok(Some(mark)) => {
                let resume = mark.saturating_add(1);
                filter.start_block = Some(filter.start_block.map_or(resume, |start| start.max(resume)));
            }
            Ok(None) => {}
            Err(err) => return Err((report, err)),
        }

        let mut events = match self.source.subscribe(&filter).await {
            Ok(events) => events,
            Err(err) => return Err((report, ListenError::Subscribe(err))),
        };
        info!(
            chaincode = %filter.chaincode,
            event = %filter.event_name,
            start_block = ?filter.start_block,
            "Subscribed to chaincode events"
        );

        let timer = async {
            match duration {
                Some(duration) => tokio::time::sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timer);

        report.reason = loop {
            tokio::select! {
                biased;

                changed = stopped.changed() => {
                    if changed.is_err() || *stopped.borrow() {
                        break StopReason::Cancelled;
                    }
                }
                () = &mut timer => break StopReason::Timer,
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        // Lets the timer driver run under a never-idle stream
                        tokio::task::consume_budget().await;
                        if *stopped.borrow() {
                            break StopReason::Cancelled;
                        }
                        if !filter.matches(&event) {
                            trace!(?event, "Skipping event outside the filter");
                            continue;
                        }
                        debug!(block = event.block_number, tx = %event.tx_id, "Delivering event");
                        handler(&event);
                        report.delivered += 1;
                        report.last_block = Some(event.block_number);
                    }
                    Some(Err(err)) => {
                        warn!(%err, "Event stream failed");
                        return Err((report, ListenError::Stream(err)));
                    }
                    None => break StopReason::StreamClosed,
                },
            }
        };
        Ok(report)
    }

    fn read_block_mark(&self) -> Result<Option<u64>, ListenError> {
        let Some(path) = &self.block_mark else {
            return Ok(None);
        };
        match fs::read_to_string(path) {
            Ok(content) => content
                .trim()
                .parse()
                .map(Some)
                .map_err(|err| block_mark_error(path, io::Error::new(io::ErrorKind::InvalidData, err))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(block_mark_error(path, err)),
        }
    }

    fn write_block_mark(&self, block: u64) -> Result<(), ListenError> {
        let Some(path) = &self.block_mark else {
            return Ok(());
        };
        fs::write(path, format!("{block}\n")).map_err(|err| block_mark_error(path, err))
    }
}

fn block_mark_error(path: &Path, source: io::Error) -> ListenError {
    ListenError::BlockMark {
        path: path.to_owned(),
        source,
    }
}
