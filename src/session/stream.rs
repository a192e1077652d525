//! Stream session implementation.

use crate::config::RelayConfig;
use crate::events::{ReplayEngine, Watermark};
use crate::registry::{ConnectionHandle, ConnectionRegistry, Frame};
use crate::types::{ConnectionId, Event, Timestamp};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle of one streaming connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Replaying,
    Live,
    Closed,
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The client went away; a frame write or the transport itself failed.
    ClientGone,
    /// The server is shutting down.
    Shutdown,
    /// The registry slot disappeared underneath the session.
    Unregistered,
}

/// Timing knobs for a session.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub heartbeat_interval: Duration,
    pub replay_frame_delay: Duration,
}

impl From<&RelayConfig> for SessionSettings {
    fn from(config: &RelayConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval,
            replay_frame_delay: config.replay_frame_delay,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

/// What a finished session did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub connection_id: Option<ConnectionId>,
    /// Events replayed, if a replay ran to completion.
    pub replayed: Option<usize>,
    pub frames_sent: usize,
    pub close_reason: CloseReason,
}

/// Registry slot held by a session; released exactly once.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    handle: ConnectionHandle,
    released: bool,
}

impl Registration {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.registry
                .unregister(&self.handle.subject_id, self.handle.id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

/// One client connection, from handshake to close.
pub struct StreamSession {
    subject: String,
    watermark: Watermark,
    state: SessionState,
    registry: Arc<ConnectionRegistry>,
    replay: ReplayEngine,
    settings: SessionSettings,
    transport: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
    registration: Option<Registration>,
    frames_sent: usize,
    replayed: Option<usize>,
}

impl StreamSession {
    pub fn new(
        subject: impl Into<String>,
        watermark: Watermark,
        registry: Arc<ConnectionRegistry>,
        replay: ReplayEngine,
        settings: SessionSettings,
        transport: mpsc::Sender<Frame>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            subject: subject.into(),
            watermark,
            state: SessionState::Connecting,
            registry,
            replay,
            settings,
            transport,
            shutdown,
            registration: None,
            frames_sent: 0,
            replayed: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session until the client leaves or the server shuts down.
    pub async fn run(mut self) -> SessionSummary {
        let reason = self.drive().await;
        self.close(reason)
    }

    async fn drive(&mut self) -> CloseReason {
        // --- Connecting ---
        let handle = self.registry.register(&self.subject);
        let connection_id = handle.id;
        self.registration = Some(Registration {
            registry: Arc::clone(&self.registry),
            handle,
            released: false,
        });
        info!(subject = %self.subject, %connection_id, "stream opened");

        let ack = Frame::Connection {
            connection_id,
            subject_id: self.subject.clone(),
            timestamp: Timestamp::now(),
        };
        if let Err(reason) = self.deliver(ack).await {
            return reason;
        }
        self.state = SessionState::Streaming;

        // --- Replaying ---
        if self.watermark.requested() {
            if let Err(reason) = self.replay_missed(connection_id).await {
                return reason;
            }
        }

        // --- Live ---
        self.state = SessionState::Live;
        self.live(connection_id).await
    }

    async fn replay_missed(&mut self, connection_id: ConnectionId) -> Result<(), CloseReason> {
        self.state = SessionState::Replaying;
        let since = self.watermark.resolve(Timestamp::now(), self.replay.window());

        self.deliver(Frame::Reconnection {
            connection_id,
            since,
            timestamp: Timestamp::now(),
        })
        .await?;

        // Separate task: slow storage must not hold up fan-out elsewhere.
        let mut task = self.replay.spawn(self.subject.clone(), since);
        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = self.transport.closed() => {
                task.abort();
                return Err(CloseReason::ClientGone);
            }
            _ = self.shutdown.cancelled() => {
                task.abort();
                return Err(CloseReason::Shutdown);
            }
        };

        let events: Vec<Event> = match joined {
            Ok(events) => events,
            Err(e) => {
                warn!(subject = %self.subject, error = %e, "replay failed, continuing live");
                return Ok(());
            }
        };

        let count = events.len();
        self.deliver(Frame::MissedEventsSummary { count, since }).await?;
        let pacing = self.settings.replay_frame_delay;
        for (i, event) in events.into_iter().enumerate() {
            if i > 0 && !pacing.is_zero() {
                self.pause(pacing).await?;
                // A long paced replay counts as activity.
                self.registry.touch(&self.subject, connection_id);
            }
            self.deliver(Frame::MissedEvent { event }).await?;
        }
        self.deliver(Frame::MissedEventsEnd {
            count,
            timestamp: Timestamp::now(),
        })
        .await?;

        self.replayed = Some(count);
        info!(subject = %self.subject, %connection_id, count, %since, "replay delivered");
        Ok(())
    }

    async fn live(&mut self, connection_id: ConnectionId) -> CloseReason {
        let period = self.settings.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next = {
                let Some(registration) = self.registration.as_mut() else {
                    return CloseReason::Unregistered;
                };
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return CloseReason::Shutdown,
                    _ = self.transport.closed() => return CloseReason::ClientGone,
                    frame = registration.handle.recv() => match frame {
                        Some(frame) => frame,
                        None => return CloseReason::Unregistered,
                    },
                    _ = heartbeat.tick() => {
                        self.registry.touch(&self.subject, connection_id);
                        Frame::Heartbeat { timestamp: Timestamp::now() }
                    }
                }
            };

            if let Err(reason) = self.deliver(next).await {
                return reason;
            }
        }
    }

    /// Sleep between paced frames, waking early if the session must close.
    async fn pause(&self, delay: Duration) -> Result<(), CloseReason> {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CloseReason::Shutdown),
            _ = self.transport.closed() => Err(CloseReason::ClientGone),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Write one frame to the client. A failed write means the client is gone.
    async fn deliver(&mut self, frame: Frame) -> Result<(), CloseReason> {
        let name = frame.name();
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(CloseReason::Shutdown),
            sent = self.transport.send(frame) => match sent {
                Ok(()) => {
                    self.frames_sent += 1;
                    Ok(())
                }
                Err(_) => {
                    debug!(subject = %self.subject, frame = name, "transport closed during write");
                    Err(CloseReason::ClientGone)
                }
            },
        }
    }

    /// Transition to `Closed`; safe to reach from any state.
    fn close(&mut self, reason: CloseReason) -> SessionSummary {
        let connection_id = self.registration.as_ref().map(|r| r.handle.id);
        if self.state != SessionState::Closed {
            self.state = SessionState::Closed;
            if let Some(registration) = self.registration.as_mut() {
                registration.release();
            }
            info!(subject = %self.subject, ?connection_id, ?reason, frames = self.frames_sent, "stream closed");
        }

        SessionSummary {
            connection_id,
            replayed: self.replayed,
            frames_sent: self.frames_sent,
            close_reason: reason,
        }
    }
}
