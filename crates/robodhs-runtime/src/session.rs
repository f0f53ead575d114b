//! [`SessionManager`] – DCSS connection lifecycle.
//!
//! One loop owns the TCP connection to DCSS:
//!
//! 1. **Connect** – bounded by `connect_timeout`; failures back off
//!    exponentially between `reconnect_min` and `reconnect_max`.
//! 2. **Register** – `htos_client_is_hardware <name>` is sent immediately and
//!    again whenever DCSS asks with `stoc_send_client_type`.  The first
//!    `stoh_*` frame from DCSS makes the session `Active`.
//! 3. **Serve** – command frames go to the [`Dispatcher`][crate::dispatcher::Dispatcher];
//!    outbound frames from the [`Outbound`] link are written whole, one at a
//!    time; `htos_heartbeat <seq>` goes out every `heartbeat_interval`.
//! 4. **Lose** – EOF, I/O errors or more than `peer_timeout` of silence end
//!    the epoch.  Framing corruption does too, and is returned as fatal when
//!    `exit_on_framing_error` is set.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use robodhs_middleware::{Backoff, FrameCodec};
use robodhs_types::{BridgeError, Epoch, Frame, ProtocolError, tags};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatchMsg, DispatchSender};
use crate::outbound::Outbound;

/// Connection parameters for the DCSS session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub dcss_host: String,
    pub dcss_port: u16,
    pub hardware_name: String,
    pub heartbeat_interval: Duration,
    pub peer_timeout: Duration,
    pub connect_timeout: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
    pub exit_on_framing_error: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            dcss_host: "localhost".to_string(),
            dcss_port: 14242,
            hardware_name: "robot".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            peer_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            reconnect_min: Duration::from_millis(500),
            reconnect_max: Duration::from_secs(30),
            exit_on_framing_error: true,
        }
    }
}

/// How one session epoch ended.
#[derive(Debug)]
enum SessionEnd {
    Shutdown,
    Lost(String),
    Corrupt(ProtocolError),
}

pub struct SessionManager {
    config: SessionConfig,
    outbound: Outbound,
    dispatch: DispatchSender,
}

impl SessionManager {
    pub fn new(config: SessionConfig, outbound: Outbound, dispatch: DispatchSender) -> Self {
        Self {
            config,
            outbound,
            dispatch,
        }
    }

    /// Connect, serve and reconnect until `teardown` fires.
    ///
    /// Returns an error only for framing corruption with
    /// `exit_on_framing_error` set.
    pub async fn run(self, teardown: CancellationToken) -> Result<(), BridgeError> {
        let mut backoff = Backoff::new(self.config.reconnect_min, self.config.reconnect_max);
        let mut epoch = Epoch::default();
        let addr = format!("{}:{}", self.config.dcss_host, self.config.dcss_port);

        loop {
            if teardown.is_cancelled() {
                return Ok(());
            }
            self.outbound.connecting();

            let connected = tokio::select! {
                _ = teardown.cancelled() => return Ok(()),
                r = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr)) => r,
            };

            match connected {
                Ok(Ok(stream)) => {
                    backoff.reset();
                    epoch = epoch.next();
                    info!(%epoch, %addr, "connected to DCSS");

                    let end = self.serve(stream, epoch, &teardown).await;
                    self.outbound.detach(epoch);
                    let _ = self.dispatch.send(DispatchMsg::SessionDown(epoch));

                    match end {
                        SessionEnd::Shutdown => return Ok(()),
                        SessionEnd::Lost(reason) => {
                            warn!(%epoch, %reason, "DCSS session lost");
                        }
                        SessionEnd::Corrupt(e) => {
                            if self.config.exit_on_framing_error {
                                return Err(BridgeError::Protocol(e));
                            }
                            warn!(%epoch, error = %e, "DCSS stream corrupt; reconnecting");
                        }
                    }
                }
                Ok(Err(e)) => {
                    warn!(%addr, error = %e, attempt = backoff.attempts(), "DCSS connect failed");
                }
                Err(_) => {
                    warn!(%addr, timeout = ?self.config.connect_timeout, "DCSS connect timed out");
                }
            }

            let delay = backoff.next_delay();
            debug!(?delay, "waiting before reconnect");
            tokio::select! {
                _ = teardown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn serve(
        &self,
        stream: TcpStream,
        epoch: Epoch,
        teardown: &CancellationToken,
    ) -> SessionEnd {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "TCP_NODELAY not set");
        }
        let (rd, wr) = stream.into_split();
        let mut reader = FramedRead::new(rd, FrameCodec::inbound());
        let mut writer = FramedWrite::new(wr, FrameCodec::outbound());

        let (tx, mut rx) = mpsc::unbounded_channel();
        // The dispatcher must see the new epoch before any frame of it.
        let _ = self.dispatch.send(DispatchMsg::SessionUp(epoch));
        self.outbound.attach(epoch, tx);
        self.outbound
            .send_session(epoch, Frame::client_is_hardware(&self.config.hardware_name));

        let interval = self.config.heartbeat_interval;
        let mut heartbeat = tokio::time::interval_at(Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut seq: u64 = 0;

        let liveness = tokio::time::sleep(self.config.peer_timeout);
        tokio::pin!(liveness);

        loop {
            tokio::select! {
                _ = teardown.cancelled() => {
                    // Flush replies already queued before closing.
                    while let Ok(frame) = rx.try_recv() {
                        if writer.feed(frame).await.is_err() {
                            break;
                        }
                    }
                    let _ = writer.flush().await;
                    return SessionEnd::Shutdown;
                }
                Some(frame) = rx.recv() => {
                    if let Err(e) = writer.send(frame).await {
                        return SessionEnd::Lost(format!("write failed: {e}"));
                    }
                }
                _ = heartbeat.tick() => {
                    seq += 1;
                    self.outbound.send_session(epoch, Frame::heartbeat(seq));
                }
                _ = &mut liveness => {
                    return SessionEnd::Lost(format!(
                        "no traffic from DCSS for {:?}",
                        self.config.peer_timeout
                    ));
                }
                item = reader.next() => {
                    match item {
                        Some(Ok(Ok(frame))) => {
                            liveness.as_mut().reset(Instant::now() + self.config.peer_timeout);
                            self.on_frame(epoch, frame);
                        }
                        Some(Ok(Err(e))) => {
                            liveness.as_mut().reset(Instant::now() + self.config.peer_timeout);
                            warn!(%epoch, error = %e, "dropping malformed DCSS frame");
                        }
                        Some(Err(ProtocolError::Io(e))) => {
                            return SessionEnd::Lost(format!("read failed: {e}"));
                        }
                        Some(Err(e)) => {
                            warn!(%epoch, error = %e, "DCSS framing corrupted");
                            return SessionEnd::Corrupt(e);
                        }
                        None => return SessionEnd::Lost("DCSS closed the connection".to_string()),
                    }
                }
            }
        }
    }

    fn on_frame(&self, epoch: Epoch, frame: Frame) {
        debug!(%epoch, op = %frame.operation, token = ?frame.token, "DCSS frame");
        if frame.operation.starts_with("stoh_") && self.outbound.activate(epoch) {
            info!(%epoch, "DCSS session active");
        }

        match frame.operation.as_str() {
            tags::STOC_SEND_CLIENT_TYPE => {
                self.outbound
                    .send_session(epoch, Frame::client_is_hardware(&self.config.hardware_name));
            }
            tags::STOH_HEARTBEAT => {}
            _ => {
                let _ = self.dispatch.send(DispatchMsg::Inbound { epoch, frame });
            }
        }
    }
}
