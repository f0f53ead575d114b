//! [`Bridge`] – process-wide lifecycle.
//!
//! Startup order:
//!
//! 1. give the robot link up to `connect_timeout` to come up (the bridge
//!    starts regardless; calls fail with `robot_unavailable` meanwhile);
//! 2. start the event relay so it has a source before DCSS is `Active`;
//! 3. start the dispatcher;
//! 4. start the DCSS session loop.
//!
//! On shutdown the dispatcher first stops accepting commands, in-flight ones
//! get `shutdown_grace` to resolve, then every task is torn down.

use std::sync::Arc;
use std::time::Duration;

use robodhs_middleware::RobotAdapter;
use robodhs_types::BridgeError;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::dispatcher::{DispatchMsg, Dispatcher};
use crate::outbound::Outbound;
use crate::relay;
use crate::session::{SessionConfig, SessionManager};
use crate::status::StatusBoard;

/// Everything the coordinator needs besides the robot adapter.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub session: SessionConfig,
    /// Deadline for each robot operation, measured from issue.
    pub operation_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            operation_timeout: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

pub struct Bridge {
    config: BridgeConfig,
    adapter: Arc<dyn RobotAdapter>,
    outbound: Outbound,
    status: StatusBoard,
}

impl Bridge {
    pub fn new(config: BridgeConfig, adapter: Arc<dyn RobotAdapter>) -> Self {
        Self {
            config,
            adapter,
            outbound: Outbound::new(),
            status: StatusBoard::new(),
        }
    }

    /// Handle to the outbound gate, e.g. for inspecting session state.
    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    /// The robot model behind the DCSS status strings.
    pub fn status(&self) -> StatusBoard {
        self.status.clone()
    }

    /// Run until `shutdown` fires (`Ok`) or a fatal error occurs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), BridgeError> {
        let teardown = CancellationToken::new();

        self.await_robot(&shutdown).await;

        let mut relay = tokio::spawn(relay::run(
            self.adapter.clone(),
            self.outbound.clone(),
            self.status.clone(),
            teardown.clone(),
        ));

        let (dispatcher, dispatch) = Dispatcher::new(
            self.adapter.clone(),
            self.outbound.clone(),
            self.status.clone(),
            self.config.operation_timeout,
        );
        let mut in_flight = dispatcher.in_flight();
        let mut dispatcher = tokio::spawn(dispatcher.run(teardown.clone()));

        let session = SessionManager::new(
            self.config.session.clone(),
            self.outbound.clone(),
            dispatch.clone(),
        );
        let mut session: JoinHandle<Result<(), BridgeError>> =
            tokio::spawn(session.run(teardown.clone()));

        info!(
            dcss = %format!("{}:{}", self.config.session.dcss_host, self.config.session.dcss_port),
            hardware_name = %self.config.session.hardware_name,
            "bridge running"
        );

        let mut dispatcher_done = false;
        let mut relay_done = false;
        let mut outcome = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("shutdown requested");
                let _ = dispatch.send(DispatchMsg::Drain);
                let drained = tokio::time::timeout(
                    self.config.shutdown_grace,
                    in_flight.wait_for(|n| *n == 0),
                )
                .await
                .is_ok();
                if !drained {
                    warn!(
                        grace = ?self.config.shutdown_grace,
                        in_flight = *in_flight.borrow(),
                        "grace period expired with commands in flight"
                    );
                }
                teardown.cancel();
                join(&mut session).await
            }
            result = &mut session => {
                teardown.cancel();
                flatten(result)
            }
            result = &mut dispatcher => {
                dispatcher_done = true;
                teardown.cancel();
                let _ = join(&mut session).await;
                Err(unexpected_exit("dispatcher", result))
            }
            result = &mut relay => {
                relay_done = true;
                teardown.cancel();
                let _ = join(&mut session).await;
                Err(unexpected_exit("event relay", result))
            }
        };

        if !dispatcher_done {
            outcome = outcome.and(settle("dispatcher", dispatcher.await));
        }
        if !relay_done {
            outcome = outcome.and(settle("event relay", relay.await));
        }
        info!(ok = outcome.is_ok(), "bridge stopped");
        outcome
    }

    async fn await_robot(&self, shutdown: &CancellationToken) {
        let deadline = tokio::time::Instant::now() + self.config.session.connect_timeout;
        while !self.adapter.is_connected() {
            if tokio::time::Instant::now() >= deadline {
                warn!("robot-control service not reachable yet; continuing");
                return;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
        info!("robot-control service connected");
    }
}

async fn join(handle: &mut JoinHandle<Result<(), BridgeError>>) -> Result<(), BridgeError> {
    flatten(handle.await)
}

fn flatten(result: Result<Result<(), BridgeError>, JoinError>) -> Result<(), BridgeError> {
    result.map_err(|e| BridgeError::Fatal(format!("session task failed: {e}")))?
}

/// A task that only ends on teardown finished on its own.
fn unexpected_exit(task: &str, result: Result<(), JoinError>) -> BridgeError {
    match settle(task, result) {
        Err(e) => e,
        Ok(()) => BridgeError::Fatal(format!("{task} task exited unexpectedly")),
    }
}

fn settle(task: &str, result: Result<(), JoinError>) -> Result<(), BridgeError> {
    result.map_err(|e| BridgeError::Fatal(format!("{task} task failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use robodhs_middleware::SimRobotAdapter;

    fn config(port: u16) -> BridgeConfig {
        BridgeConfig {
            session: SessionConfig {
                dcss_host: "127.0.0.1".to_string(),
                dcss_port: port,
                connect_timeout: Duration::from_millis(200),
                reconnect_min: Duration::from_millis(10),
                reconnect_max: Duration::from_millis(20),
                ..SessionConfig::default()
            },
            operation_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn shuts_down_cleanly_without_dcss() -> Result<(), Box<dyn std::error::Error>> {
        // Nothing listens on this port; the session keeps retrying.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let bridge = Bridge::new(config(port), Arc::new(SimRobotAdapter::new()));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(bridge.run(shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task).await???;
        Ok(())
    }

    /// Simulated robot whose notification stream ends at once.
    struct MuteRobot(SimRobotAdapter);

    #[async_trait::async_trait]
    impl RobotAdapter for MuteRobot {
        async fn invoke(
            &self,
            call: robodhs_types::RobotCall,
        ) -> Result<robodhs_middleware::OperationHandle, robodhs_types::AdapterError> {
            self.0.invoke(call).await
        }

        async fn subscribe(&self) -> futures_util::stream::BoxStream<'static, robodhs_types::StateEvent> {
            Box::pin(futures_util::stream::empty())
        }

        async fn cancel(&self, id: robodhs_types::OperationId) {
            self.0.cancel(id).await
        }

        fn is_connected(&self) -> bool {
            self.0.is_connected()
        }
    }

    #[tokio::test]
    async fn ended_relay_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let port = listener.local_addr()?.port();
        drop(listener);

        let bridge = Bridge::new(config(port), Arc::new(MuteRobot(SimRobotAdapter::new())));
        let result = tokio::time::timeout(Duration::from_secs(5), bridge.run(CancellationToken::new())).await?;
        match result {
            Err(BridgeError::Fatal(message)) => assert!(message.contains("event relay"), "{message}"),
            other => panic!("expected a fatal error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn disconnected_robot_does_not_block_startup() -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();

        let robot = SimRobotAdapter::new();
        robot.set_connected(false);
        let bridge = Bridge::new(config(port), Arc::new(robot));
        let outbound = bridge.outbound();
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(bridge.run(shutdown.clone()));

        let (_stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept()).await??;
        while outbound.epoch().is_none() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), task).await???;
        Ok(())
    }
}
