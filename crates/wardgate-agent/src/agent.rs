//! Agent process assembly

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::api::{ApiDialer, TcpApiDialer};
use crate::auth::TokenProvider;
use crate::config::AgentConfig;
use crate::enroll::ApiEnroller;
use crate::error::AgentError;
use crate::ipc::IpcServer;
use crate::network::NetworkConfigurer;
use crate::notify::Notifier;
use crate::runtime::AgentRuntime;
use crate::statemachine::{AgentHandle, StateMachine};
use crate::states::AgentContext;

/// A configured agent: state machine plus local control socket
pub struct Agent {
    config: AgentConfig,
    machine: StateMachine,
    handle: AgentHandle,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        tokens: Arc<dyn TokenProvider>,
        network: Arc<dyn NetworkConfigurer>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, AgentError> {
        let runtime = Arc::new(AgentRuntime::new(&config)?);
        let dialer: Arc<dyn ApiDialer> = Arc::new(TcpApiDialer::new(config.api_server.clone()));
        let enroller = Arc::new(ApiEnroller::new(dialer.clone()));

        let ctx = AgentContext::new(
            config.clone(),
            runtime,
            tokens,
            enroller,
            dialer,
            network,
            notifier,
        );
        let (machine, handle) = StateMachine::new(ctx);

        Ok(Self {
            config,
            machine,
            handle,
        })
    }

    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Serve the local socket and drive the state machine until `shutdown`.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), AgentError> {
        let ipc = IpcServer::bind_to(&self.config.socket_path)
            .await
            .map_err(|e| AgentError::Socket(format!("{:#}", e)))?;

        tracing::info!(
            serial = %self.config.serial,
            api_server = %self.config.api_server,
            auto_connect = self.config.auto_connect,
            "Agent starting"
        );

        let ipc_task = tokio::spawn(ipc.serve(self.handle.clone(), shutdown.child_token()));
        self.machine.run(shutdown.clone()).await;

        shutdown.cancel();
        match ipc_task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AgentError::Socket(format!("{:#}", e))),
            Err(e) => Err(AgentError::Socket(e.to_string())),
        }
    }
}
