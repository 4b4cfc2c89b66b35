use std::time::Duration;

use crate::client::RemoteApiClient;
use crate::message::{ToolCall, ToolResult};
use crate::tool::{ToolDescription, ToolRegistry};

/// Routes model tool calls to the knowledge-graph API.
///
/// The registry is fixed once the gateway is built; sessions share one
/// gateway behind an `Arc`.
#[derive(Clone)]
pub struct ToolGateway {
    registry: ToolRegistry,
    client: RemoteApiClient,
    timeout: Duration,
}

impl ToolGateway {
    pub fn new(registry: ToolRegistry, client: RemoteApiClient) -> Self {
        let timeout = client.config().timeout();
        Self {
            registry,
            client,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        self.registry.describe()
    }

    pub async fn invoke(&self, call: &ToolCall) -> ToolResult {
        let spec = match self.registry.resolve(&call.name) {
            Ok(spec) => spec,
            Err(err) => {
                tracing::warn!(tool = %call.name, "model requested an unregistered tool");
                return err.into();
            }
        };
        let params = match spec.bind_arguments(&call.arguments) {
            Ok(params) => params,
            Err(err) => {
                tracing::warn!(tool = %call.name, error = %err, "rejected tool arguments");
                return err.into();
            }
        };
        tracing::info!(tool = %spec.name, endpoint = %spec.endpoint, "invoking tool");
        self.client.call(&spec.endpoint, &params, self.timeout).await
    }
}
