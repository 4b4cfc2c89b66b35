use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::{AssistantError, Result};

/// Install the global subscriber. Filtering follows `RUST_LOG` and falls
/// back to `default_directive` (e.g. `info`).
pub fn init_tracing(default_directive: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|err| AssistantError::Config(format!("invalid log filter: {err}")))?;

    let registry = Registry::default().with(filter);
    let installed = if json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|err| AssistantError::Config(format!("tracing already initialized: {err}")))
}
