/*!
# XiaoZhi Flow Plugin Host

Runs plugin workers as local peer processes and routes method calls to
them over an HTTP request/response protocol:

- **Lifecycle**: start with a health-probed readiness wait, graceful stop
  with a kill fallback, crash detection
- **Wire protocol**: `/invoke`, `/health`, `/info`, `/shutdown`
- **Ports**: a reusable local port pool, one port per worker
- **Statistics**: per-plugin call counts and rolling average latency

The manager implements [`flow_core::PluginInvoker`], which is how the
workflow executor reaches it.

## Example

```rust,ignore
use flow_plugin_host::{PluginManager, PluginSpec};

let manager = PluginManager::new();
manager.register(PluginSpec::new("textutil", "./plugins/textutil")).await;
manager.start("textutil").await?;

let out = manager
    .call("textutil", "to_upper", serde_json::json!({"input": "hello"}), &cancel)
    .await?;
```
*/

pub mod manager;
pub mod ports;
pub mod protocol;
pub mod stats;

pub use manager::{PluginHealth, PluginManager, PluginManagerConfig, PluginSpec, PluginState};
pub use ports::PortPool;
pub use protocol::{HealthResponse, InvokeRequest, InvokeResponse, PluginInfo};
pub use stats::PluginStats;
