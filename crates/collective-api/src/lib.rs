pub mod api;

pub use api::handlers::RpcHandler;
pub use api::protocol::{codes, RpcError, RpcNotification, RpcRequest, RpcResponse};
pub use api::server::{ApiConfig, ApiServer};
