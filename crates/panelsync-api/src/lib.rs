// panelsync-api: Async HTTP clients for the node panel and the
// online-IP auditing endpoint.

pub mod audit;
pub mod error;
pub mod models;
pub mod panel;
pub mod transport;

pub use audit::AuditClient;
pub use error::Error;
pub use panel::PanelClient;
pub use transport::TransportConfig;
