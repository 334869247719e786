// Collaborator interfaces and their HTTP clients
pub mod curve;
pub mod exchange;
pub mod http;
pub mod network;
pub mod relay;

pub use curve::CurveClient;
pub use exchange::{ExchangeAdapter, InstrumentResolver};
pub use http::JsonTransport;
pub use network::NetworkClient;
pub use relay::RelayClient;
