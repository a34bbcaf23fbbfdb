//! HTTP transport shared by the upstream invokers.

mod http;

pub use http::{HttpTransport, TransportConfig};
