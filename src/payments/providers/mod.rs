pub mod http_gateway;
pub mod sandbox;

pub use http_gateway::HttpGatewayProcessor;
pub use sandbox::SandboxProcessor;
