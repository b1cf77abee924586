mod endpoint;
mod pool;
mod rotation;

pub use endpoint::{
    EndpointStatus, ProxyCredentials, ProxyEndpoint, ProxyProtocol, SharedEndpoint,
};
pub use pool::{PoolStatus, ProxyPool};
pub use rotation::{
    build_strategy, RandomRotation, RotationKind, RotationSettings, RotationStrategy,
    RoundRobinRotation,
};
