//! Partition-aware routing: key hashing, endpoint resolution with a
//! failure-invalidated cache, reusable HTTP dispatchers, and the retry loop
//! that ties them together.

pub mod dispatcher;
pub mod error;
pub mod hash;
pub mod resolver;
pub mod retry;
pub mod table;

pub use dispatcher::{ClientSettings, Dispatcher, DispatcherProvider};
pub use error::{
    DispatchError, Fault, ResolutionError, RetryError, RoutingError,
};
pub use hash::{
    KeyStrategy, PartitionKey, PartitionKeyFn, PartitionKeySelector, fnv1a_64,
    last_segment,
};
pub use resolver::{
    Endpoint, EndpointSet, KeyRange, PartitionResolver, PartitionSource,
    ReplicaRole,
};
pub use retry::{
    FaultHandler, PartitionTarget, RetryPolicy, ServicePartitionClient,
    TargetReplicaSelector,
};
pub use table::{
    PartitionScheme, PartitionSpec, ServiceTopology, StaticPartitionTable,
};
