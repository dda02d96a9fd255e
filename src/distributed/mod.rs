//! Distributed Module - replay split across cooperating processes
//!
//! - `distributor`: round-robin EP → RP assignment ([`TraceDistributor`])
//! - `comm`: [`Communicator`] backends (disabled / in-process channels)
//! - `fetcher`: [`EventDataFetcher`] for events owned by other ranks
//! - `coordinator`: [`DistributedReplayCoordinator`] tying it together

mod comm;
mod coordinator;
mod distributor;
mod fetcher;

pub use comm::{
    ChannelCommunicator, Communicator, MessageTag, Packet, SerialCommunicator, ROOT_RANK,
};
pub use coordinator::DistributedReplayCoordinator;
pub use distributor::{compute_distribution, LoadBalance, TraceDistributor};
pub use fetcher::{EventDataFetcher, FetchStats};
