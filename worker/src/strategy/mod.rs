mod mirrored;

pub use mirrored::{
    MirroredStrategy, Peer, STATS_LEN, StepStats, accept_replicas, connect_to_chief,
};
