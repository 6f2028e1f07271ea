//! Integration scenarios.

mod bft_round;
mod chain_flow;
mod fork_priority;
mod mempool_rules;
mod p2p_replay;
mod pose_replay;
mod snapshots;
mod timestamps;
