//! ClusterHub - session registry, routing and push for game server clusters
//!
//! Frontends hold client connections and push to them; backends run game
//! logic and reach clients through the frontend each client is bound to.

pub mod cluster;
pub mod config;
pub mod hub;
pub mod network;
pub mod protocol;
pub mod rpc;

pub(crate) mod lock;
