//! Core of the veil overlay: the machinery that turns an unknown inbound
//! WebSocket into a trusted mesh peer.
//!
//! The moving parts, leaves first: a capacity-bounded [`table`] of peer
//! slots, a [`reactions`] registry of one-shot deadline-bound handlers, a
//! [`dedup`] cache suppressing flood replays, and a [`dispatcher`] worker
//! pool that feeds every inbound frame first to the live reactions and then
//! to the static handler for its signal kind. On top of those run the
//! [`admission`] challenge protocol and the multi-party [`invitation`]
//! protocol, with the HTTP [`gateway`] and the outbound [`bootstrap`]
//! dialler at the boundary.
//!
//! Everything hangs off one [`MeshNode`] value passed around as an `Arc`;
//! tests routinely run several nodes in a single process.

mod admission;
mod bootstrap;
mod config;
mod dedup;
mod dispatcher;
mod error;
mod invitation;
mod node;
mod reactions;
mod table;

pub mod gateway;

pub use config::NodeConfig;
pub use error::MeshError;
pub use node::MeshNode;
pub use reactions::ReactionToken;
pub use table::PeerState;
