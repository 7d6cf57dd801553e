//! Network discovery and analysis over the capability providers.

pub mod bridge;
pub mod discovery;
pub mod enrich;
pub mod orchestrator;
pub mod pathway;
pub mod view;

pub use bridge::{bridge_score, find_bridge_nodes};
pub use discovery::{Discovery, NetworkDiscoveryEngine, MAX_HOPS};
pub use enrich::{deduplicate, enrich, fallback_label, group_by_type, normalize_direction};
pub use orchestrator::{NetworkOrchestrator, NetworkRequest, NetworkResult};
pub use pathway::{pathway_strength, rank_pathways, PathwayResolver};
pub use view::{NetworkView, NodeRole, ViewEdge, ViewNode};
