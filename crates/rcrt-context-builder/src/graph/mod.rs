/*!
 * Graph Module
 * 
 * Session-local breadcrumb graphs for fast context retrieval
 */

mod types;
mod cache;
mod edge_builder;
mod loader;
mod cache_updater;
mod builder_service;

pub use types::{BreadcrumbNode, Edge, EdgeType, SessionGraph};
pub use cache::SessionGraphCache;
pub use edge_builder::{EdgeBuilder, EdgeFeatures};
pub use loader::{load_graph_around_seeds, load_graph_around_trigger, LoadedGraph};
pub use cache_updater::GraphCacheUpdater;
pub use builder_service::EdgeBuilderService;

