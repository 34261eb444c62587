// handlers/mod.rs - resource handlers
//
// Handlers receive a `RequestContext` from one of the wrappers in
// `middleware::handlers`, call one collaborator and commit. Models and worlds
// share `models_worlds`; the route table passes the `AssetKind`.
pub mod categories;
pub mod collections;
pub mod competition;
pub mod files;
pub mod licenses;
pub mod models_worlds;
pub mod organizations;
pub mod transfer;
pub mod users;
