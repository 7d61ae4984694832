//! solvekit-lib: build submission against a remote executor.
//!
//! - `llb`: immutable, content-addressed build graphs
//! - `client`: connection, direct and callback submission
//! - `orchestrator`: runs a submission alongside its status drain
//! - `backend`: the executor seam and its Docker engine implementation

pub mod backend;
pub mod cache;
pub mod client;
pub mod config;
pub mod consts;
pub mod llb;
pub mod orchestrator;
pub mod platform;
pub mod session;
pub mod status;
pub mod util;
