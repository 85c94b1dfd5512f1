//! # Clipforge Server
//!
//! Thin HTTP surface over [`clipforge_core`]:
//!
//! - `POST /api/admin/uploads` streams a multipart upload into the ingest
//!   pipeline and returns the ingest receipt
//! - `GET /api/collections/{id}/records` lists a collection and heals any
//!   record in it left incomplete
//! - `GET /api/records/{id}` and `GET /api/records/{id}/playback-token`
//! - `GET /ws/status` pushes record status events
//! - `GET /health`

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
