//! Ingestion of road travel-time publications.
//!
//! A publication is an XML document with travel times, individual vehicle
//! travel times or traffic-flow counts per measurement site. Documents are
//! normalized into typed records ([`normalize`]), each site is reduced to a
//! canonical form ([`canonical`]) and resolved against the sites already
//! stored ([`resolver`]), and the measurements are written in one transaction
//! ([`ingest`], [`db`]).

pub mod batch;
pub mod canonical;
pub mod db;
pub mod error;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod repository;
pub mod resolver;
pub mod xml;

pub use db::{Store, TableCounts};
pub use error::{ErrorKind, IngestError};
pub use ingest::IngestReport;
