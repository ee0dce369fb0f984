//! Storage Layer - SQLite connection setup and SQL construction
//!
//! Every statement the engine issues is built here from entity descriptors:
//! - `schema`: DDL and the catalog queries behind the existence checks
//! - `statements`: parameterized DML for the write and read paths
//! - `synthesizer`: the create-if-absent table synthesizer

pub mod connection;
pub mod schema;
pub mod statements;
pub mod synthesizer;

pub use synthesizer::SchemaSynthesizer;
