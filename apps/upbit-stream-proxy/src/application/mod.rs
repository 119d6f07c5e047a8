//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the services that orchestrate domain logic and the
//! port interfaces that define how the pipeline interacts with external
//! systems.

/// Port interfaces (feed codec, trade store).
pub mod ports;

/// Application services (dedup + bounded cache ingestion).
pub mod services;
