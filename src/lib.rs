//! wire-rehearsal: scripted TCP exchanges.
//!
//! Two roles share one scenario model:
//! - `client`: connect to a peer, send fixed payloads in order and check
//!   replies byte-for-byte (blocking, one connection per run)
//! - `server`: a mock peer that plays a scenario with every client that
//!   connects (tokio, one task per connection)
//!
//! Both write JUnit reports through `report`.

pub mod client;
pub mod config;
pub mod frame;
pub mod message;
pub mod outcome;
pub mod report;
pub mod scenario;
pub mod server;
