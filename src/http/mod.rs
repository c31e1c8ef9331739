//! Owned request/response values and the network seam.
//!
//! Everything above this module talks to the network through [`Transport`],
//! so routing and replay can tell "no response" apart from "error response"
//! without knowing about reqwest.

mod transport;
mod types;

#[cfg(test)]
pub mod testing;

pub use reqwest::{Method, StatusCode};
pub use transport::{ReqwestTransport, Transport, TransportError};
pub use types::{Request, Response};
