//! Listening endpoint setup.

mod bind;

pub use bind::{InetAddrChoice, bind_endpoint, resolve_inet};
