//! filebeam: a keep-alive file transfer server
//!
//! Speaks a minimal HTTP/1.1 dialect directly over TCP:
//! - `GET <path>` downloads a file
//! - `POST <path>` uploads the request body to a file
//!
//! Framing, request parsing and response building are implemented here
//! without an HTTP library. Read timeouts shrink as the number of active
//! connections grows.

pub mod client;
pub mod config;
pub mod connection;
pub mod frame;
pub mod handler;
pub mod request;
pub mod response;
pub mod server;
pub mod storage;
