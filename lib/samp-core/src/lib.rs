//! Core SAMP types shared by the hub proxy, dispatch server and relay
//!
//! This library provides:
//! - The XML-RPC value model and envelope codec
//! - Hub descriptors (lock-file parameters) and message envelopes
//! - The registry of web profile clients
//! - Collaborator traits for hub discovery

pub mod codec;
pub mod constants;
pub mod error;
pub mod hub;
pub mod message;
pub mod registry;
pub mod value;

pub use codec::{Fault, MethodCall, MethodResponse};
pub use error::{CoreError, Result};
pub use hub::{HubLocator, HubParams, RunningHub};
pub use message::{Message, Response};
pub use registry::{ClientRegistry, RegisteredClient};
pub use value::{Struct, Value};
