// src/rpc/mod.rs

pub mod codec;
pub mod messages;

pub use codec::JsonCodec;
pub use messages::{NodeView, Request, Response};
