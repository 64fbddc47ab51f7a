//! Remote debug session engine for ADT-style REST debuggers.
//!
//! A [`engine::DebugListener`] long-polls the remote debugger of one connection,
//! hosts every reached debuggee as a [`engine::DebugSession`], keeps breakpoints in
//! sync across all of them and resolves stack frames and variables into thread scoped
//! handles. [`dap::DebugAdapter`] exposes the engine through the Debug Adapter Protocol.
//!
//! The remote protocol itself is consumed through [`client::DebugClient`], source
//! path mapping through [`resolver::ObjectResolver`].

pub mod client;
pub mod config;
pub mod dap;
pub mod engine;
pub mod error;
pub mod frontend;
pub mod identity;
pub mod log;
pub mod resolver;

pub use error::Error;
