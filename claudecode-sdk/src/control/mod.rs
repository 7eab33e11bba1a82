//! The control plane: request/response correlation over the conversation
//! channel.
//!
//! Two logical channels share one physical stdio pair. Ordinary conversation
//! envelopes flow to the host's event queue; `control_request` /
//! `control_response` / `control_cancel_request` envelopes implement a
//! bidirectional request/response exchange correlated by id. Either side may
//! originate a request: the SDK for session-level operations (interrupt,
//! permission mode), the CLI for extension callbacks (permission queries,
//! hooks, in-process server traffic).

pub(crate) mod dispatch;
pub(crate) mod pending;
pub(crate) mod protocol;

pub use protocol::OutboundControlRequest;
