// SPDX-License-Identifier: AGPL-3.0
//! SIEM forwarding: sink payload shapes plus the queue/batch/circuit-breaker
//! machinery that forwards audit events to them without blocking the
//! invocation pipeline.

pub mod forwarder;
pub mod sinks;

pub use forwarder::{SiemForwarder, SinkConfig};
pub use sinks::{HecSink, SiemSink, TagLogSink};
