//! Test support for driving a real listener over TCP.

pub mod harness;

pub use harness::{Client, Received, Recorder, TestServer};
