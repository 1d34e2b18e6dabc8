//! Shared fixtures for the integration tests.

#![allow(dead_code)]

mod observer;
mod raw;
mod server;

pub use observer::{Observed, assert_no_outcome, next_outcome, observed};
pub use raw::{accept_upgrade, read_frame, write_text};
pub use server::{Mode, OK, SENTINEL, TestServer};
