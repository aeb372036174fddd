//! Shared fixtures for integration tests
#![allow(dead_code)]

pub mod git_remote;

pub use git_remote::*;
