//! Shared test utilities for docshift integration tests.
//!
//! This module provides:
//! - `TestServer` driving the router in-process with an isolated scratch directory
//! - `MultipartForm` for building upload bodies
//! - Fixture builders for PDFs, images and DOCX files

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::{MultipartForm, TestResponse, TestServer};
