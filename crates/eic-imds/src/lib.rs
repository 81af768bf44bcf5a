// ABOUTME: Instance metadata service client for the authorized-keys pipeline.
// ABOUTME: Exports the Token type, the MetadataSource seam, the HTTP client, and path helpers.

pub mod client;
pub mod error;
pub mod paths;

pub use client::{ImdsClient, ImdsConfig, MetadataSource, Token};
pub use error::{ImdsError, Result};
