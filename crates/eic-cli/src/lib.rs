// ABOUTME: Library half of the authorized-keys binaries.
// ABOUTME: Wires configuration and real collaborators into the pipeline, and supervises it under a timeout.

pub mod authorized_keys;
pub mod wrapper;
