// ABOUTME: Metadata service paths used by the authorized-keys pipeline.
// ABOUTME: All paths are relative to <endpoint>/latest/.

pub const TOKEN: &str = "api/token";
pub const INSTANCE_ID: &str = "meta-data/instance-id/";
pub const AVAILABILITY_ZONE: &str = "meta-data/placement/availability-zone/";
pub const DOMAIN: &str = "meta-data/services/domain/";
pub const SIGNER_CERT: &str = "meta-data/managed-ssh-keys/signer-cert/";
pub const SIGNER_OCSP: &str = "meta-data/managed-ssh-keys/signer-ocsp/";

/// Header carrying the session token on every read.
pub const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";

/// Header declaring the requested token lifetime on the PUT.
pub const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";

/// Path of a single OCSP staple listed by [`SIGNER_OCSP`].
pub fn signer_ocsp_staple(id: &str) -> String {
    format!("{SIGNER_OCSP}{id}")
}

/// Path of the managed SSH keys currently active for `username`.
pub fn active_keys(username: &str) -> String {
    format!("meta-data/managed-ssh-keys/active-keys/{username}/")
}
