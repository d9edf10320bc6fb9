//! `quarterdeck-upstream` — HTTP client for the upstream release source.
//!
//! Implements the updater's collaborator seams against a real endpoint:
//! release discovery ([`UpstreamSource`]), license sync ([`LicenseSync`]),
//! and best-effort usage reporting ([`Reporter`]).
//!
//! [`UpstreamSource`]: quarterdeck_updater::UpstreamSource
//! [`LicenseSync`]: quarterdeck_updater::LicenseSync
//! [`Reporter`]: quarterdeck_updater::Reporter

pub mod client;

pub use client::UpstreamClient;
