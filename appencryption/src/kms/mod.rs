//! Key Management Service implementations for the application encryption library
//!
//! This module provides implementations for encrypting and decrypting system keys:
//!
//! - `StaticKeyManagementService` for testing and development (a single static master key)
//! - `MultiRegionKeyManagementService` for multi-region KMS fanout with failover decryption
//! - Custom KMS implementations can be added by implementing the `KeyManagementService` trait

mod multi_region;
mod static_kms;

pub use multi_region::{
    optimize_by_regions, KmsEnvelope, KmsKek, MultiRegionKeyManagementService,
    MultiRegionKeyManagementServiceBuilder,
};
pub use static_kms::StaticKeyManagementService;
