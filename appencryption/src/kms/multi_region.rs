//! Multi-region KMS envelope (C8): wraps a system key under one KMS master key
//! per configured region so it can be decrypted after a regional failover.
//!
//! A real AWS KMS client is out of scope for this crate (see the `KeyManagementService`
//! trait); each region's "master key" here is modeled as an AES-256-GCM AEAD keyed by a
//! per-region secret, which is the only thing the core actually depends on.

use crate::crypto::{AeadImpl, Aes256GcmAead};
use crate::error::{Error, Result};
use crate::util;
use crate::KeyManagementService;
use crate::AES256_KEY_SIZE;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// One region's wrapped copy of the ephemeral KEK.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmsKek {
    pub region: String,
    pub arn: String,
    #[serde(rename = "encryptedKek")]
    pub encrypted_kek: Vec<u8>,
}

/// The JSON envelope stored for an SK record: the key ciphertext (the same
/// across every region) plus one wrapped KEK per region that accepted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KmsEnvelope {
    #[serde(rename = "encryptedKey")]
    pub encrypted_key: Vec<u8>,
    #[serde(rename = "kmsKeks")]
    pub kms_keks: Vec<KmsKek>,
}

struct RegionMasterKey {
    region: String,
    arn: String,
    master_key: Vec<u8>,
}

impl Drop for RegionMasterKey {
    fn drop(&mut self) {
        self.master_key.zeroize();
    }
}

/// Reorders `regions` so that entries named in `priorities` come first, in the
/// order the priorities were given (deduplicated, case-insensitive, first
/// occurrence wins); every other region keeps its relative input order.
///
/// Empty or blank priority entries are skipped rather than treated as a region name.
pub fn optimize_by_regions(regions: &[String], priorities: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut ordered = Vec::with_capacity(regions.len());

    for priority in priorities {
        if priority.trim().is_empty() {
            continue;
        }
        let lower = priority.to_lowercase();
        if !seen.insert(lower.clone()) {
            continue;
        }
        if let Some(region) = regions
            .iter()
            .find(|r| r.to_lowercase() == lower)
        {
            ordered.push(region.clone());
        }
    }

    for region in regions {
        if seen.insert(region.to_lowercase()) {
            ordered.push(region.clone());
        }
    }

    ordered
}

/// Encrypts/decrypts system keys under one KMS master key per configured region.
///
/// Encryption always wraps under the preferred (first-priority) region first;
/// other regions are attempted best-effort and a region whose encryption fails
/// is simply omitted from the envelope. Decryption walks the region list in
/// priority order and returns the first successful unwrap.
#[derive(Debug)]
pub struct MultiRegionKeyManagementService {
    regions: Vec<RegionMasterKey>,
    aead: Aes256GcmAead,
}

impl std::fmt::Debug for RegionMasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionMasterKey")
            .field("region", &self.region)
            .field("arn", &self.arn)
            .finish()
    }
}

/// Builds a `MultiRegionKeyManagementService`, ordering regions so the
/// preferred one is used for `GenerateDataKey` during encryption.
#[derive(Default)]
pub struct MultiRegionKeyManagementServiceBuilder {
    regions: Vec<(String, String, Vec<u8>)>,
    preferred_region: Option<String>,
}

impl MultiRegionKeyManagementServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a region's KMS master key (ARN and master key bytes).
    pub fn with_region(
        mut self,
        region: impl Into<String>,
        arn: impl Into<String>,
        master_key: Vec<u8>,
    ) -> Self {
        self.regions.push((region.into(), arn.into(), master_key));
        self
    }

    /// Sets the preferred region used for `GenerateDataKey` on encrypt.
    /// Defaults to the first region registered if unset.
    pub fn with_preferred_region(mut self, region: impl Into<String>) -> Self {
        self.preferred_region = Some(region.into());
        self
    }

    pub fn build(self) -> Result<MultiRegionKeyManagementService> {
        if self.regions.is_empty() {
            return Err(Error::PolicyException(
                "at least one region is required".to_string(),
            ));
        }

        let region_names: Vec<String> = self.regions.iter().map(|(r, _, _)| r.clone()).collect();
        let preferred = self
            .preferred_region
            .unwrap_or_else(|| region_names[0].clone());
        let ordered = optimize_by_regions(&region_names, &[preferred]);

        let mut by_name: std::collections::HashMap<String, (String, Vec<u8>)> = self
            .regions
            .into_iter()
            .map(|(region, arn, key)| (region, (arn, key)))
            .collect();

        let regions = ordered
            .into_iter()
            .map(|region| {
                let (arn, master_key) = by_name.remove(&region).expect("region present");
                RegionMasterKey {
                    region,
                    arn,
                    master_key,
                }
            })
            .collect();

        Ok(MultiRegionKeyManagementService {
            regions,
            aead: Aes256GcmAead::new(),
        })
    }
}

impl MultiRegionKeyManagementService {
    pub fn builder() -> MultiRegionKeyManagementServiceBuilder {
        MultiRegionKeyManagementServiceBuilder::new()
    }

    /// The preferred (first-priority) region, used for `GenerateDataKey`.
    pub fn preferred_region(&self) -> &str {
        &self.regions[0].region
    }

    fn encrypt_envelope(&self, key: &[u8]) -> Result<KmsEnvelope> {
        let mut kek = util::get_rand_bytes(AES256_KEY_SIZE);

        let preferred = &self.regions[0];
        let preferred_encrypted_kek = self.aead.encrypt(&kek, &preferred.master_key);

        let encrypted_key = match self.aead.encrypt(key, &kek) {
            Ok(ct) => ct,
            Err(err) => {
                kek.zeroize();
                return Err(err);
            }
        };

        let mut kms_keks = Vec::with_capacity(self.regions.len());

        match preferred_encrypted_kek {
            Ok(encrypted_kek) => kms_keks.push(KmsKek {
                region: preferred.region.clone(),
                arn: preferred.arn.clone(),
                encrypted_kek,
            }),
            Err(err) => {
                log::warn!(
                    "kms: preferred region {} failed to wrap KEK: {}",
                    preferred.region,
                    err
                );
            }
        }

        for region in &self.regions[1..] {
            match self.aead.encrypt(&kek, &region.master_key) {
                Ok(encrypted_kek) => kms_keks.push(KmsKek {
                    region: region.region.clone(),
                    arn: region.arn.clone(),
                    encrypted_kek,
                }),
                Err(err) => {
                    log::warn!(
                        "kms: region {} failed to wrap KEK, omitting from envelope: {}",
                        region.region,
                        err
                    );
                }
            }
        }

        kek.zeroize();

        if kms_keks.is_empty() {
            return Err(Error::KmsException(
                "no region succeeded in wrapping the data key".to_string(),
            ));
        }

        Ok(KmsEnvelope {
            encrypted_key,
            kms_keks,
        })
    }

    fn decrypt_envelope(&self, envelope: &KmsEnvelope) -> Result<Vec<u8>> {
        let mut errors = Vec::new();

        for region in &self.regions {
            let Some(kek_entry) = envelope
                .kms_keks
                .iter()
                .find(|k| k.region.eq_ignore_ascii_case(&region.region))
            else {
                continue;
            };

            let mut kek = match self.aead.decrypt(&kek_entry.encrypted_kek, &region.master_key) {
                Ok(kek) => kek,
                Err(err) => {
                    errors.push(format!("{}: {}", region.region, err));
                    continue;
                }
            };

            let plaintext = self.aead.decrypt(&envelope.encrypted_key, &kek);
            kek.zeroize();

            match plaintext {
                Ok(plaintext) => return Ok(plaintext),
                Err(err) => errors.push(format!("{}: {}", region.region, err)),
            }
        }

        Err(Error::KmsException(format!(
            "exhausted all regions: [{}]",
            errors.join("; ")
        )))
    }
}

#[async_trait]
impl KeyManagementService for MultiRegionKeyManagementService {
    async fn encrypt_key(&self, key: &[u8]) -> Result<Vec<u8>> {
        let envelope = self.encrypt_envelope(key)?;
        serde_json::to_vec(&envelope).map_err(Error::Json)
    }

    async fn decrypt_key(&self, encrypted_key: &[u8]) -> Result<Vec<u8>> {
        let envelope: KmsEnvelope = serde_json::from_slice(encrypted_key).map_err(Error::Json)?;
        self.decrypt_envelope(&envelope)
    }
}

impl KmsEnvelope {
    /// Base64-encodes the raw `encryptedKey` ciphertext for display/logging.
    pub fn encrypted_key_base64(&self) -> String {
        STANDARD.encode(&self.encrypted_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(regions: &[&str], preferred: &str) -> MultiRegionKeyManagementService {
        let mut builder = MultiRegionKeyManagementService::builder().with_preferred_region(preferred);
        for region in regions {
            builder = builder.with_region(*region, format!("arn:aws:kms:{region}:key"), vec![7u8; 32]);
        }
        builder.build().unwrap()
    }

    #[tokio::test]
    async fn round_trips_through_every_configured_region() {
        let kms = service(&["us-west-2", "us-east-1"], "us-west-2");
        let plaintext = b"system key material".to_vec();

        let wrapped = kms.encrypt_key(&plaintext).await.unwrap();
        let unwrapped = kms.decrypt_key(&wrapped).await.unwrap();

        assert_eq!(plaintext, unwrapped);
    }

    #[tokio::test]
    async fn decrypts_after_losing_the_preferred_region_entry() {
        let kms = service(&["us-west-2", "us-east-1"], "us-west-2");
        let plaintext = b"system key material".to_vec();

        let wrapped = kms.encrypt_key(&plaintext).await.unwrap();
        let mut envelope: KmsEnvelope = serde_json::from_slice(&wrapped).unwrap();
        envelope.kms_keks.retain(|k| k.region != "us-west-2");
        let tampered = serde_json::to_vec(&envelope).unwrap();

        let unwrapped = kms.decrypt_key(&tampered).await.unwrap();
        assert_eq!(plaintext, unwrapped);
    }

    #[tokio::test]
    async fn fails_when_no_region_overlaps() {
        let encrypting_kms = service(&["us-west-2", "us-east-1"], "us-west-2");
        let decrypting_kms = service(&["eu-west-1"], "eu-west-1");
        let plaintext = b"system key material".to_vec();

        let wrapped = encrypting_kms.encrypt_key(&plaintext).await.unwrap();
        let result = decrypting_kms.decrypt_key(&wrapped).await;

        assert!(matches!(result, Err(Error::KmsException(_))));
    }

    #[test]
    fn optimize_by_regions_prioritizes_then_preserves_order() {
        let regions = vec![
            "us-west-2".to_string(),
            "us-east-1".to_string(),
            "eu-west-1".to_string(),
        ];
        let priorities = vec!["us-east-1".to_string(), "us-west-2".to_string()];

        let ordered = optimize_by_regions(&regions, &priorities);

        assert_eq!(ordered, vec!["us-east-1", "us-west-2", "eu-west-1"]);
    }

    #[test]
    fn optimize_by_regions_is_case_insensitive_and_dedupes() {
        let regions = vec!["US-WEST-2".to_string(), "us-east-1".to_string()];
        let priorities = vec![
            "us-west-2".to_string(),
            "us-west-2".to_string(),
            String::new(),
        ];

        let ordered = optimize_by_regions(&regions, &priorities);

        assert_eq!(ordered, vec!["US-WEST-2", "us-east-1"]);
    }
}
