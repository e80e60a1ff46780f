//! Client-certificate lookup for mutual TLS.
//!
//! The secret-store client asks a [`CertificateProvider`] for its identity
//! at HTTP-client construction time. Host certificate stores differ per
//! platform, so the provider is a trait; the shipped implementation reads a
//! directory of PEM bundles indexed by a small `certs.json` manifest.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// A client certificate plus private key, ready to hand to an HTTP client.
#[derive(Debug, Clone)]
pub struct ClientCertificate {
    pub thumbprint: String,
    pub subject: String,
    pub not_after: DateTime<Utc>,
    /// PEM bundle: certificate chain followed by the private key.
    pub pem: Vec<u8>,
}

/// Abstract certificate lookup.
pub trait CertificateProvider: Send + Sync {
    /// Find by exact thumbprint (case-insensitive hex).
    fn find_by_thumbprint(&self, thumbprint: &str) -> Option<ClientCertificate>;

    /// Find by subject name; with several candidates, the one with the
    /// latest expiry wins.
    fn find_by_subject_name(&self, subject: &str) -> Option<ClientCertificate>;

    /// Like [`Self::find_by_thumbprint`] but absence is a hard error.
    ///
    /// # Errors
    ///
    /// Returns an error when no certificate matches.
    fn get_required_by_thumbprint(&self, thumbprint: &str) -> Result<ClientCertificate> {
        self.find_by_thumbprint(thumbprint)
            .with_context(|| format!("no client certificate with thumbprint '{thumbprint}'"))
    }

    /// Like [`Self::find_by_subject_name`] but absence is a hard error.
    ///
    /// # Errors
    ///
    /// Returns an error when no certificate matches.
    fn get_required_by_subject_name(&self, subject: &str) -> Result<ClientCertificate> {
        self.find_by_subject_name(subject)
            .with_context(|| format!("no client certificate with subject '{subject}'"))
    }
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    thumbprint: String,
    subject: String,
    #[serde(rename = "notAfter")]
    not_after: DateTime<Utc>,
    file: String,
}

/// Certificate provider backed by a directory of PEM bundles.
///
/// The directory contains a `certs.json` manifest listing, per certificate,
/// its thumbprint, subject, expiry, and PEM file name.
pub struct PemDirectoryProvider {
    dir: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl PemDirectoryProvider {
    /// Load the manifest from `dir/certs.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest is missing or malformed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let manifest_path = dir.join("certs.json");
        let raw = std::fs::read_to_string(&manifest_path)
            .with_context(|| format!("failed to read {}", manifest_path.display()))?;
        let entries: Vec<ManifestEntry> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse {}", manifest_path.display()))?;
        Ok(Self { dir, entries })
    }

    fn load(&self, entry: &ManifestEntry) -> Option<ClientCertificate> {
        let path = self.dir.join(&entry.file);
        match std::fs::read(&path) {
            Ok(pem) => Some(ClientCertificate {
                thumbprint: entry.thumbprint.clone(),
                subject: entry.subject.clone(),
                not_after: entry.not_after,
                pem,
            }),
            Err(err) => {
                tracing::warn!(
                    file = %path.display(),
                    error = %err,
                    "Certificate listed in manifest but unreadable"
                );
                None
            }
        }
    }
}

impl CertificateProvider for PemDirectoryProvider {
    fn find_by_thumbprint(&self, thumbprint: &str) -> Option<ClientCertificate> {
        self.entries
            .iter()
            .find(|e| e.thumbprint.eq_ignore_ascii_case(thumbprint))
            .and_then(|e| self.load(e))
    }

    fn find_by_subject_name(&self, subject: &str) -> Option<ClientCertificate> {
        self.entries
            .iter()
            .filter(|e| e.subject == subject)
            .max_by_key(|e| e.not_after)
            .and_then(|e| self.load(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture(dir: &Path) {
        let manifest = serde_json::json!([
            {
                "thumbprint": "AABB01",
                "subject": "CN=ingest-client",
                "notAfter": "2025-06-01T00:00:00Z",
                "file": "old.pem"
            },
            {
                "thumbprint": "AABB02",
                "subject": "CN=ingest-client",
                "notAfter": "2027-06-01T00:00:00Z",
                "file": "new.pem"
            }
        ]);
        std::fs::write(dir.join("certs.json"), manifest.to_string()).unwrap();
        std::fs::write(dir.join("old.pem"), b"-----OLD-----").unwrap();
        std::fs::write(dir.join("new.pem"), b"-----NEW-----").unwrap();
    }

    #[test]
    fn thumbprint_lookup_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let provider = PemDirectoryProvider::open(dir.path()).unwrap();
        let cert = provider.find_by_thumbprint("aabb01").unwrap();
        assert_eq!(cert.pem, b"-----OLD-----");
    }

    #[test]
    fn subject_lookup_prefers_latest_expiry() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let provider = PemDirectoryProvider::open(dir.path()).unwrap();
        let cert = provider.find_by_subject_name("CN=ingest-client").unwrap();
        assert_eq!(cert.thumbprint, "AABB02");
        assert_eq!(cert.pem, b"-----NEW-----");
    }

    #[test]
    fn required_lookup_fails_hard_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        write_fixture(dir.path());
        let provider = PemDirectoryProvider::open(dir.path()).unwrap();
        assert!(provider.get_required_by_thumbprint("FFFF").is_err());
        assert!(provider.find_by_subject_name("CN=missing").is_none());
    }
}
