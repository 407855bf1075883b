//! One-time signed download links.
//!
//! A capability holder exchanges an authorized file path for a ticket that
//! can be fetched without any bearer header (browser-native downloads). The
//! ticket is sealed with AES-256-GCM under a fresh nonce and handed out as
//! two hex strings, `signed` (ciphertext) and `nonce`.
//!
//! Every issued ciphertext is recorded in an in-memory table together with a
//! SHA-256 checksum of its plaintext. Redemption removes the entry, so a link
//! works exactly once. Redemption failures are deliberately coarse: a link
//! that was never issued and one that was already consumed both yield
//! [`AccessError::NotFound`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::capability::unix_now;
use crate::error::{AccessError, Result};

/// AES-256-GCM key length in bytes.
pub const KEY_LENGTH: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LENGTH: usize = 12;

/// Separates the ticket fields in the sealed plaintext. NUL cannot appear in
/// a filesystem path.
const FIELD_SEPARATOR: &str = "\0";

const FIELD_COUNT: usize = 4;

/// How the fetch path treats the file behind a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TicketKind {
    /// Serve the file in place.
    Regular,
    /// Temporary archive, deleted after it has been served.
    EphemeralArchive,
}

impl TicketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketKind::Regular => "regular",
            TicketKind::EphemeralArchive => "ephemeral-archive",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "regular" => Some(TicketKind::Regular),
            "ephemeral-archive" => Some(TicketKind::EphemeralArchive),
            _ => None,
        }
    }
}

impl fmt::Display for TicketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The metadata bound into a signed link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    /// Id of the capability the link was issued under.
    pub token_id: String,
    /// Absolute path of the file to serve.
    pub file_path: PathBuf,
    /// Unix timestamp after which the link is dead.
    pub expires_at: i64,
    pub kind: TicketKind,
}

impl Ticket {
    pub fn new(
        token_id: impl Into<String>,
        file_path: impl Into<PathBuf>,
        expires_at: i64,
        kind: TicketKind,
    ) -> Self {
        Self {
            token_id: token_id.into(),
            file_path: file_path.into(),
            expires_at,
            kind,
        }
    }

    fn encode(&self) -> Result<String> {
        let path = self
            .file_path
            .to_str()
            .ok_or_else(|| AccessError::Malformed("file path is not valid UTF-8".to_string()))?;
        for (name, value) in [("token id", self.token_id.as_str()), ("file path", path)] {
            if value.is_empty() || value.contains(FIELD_SEPARATOR) {
                return Err(AccessError::Malformed(format!("invalid {name}")));
            }
        }
        Ok([
            self.token_id.as_str(),
            path,
            &self.expires_at.to_string(),
            self.kind.as_str(),
        ]
        .join(FIELD_SEPARATOR))
    }

    fn decode(encoded: &str) -> Result<Self> {
        let fields: Vec<&str> = encoded
            .split(FIELD_SEPARATOR)
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() != FIELD_COUNT {
            return Err(AccessError::MalformedMetadata);
        }
        let expires_at = fields[2]
            .parse::<i64>()
            .map_err(|_| AccessError::MalformedMetadata)?;
        let kind = TicketKind::parse(fields[3]).ok_or(AccessError::MalformedMetadata)?;
        Ok(Self {
            token_id: fields[0].to_string(),
            file_path: PathBuf::from(fields[1]),
            expires_at,
            kind,
        })
    }
}

/// The externally visible form of a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedLink {
    /// Hex-encoded ciphertext.
    pub signed: String,
    /// Hex-encoded nonce.
    pub nonce: String,
}

/// Table entry for an outstanding ticket.
#[derive(Debug)]
struct Outstanding {
    checksum: [u8; 32],
    expires_at: i64,
    /// Set for ephemeral archives, so evicting the entry can also reclaim the file.
    archive: Option<PathBuf>,
}

/// Issues and redeems one-time signed links.
///
/// Owns the AES key and the table of outstanding tickets. Share it behind an
/// `Arc`; all table access goes through one mutex, so concurrent redemptions
/// of the same link are linearized and exactly one of them succeeds.
pub struct LinkSigner {
    cipher: Aes256Gcm,
    outstanding: Mutex<HashMap<String, Outstanding>>,
}

impl fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSigner")
            .field("key", &"[REDACTED]")
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

impl LinkSigner {
    /// Create a signer from a 32-byte key.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_LENGTH {
            return Err(AccessError::InvalidKey(format!(
                "link key must be {KEY_LENGTH} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AccessError::InvalidKey(e.to_string()))?;
        Ok(Self {
            cipher,
            outstanding: Mutex::new(HashMap::new()),
        })
    }

    /// Create a signer with a random key.
    ///
    /// Links are in-memory only and die with the process, so a key that
    /// changes on every start is sufficient.
    pub fn generate() -> Self {
        let key: [u8; KEY_LENGTH] = rand::random();
        Self {
            cipher: Aes256Gcm::new(&key.into()),
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// Seal a ticket and record it as outstanding.
    pub fn issue(&self, ticket: &Ticket) -> Result<SignedLink> {
        let plaintext = ticket.encode()?;
        let nonce: [u8; NONCE_LENGTH] = rand::random();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| AccessError::Encryption(e.to_string()))?;

        let signed = hex::encode(&ciphertext);
        let entry = Outstanding {
            checksum: Sha256::digest(plaintext.as_bytes()).into(),
            expires_at: ticket.expires_at,
            archive: (ticket.kind == TicketKind::EphemeralArchive)
                .then(|| ticket.file_path.clone()),
        };
        self.lock("issue")?.insert(signed.clone(), entry);

        Ok(SignedLink {
            signed,
            nonce: hex::encode(nonce),
        })
    }

    /// Redeem a link against the current time.
    pub fn redeem(&self, signed: &str, nonce: &str) -> Result<Ticket> {
        self.redeem_at(signed, nonce, unix_now())
    }

    /// Redeem a link as if the current time were `now`.
    ///
    /// Once the link is found in the table it is consumed, whatever the
    /// outcome of the checks that follow.
    pub fn redeem_at(&self, signed: &str, nonce: &str, now: i64) -> Result<Ticket> {
        let ciphertext = hex::decode(signed)
            .map_err(|e| AccessError::Malformed(format!("signed key: {e}")))?;
        let nonce = hex::decode(nonce)
            .map_err(|e| AccessError::Malformed(format!("nonce: {e}")))?;
        if nonce.len() != NONCE_LENGTH {
            return Err(AccessError::Malformed(format!(
                "nonce must be {NONCE_LENGTH} bytes, got {}",
                nonce.len()
            )));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| AccessError::DecryptFailed)?;

        let key = hex::encode(&ciphertext);
        let entry = self
            .lock("redeem")?
            .remove(&key)
            .ok_or(AccessError::NotFound)?;

        let checksum = Sha256::digest(&plaintext);
        if !bool::from(checksum.as_slice().ct_eq(&entry.checksum)) {
            return Err(AccessError::ChecksumMismatch);
        }

        let text = String::from_utf8(plaintext).map_err(|_| AccessError::MalformedMetadata)?;
        let ticket = Ticket::decode(&text)?;
        if ticket.expires_at <= now {
            debug!(token_id = %ticket.token_id, expires_at = ticket.expires_at, "Redeemed an expired ticket");
            return Err(AccessError::Expired {
                expired_at: ticket.expires_at,
            });
        }
        Ok(ticket)
    }

    /// Evict every ticket that expired at or before `now`.
    ///
    /// Returns the ephemeral archives referenced by evicted tickets; nothing
    /// will ever serve them now, so the caller should delete them.
    pub fn purge_expired(&self, now: i64) -> Result<Vec<PathBuf>> {
        let mut orphaned = Vec::new();
        let mut table = self.lock("purge")?;
        let before = table.len();
        table.retain(|_, entry| {
            if entry.expires_at > now {
                return true;
            }
            if let Some(archive) = entry.archive.take() {
                orphaned.push(archive);
            }
            false
        });
        debug!(
            evicted = before - table.len(),
            remaining = table.len(),
            "Purged expired tickets"
        );
        Ok(orphaned)
    }

    /// Number of issued, unredeemed tickets.
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().map(|t| t.len()).unwrap_or(0)
    }

    /// Whether an ephemeral archive is still referenced by an outstanding ticket.
    pub fn references_archive(&self, path: &Path) -> bool {
        self.outstanding
            .lock()
            .map(|t| t.values().any(|e| e.archive.as_deref() == Some(path)))
            .unwrap_or(false)
    }

    fn lock(&self, context: &str) -> Result<MutexGuard<'_, HashMap<String, Outstanding>>> {
        self.outstanding
            .lock()
            .map_err(|_| AccessError::LockPoisoned {
                context: format!("ticket table lock during {context}"),
            })
    }
}
