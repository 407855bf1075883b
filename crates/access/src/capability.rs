//! Capability tokens.
//!
//! A capability is a self-contained bearer credential granting read, write
//! and/or delete access below one directory of the public root until it
//! expires. It is encoded as a compact HS256 JWS:
//!
//! ```text
//! base64url({"alg":"HS256","typ":"JWT"}) . base64url(claims) . base64url(hmac)
//! ```
//!
//! Tokens are verified statelessly; nothing is stored on issuance and a token
//! cannot be revoked before it expires.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::confine;
use crate::error::{AccessError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Scope letter granting read access (list, download).
pub const READ_MODE: u8 = b'r';
/// Scope letter granting write access (upload, create directory).
pub const WRITE_MODE: u8 = b'w';
/// Scope letter granting delete access.
pub const DELETE_MODE: u8 = b'd';
/// Marker for a disabled scope position.
pub const DISABLED_MODE: u8 = b'-';

const MODE_LETTERS: [u8; 3] = [READ_MODE, WRITE_MODE, DELETE_MODE];

const TOKEN_ALGORITHM: &str = "HS256";
const TOKEN_TYPE: &str = "JWT";

/// A single permission carried by a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Delete,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Read => write!(f, "read"),
            Permission::Write => write!(f, "write"),
            Permission::Delete => write!(f, "delete"),
        }
    }
}

/// Read/write/delete permission bits.
///
/// The textual form is positional: `r`, `w`, `d` in that order, each either
/// the letter or `-`. `"r-d"` grants read and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Scope {
    pub read: bool,
    pub write: bool,
    pub delete: bool,
}

impl Scope {
    /// Scope granting every permission.
    pub fn full() -> Self {
        Self {
            read: true,
            write: true,
            delete: true,
        }
    }

    /// Scope granting read access only.
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// Check the textual form without building a scope.
    pub fn is_valid(mode: &str) -> bool {
        let bytes = mode.as_bytes();
        bytes.len() == MODE_LETTERS.len()
            && bytes
                .iter()
                .zip(MODE_LETTERS)
                .all(|(&b, letter)| b == letter || b == DISABLED_MODE)
    }

    /// Parse the textual form.
    pub fn parse(mode: &str) -> Result<Self> {
        if !Self::is_valid(mode) {
            return Err(AccessError::InvalidScope(mode.to_string()));
        }
        let bytes = mode.as_bytes();
        Ok(Self {
            read: bytes[0] == READ_MODE,
            write: bytes[1] == WRITE_MODE,
            delete: bytes[2] == DELETE_MODE,
        })
    }

    /// Whether the given permission is granted.
    pub fn allows(&self, permission: Permission) -> bool {
        match permission {
            Permission::Read => self.read,
            Permission::Write => self.write,
            Permission::Delete => self.delete,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = [self.read, self.write, self.delete];
        for (granted, letter) in bits.into_iter().zip(MODE_LETTERS) {
            let c = if granted { letter } else { DISABLED_MODE };
            write!(f, "{}", c as char)?;
        }
        Ok(())
    }
}

impl FromStr for Scope {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Claims {
    jti: String,
    iss: String,
    iat: i64,
    exp: i64,
    #[serde(default)]
    dir: String,
    #[serde(default)]
    scope: String,
}

/// Issues and validates capability tokens.
///
/// Holds the process-wide token secret, the issuer identity and the public
/// root every token directory is confined to. Read-only after construction,
/// so one codec can be shared across request tasks.
#[derive(Clone)]
pub struct TokenCodec {
    /// HMAC keyed with the token secret; cloned per signature.
    mac: HmacSha256,
    issuer: String,
    public_root: PathBuf,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("public_root", &self.public_root)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl TokenCodec {
    /// Create a codec.
    ///
    /// Fails if the secret is empty.
    pub fn new(
        secret: impl Into<Vec<u8>>,
        issuer: impl Into<String>,
        public_root: impl AsRef<Path>,
    ) -> Result<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(AccessError::InvalidKey(
                "token secret must not be empty".to_string(),
            ));
        }
        let mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| AccessError::InvalidKey(format!("token secret: {e}")))?;
        Ok(Self {
            mac,
            issuer: issuer.into(),
            public_root: confine::normalize(public_root.as_ref()),
        })
    }

    /// The root every capability directory is confined to.
    pub fn public_root(&self) -> &Path {
        &self.public_root
    }

    /// The issuer identity stamped into every token.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token valid for `valid_minutes` from now.
    pub fn issue(&self, scope: &str, directory: &str, valid_minutes: i64) -> Result<String> {
        self.issue_at(scope, directory, valid_minutes, unix_now())
    }

    /// Issue a token as if the current time were `now`.
    pub fn issue_at(
        &self,
        scope: &str,
        directory: &str,
        valid_minutes: i64,
        now: i64,
    ) -> Result<String> {
        Scope::parse(scope)?;
        self.resolve_directory(directory)?;
        if valid_minutes <= 0 {
            return Err(AccessError::InvalidLifetime(valid_minutes));
        }

        let claims = Claims {
            jti: Uuid::new_v4().simple().to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now.saturating_add(valid_minutes.saturating_mul(60)),
            dir: directory.to_string(),
            scope: scope.to_string(),
        };
        let header = Header {
            alg: TOKEN_ALGORITHM.to_string(),
            typ: TOKEN_TYPE.to_string(),
        };

        let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
        let signature = self.mac(signing_input.as_bytes()).finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            signing_input,
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    /// Decode and validate a token against the current time.
    pub fn validate(&self, token: &str) -> Result<Capability> {
        self.validate_at(token, unix_now())
    }

    /// Decode and validate a token as if the current time were `now`.
    pub fn validate_at(&self, token: &str, now: i64) -> Result<Capability> {
        let mut segments = token.trim().split('.');
        let (header, claims, signature) = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(h), Some(c), Some(s), None) => (h, c, s),
            _ => {
                return Err(AccessError::Malformed(
                    "token must have three segments".to_string(),
                ))
            }
        };

        let parsed_header: Header = decode_segment(header)?;
        if parsed_header.alg != TOKEN_ALGORITHM {
            return Err(AccessError::Malformed(format!(
                "unsupported algorithm {}",
                parsed_header.alg
            )));
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|e| AccessError::Malformed(format!("signature encoding: {e}")))?;
        let mut mac = self.mac(header.as_bytes());
        mac.update(b".");
        mac.update(claims.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AccessError::Malformed("signature mismatch".to_string()))?;

        let claims: Claims = decode_segment(claims)?;
        if claims.iss != self.issuer {
            return Err(AccessError::Malformed("invalid issuer".to_string()));
        }
        if now > claims.exp {
            return Err(AccessError::Expired {
                expired_at: claims.exp,
            });
        }

        let scope = Scope::parse(&claims.scope)?;
        let directory = self.resolve_directory(&claims.dir)?;

        Ok(Capability {
            id: claims.jti,
            scope,
            directory,
            issued_at: claims.iat,
            expires_at: claims.exp,
        })
    }

    fn resolve_directory(&self, directory: &str) -> Result<PathBuf> {
        let full = confine::join(&self.public_root, Path::new(directory));
        if !confine::is_inclusive(&self.public_root, &full) {
            return Err(AccessError::InvalidDirectory(directory.to_string()));
        }
        Ok(full)
    }

    fn mac(&self, data: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac
    }
}

/// A validated capability.
///
/// Produced only by [`TokenCodec::validate`]; resolves request paths against
/// the granted directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capability {
    id: String,
    scope: Scope,
    directory: PathBuf,
    issued_at: i64,
    expires_at: i64,
}

impl Capability {
    /// Token id, for audit correlation.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Granted permissions.
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Absolute directory the capability is confined to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    pub fn can_read(&self) -> bool {
        self.scope.read
    }

    pub fn can_write(&self) -> bool {
        self.scope.write
    }

    pub fn can_delete(&self) -> bool {
        self.scope.delete
    }

    /// Resolve `target` for reading.
    pub fn check_read(&self, target: impl AsRef<Path>) -> Result<PathBuf> {
        self.check(Permission::Read, target.as_ref())
    }

    /// Resolve `target` for writing.
    pub fn check_write(&self, target: impl AsRef<Path>) -> Result<PathBuf> {
        self.check(Permission::Write, target.as_ref())
    }

    /// Resolve `target` for deletion. The granted directory itself is never
    /// deletable.
    pub fn check_delete(&self, target: impl AsRef<Path>) -> Result<PathBuf> {
        self.check(Permission::Delete, target.as_ref())
    }

    fn check(&self, permission: Permission, target: &Path) -> Result<PathBuf> {
        if !self.scope.allows(permission) {
            return Err(AccessError::NoPermission(format!(
                "no {permission} permission"
            )));
        }

        let full = confine::join(&self.directory, target);
        let confined = match permission {
            Permission::Delete => confine::is_inclusive_strict(&self.directory, &full),
            Permission::Read | Permission::Write => confine::is_inclusive(&self.directory, &full),
        };
        if !confined {
            return Err(AccessError::NoPermission(format!(
                "no {permission} permission to {}",
                full.display()
            )));
        }
        Ok(full)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "permission id: {}, dir: {}, scope: {}, expires at: {}",
            self.id,
            self.directory.display(),
            self.scope,
            self.expires_at
        )
    }
}

/// Current wall-clock time as Unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| AccessError::Malformed(format!("failed to encode token: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AccessError::Malformed(format!("segment encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AccessError::Malformed(format!("segment content: {e}")))
}
