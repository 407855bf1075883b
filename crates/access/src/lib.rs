//! # Sharegate Access Library
//!
//! Access-control primitives for the Sharegate file-sharing daemon.
//!
//! ## Overview
//!
//! A client never sees the filesystem directly. Every request carries a
//! capability token that grants a subset of read/write/delete over one
//! directory below the public root, and every path it names is resolved and
//! confined before any I/O happens. This crate provides:
//!
//! - **Path Confinement**: lexical normalization and segment-wise containment checks
//! - **Capability Tokens**: HS256-signed tokens carrying a scope and a directory
//! - **Signed Links**: AES-GCM sealed, single-use download tickets
//!
//! ## Example Usage
//!
//! ```rust
//! use access::{LinkSigner, Ticket, TicketKind, TokenCodec};
//!
//! let codec = TokenCodec::new(b"secret".as_slice(), "sharegate", "/srv/public").unwrap();
//! let token = codec.issue("r--", "/photos", 60).unwrap();
//! let capability = codec.validate(&token).unwrap();
//! let target = capability.check_read("2024/beach.jpg").unwrap();
//!
//! let signer = LinkSigner::generate();
//! let link = signer
//!     .issue(&Ticket::new(capability.id(), &target, capability.expires_at(), TicketKind::Regular))
//!     .unwrap();
//! assert_eq!(signer.redeem(&link.signed, &link.nonce).unwrap().file_path, target);
//! ```
//!
//! ## Modules
//!
//! - [`confine`]: Path normalization and containment
//! - [`capability`]: Capability token issue and validation
//! - [`ticket`]: One-time signed download links
//! - [`error`]: Error types

pub mod capability;
pub mod confine;
pub mod error;
pub mod ticket;

pub use capability::{unix_now, Capability, Permission, Scope, TokenCodec};
pub use error::{AccessError, ErrorKind, Result};
pub use ticket::{LinkSigner, SignedLink, Ticket, TicketKind};
