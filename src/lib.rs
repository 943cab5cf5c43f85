// Enforce at crate level
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! Bounce Extraction
//!
//! Turns raw delivery-failure artifacts into canonical bounce
//! classifications for a mail transfer agent.
//!
//! # Features
//!
//! - RFC 5322 header folding and unfolding
//! - Recursive multipart MIME decoding with per-part error scoping
//! - SMTP reply and RFC 3464 delivery status code extraction
//! - Rule-based classification into Hard/Soft/Unknown bounces
//!
//! # Example
//!
//! ```rust
//! use bounce_extract::{ArtifactKind, BounceCode, BounceType, EventAssembler};
//!
//! let assembler = EventAssembler::default();
//! let event = assembler
//!     .build_bounce_event(
//!         "550 5.1.1 <a@b.co>: Recipient address rejected",
//!         ArtifactKind::SmtpResponse,
//!         "a@b.co",
//!         "send-1",
//!     )
//!     .unwrap();
//!
//! assert_eq!(event.bounce_info.bounce_type, BounceType::Hard);
//! assert_eq!(event.bounce_info.bounce_code, BounceCode::BadEmailAddress);
//! ```

mod classify;
mod error;
mod event;
mod extract;
mod header;
mod mime;
mod types;

pub use classify::*;
pub use error::{BounceError, Result};
pub use event::*;
pub use extract::*;
pub use header::*;
pub use mime::*;
pub use types::*;
