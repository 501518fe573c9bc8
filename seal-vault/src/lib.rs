//! Versioned, encrypted, content-addressed vault files.
//!
//! A vault is the unit of gateway configuration fanned out from the GM to
//! the LM fleet: a string -> string mapping plus metadata, written as
//!
//! ```text
//! <plaintext header JSON>\n<encrypted body>
//! ```
//!
//! where the body is the canonical JSON serialization of the mapping pushed
//! through the field cipher, and the header carries the plaintext seq, pg,
//! entry count, and a SHA-256 hash over the canonical body.
//!
//! Readers never trust a file that fails decryption or whose hash doesn't
//! match: such files are skipped (and logged), never promoted to "latest".

pub mod codec;
pub mod diff;
pub mod storage;

pub use codec::{Vault, VaultError, VaultHeader};
pub use diff::{compute_diff, VaultDiff};
pub use storage::VaultStore;
