//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for every credential the controller
//! handles: the provider API key pair, the credential signing key and the
//! recording storage keys.
//!
//! `SecretString` implements `Debug` with redaction, so deriving `Debug` on
//! a config or request struct that holds one is safe. The value is zeroized
//! on drop and is only reachable through an explicit `expose_secret()`.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct ApiKeyPair {
//!     secret_id: String,
//!     secret_key: SecretString,
//! }
//!
//! let keys = ApiKeyPair {
//!     secret_id: "AKID-example".to_string(),
//!     secret_key: SecretString::from("do-not-log"),
//! };
//!
//! assert!(!format!("{keys:?}").contains("do-not-log"));
//! assert_eq!(keys.secret_key.expose_secret(), "do-not-log");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
