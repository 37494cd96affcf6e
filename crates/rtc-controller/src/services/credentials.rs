//! Credential issuer.
//!
//! Signs per-identity, time-limited credentials that participants and the
//! controller's own recording/transcription bots present to the provider.
//!
//! # Token format
//!
//! The `userSig` is a base64url (unpadded) JSON document:
//!
//! ```json
//! {"identifier": "u1", "sdkappid": 1400000001, "time": 1700000000,
//!  "expire": 600, "sig": "<base64 HMAC-SHA256>"}
//! ```
//!
//! `sig` is HMAC-SHA256 over the newline-terminated lines
//! `identifier:{id}`, `sdkappid:{app}`, `time:{t}`, `expire:{e}`, keyed with
//! the application secret.
//!
//! # Security
//!
//! - The signing secret is only reachable through `expose_secret()`
//! - Issued signatures are never logged

use crate::config::MAX_CREDENTIAL_EXPIRE_SECONDS;
use crate::errors::RtcError;
use crate::models::Credential;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use common::secret::{ExposeSecret, SecretString};
use ring::hmac;
use serde::{Deserialize, Serialize};

/// Issues signed credentials for an identity.
pub trait CredentialIssuer: Send + Sync {
    /// Issue a credential for `identity` valid for `expire_seconds`, or the
    /// configured default when `None`.
    fn issue(&self, identity: &str, expire_seconds: Option<u64>) -> Result<Credential, RtcError>;
}

/// Signed token document carried in `userSig`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDocument {
    pub identifier: String,
    pub sdkappid: u64,
    pub time: i64,
    pub expire: u64,
    pub sig: String,
}

/// HMAC-SHA256 credential signer.
pub struct HmacCredentialIssuer {
    sdk_app_id: u64,
    secret: SecretString,
    default_expire_seconds: u64,
}

impl HmacCredentialIssuer {
    pub fn new(sdk_app_id: u64, secret: SecretString, default_expire_seconds: u64) -> Self {
        Self {
            sdk_app_id,
            secret,
            default_expire_seconds,
        }
    }

    fn key(&self) -> hmac::Key {
        hmac::Key::new(hmac::HMAC_SHA256, self.secret.expose_secret().as_bytes())
    }

    fn signed_content(&self, identifier: &str, time: i64, expire: u64) -> String {
        format!(
            "identifier:{identifier}\nsdkappid:{}\ntime:{time}\nexpire:{expire}\n",
            self.sdk_app_id
        )
    }

    fn signature(&self, identifier: &str, time: i64, expire: u64) -> String {
        let content = self.signed_content(identifier, time, expire);
        STANDARD.encode(hmac::sign(&self.key(), content.as_bytes()).as_ref())
    }

    /// Check a previously issued `userSig` against this signer's key.
    ///
    /// Returns the decoded document when the signature matches. The
    /// comparison is constant-time.
    pub fn verify(&self, user_sig: &str) -> Option<TokenDocument> {
        let bytes = URL_SAFE_NO_PAD.decode(user_sig).ok()?;
        let document: TokenDocument = serde_json::from_slice(&bytes).ok()?;
        if document.sdkappid != self.sdk_app_id {
            return None;
        }
        let sig = STANDARD.decode(&document.sig).ok()?;
        let content = self.signed_content(&document.identifier, document.time, document.expire);
        hmac::verify(&self.key(), content.as_bytes(), &sig).ok()?;
        Some(document)
    }
}

impl CredentialIssuer for HmacCredentialIssuer {
    fn issue(&self, identity: &str, expire_seconds: Option<u64>) -> Result<Credential, RtcError> {
        if identity.is_empty() {
            return Err(RtcError::InvalidArgument(
                "identity must not be empty".to_string(),
            ));
        }

        let expire = expire_seconds.unwrap_or(self.default_expire_seconds);
        if expire == 0 || expire > MAX_CREDENTIAL_EXPIRE_SECONDS {
            return Err(RtcError::InvalidArgument(format!(
                "expireSeconds must be between 1 and {MAX_CREDENTIAL_EXPIRE_SECONDS}"
            )));
        }

        let time = Utc::now().timestamp();
        let document = TokenDocument {
            identifier: identity.to_string(),
            sdkappid: self.sdk_app_id,
            time,
            expire,
            sig: self.signature(identity, time, expire),
        };

        let encoded = serde_json::to_vec(&document).map_err(|e| {
            tracing::error!(target: "rtc.services.credentials", error = %e, "Failed to encode token document");
            RtcError::Internal
        })?;

        Ok(Credential {
            sdk_app_id: self.sdk_app_id,
            user_id: identity.to_string(),
            user_sig: URL_SAFE_NO_PAD.encode(encoded),
        })
    }
}

/// Mock issuers for tests.
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Issues predictable, unsigned credentials and remembers the identities asked for.
    pub struct FixedCredentialIssuer {
        sdk_app_id: u64,
        fail: bool,
        issued: Mutex<Vec<String>>,
    }

    impl FixedCredentialIssuer {
        pub fn new(sdk_app_id: u64) -> Self {
            Self {
                sdk_app_id,
                fail: false,
                issued: Mutex::new(Vec::new()),
            }
        }

        /// An issuer whose every call fails with `Upstream`.
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(0)
            }
        }

        /// Identities issued so far, in order.
        pub fn issued(&self) -> Vec<String> {
            self.issued.lock().map(|v| v.clone()).unwrap_or_default()
        }
    }

    impl CredentialIssuer for FixedCredentialIssuer {
        fn issue(
            &self,
            identity: &str,
            expire_seconds: Option<u64>,
        ) -> Result<Credential, RtcError> {
            if self.fail {
                return Err(RtcError::Upstream("mock credential issuer failure".to_string()));
            }
            if let Ok(mut issued) = self.issued.lock() {
                issued.push(identity.to_string());
            }
            Ok(Credential {
                sdk_app_id: self.sdk_app_id,
                user_id: identity.to_string(),
                user_sig: format!("sig-{identity}-{}", expire_seconds.unwrap_or(600)),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::FixedCredentialIssuer;
    use super::*;

    fn issuer() -> HmacCredentialIssuer {
        HmacCredentialIssuer::new(1_400_000_001, SecretString::from("sdk-secret"), 600)
    }

    #[test]
    fn test_issue_produces_verifiable_token() {
        let issuer = issuer();
        let credential = issuer.issue("u1", None).unwrap();

        assert_eq!(credential.sdk_app_id, 1_400_000_001);
        assert_eq!(credential.user_id, "u1");

        let document = issuer.verify(&credential.user_sig).expect("signature should verify");
        assert_eq!(document.identifier, "u1");
        assert_eq!(document.expire, 600);
    }

    #[test]
    fn test_issue_honors_expire_override() {
        let issuer = issuer();
        let credential = issuer.issue("record_r1", Some(3600)).unwrap();

        let document = issuer.verify(&credential.user_sig).unwrap();
        assert_eq!(document.expire, 3600);
        assert_eq!(document.identifier, "record_r1");
    }

    #[test]
    fn test_verify_rejects_other_key() {
        let credential = issuer().issue("u1", None).unwrap();
        let other = HmacCredentialIssuer::new(1_400_000_001, SecretString::from("other"), 600);

        assert!(other.verify(&credential.user_sig).is_none());
    }

    #[test]
    fn test_verify_rejects_tampered_document() {
        let issuer = issuer();
        let credential = issuer.issue("u1", None).unwrap();

        let bytes = URL_SAFE_NO_PAD.decode(&credential.user_sig).unwrap();
        let mut document: TokenDocument = serde_json::from_slice(&bytes).unwrap();
        document.identifier = "admin".to_string();
        let forged = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&document).unwrap());

        assert!(issuer.verify(&forged).is_none());
        assert!(issuer.verify("not base64 !!").is_none());
    }

    #[test]
    fn test_verify_rejects_malformed_signature() {
        let issuer = issuer();
        let credential = issuer.issue("u1", None).unwrap();
        let bytes = URL_SAFE_NO_PAD.decode(&credential.user_sig).unwrap();
        let document: TokenDocument = serde_json::from_slice(&bytes).unwrap();

        let reencode = |sig: String| {
            let mut forged = document.clone();
            forged.sig = sig;
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap())
        };

        let truncated = STANDARD.decode(&document.sig).unwrap();
        let truncated = STANDARD.encode(truncated.get(..16).unwrap());
        assert!(issuer.verify(&reencode(truncated)).is_none());
        assert!(issuer.verify(&reencode("***".to_string())).is_none());
        assert!(issuer.verify(&reencode(String::new())).is_none());
        assert!(issuer.verify(&reencode(document.sig.clone())).is_some());
    }

    #[test]
    fn test_issue_rejects_bad_input() {
        let issuer = issuer();
        assert!(matches!(
            issuer.issue("", None),
            Err(RtcError::InvalidArgument(_))
        ));
        assert!(matches!(
            issuer.issue("u1", Some(0)),
            Err(RtcError::InvalidArgument(_))
        ));
        assert!(matches!(
            issuer.issue("u1", Some(MAX_CREDENTIAL_EXPIRE_SECONDS + 1)),
            Err(RtcError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_fixed_issuer_records_identities() {
        let issuer = FixedCredentialIssuer::new(7);
        issuer.issue("u1", None).unwrap();
        issuer.issue("ai_transcription_r1", Some(60)).unwrap();

        assert_eq!(issuer.issued(), vec!["u1", "ai_transcription_r1"]);
        assert!(FixedCredentialIssuer::failing().issue("u1", None).is_err());
    }
}
