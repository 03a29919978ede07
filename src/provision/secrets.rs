//! Secret material delivered through the provisioning endpoint.
//!
//! Key material is zeroized on drop to minimize the exposure window.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Length of the workload decryption key.
pub const CODE_KEY_LEN: usize = 32;

/// Reasons a submission is rejected.
///
/// Every variant maps to the same `401` on the wire; the reason is only
/// logged locally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed request body: {0}")]
    Malformed(String),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Authorization token mismatch")]
    TokenMismatch,

    #[error("Code secret key is not valid hex")]
    KeyEncoding,

    #[error("Incorrect key length: expected {CODE_KEY_LEN} bytes, got {0}")]
    KeyLength(usize),

    #[error("App secrets could not be stored")]
    Storage,

    #[error("Already provisioned")]
    AlreadyProvisioned,
}

impl ProtocolError {
    /// Short reason code for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "malformed",
            ProtocolError::MissingField(_) => "missing_field",
            ProtocolError::TokenMismatch => "token_mismatch",
            ProtocolError::KeyEncoding => "key_encoding",
            ProtocolError::KeyLength(_) => "key_length",
            ProtocolError::Storage => "storage",
            ProtocolError::AlreadyProvisioned => "already_provisioned",
        }
    }
}

/// 32-byte symmetric key protecting the workload.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CodeKey([u8; CODE_KEY_LEN]);

impl CodeKey {
    pub fn new(bytes: [u8; CODE_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a hex string that must hold exactly 32 bytes.
    pub fn from_hex(encoded: &str) -> Result<Self, ProtocolError> {
        let decoded = Zeroizing::new(
            hex::decode(encoded.trim()).map_err(|_| ProtocolError::KeyEncoding)?,
        );
        if decoded.len() != CODE_KEY_LEN {
            return Err(ProtocolError::KeyLength(decoded.len()));
        }
        let mut bytes = [0u8; CODE_KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; CODE_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.0))
    }
}

impl std::fmt::Debug for CodeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CodeKey(<redacted>)")
    }
}

/// Accepted secrets. Built once, fully, before the session is marked
/// provisioned; never modified afterwards.
pub struct SecretBundle {
    pub code_secret_key: CodeKey,
    /// Present only when the certificate mode requires it
    pub ssl_private_key: Option<Zeroizing<String>>,
    pub app_secrets: Option<Value>,
}

impl std::fmt::Debug for SecretBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBundle")
            .field("code_secret_key", &self.code_secret_key)
            .field("ssl_private_key", &self.ssl_private_key.as_ref().map(|_| "<redacted>"))
            .field("app_secrets", &self.app_secrets.is_some())
            .finish()
    }
}

/// Body of `POST /`.
///
/// Every field is optional at the parse level so that `app_secrets` can be
/// handled before the remaining checks; [`ProvisionRequest::to_bundle`]
/// enforces what is actually required.
#[derive(Default, Serialize, Deserialize)]
pub struct ProvisionRequest {
    /// Authorization token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    /// Hex-encoded 32-byte key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_secret_key: Option<String>,
    /// PEM private key matching the owner-supplied certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_private_key: Option<String>,
    /// Arbitrary application secrets, stored verbatim
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_secrets: Option<Value>,
}

impl Drop for ProvisionRequest {
    fn drop(&mut self) {
        if let Some(ref mut key) = self.code_secret_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.ssl_private_key {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for ProvisionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisionRequest")
            .field("uuid", &self.uuid)
            .field("code_secret_key", &self.code_secret_key.as_ref().map(|_| "<redacted>"))
            .field("ssl_private_key", &self.ssl_private_key.as_ref().map(|_| "<redacted>"))
            .field("app_secrets", &self.app_secrets.is_some())
            .finish()
    }
}

impl ProvisionRequest {
    /// Parse a JSON body.
    pub fn parse(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(body).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// `app_secrets` worth persisting (absent and `null` are skipped).
    pub fn app_secrets(&self) -> Option<&Value> {
        self.app_secrets.as_ref().filter(|value| !value.is_null())
    }

    /// Validate the request against the session parameters and build the bundle.
    ///
    /// Checks run in order: token, private key (if required), code key.
    pub fn to_bundle(
        &self,
        token: &str,
        requires_private_key: bool,
    ) -> Result<SecretBundle, ProtocolError> {
        match self.uuid.as_deref() {
            Some(uuid) if uuid == token => {}
            Some(_) => return Err(ProtocolError::TokenMismatch),
            None => return Err(ProtocolError::MissingField("uuid")),
        }

        let ssl_private_key = if requires_private_key {
            let key = self
                .ssl_private_key
                .as_ref()
                .ok_or(ProtocolError::MissingField("ssl_private_key"))?;
            Some(Zeroizing::new(key.clone()))
        } else {
            None
        };

        let encoded = self
            .code_secret_key
            .as_deref()
            .ok_or(ProtocolError::MissingField("code_secret_key"))?;
        let code_secret_key = CodeKey::from_hex(encoded)?;

        Ok(SecretBundle {
            code_secret_key,
            ssl_private_key,
            app_secrets: self.app_secrets().cloned(),
        })
    }
}
