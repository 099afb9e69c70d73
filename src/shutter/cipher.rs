//! Eon lookup on chain plus a JSON-RPC encryption helper.
//!
//! The threshold cipher runs out of process; this client sends it the plaintext, eon key,
//! identity and sigma and expects the serialized ciphertext back.

use crate::chain::ChainGateway;
use crate::error::{EncryptionError, Result};
use crate::shutter::contracts::{eon_key, keyper_set_index_for_block};
use crate::shutter::{EncryptionService, EonKey, IdentityPreimage};
use crate::utils::error::compact_error_message;
use crate::utils::hex::clean_hex;
use crate::utils::rpc::RPC_ERR_MAX_LEN;
use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const CIPHER_HTTP_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptParams {
    eon: u64,
    eon_key: String,
    identity_preimage: String,
    sigma: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct EncryptResponse {
    result: Option<String>,
    error: Option<RpcErrorBody>,
}

fn decode_cipher_response(body: &str) -> Result<Bytes> {
    let parsed: EncryptResponse = serde_json::from_str(body).map_err(|e| {
        EncryptionError::Malformed(format!(
            "{e}: {}",
            compact_error_message(body, RPC_ERR_MAX_LEN)
        ))
    })?;
    if let Some(err) = parsed.error {
        return Err(EncryptionError::Service(format!("{} ({})", err.message, err.code)).into());
    }
    let result = parsed
        .result
        .ok_or_else(|| EncryptionError::Malformed("response has no result".to_string()))?;
    let raw = hex::decode(clean_hex(&result))
        .map_err(|e| EncryptionError::Malformed(format!("ciphertext is not hex: {e}")))?;
    if raw.is_empty() {
        return Err(EncryptionError::Malformed("empty ciphertext".to_string()).into());
    }
    Ok(Bytes::from(raw))
}

pub struct ShutterEncryption {
    gateway: Arc<dyn ChainGateway>,
    keyper_set_manager: Address,
    key_broadcast: Address,
    url: String,
    client: Client,
}

impl ShutterEncryption {
    pub fn new(
        gateway: Arc<dyn ChainGateway>,
        keyper_set_manager: Address,
        key_broadcast: Address,
        url: impl Into<String>,
    ) -> Self {
        let client = match Client::builder()
            .timeout(Duration::from_millis(CIPHER_HTTP_TIMEOUT_MS))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                tracing::warn!(
                    "[ENCRYPT] failed to construct timeout HTTP client: {err}. Falling back to default client."
                );
                Client::new()
            }
        };
        Self {
            gateway,
            keyper_set_manager,
            key_broadcast,
            url: url.into(),
            client,
        }
    }
}

#[async_trait]
impl EncryptionService for ShutterEncryption {
    async fn current_eon(&self, lookahead: u64) -> Result<EonKey> {
        let head = self.gateway.head_height().await?;
        let eon = keyper_set_index_for_block(
            self.gateway.as_ref(),
            self.keyper_set_manager,
            head.saturating_add(lookahead),
        )
        .await?;
        let public_key = eon_key(self.gateway.as_ref(), self.key_broadcast, eon).await?;
        Ok(EonKey { eon, public_key })
    }

    async fn encrypt(
        &self,
        plaintext: &[u8],
        key: &EonKey,
        identity: &IdentityPreimage,
        sigma: B256,
    ) -> Result<Bytes> {
        let params = EncryptParams {
            eon: key.eon,
            eon_key: format!("0x{}", hex::encode(&key.public_key)),
            identity_preimage: identity.to_string(),
            sigma: format!("{sigma:#x}"),
            message: format!("0x{}", hex::encode(plaintext)),
        };
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "shutter_encrypt",
            "params": [params]
        });

        let resp = tokio::time::timeout(
            Duration::from_millis(CIPHER_HTTP_TIMEOUT_MS),
            self.client.post(&self.url).json(&payload).send(),
        )
        .await
        .map_err(|_| {
            EncryptionError::Service(format!(
                "request timed out after {CIPHER_HTTP_TIMEOUT_MS}ms"
            ))
        })?
        .map_err(|err| EncryptionError::Service(err.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| EncryptionError::Service(err.to_string()))?;
        if !status.is_success() {
            return Err(EncryptionError::Service(format!(
                "HTTP {status}: {}",
                compact_error_message(&body, RPC_ERR_MAX_LEN)
            ))
            .into());
        }
        decode_cipher_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::decode_cipher_response;
    use crate::error::{EncryptionError, ProbeError};

    #[test]
    fn cipher_response_yields_ciphertext_bytes() {
        let bytes = decode_cipher_response(r#"{"jsonrpc":"2.0","id":1,"result":"0x03abcd"}"#)
            .expect("valid response");
        assert_eq!(bytes.as_ref(), &[0x03, 0xab, 0xcd]);
    }

    #[test]
    fn cipher_error_bodies_are_reported() {
        let err = decode_cipher_response(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"bad eon key"}}"#,
        )
        .expect_err("error body");
        assert!(matches!(
            err,
            ProbeError::Encryption(EncryptionError::Service(ref m)) if m.contains("bad eon key")
        ));

        let err = decode_cipher_response(r#"{"result":"0x"}"#).expect_err("empty");
        assert!(matches!(err, ProbeError::Encryption(EncryptionError::Malformed(_))));
        assert!(decode_cipher_response("<html>").is_err());
    }
}
