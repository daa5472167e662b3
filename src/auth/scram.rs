//! SCRAM-SHA-256 client (RFC 5802 / RFC 7677) without channel binding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

pub const MECHANISM: &str = "SCRAM-SHA-256";

/// GS2 header: no channel binding, no authzid.
const GS2_HEADER: &str = "n,,";

fn rejected(message: impl std::fmt::Display) -> Error {
    Error::ConnectionRejected(format!("SCRAM authentication failed: {message}"))
}

fn hmac(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key).map_err(rejected)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

pub struct ScramSha256 {
    nonce: String,
    password: String,
    auth_message: Option<String>,
    salted_password: Option<[u8; 32]>,
}

impl ScramSha256 {
    pub fn new(password: &str) -> Self {
        let mut nonce_bytes = [0u8; 24];
        rand::rng().fill(&mut nonce_bytes);
        Self::with_nonce(password, STANDARD.encode(nonce_bytes))
    }

    fn with_nonce(password: &str, nonce: String) -> Self {
        Self {
            nonce,
            password: password.to_owned(),
            auth_message: None,
            salted_password: None,
        }
    }

    /// The server ignores the SCRAM user name; the startup user is used.
    fn client_first_bare(&self) -> String {
        format!("n=,r={}", self.nonce)
    }

    pub fn client_first_message(&self) -> String {
        format!("{GS2_HEADER}{}", self.client_first_bare())
    }

    /// Consume server-first-message `r=..,s=..,i=..` and produce client-final-message.
    pub fn process_server_first(&mut self, server_first: &str) -> Result<String> {
        let mut combined_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for part in server_first.split(',') {
            if let Some(value) = part.strip_prefix("r=") {
                combined_nonce = Some(value);
            } else if let Some(value) = part.strip_prefix("s=") {
                salt = Some(value);
            } else if let Some(value) = part.strip_prefix("i=") {
                iterations = value.parse::<u32>().ok();
            }
        }

        let combined_nonce = combined_nonce.ok_or_else(|| rejected("missing server nonce"))?;
        let salt = salt.ok_or_else(|| rejected("missing salt"))?;
        let iterations = iterations
            .filter(|&n| n > 0)
            .ok_or_else(|| rejected("missing iteration count"))?;
        if !combined_nonce.starts_with(&self.nonce) {
            return Err(rejected("server nonce does not extend the client nonce"));
        }
        let salt = STANDARD.decode(salt).map_err(rejected)?;

        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);

        let without_proof = format!(
            "c={},r={combined_nonce}",
            STANDARD.encode(GS2_HEADER.as_bytes())
        );
        let auth_message = format!(
            "{},{server_first},{without_proof}",
            self.client_first_bare()
        );
        let client_signature = hmac(&stored_key, auth_message.as_bytes())?;

        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();

        self.auth_message = Some(auth_message);
        self.salted_password = Some(salted_password);
        Ok(format!("{without_proof},p={}", STANDARD.encode(proof)))
    }

    /// Check the server signature in server-final-message `v=..`.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(error) = server_final.strip_prefix("e=") {
            return Err(rejected(error));
        }
        let signature = server_final
            .strip_prefix("v=")
            .ok_or_else(|| rejected("malformed server-final-message"))?;
        let signature = STANDARD.decode(signature).map_err(rejected)?;

        let (Some(salted_password), Some(auth_message)) =
            (&self.salted_password, &self.auth_message)
        else {
            return Err(rejected("server-final-message arrived before server-first-message"));
        };
        let server_key = hmac(salted_password, b"Server Key")?;
        let expected = hmac(&server_key, auth_message.as_bytes())?;
        if signature != expected {
            return Err(rejected("server signature mismatch"));
        }
        Ok(())
    }
}
