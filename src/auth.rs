//! RSA-OAEP password encryption against a server-supplied public key.
//!
//! The SPICE link handshake hands the client a DER-encoded (SubjectPublicKeyInfo)
//! RSA public key; the client encrypts the connection password against it with
//! OAEP/SHA-1 padding and sends the ciphertext as-is. This is the one piece of
//! cryptography this crate performs itself rather than delegating outward.

use crate::error::{Result, SpiceError};
use rsa::pkcs8::DecodePublicKey;
use rsa::rand_core::OsRng;
use rsa::{Oaep, RsaPublicKey};
use sha1::Sha1;

pub fn encrypt_password(password: &str, pub_key_der: &[u8]) -> Result<Vec<u8>> {
    let public_key = RsaPublicKey::from_public_key_der(pub_key_der)
        .map_err(|e| SpiceError::Protocol(format!("failed to parse server public key: {e}")))?;
    let padding = Oaep::new::<Sha1>();
    public_key
        .encrypt(&mut OsRng, padding, password.as_bytes())
        .map_err(|e| SpiceError::Protocol(format!("failed to encrypt password: {e}")))
}
