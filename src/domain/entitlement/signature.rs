//! Payment signature verification.
//!
//! The gateway signs every client-confirmed payment with
//! HMAC-SHA256 over `{order_id}|{payment_reference}` using the merchant
//! key secret, hex-encoded. Verification recomputes the digest and
//! compares in constant time so a mismatch leaks no prefix information.

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::domain::foundation::{OrderId, PaymentReference};

/// Verifier for gateway payment signatures.
pub struct PaymentSignatureVerifier {
    /// Merchant key secret from the gateway dashboard.
    secret: SecretString,
}

impl PaymentSignatureVerifier {
    /// Creates a new verifier with the given key secret.
    pub fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Checks a client-supplied signature against the expected digest.
    ///
    /// The supplied signature must be lowercase or uppercase hex; any
    /// non-hex input fails closed. Comparison is constant-time over the
    /// decoded bytes.
    pub fn verify(
        &self,
        order_id: &OrderId,
        reference: &PaymentReference,
        supplied_signature: &str,
    ) -> bool {
        let supplied = match hex::decode(supplied_signature) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };

        let expected = compute_payment_signature(
            self.secret.expose_secret(),
            order_id,
            reference,
        );

        constant_time_compare(&expected, &supplied)
    }
}

/// Computes the raw HMAC-SHA256 digest over `{order_id}|{payment_reference}`.
pub fn compute_payment_signature(
    secret: &str,
    order_id: &OrderId,
    reference: &PaymentReference,
) -> Vec<u8> {
    let signed_payload = format!("{}|{}", order_id.as_str(), reference.as_str());

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key");
    mac.update(signed_payload.as_bytes());
    mac.finalize().into_bytes().to_vec()
}

/// Performs constant-time comparison of two byte slices.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
