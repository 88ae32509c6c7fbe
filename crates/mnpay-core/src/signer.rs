//! HMAC-SHA256 request signing and callback verification
//!
//! Providers that authenticate request integrity with a checksum field compute
//! it over the plain concatenation of a protocol-defined list of fields. The
//! order of that list is part of each provider's protocol: fields are never
//! sorted or re-ordered here.

use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const REFERENCE_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Stateless HMAC-SHA256 signer over ordered field lists
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureSigner;

impl SignatureSigner {
    /// Sign `fields` (concatenated in the given order) with `secret`,
    /// returning the lowercase hex digest.
    pub fn sign<S: AsRef<str>>(secret: &str, fields: &[S]) -> String {
        let mac = Self::mac_over(secret, fields);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Recompute the digest for `fields` and compare it against a supplied
    /// checksum in constant time. Hex case is ignored.
    pub fn verify<S: AsRef<str>>(secret: &str, fields: &[S], checksum: &str) -> bool {
        let supplied = match hex::decode(checksum.trim().to_ascii_lowercase()) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let expected = Self::mac_over(secret, fields).finalize().into_bytes();

        if supplied.len() != expected.len() {
            return false;
        }
        expected.as_slice().ct_eq(&supplied).into()
    }

    fn mac_over<S: AsRef<str>>(secret: &str, fields: &[S]) -> HmacSha256 {
        // HMAC accepts keys of any length, so this cannot fail.
        let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
            .unwrap_or_else(|_| unreachable!("HMAC-SHA256 takes keys of any size"));
        for field in fields {
            mac.update(field.as_ref().as_bytes());
        }
        mac
    }
}

/// Concatenate displayable values into the string a provider signs.
///
/// Numbers are rendered with their `Display` form, so callers must format
/// amounts exactly as the provider expects (e.g. two decimals) beforehand.
pub fn append_as_string(parts: &[&dyn std::fmt::Display]) -> String {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Generate a random ASCII-letter string, used for transaction and invoice
/// references that providers require to be unique per merchant.
pub fn random_reference(len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| REFERENCE_ALPHABET[rng.gen_range(0..REFERENCE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // RFC 4231 test case 2, expressed as a split field list.
    #[test]
    fn test_sign_matches_known_vector() {
        let digest = SignatureSigner::sign("Jefe", &["what do ya want ", "for nothing?"]);
        assert_eq!(
            digest,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_field_order_is_significant() {
        let a = SignatureSigner::sign("secret", &["100.00", "TX1", "tok"]);
        let b = SignatureSigner::sign("secret", &["TX1", "100.00", "tok"]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_verify_accepts_uppercase_hex() {
        let digest = SignatureSigner::sign("k", &["terminal", "settlement-1"]);
        assert!(SignatureSigner::verify(
            "k",
            &["terminal", "settlement-1"],
            &digest.to_uppercase()
        ));
    }

    #[test]
    fn test_verify_rejects_garbage_and_truncated() {
        let digest = SignatureSigner::sign("k", &["a"]);
        assert!(!SignatureSigner::verify("k", &["a"], "not-hex"));
        assert!(!SignatureSigner::verify("k", &["a"], &digest[..32]));
        assert!(!SignatureSigner::verify("other", &["a"], &digest));
    }

    #[test]
    fn test_append_as_string() {
        let amount = 1500;
        assert_eq!(append_as_string(&[&amount, &"TX9", &"tok"]), "1500TX9tok");
    }

    #[test]
    fn test_random_reference_alphabet() {
        let reference = random_reference(24);
        assert_eq!(reference.len(), 24);
        assert!(reference.chars().all(|c| c.is_ascii_alphabetic()));
    }

    proptest! {
        #[test]
        fn prop_sign_is_deterministic(
            secret in "[a-zA-Z0-9]{1,32}",
            fields in proptest::collection::vec("[ -~]{0,16}", 1..5),
        ) {
            prop_assert_eq!(
                SignatureSigner::sign(&secret, &fields),
                SignatureSigner::sign(&secret, &fields)
            );
            let digest = SignatureSigner::sign(&secret, &fields);
            prop_assert!(SignatureSigner::verify(&secret, &fields, &digest));
        }

        #[test]
        fn prop_single_character_change_alters_digest(
            secret in "[a-z]{8}",
            fields in proptest::collection::vec("[a-z]{1,12}", 1..4),
            which in any::<prop::sample::Index>(),
        ) {
            let original = SignatureSigner::sign(&secret, &fields);
            let mut mutated = fields.clone();
            let idx = which.index(mutated.len());
            // Upper-casing the first char is a guaranteed one-character change.
            let first = mutated[idx].remove(0);
            mutated[idx].insert(0, first.to_ascii_uppercase());
            prop_assert_ne!(original, SignatureSigner::sign(&secret, &mutated));
        }
    }
}
