//! Property-based tests for the crypto primitives
//!
//! 1. **Round-trip**: decrypt(encrypt(m)) == m for both key sizes
//! 2. **Authentication**: any bit flip in ciphertext, tag or AAD fails
//! 3. **Determinism**: derivation and ratcheting are pure functions
//! 4. **Chain uniqueness**: ratchet steps never repeat material

use proptest::prelude::*;
use sealframe_crypto::{IV_SIZE, TAG_SIZE, decrypt, derive_key_set, encrypt, ratchet_material};

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 16..=16),
        proptest::collection::vec(any::<u8>(), 32..=32),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn encrypt_decrypt_roundtrip(
        key in key_strategy(),
        iv in any::<[u8; IV_SIZE]>(),
        aad in proptest::collection::vec(any::<u8>(), 0..32),
        plaintext in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let ciphertext = encrypt(&key, &iv, &aad, &plaintext).unwrap();
        prop_assert_eq!(ciphertext.len(), plaintext.len() + TAG_SIZE);

        let decrypted = decrypt(&key, &iv, &aad, &ciphertext).unwrap();
        prop_assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn flipped_ciphertext_bit_fails(
        key in key_strategy(),
        iv in any::<[u8; IV_SIZE]>(),
        plaintext in proptest::collection::vec(any::<u8>(), 1..128),
        flip in any::<proptest::sample::Index>(),
    ) {
        let mut ciphertext = encrypt(&key, &iv, b"aad", &plaintext).unwrap();
        let position = flip.index(ciphertext.len());
        ciphertext[position] ^= 0x01;

        prop_assert!(decrypt(&key, &iv, b"aad", &ciphertext).is_err());
    }

    #[test]
    fn flipped_aad_bit_fails(
        key in key_strategy(),
        iv in any::<[u8; IV_SIZE]>(),
        aad in proptest::collection::vec(any::<u8>(), 1..32),
        plaintext in proptest::collection::vec(any::<u8>(), 0..128),
        flip in any::<proptest::sample::Index>(),
    ) {
        let ciphertext = encrypt(&key, &iv, &aad, &plaintext).unwrap();

        let mut tampered = aad.clone();
        let position = flip.index(tampered.len());
        tampered[position] ^= 0x01;

        prop_assert!(decrypt(&key, &iv, &tampered, &ciphertext).is_err());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn derivation_is_deterministic(
        material in proptest::collection::vec(any::<u8>(), 1..64),
        salt in proptest::collection::vec(any::<u8>(), 1..32),
        bits in prop_oneof![Just(128u32), Just(256u32)],
    ) {
        let a = derive_key_set(&material, &salt, bits).unwrap();
        let b = derive_key_set(&material, &salt, bits).unwrap();

        prop_assert_eq!(a.encryption_key(), b.encryption_key());
        prop_assert_eq!(a.encryption_key().len(), bits as usize / 8);
        prop_assert_eq!(a.material(), material.as_slice());
    }

    #[test]
    fn ratchet_chain_never_repeats(
        material in proptest::collection::vec(any::<u8>(), 1..64),
        salt in proptest::collection::vec(any::<u8>(), 1..32),
        steps in 2usize..8,
    ) {
        let mut chain = vec![material.clone()];
        for _ in 0..steps {
            let next = ratchet_material(chain.last().unwrap(), &salt);
            chain.push(next);
        }

        let mut deduped = chain.clone();
        deduped.sort();
        deduped.dedup();
        prop_assert_eq!(deduped.len(), chain.len(), "ratchet chain must not cycle");
    }
}
