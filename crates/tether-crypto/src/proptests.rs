#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::identity::{verify_signature, Identity};
    use crate::login::{build_login_credential, verify_login_credential, LOGIN_WINDOW_SECS};
    use crate::sealed_box::{open_with_identity, seal_to_signing_key};
    use crate::secretbox::{decrypt, encrypt, MIN_ENVELOPE_LEN};
    use crate::session_keys::{SessionKeys, SessionRole};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_identity_determinism(seed in "[ -~]{1,64}") {
            let a = Identity::from_seed(&seed).unwrap();
            let b = Identity::from_seed(&seed).unwrap();
            prop_assert_eq!(a.public_key(), b.public_key());
            prop_assert_eq!(a.identifier(), b.identifier());
        }

        #[test]
        fn test_identity_signature_round_trip(
            seed in any::<[u8; 32]>(),
            message in any::<Vec<u8>>()
        ) {
            let identity = Identity::from_seed_bytes(&seed);
            let sig = identity.sign(&message);
            prop_assert!(verify_signature(&identity.public_key(), &message, &sig).is_ok());
        }

        #[test]
        fn test_role_key_agreement(
            x_seed in any::<[u8; 32]>(),
            y_seed in any::<[u8; 32]>(),
            message in any::<Vec<u8>>()
        ) {
            prop_assume!(x_seed != y_seed);
            let x = Identity::from_seed_bytes(&x_seed);
            let y = Identity::from_seed_bytes(&y_seed);

            // x -> y
            let x_client = SessionKeys::derive(&x, &y.public_key(), SessionRole::Client).unwrap();
            let y_server = SessionKeys::derive(&y, &x.public_key(), SessionRole::Server).unwrap();
            prop_assert_eq!(x_client.tx, y_server.rx);

            // y -> x
            let y_client = SessionKeys::derive(&y, &x.public_key(), SessionRole::Client).unwrap();
            let x_server = SessionKeys::derive(&x, &y.public_key(), SessionRole::Server).unwrap();
            prop_assert_eq!(y_client.tx, x_server.rx);

            let envelope = encrypt(&message, &x_client.tx).unwrap();
            prop_assert_eq!(decrypt(&envelope, &y_server.rx).unwrap(), message);
        }

        #[test]
        fn test_sealed_box_round_trip(
            recipient_seed in any::<[u8; 32]>(),
            other_seed in any::<[u8; 32]>(),
            sender_seed in any::<[u8; 32]>()
        ) {
            prop_assume!(recipient_seed != other_seed);
            let recipient = Identity::from_seed_bytes(&recipient_seed);
            let other = Identity::from_seed_bytes(&other_seed);
            let sender = Identity::from_seed_bytes(&sender_seed);

            let sealed = seal_to_signing_key(&sender.public_key(), &recipient.public_key()).unwrap();
            prop_assert_eq!(
                open_with_identity(&sealed, &recipient).unwrap(),
                sender.public_key().to_vec()
            );
            prop_assert!(open_with_identity(&sealed, &other).is_err());
        }

        #[test]
        fn test_short_envelopes_never_decrypt(
            key in any::<[u8; 32]>(),
            bytes in proptest::collection::vec(any::<u8>(), 0..MIN_ENVELOPE_LEN)
        ) {
            prop_assert!(decrypt(&bytes, &key).is_err());
        }

        #[test]
        fn test_login_window(seed in any::<[u8; 32]>(), offset in 0u64..LOGIN_WINDOW_SECS) {
            let identity = Identity::from_seed_bytes(&seed);
            let start = 1_700_000_100u64;
            let cred = build_login_credential(&identity, start + offset);
            prop_assert_eq!(&cred, &build_login_credential(&identity, start));
            prop_assert!(verify_login_credential(&cred, start).is_ok());
        }
    }
}
