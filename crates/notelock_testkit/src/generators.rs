//! Property-based generators.

use proptest::prelude::*;
use serde_json::{json, Value};
use uuid::Uuid;

/// Strategy for arbitrary item UUIDs.
pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

/// Strategy for note-like content JSON.
pub fn arb_content() -> impl Strategy<Value = Value> {
    (
        "[a-zA-Z0-9 .,!?]{0,80}",
        "[a-zA-Z0-9 ]{0,20}",
        proptest::collection::vec(any::<u128>().prop_map(Uuid::from_u128), 0..4),
    )
        .prop_map(|(text, title, refs)| {
            let references: Vec<Value> = refs
                .into_iter()
                .map(|u| json!({ "uuid": u.to_string(), "content_type": "Note" }))
                .collect();
            json!({ "title": title, "text": text, "references": references })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{test_auth_params, test_root_keys, FixedCryptoProvider};
    use notelock_protocol::{
        decrypt_item_content, encrypt_item_content, ProtocolVersion, RawItem,
    };

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        // decrypt(encrypt(content)) == content for the latest version.
        #[test]
        fn roundtrip_is_identity(uuid in arb_uuid(), content in arb_content()) {
            let provider = FixedCryptoProvider::new();
            let encrypted = encrypt_item_content(
                uuid,
                &content,
                &test_root_keys(),
                ProtocolVersion::LATEST,
                &test_auth_params(),
                &provider,
            ).unwrap();

            let mut raw = RawItem::new(uuid);
            raw.content_type = Some("Note".into());
            raw.content = Some(encrypted.content);
            raw.enc_item_key = Some(encrypted.enc_item_key);

            let decrypted = decrypt_item_content(&raw, &test_root_keys()).unwrap();
            prop_assert_eq!(decrypted, content);
        }

        // Assigning the envelope to any other uuid fails authentication.
        #[test]
        fn reassigned_uuid_fails(uuid in arb_uuid(), other in arb_uuid(), content in arb_content()) {
            prop_assume!(uuid != other);
            let provider = FixedCryptoProvider::new();
            let encrypted = encrypt_item_content(
                uuid,
                &content,
                &test_root_keys(),
                ProtocolVersion::LATEST,
                &test_auth_params(),
                &provider,
            ).unwrap();

            let mut raw = RawItem::new(other);
            raw.content_type = Some("Note".into());
            raw.content = Some(encrypted.content);
            raw.enc_item_key = Some(encrypted.enc_item_key);

            prop_assert!(decrypt_item_content(&raw, &test_root_keys()).is_err());
        }
    }
}
