//! Property and table tests for identities, room names and message composition.

use std::collections::HashSet;

use proptest::prelude::*;
use rstest::rstest;
use whispernet::identity::SHORT_ID_LEN;
use whispernet::{ChatError, ChatMessage, RoomName, SessionId, SessionIdentity};

fn lounge() -> RoomName {
    RoomName::parse("lounge").unwrap()
}

#[rstest]
#[case("lounge", "lounge")]
#[case("  lounge  ", "lounge")]
#[case("\tquiet corner\n", "quiet corner")]
#[case("🌙", "🌙")]
fn test_room_name_normalizes(#[case] raw: &str, #[case] expected: &str) {
    assert_eq!(RoomName::parse(raw).unwrap().as_str(), expected);
}

#[rstest]
#[case("")]
#[case(" ")]
#[case("\t\n  ")]
fn test_room_name_rejects_blank(#[case] raw: &str) {
    assert!(matches!(RoomName::parse(raw), Err(ChatError::InvalidInput(_))));
}

#[test]
fn test_short_id_is_eight_chars() {
    let id = SessionId::random().unwrap();
    assert_eq!(id.short().len(), SHORT_ID_LEN);
    assert!(id.to_string().starts_with(&id.short()));
}

#[test]
fn test_identity_provider_ten_thousand_contexts() {
    let ids: HashSet<SessionId> = (0..10_000)
        .map(|_| SessionIdentity::new().identity().unwrap())
        .collect();
    assert_eq!(ids.len(), 10_000);
}

#[test]
fn test_wire_payload_is_json_object() {
    let me = SessionId::random().unwrap();
    let message = ChatMessage::compose(lounge(), me, "hello").unwrap();
    let value: serde_json::Value = serde_json::from_str(&message.to_wire().unwrap()).unwrap();
    assert_eq!(value["text"], "hello");
    assert_eq!(value["roomId"], "lounge");
    assert_eq!(value["senderId"], me.to_string());
    assert!(value["timestamp"].is_string());
}

#[test]
fn test_wire_rejects_blank_room() {
    let payload = r#"{"id":"67e55044-10b1-426f-9247-bb680e5fe0c8","text":"hi","roomId":"  ","senderId":"67e55044-10b1-426f-9247-bb680e5fe0c8","timestamp":"2024-01-01T00:00:00Z"}"#;
    assert!(ChatMessage::from_wire(payload).is_err());
}

proptest! {
    #[test]
    fn prop_whitespace_text_is_rejected(text in "[ \t\r\n]{0,16}") {
        let me = SessionId::random().unwrap();
        let result = ChatMessage::compose(lounge(), me, &text);
        prop_assert!(matches!(result, Err(ChatError::InvalidInput(_))));
    }

    #[test]
    fn prop_text_with_content_is_trimmed(
        pad_l in "[ \t]{0,4}",
        body in "[a-zA-Z0-9][a-zA-Z0-9 .,!?]{0,40}[a-zA-Z0-9]|[a-zA-Z0-9]",
        pad_r in "[ \t\n]{0,4}",
    ) {
        let me = SessionId::random().unwrap();
        let message = ChatMessage::compose(lounge(), me, &format!("{pad_l}{body}{pad_r}")).unwrap();
        prop_assert_eq!(message.text(), body.as_str());
        prop_assert!(message.is_from(&me));
        prop_assert_eq!(message.room_id(), &lounge());
    }

    #[test]
    fn prop_wire_preserves_text(body in "[^\\s][\\PC]{0,60}") {
        let me = SessionId::random().unwrap();
        if let Ok(message) = ChatMessage::compose(lounge(), me, &body) {
            let decoded = ChatMessage::from_wire(&message.to_wire().unwrap()).unwrap();
            prop_assert_eq!(decoded, message);
        }
    }

    #[test]
    fn prop_seeded_identities_are_distinct(a in any::<u64>(), b in any::<u64>()) {
        use rand::{rngs::StdRng, SeedableRng};
        prop_assume!(a != b);
        let x = SessionId::from_rng(&mut StdRng::seed_from_u64(a)).unwrap();
        let y = SessionId::from_rng(&mut StdRng::seed_from_u64(b)).unwrap();
        prop_assert_ne!(x, y);
    }
}
