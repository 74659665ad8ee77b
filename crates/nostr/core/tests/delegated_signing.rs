//! Integration tests for signing on behalf of a delegator.

#[cfg(feature = "full")]
use nostr::nip04;
use nostr::{
    Conditions, EventTemplate, create_delegation, finalize_event, generate_secret_key,
    get_public_key_hex, verify_delegation, verify_event,
};

#[test]
fn test_delegatee_event_carries_verifiable_delegation_tag() {
    let delegator = generate_secret_key();
    let delegatee = generate_secret_key();
    let delegatee_pk = get_public_key_hex(&delegatee).unwrap();

    let conditions = Conditions {
        kind: Some(1),
        since: Some(1_700_000_000),
        until: Some(1_800_000_000),
    };
    let delegation = create_delegation(&delegator, &delegatee_pk, &conditions).unwrap();
    assert!(verify_delegation(&delegation).unwrap());

    let event = finalize_event(
        &EventTemplate {
            created_at: 1_750_000_000,
            kind: 1,
            tags: vec![delegation.to_tag()],
            content: "posted under delegation".to_string(),
        },
        &delegatee,
    )
    .unwrap();

    assert!(verify_event(&event).unwrap());
    assert_eq!(event.pubkey, delegatee_pk);
    assert_eq!(
        event.tag_value("delegation"),
        Some(get_public_key_hex(&delegator).unwrap().as_str())
    );
}

#[cfg(feature = "full")]
#[test]
fn test_encrypted_event_content_is_readable_by_tagged_recipient_only() {
    let sender = generate_secret_key();
    let recipient = generate_secret_key();
    let recipient_pk = get_public_key_hex(&recipient).unwrap();
    let sender_pk = get_public_key_hex(&sender).unwrap();

    let content = nip04::encrypt(&sender, &recipient_pk, "{\"method\":\"describe\"}").unwrap();
    let event = finalize_event(
        &EventTemplate {
            created_at: 1_750_000_000,
            kind: 24133,
            tags: vec![vec!["p".to_string(), recipient_pk.clone()]],
            content,
        },
        &sender,
    )
    .unwrap();

    assert!(verify_event(&event).unwrap());
    assert_eq!(event.p_tags().collect::<Vec<_>>(), vec![recipient_pk.as_str()]);
    assert_eq!(
        nip04::decrypt(&recipient, &event.pubkey, &event.content).unwrap(),
        "{\"method\":\"describe\"}"
    );
    assert_eq!(event.pubkey, sender_pk);
}
