use echolock_core::{SwitchId, XOnlyPublicKey, CHECK_IN_DEBOUNCE_SECS};
use echolock_crypto::SecretScalar;
use echolock_relay::{normalize_heartbeat_d_tag, Event, HEARTBEAT_D_TAG_PREFIX};

/// Sentinel threshold value published in a cancellation heartbeat so
/// guardians unenroll.
pub const CANCEL_SENTINEL_THRESHOLD_SECONDS: i64 = 0;

/// Build and sign a kind-30078 heartbeat event for `switch_id`.
pub fn build_heartbeat(
    sk: &SecretScalar,
    owner_pubkey: XOnlyPublicKey,
    switch_id: SwitchId,
    issued_at: i64,
    threshold_seconds: i64,
    guardians: &[XOnlyPublicKey],
) -> Event {
    let tags = vec![
        vec!["d".to_string(), normalize_heartbeat_d_tag(&switch_id.to_hex())],
        vec!["expiry".to_string(), (issued_at + threshold_seconds).to_string()],
        vec![
            "check-in-hours".to_string(),
            format!("{:.4}", threshold_seconds as f64 / 3_600.0),
        ],
    ];
    let content = serde_json::json!({
        "switch_id": switch_id.to_hex(),
        "issued_at": issued_at,
        "threshold_seconds": threshold_seconds,
        "guardians": guardians.iter().map(|g| g.to_hex()).collect::<Vec<_>>(),
    })
    .to_string();

    Event::build(
        sk,
        owner_pubkey,
        issued_at,
        echolock_core::KIND_HEARTBEAT,
        tags,
        content,
    )
}

/// Whether `check_in` should be refused because the most recent
/// heartbeat is within the debounce window.
pub fn is_debounced(last_heartbeat: i64, now: i64) -> bool {
    now - last_heartbeat < CHECK_IN_DEBOUNCE_SECS
}

/// Verify a heartbeat event's signature and extract `(switch_id,
/// issued_at)` from its `d` tag / signed content. Returns `None` on
/// any signature failure — callers must leave `last-heartbeat-seen`
/// unchanged in that case so a single forged event cannot delay
/// release.
pub fn verify_heartbeat(event: &Event) -> Option<(SwitchId, i64)> {
    if event.kind != echolock_core::KIND_HEARTBEAT || !event.verify() {
        return None;
    }
    let d_tag = event.d_tag()?;
    let bare = d_tag.strip_prefix(HEARTBEAT_D_TAG_PREFIX).unwrap_or(d_tag);
    let switch_id = SwitchId::from_hex(bare).ok()?;
    Some((switch_id, event.created_at))
}
