//! Offline write-behind and replay, including across restarts.

use chrono::NaiveDate;
use contact_sync::{
    Contact, ContactId, ContactSync, MemoryRemoteStore, OperationKind, Period, SaveOutcome,
    SyncConfig,
};
use std::sync::Arc;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn open(dir: &TempDir, remote: &Arc<MemoryRemoteStore>) -> ContactSync {
    init_tracing();
    ContactSync::open(SyncConfig::at(dir.path().join("local")), remote.clone()).unwrap()
}

fn contact(client: &str, m: u32, d: u32) -> Contact {
    Contact::new("Bianchi", client, NaiveDate::from_ymd_opt(2025, m, d).unwrap())
        .with_contact_method("Email")
        .with_project("HOTEL", "Lobby")
}

fn go_offline(remote: &MemoryRemoteStore, engine: &ContactSync) {
    remote.set_online(false);
    engine.notify_connectivity(false).unwrap();
}

#[test]
fn test_offline_add_is_queued_then_replayed() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = open(&dir, &remote);
    let jan = Period::new(2025, 1).unwrap();

    go_offline(&remote, &engine);
    let outcome = engine.add_contact(contact("Acme", 1, 10)).unwrap();
    assert!(outcome.is_queued());

    let entries = engine.queue().entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation.kind(), OperationKind::AddRecord);
    assert_eq!(remote.document(jan), None);

    remote.set_online(true);
    let report = engine.notify_connectivity(true).unwrap().unwrap();
    assert_eq!(report.replayed, 1);
    assert!(report.is_complete());
    assert!(engine.queue().is_empty());

    let doc = remote.document(jan).unwrap();
    assert_eq!(doc.contacts[0].id, ContactId(1));
}

#[test]
fn test_queue_survives_restart() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());

    {
        let engine = open(&dir, &remote);
        go_offline(&remote, &engine);
        engine.add_contact(contact("Acme", 1, 10)).unwrap();
        engine.add_contact(contact("Beta", 1, 11)).unwrap();
        engine.delete_contact(Period::new(2025, 1).unwrap(), ContactId(1)).unwrap();
        assert_eq!(engine.queue().len(), 3);
    }

    // Still offline: entries are read back but nothing is replayed
    {
        let engine = open(&dir, &remote);
        let kinds: Vec<_> = engine.queue().entries().iter().map(|e| e.operation.kind()).collect();
        assert_eq!(
            kinds,
            vec![OperationKind::AddRecord, OperationKind::AddRecord, OperationKind::RemoveRecord]
        );
    }

    // Back online: reopening replays in enqueue order
    remote.set_online(true);
    let engine = open(&dir, &remote);
    assert!(engine.queue().is_empty());

    let doc = remote.document(Period::new(2025, 1).unwrap()).unwrap();
    assert_eq!(doc.contacts.len(), 1);
    assert_eq!(doc.contacts[0].client_name, "Beta");
    assert_eq!(doc.contacts[0].id, ContactId(2));
}

#[test]
fn test_failed_replay_entries_are_retained_in_order() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = open(&dir, &remote);
    let (jan, feb) = (Period::new(2025, 1).unwrap(), Period::new(2025, 2).unwrap());

    go_offline(&remote, &engine);
    engine.add_contact(contact("Acme", 1, 3)).unwrap();
    engine.add_contact(contact("Beta", 2, 3)).unwrap();
    engine.add_contact(contact("Gamma", 1, 4)).unwrap();

    remote.set_online(true);
    remote.fail_writes(feb, 1);
    let report = engine.notify_connectivity(true).unwrap().unwrap();
    assert_eq!(report.replayed, 2);
    assert_eq!(report.retained, 1);
    assert_eq!(engine.queue().entries()[0].operation.period(), feb);
    assert_eq!(remote.document(jan).unwrap().total_contacts, 2);

    let report = engine.sync_pending().unwrap();
    assert_eq!(report.replayed, 1);
    assert!(engine.queue().is_empty());
}

#[test]
fn test_replay_drops_writes_to_vanished_contacts() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = open(&dir, &remote);
    let jan = Period::new(2025, 1).unwrap();

    go_offline(&remote, &engine);
    engine.delete_contact(jan, ContactId(4)).unwrap();

    remote.set_online(true);
    let report = engine.notify_connectivity(true).unwrap().unwrap();
    assert_eq!(report.dropped, 1);
    assert!(engine.queue().is_empty());
}

#[test]
fn test_offline_move_replays_add_then_remove() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = open(&dir, &remote);
    let (jan, feb) = (Period::new(2025, 1).unwrap(), Period::new(2025, 2).unwrap());

    let added = engine.add_contact(contact("Acme", 1, 3)).unwrap().applied().unwrap();
    go_offline(&remote, &engine);

    let mut moved = added;
    moved.date = NaiveDate::from_ymd_opt(2025, 2, 7).unwrap();
    assert_eq!(engine.save_contact(jan, moved).unwrap(), SaveOutcome::Queued);

    remote.set_online(true);
    engine.notify_connectivity(true).unwrap();
    assert_eq!(remote.document(jan).unwrap().total_contacts, 0);
    assert_eq!(remote.document(feb).unwrap().contacts[0].client_name, "Acme");
}

#[test]
fn test_offline_writes_leave_active_set_alone() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = open(&dir, &remote);
    let jan = Period::new(2025, 1).unwrap();

    engine.add_contact(contact("Acme", 1, 3)).unwrap();
    engine.active().set_period(jan).unwrap();

    go_offline(&remote, &engine);
    engine.add_contact(contact("Beta", 1, 4)).unwrap();
    assert_eq!(engine.active().working_set().len(), 1);

    remote.set_online(true);
    engine.notify_connectivity(true).unwrap();
    assert_eq!(engine.active().working_set().len(), 2);
}

#[test]
fn test_edit_after_reconnect_lands_after_queued_edit() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = open(&dir, &remote);
    let jan = Period::new(2025, 1).unwrap();

    let added = engine.add_contact(contact("Acme", 1, 3)).unwrap().applied().unwrap();
    go_offline(&remote, &engine);

    let mut stale = added.clone();
    stale.comments = Some("queued edit".into());
    assert_eq!(engine.save_contact(jan, stale).unwrap(), SaveOutcome::Queued);

    // The adapter is reachable before the engine has been told
    remote.set_online(true);
    let mut fresh = added;
    fresh.comments = Some("fresh edit".into());
    assert_eq!(engine.save_contact(jan, fresh).unwrap(), SaveOutcome::Queued);
    assert_eq!(engine.queue().len(), 2);

    let report = engine.notify_connectivity(true).unwrap().unwrap();
    assert_eq!(report.replayed, 2);

    let doc = remote.document(jan).unwrap();
    assert_eq!(doc.contacts[0].comments.as_deref(), Some("fresh edit"));

    // Queue drained: writes go direct again
    let outcome = engine.add_contact(contact("Beta", 1, 4)).unwrap();
    assert!(!outcome.is_queued());
}

#[test]
fn test_reported_offline_pauses_direct_writes() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = open(&dir, &remote);

    // The adapter still answers, but the engine was told it is offline
    engine.notify_connectivity(false).unwrap();
    assert!(engine.add_contact(contact("Acme", 1, 3)).unwrap().is_queued());
    assert_eq!(remote.write_count(), 0);

    engine.notify_connectivity(true).unwrap();
    assert!(engine.queue().is_empty());
    assert_eq!(remote.write_count(), 1);
}

#[test]
fn test_writes_stay_queued_behind_retained_entries() {
    let dir = TempDir::new().unwrap();
    let remote = Arc::new(MemoryRemoteStore::new());
    let engine = open(&dir, &remote);
    let feb = Period::new(2025, 2).unwrap();

    go_offline(&remote, &engine);
    engine.add_contact(contact("Acme", 2, 3)).unwrap();

    remote.set_online(true);
    remote.fail_writes(feb, 1);
    let report = engine.notify_connectivity(true).unwrap().unwrap();
    assert_eq!(report.retained, 1);

    // A later write to the same month must not overtake the retained add
    assert!(engine.add_contact(contact("Beta", 2, 4)).unwrap().is_queued());

    let report = engine.sync_pending().unwrap();
    assert_eq!(report.replayed, 2);
    let names: Vec<_> = remote
        .document(feb)
        .unwrap()
        .contacts
        .into_iter()
        .map(|c| c.client_name)
        .collect();
    assert_eq!(names, vec!["Acme", "Beta"]);
}
