//! End-to-end sync flows: two replicas reconciling through one primary
//! over the in-process exchange.

use replidoc_core::attachment::AttachmentId;
use replidoc_core::document::{DocumentId, DocumentProps, Revision};
use replidoc_core::exchange::LocalExchange;
use replidoc_core::primary::Primary;
use replidoc_core::replica::{
    ConflictResolution, FsReplicaStorage, MemoryReplicaStorage, Replica, SyncOutcome, SyncState,
};
use replidoc_core::ReplidocError;

fn note(name: &str, markup: &str) -> DocumentProps {
    DocumentProps::Note {
        name: name.to_string(),
        markup: markup.to_string(),
    }
}

fn memory_replica() -> Replica<MemoryReplicaStorage> {
    Replica::new(MemoryReplicaStorage::new()).unwrap()
}

#[test]
fn empty_sync_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let mut replica = memory_replica();
    for _ in 0..3 {
        assert_eq!(replica.sync(&exchange).unwrap(), SyncOutcome::Synced);
        assert_eq!(replica.rev(), Revision::ZERO);
    }
    assert_eq!(primary.current_rev(), Revision::ZERO);
}

#[test]
fn edits_flow_from_one_replica_to_another() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let mut writer = memory_replica();
    let mut reader = memory_replica();

    let created = writer.create_document(note("hello", "")).unwrap();
    assert_eq!(writer.sync(&exchange).unwrap(), SyncOutcome::Synced);
    assert_eq!(writer.rev(), Revision(1));

    assert_eq!(reader.sync(&exchange).unwrap(), SyncOutcome::Synced);
    assert_eq!(reader.rev(), Revision(1));

    let pulled = reader.document(&created.id).unwrap();
    assert_eq!(pulled.props.name(), "hello");
    assert_eq!(pulled.rev, Revision(1));
}

#[test]
fn stale_replica_fast_forwards_when_nothing_collides() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let mut first = memory_replica();
    let mut second = memory_replica();

    // both replicas edit different documents; first wins the race
    let from_first = first.create_document(note("one", "")).unwrap();
    let from_second = second.create_document(note("two", "")).unwrap();
    assert_eq!(first.sync(&exchange).unwrap(), SyncOutcome::Synced);

    assert_eq!(second.sync(&exchange).unwrap(), SyncOutcome::Outdated);
    assert_eq!(second.rev(), Revision(1));
    // the overlay edit survived the fast-forward
    assert!(second.document(&from_second.id).is_some());
    assert!(second.document(&from_first.id).is_some());

    assert_eq!(second.sync(&exchange).unwrap(), SyncOutcome::Synced);
    assert_eq!(primary.current_rev(), Revision(2));
    assert!(primary.get_document(&from_second.id).is_some());
}

#[test]
fn colliding_edits_raise_a_three_way_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let mut first = memory_replica();
    let mut second = memory_replica();

    // shared base "A"
    let base = first.create_document(note("A", "")).unwrap();
    first.sync(&exchange).unwrap();
    second.sync(&exchange).unwrap();
    let base_rev = second.rev();

    // first renames to "C" and syncs; second renames to "B" offline
    let mut remote_edit = first.document(&base.id).unwrap();
    remote_edit.props = note("C", "");
    first.save_document(remote_edit).unwrap();
    first.sync(&exchange).unwrap();

    let mut local_edit = second.document(&base.id).unwrap();
    local_edit.props = note("B", "");
    second.save_document(local_edit).unwrap();

    assert_eq!(second.sync(&exchange).unwrap(), SyncOutcome::Conflicts(1));
    assert_eq!(second.sync_state(), SyncState::ConflictsPending);

    let conflict = &second.conflicts()[0];
    assert_eq!(conflict.base.props.name(), "A");
    assert_eq!(conflict.base.rev, base_rev);
    assert_eq!(conflict.remote.props.name(), "C");
    assert_eq!(conflict.local.props.name(), "B");

    // writes and syncs are refused until the conflict is resolved
    assert!(matches!(
        second.create_document(note("x", "")),
        Err(ReplidocError::ConflictsPending)
    ));
    assert!(matches!(
        second.sync(&exchange),
        Err(ReplidocError::ConflictsPending)
    ));

    let id = base.id.clone();
    second
        .resolve_conflict(&id, ConflictResolution::UseLocal)
        .unwrap();
    assert_eq!(second.sync_state(), SyncState::Initial);

    // the decision persists on the primary at the next revision
    assert_eq!(second.sync(&exchange).unwrap(), SyncOutcome::Synced);
    let settled = primary.get_document(&id).unwrap();
    assert_eq!(settled.props.name(), "B");
    assert_eq!(settled.rev, primary.current_rev());

    // and flows back to the other replica
    first.sync(&exchange).unwrap();
    assert_eq!(first.document(&id).unwrap().props.name(), "B");
}

#[test]
fn use_remote_drops_the_local_edit() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let mut first = memory_replica();
    let mut second = memory_replica();

    let base = first.create_document(note("A", "")).unwrap();
    first.sync(&exchange).unwrap();
    second.sync(&exchange).unwrap();

    let mut remote_edit = first.document(&base.id).unwrap();
    remote_edit.props = note("C", "");
    first.save_document(remote_edit).unwrap();
    first.sync(&exchange).unwrap();
    let remote_rev = primary.current_rev();

    let mut local_edit = second.document(&base.id).unwrap();
    local_edit.props = note("B", "");
    second.save_document(local_edit).unwrap();

    assert_eq!(second.sync(&exchange).unwrap(), SyncOutcome::Conflicts(1));
    second
        .resolve_conflict(&base.id, ConflictResolution::UseRemote)
        .unwrap();

    assert_eq!(second.document(&base.id).unwrap().props.name(), "C");

    // re-syncing the remote version at its own rev bumps the primary once
    assert_eq!(second.sync(&exchange).unwrap(), SyncOutcome::Synced);
    assert_eq!(primary.current_rev(), remote_rev.next());
}

#[test]
fn attachments_travel_with_their_embedding_document() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let mut replica = memory_replica();

    let attachment_id = replica
        .save_attachment(b"payload bytes".to_vec(), "image/png")
        .unwrap();
    let document = replica
        .create_document(note("with file", &format!("![[{attachment_id}]]")))
        .unwrap();
    assert_eq!(document.attachment_refs, vec![attachment_id.clone()]);

    assert_eq!(replica.sync(&exchange).unwrap(), SyncOutcome::Synced);

    let stored = primary.get_attachment(&attachment_id).unwrap();
    assert_eq!(stored.mime_type, "image/png");
    assert_eq!(stored.size, 13);
    assert_eq!(stored.rev, Revision(1));

    let path = primary.get_attachment_payload_path(&attachment_id).unwrap();
    assert_eq!(std::fs::read(path).unwrap(), b"payload bytes");

    // the local payload copy is gone, the metadata is in the snapshot
    assert!(replica.local_attachment_payload(&attachment_id).is_none());
    assert!(replica.attachment(&attachment_id).is_some());
}

#[test]
fn abandoned_attachment_never_reaches_the_primary() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let mut replica = memory_replica();
    let abandoned = replica
        .save_attachment(b"draft".to_vec(), "text/plain")
        .unwrap();
    replica.create_document(note("unrelated", "")).unwrap();

    assert_eq!(replica.sync(&exchange).unwrap(), SyncOutcome::Synced);

    assert!(primary.get_attachment(&abandoned).is_none());
    // post-sync compaction dropped the draft locally too
    assert!(replica.attachment(&abandoned).is_none());
}

#[test]
fn deleting_a_document_releases_its_attachment_on_the_primary() {
    let dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let mut replica = memory_replica();
    let attachment_id = replica
        .save_attachment(b"bytes".to_vec(), "text/plain")
        .unwrap();
    let document = replica
        .create_document(note("n", &format!("![[{attachment_id}]]")))
        .unwrap();
    replica.sync(&exchange).unwrap();

    replica.delete_document(&document.id).unwrap();
    replica.sync(&exchange).unwrap();

    assert_eq!(primary.compact().unwrap(), 1);
    assert!(primary.get_attachment(&attachment_id).unwrap().deleted);
    assert!(
        primary
            .get_attachment_payload_path(&attachment_id)
            .is_none()
    );
}

#[test]
fn fs_replica_survives_a_restart_mid_flow() {
    let primary_dir = tempfile::tempdir().unwrap();
    let replica_dir = tempfile::tempdir().unwrap();
    let primary = Primary::open(primary_dir.path()).unwrap();
    let exchange = LocalExchange::new(&primary);

    let id: DocumentId;
    {
        let mut replica = Replica::new(FsReplicaStorage::open(replica_dir.path()).unwrap()).unwrap();
        let created = replica.create_document(note("persisted", "")).unwrap();
        id = created.id.clone();
        replica.sync(&exchange).unwrap();

        // an unsynced edit on top
        let mut edit = replica.document(&id).unwrap();
        edit.props = note("edited", "");
        replica.save_document(edit).unwrap();
    }

    let mut replica = Replica::new(FsReplicaStorage::open(replica_dir.path()).unwrap()).unwrap();
    assert_eq!(replica.rev(), Revision(1));
    assert_eq!(replica.document(&id).unwrap().props.name(), "edited");

    replica.sync(&exchange).unwrap();
    assert_eq!(primary.get_document(&id).unwrap().props.name(), "edited");
}

#[test]
fn startup_compaction_drops_orphaned_local_attachments() {
    let replica_dir = tempfile::tempdir().unwrap();

    let orphan: AttachmentId;
    {
        let mut replica = Replica::new(FsReplicaStorage::open(replica_dir.path()).unwrap()).unwrap();
        orphan = replica
            .save_attachment(b"never embedded".to_vec(), "text/plain")
            .unwrap();
    }

    let replica = Replica::new(FsReplicaStorage::open(replica_dir.path()).unwrap()).unwrap();
    assert!(replica.attachment(&orphan).is_none());
    assert!(replica.local_attachment_payload(&orphan).is_none());
}
