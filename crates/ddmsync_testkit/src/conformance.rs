//! The storage conformance suite.
//!
//! Every check takes a fresh, empty store and exercises one
//! behavioral contract every engine must satisfy. Run them through
//! [`crate::fixtures::for_each_engine`] so both engines stay in
//! lockstep.

use crate::fixtures;
use ddmsync_core::{parse_status_report, sha256_hasher};
use ddmsync_storage::{reconcile, synth, Store, StorageError};

/// Store, retrieve, list, and delete round-trip.
pub fn declaration_lifecycle(store: &dyn Store) {
    let d = fixtures::configuration("com.example.life");
    assert!(store.store_declaration(&d).unwrap());

    let fetched = store.retrieve_declaration("com.example.life").unwrap();
    assert_eq!(fetched.identifier, d.identifier);
    assert_eq!(fetched.declaration_type, d.declaration_type);
    assert_eq!(fetched.payload, d.payload);
    assert!(!fetched.server_token.is_empty());

    assert!(store.declaration_mod_time("com.example.life").is_ok());
    assert_eq!(store.list_declarations().unwrap(), vec!["com.example.life"]);

    assert!(store.delete_declaration("com.example.life").unwrap());
    assert!(!store.delete_declaration("com.example.life").unwrap());
    assert!(store
        .retrieve_declaration("com.example.life")
        .unwrap_err()
        .is_not_found());
}

/// Re-submitting identical content changes nothing; changed content
/// changes the token.
pub fn idempotent_resubmission(store: &dyn Store) {
    let d = fixtures::configuration("com.example.idem");
    assert!(store.store_declaration(&d).unwrap());
    let token = store.retrieve_declaration("com.example.idem").unwrap().server_token;

    assert!(!store.store_declaration(&d).unwrap());
    assert_eq!(
        store.retrieve_declaration("com.example.idem").unwrap().server_token,
        token
    );

    let mut changed = d.clone();
    changed.payload = serde_json::json!({"Echo": "different"});
    assert!(store.store_declaration(&changed).unwrap());
    assert_ne!(
        store.retrieve_declaration("com.example.idem").unwrap().server_token,
        token
    );
}

/// Touch changes only the token; touching twice gives two distinct
/// tokens.
pub fn touch_semantics(store: &dyn Store) {
    let d = fixtures::configuration("com.example.touch");
    store.store_declaration(&d).unwrap();
    let t0 = store.retrieve_declaration("com.example.touch").unwrap().server_token;

    store.touch_declaration("com.example.touch").unwrap();
    let after = store.retrieve_declaration("com.example.touch").unwrap();
    assert_ne!(after.server_token, t0);
    assert_eq!(after.payload, d.payload);

    store.touch_declaration("com.example.touch").unwrap();
    let t2 = store.retrieve_declaration("com.example.touch").unwrap().server_token;
    assert_ne!(t2, after.server_token);
    assert_ne!(t2, t0);

    assert!(store
        .touch_declaration("com.example.missing")
        .unwrap_err()
        .is_not_found());
}

/// Deletion is refused while any set references the declaration.
pub fn delete_guard(store: &dyn Store) {
    let d = fixtures::configuration("com.example.guarded");
    store.store_declaration(&d).unwrap();
    store.store_set_declaration("s1", "com.example.guarded").unwrap();
    store.store_set_declaration("s2", "com.example.guarded").unwrap();

    match store.delete_declaration("com.example.guarded") {
        Err(StorageError::DeclarationInUse { set_count, .. }) => assert_eq!(set_count, 2),
        other => panic!("expected DeclarationInUse, got {other:?}"),
    }

    store.remove_set_declaration("s1", "com.example.guarded").unwrap();
    store.remove_set_declaration("s2", "com.example.guarded").unwrap();
    assert!(store.delete_declaration("com.example.guarded").unwrap());
}

/// Association edges are mirrored, change-reporting, and tolerant of
/// no-op removals.
pub fn association_edges(store: &dyn Store) {
    let d = fixtures::configuration("com.example.assoc");
    store.store_declaration(&d).unwrap();

    assert!(store
        .store_set_declaration("s1", "com.example.missing")
        .unwrap_err()
        .is_not_found());

    assert!(store.store_set_declaration("s1", "com.example.assoc").unwrap());
    assert!(!store.store_set_declaration("s1", "com.example.assoc").unwrap());
    assert_eq!(store.set_declarations("s1").unwrap(), vec!["com.example.assoc"]);
    assert_eq!(store.declaration_sets("com.example.assoc").unwrap(), vec!["s1"]);

    assert!(store.store_enrollment_set("e1", "s1").unwrap());
    assert_eq!(store.enrollment_sets("e1").unwrap(), vec!["s1"]);
    assert_eq!(store.set_enrollments("s1").unwrap(), vec!["e1"]);
    assert_eq!(store.list_sets().unwrap(), vec!["s1"]);

    // removing what is not there is a quiet no-op
    assert!(!store.remove_set_declaration("s9", "com.example.assoc").unwrap());
    assert!(!store.remove_enrollment_set("e9", "s1").unwrap());
    assert!(!store.remove_all_enrollment_sets("e9").unwrap());

    assert!(store.remove_all_enrollment_sets("e1").unwrap());
    assert!(store.enrollment_sets("e1").unwrap().is_empty());
}

/// `resolve_enrollment_ids` expands declarations to sets to
/// enrollments and deduplicates.
pub fn transitive_resolution(store: &dyn Store) {
    for id in ["com.example.r1", "com.example.r2"] {
        store.store_declaration(&fixtures::configuration(id)).unwrap();
    }
    store.store_set_declaration("north", "com.example.r1").unwrap();
    store.store_set_declaration("south", "com.example.r2").unwrap();
    store.store_enrollment_set("e1", "north").unwrap();
    store.store_enrollment_set("e2", "north").unwrap();
    store.store_enrollment_set("e2", "south").unwrap();

    let ids = store
        .resolve_enrollment_ids(&["com.example.r1".into()], &[], &[])
        .unwrap();
    assert_eq!(ids, vec!["e1", "e2"]);

    let ids = store
        .resolve_enrollment_ids(&[], &["south".into()], &["e9".into()])
        .unwrap();
    assert_eq!(ids, vec!["e2", "e9"]);

    // overlapping seeds deduplicate
    let ids = store
        .resolve_enrollment_ids(
            &["com.example.r1".into(), "com.example.r2".into()],
            &["north".into()],
            &["e1".into()],
        )
        .unwrap();
    assert_eq!(ids, vec!["e1", "e2"]);

    assert!(store.resolve_enrollment_ids(&[], &[], &[]).unwrap().is_empty());
}

/// Declaration Items buckets by manifest type, drops unbucketed types
/// from the buckets but not the token, and agrees with Sync Tokens.
pub fn manifest_synthesis(store: &dyn Store) {
    store.store_declaration(&fixtures::configuration("com.example.cfg")).unwrap();
    store
        .store_declaration(&fixtures::activation("com.example.act", &["com.example.cfg"]))
        .unwrap();
    store.store_declaration(&fixtures::unbucketed("com.example.odd")).unwrap();
    for id in ["com.example.cfg", "com.example.act", "com.example.odd"] {
        store.store_set_declaration("all", id).unwrap();
    }
    store.store_enrollment_set("e1", "all").unwrap();

    let items = synth::declaration_items(store, "e1", sha256_hasher).unwrap();
    assert_eq!(items.declarations.configurations.len(), 1);
    assert_eq!(items.declarations.activations.len(), 1);
    assert!(items.declarations.assets.is_empty());
    assert!(items.declarations.management.is_empty());

    let tokens = synth::sync_tokens(store, "e1", sha256_hasher).unwrap();
    assert_eq!(tokens.sync_tokens.declarations_token, items.declarations_token);

    // the unbucketed declaration still participates in the token
    store.remove_set_declaration("all", "com.example.odd").unwrap();
    let trimmed = synth::declaration_items(store, "e1", sha256_hasher).unwrap();
    assert_ne!(trimmed.declarations_token, items.declarations_token);

    // an enrollment with no sets has an empty manifest
    let empty = synth::declaration_items(store, "e2", sha256_hasher).unwrap();
    assert!(empty.declarations.configurations.is_empty());
}

/// Per-enrollment declaration retrieval enforces manifest type and
/// transitive access.
pub fn declaration_access(store: &dyn Store) {
    store.store_declaration(&fixtures::configuration("com.example.served")).unwrap();
    store.store_set_declaration("s1", "com.example.served").unwrap();
    store.store_enrollment_set("e1", "s1").unwrap();

    let raw =
        synth::enrollment_declaration_json(store, "com.example.served", "configuration", "e1")
            .unwrap();
    let v: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(v["Identifier"], "com.example.served");
    assert!(v["ServerToken"].as_str().is_some());

    // wrong manifest type
    assert!(
        synth::enrollment_declaration_json(store, "com.example.served", "asset", "e1")
            .unwrap_err()
            .is_not_found()
    );
    // no transitive access
    assert!(
        synth::enrollment_declaration_json(store, "com.example.served", "configuration", "e2")
            .unwrap_err()
            .is_not_found()
    );
}

/// Status ingestion round-trip: broken declarations duplicate into
/// errors, token mismatch clears currency.
pub fn status_round_trip(store: &dyn Store) {
    store.store_declaration(&fixtures::configuration("com.example.st")).unwrap();
    store.store_set_declaration("s1", "com.example.st").unwrap();
    store.store_enrollment_set("e1", "s1").unwrap();
    let token = store.retrieve_declaration("com.example.st").unwrap().server_token;

    let report = parse_status_report(&fixtures::compliant_status("com.example.st", &token)).unwrap();
    store.store_status_report("e1", &report).unwrap();

    let status = reconcile::declaration_status(store, &["e1".into()]).unwrap();
    assert!(status["e1"][0].current);
    assert_eq!(status["e1"][0].status.valid, "valid");

    // the server moves on; the report goes stale
    store.touch_declaration("com.example.st").unwrap();
    let status = reconcile::declaration_status(store, &["e1".into()]).unwrap();
    assert!(!status["e1"][0].current);

    let broken = parse_status_report(&fixtures::broken_status("com.example.st", &token)).unwrap();
    assert_eq!(broken.errors.len(), 1);
    store.store_status_report("e1", &broken).unwrap();

    let errors = store.status_errors(&["e1".into()], 0, 0).unwrap();
    assert_eq!(errors["e1"].len(), 1);
    let status = reconcile::declaration_status(store, &["e1".into()]).unwrap();
    assert_eq!(status["e1"][0].status.valid, "invalid");
    assert!(status["e1"][0].status.reasons.is_some());
}

/// Reconciliation reports a placeholder for never-reported
/// declarations and ignores unmanifested reports.
pub fn reconciliation_placeholder(store: &dyn Store) {
    store.store_declaration(&fixtures::configuration("com.example.quiet")).unwrap();
    store.store_set_declaration("s1", "com.example.quiet").unwrap();
    store.store_enrollment_set("e1", "s1").unwrap();
    let token = store.retrieve_declaration("com.example.quiet").unwrap().server_token;

    let status = reconcile::declaration_status(store, &["e1".into()]).unwrap();
    let record = &status["e1"][0];
    assert_eq!(record.status.identifier, "com.example.quiet");
    assert_eq!(record.status.server_token, token);
    assert!(!record.status.active);
    assert_eq!(record.status.valid, "");
    assert!(!record.current);
    assert!(record.status_received.is_none());

    // a report about a declaration outside the manifest is ignored
    let stray = parse_status_report(&fixtures::compliant_status("com.example.gone", "t0")).unwrap();
    store.store_status_report("e1", &stray).unwrap();
    let status = reconcile::declaration_status(store, &["e1".into()]).unwrap();
    assert_eq!(status["e1"].len(), 1);
    assert_eq!(status["e1"][0].status.identifier, "com.example.quiet");

    // an enrollment with an empty manifest is omitted entirely
    let status = reconcile::declaration_status(store, &["e2".into()]).unwrap();
    assert!(!status.contains_key("e2"));
}

/// Status values and errors are queryable with prefix and window
/// filters; raw reports are retrievable by index.
pub fn status_queries(store: &dyn Store) {
    let values = parse_status_report(&fixtures::device_values_status()).unwrap();
    store.store_status_report("e1", &values).unwrap();
    let errors = parse_status_report(&fixtures::errors_status()).unwrap();
    store.store_status_report("e1", &errors).unwrap();

    let all = store.status_values(&["e1".into()], None).unwrap();
    assert!(all["e1"].len() >= 4);

    let filtered = store
        .status_values(&["e1".into()], Some(".StatusItems.device.model"))
        .unwrap();
    assert_eq!(filtered["e1"].len(), 2);
    assert!(filtered["e1"]
        .iter()
        .all(|v| v.value.path.starts_with(".StatusItems.device.model")));

    let errs = store.status_errors(&["e1".into()], 0, 0).unwrap();
    assert_eq!(errs["e1"].len(), 1);
    // window past the end yields nothing
    assert!(store.status_errors(&["e1".into()], 5, 0).unwrap().is_empty());

    let first = store.status_report("e1", 0).unwrap();
    assert_eq!(first.raw, fixtures::device_values_status());
    let second = store.status_report("e1", 1).unwrap();
    assert_eq!(second.raw, fixtures::errors_status());
    assert!(store.status_report("e1", 2).unwrap_err().is_not_found());
}
