//! # ddmsync service
//!
//! The operation facade the API and check-in layers are built
//! against: one method per management operation (declarations, sets,
//! enrollments, status queries) and per check-in protocol operation
//! (Declaration Items, Sync Tokens, declaration retrieval, status
//! ingestion). Mutations apply to storage first and announce the
//! change afterwards; a failed announcement is logged, never rolled
//! back.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod service;

pub use error::{ServiceError, ServiceResult};
pub use service::Service;

#[cfg(test)]
mod tests {
    use super::*;
    use ddmsync_notify::{ChangeNotifier, Enqueuer, NopNotifier, Notifier};
    use ddmsync_storage::{MemoryStore, Store};
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn service() -> Service<MemoryStore, NopNotifier> {
        Service::new(MemoryStore::new(), NopNotifier)
    }

    fn put<S: Store, N: ChangeNotifier>(svc: &Service<S, N>, id: &str, dtype: &str) {
        let raw = serde_json::to_vec(&json!({
            "Identifier": id,
            "Type": dtype,
            "Payload": {"Echo": id},
        }))
        .unwrap();
        assert!(svc.put_declaration(&raw).unwrap());
    }

    #[test]
    fn full_enrollment_flow() {
        let svc = service();
        put(&svc, "com.example.a", "com.apple.configuration.management.test");
        put(&svc, "com.example.act", "com.apple.activation.simple");
        svc.put_set_declaration("default", "com.example.a").unwrap();
        svc.put_set_declaration("default", "com.example.act").unwrap();
        svc.put_enrollment_set("e1", "default").unwrap();

        let items: serde_json::Value =
            serde_json::from_slice(&svc.declaration_items("e1").unwrap()).unwrap();
        assert_eq!(items["Declarations"]["Configurations"][0]["Identifier"], "com.example.a");
        assert_eq!(items["Declarations"]["Activations"][0]["Identifier"], "com.example.act");

        let tokens: serde_json::Value =
            serde_json::from_slice(&svc.sync_tokens("e1").unwrap()).unwrap();
        assert_eq!(
            tokens["SyncTokens"]["DeclarationsToken"],
            items["DeclarationsToken"]
        );

        let raw = svc
            .enrollment_declaration("configuration/com.example.a", "e1")
            .unwrap();
        let served: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(served["Identifier"], "com.example.a");

        // a different enrollment has no access
        let err = svc
            .enrollment_declaration("configuration/com.example.a", "e2")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn activation_references_are_extracted() {
        let svc = service();
        put(&svc, "com.example.cfg", "com.apple.configuration.management.test");
        let raw = serde_json::to_vec(&json!({
            "Identifier": "com.example.act",
            "Type": "com.apple.activation.simple",
            "Payload": {"StandardConfigurations": ["com.example.cfg"]},
        }))
        .unwrap();
        svc.put_declaration(&raw).unwrap();

        assert_eq!(
            svc.declaration_references("com.example.act").unwrap(),
            vec!["com.example.cfg"]
        );
        assert!(svc.declaration_references("com.example.cfg").unwrap().is_empty());
    }

    #[test]
    fn malformed_declaration_path_is_invalid_input() {
        let svc = service();
        let err = svc.enrollment_declaration("no-slash", "e1").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[test]
    fn status_flow_reconciles() {
        let svc = service();
        put(&svc, "com.example.a", "com.apple.configuration.management.test");
        svc.put_set_declaration("default", "com.example.a").unwrap();
        svc.put_enrollment_set("e1", "default").unwrap();

        let token = svc.declaration("com.example.a").unwrap().server_token;
        let report = serde_json::to_vec(&json!({
            "StatusItems": {
                "management": {
                    "declarations": {
                        "configurations": [{
                            "identifier": "com.example.a",
                            "active": true,
                            "valid": "valid",
                            "server-token": token,
                        }],
                        "activations": [],
                        "assets": [],
                        "management": [],
                    }
                }
            }
        }))
        .unwrap();
        svc.put_status("e1", Some("report-1"), &report).unwrap();

        let status = svc.declaration_status(&["e1".into()]).unwrap();
        let records = &status["e1"];
        assert_eq!(records.len(), 1);
        assert!(records[0].current);

        // the caller-supplied report ID rides along into storage
        assert_eq!(records[0].status_id.as_deref(), Some("report-1"));
        let stored = svc.status_report("e1", 0).unwrap();
        assert_eq!(stored.status_id.as_deref(), Some("report-1"));

        // touching invalidates currency without a new report
        svc.touch_declaration("com.example.a").unwrap();
        let status = svc.declaration_status(&["e1".into()]).unwrap();
        assert!(!status["e1"][0].current);
    }

    #[test]
    fn unparseable_status_is_rejected() {
        let svc = service();
        assert!(matches!(
            svc.put_status("e1", None, b"not json").unwrap_err(),
            ServiceError::StatusParse(_)
        ));
    }

    struct CountingEnqueuer(Arc<Mutex<usize>>);

    impl Enqueuer for CountingEnqueuer {
        fn enqueue(
            &self,
            _: &[String],
            _: Option<&[u8]>,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            *self.0.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[test]
    fn one_store_backs_service_and_notifier() {
        let store = Arc::new(MemoryStore::new());
        let batches = Arc::new(Mutex::new(0));
        let notifier = Notifier::new(Arc::clone(&store), CountingEnqueuer(Arc::clone(&batches)));
        let svc = Service::new(store, notifier);

        // nothing subscribed yet: mutations resolve to nobody
        put(&svc, "com.example.a", "com.apple.configuration.management.test");
        svc.put_set_declaration("default", "com.example.a").unwrap();
        assert_eq!(*batches.lock().unwrap(), 0);

        svc.put_enrollment_set("e1", "default").unwrap();
        assert_eq!(*batches.lock().unwrap(), 1);

        // a declaration change now reaches the subscriber
        svc.touch_declaration("com.example.a").unwrap();
        assert_eq!(*batches.lock().unwrap(), 2);

        // no-op mutations stay quiet
        svc.put_enrollment_set("e1", "default").unwrap();
        assert_eq!(*batches.lock().unwrap(), 2);
    }

    #[test]
    fn delete_guard_propagates() {
        let svc = service();
        put(&svc, "com.example.a", "com.apple.configuration.management.test");
        svc.put_set_declaration("default", "com.example.a").unwrap();
        assert!(svc.delete_declaration("com.example.a").is_err());

        svc.delete_set_declaration("default", "com.example.a").unwrap();
        assert!(svc.delete_declaration("com.example.a").unwrap());
    }
}
