//! File group resolution tests.

mod common;

use annexure_service::store::LrRepository;
use common::{strings, Ledger};
use service_core::error::AppError;
use uuid::Uuid;

#[tokio::test]
async fn test_resolves_every_member_of_the_file() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Resolve").await;
    ledger
        .lr_with("LR1", Some("F-1"), Some("https://blob.example/1.pdf"), "500", "25")
        .await;
    ledger.lr_without_pod("LR2", "F-1").await;
    ledger.lr("LR3", "F-2").await;

    let validation = ledger
        .resolver
        .validate_file_for_annexure(" lr2 ", annexure.annexure_id)
        .await
        .expect("validation failed");

    assert_eq!(validation.file_number, "F-1");
    let mut numbers: Vec<&str> = validation
        .members
        .iter()
        .map(|m| m.lr_number.as_str())
        .collect();
    numbers.sort();
    assert_eq!(numbers, vec!["LR1", "LR2"]);

    let lr1 = validation.members.iter().find(|m| m.lr_number == "LR1").unwrap();
    assert_eq!(lr1.price, common::dec("500"));
    assert_eq!(lr1.extra_cost, common::dec("25"));
    let lr2 = validation.members.iter().find(|m| m.lr_number == "LR2").unwrap();
    assert!(lr2.podlink.is_none());
}

#[tokio::test]
async fn test_resolution_errors_follow_check_order() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Order").await;
    ledger
        .lr_with("LR-NOFILE", None, Some("https://blob.example/pod.pdf"), "1", "0")
        .await;

    let no_annexure = ledger.resolver.resolve("GHOST", Uuid::new_v4()).await;
    match no_annexure {
        Err(AppError::NotFound(e)) => assert_eq!(e.to_string(), "Annexure not found"),
        other => panic!("Expected NotFound, got {:?}", other.map(|f| f.file_number)),
    }

    let no_lr = ledger.resolver.resolve("GHOST", annexure.annexure_id).await;
    match no_lr {
        Err(AppError::NotFound(e)) => assert_eq!(e.to_string(), "LR not found"),
        other => panic!("Expected NotFound, got {:?}", other.map(|f| f.file_number)),
    }

    let no_file = ledger
        .resolver
        .resolve("LR-NOFILE", annexure.annexure_id)
        .await;
    assert!(matches!(no_file, Err(AppError::InvalidState(_))));
}

#[tokio::test]
async fn test_file_in_another_annexure_is_named() {
    let ledger = Ledger::new();
    let owner = ledger.annexure("Owner").await;
    let target = ledger.annexure("Target").await;
    ledger.lr("LR1", "F-1").await;
    ledger.lr("LR2", "F-1").await;
    ledger.attach(&owner, &["LR1"]).await;

    let result = ledger.resolver.resolve("LR2", target.annexure_id).await;
    match result {
        Err(AppError::Conflict(e)) => assert!(e.to_string().contains("Owner")),
        other => panic!("Expected Conflict, got {:?}", other.map(|f| f.file_number)),
    }
}

#[tokio::test]
async fn test_invoiced_or_already_present_files_conflict() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Conflicts").await;
    ledger.lr("LR1", "F-1").await;
    ledger.lr("LR2", "F-2").await;
    ledger.attach(&annexure, &["LR1"]).await;
    ledger
        .invoices
        .generate_from_files(ledger.vendor_id, &strings(&["F-2"]))
        .await
        .unwrap();

    let present = ledger.resolver.resolve("LR1", annexure.annexure_id).await;
    assert!(matches!(present, Err(AppError::Conflict(_))));

    let invoiced = ledger.resolver.resolve("LR2", annexure.annexure_id).await;
    assert!(matches!(invoiced, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn test_partially_attached_file_resolves_for_its_annexure() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Partial").await;
    ledger.lr("LR1", "F-1").await;
    ledger.lr_without_pod("LR2", "F-1").await;
    ledger.attach(&annexure, &["LR1", "LR2"]).await;

    let resolved = ledger
        .resolver
        .resolve("LR2", annexure.annexure_id)
        .await
        .expect("partially attached file should resolve");
    assert_eq!(resolved.members.len(), 2);
}

#[tokio::test]
async fn test_padded_file_number_is_stored_for_exact_lookup() {
    let ledger = Ledger::new();
    let annexure = ledger.annexure("Padded").await;
    ledger.lr("LR1", "  F-9 ").await;
    ledger.lr("LR2", "F-9").await;

    assert_eq!(ledger.reload("LR1").await.file_number.as_deref(), Some("F-9"));
    let by_file = ledger.store.find_lrs_by_file("F-9").await.unwrap();
    assert_eq!(by_file.len(), 2);

    ledger.attach(&annexure, &["LR1"]).await;
    let count = ledger
        .store
        .count_lrs_in_annexure_file(annexure.annexure_id, "F-9")
        .await
        .unwrap();
    assert_eq!(count, 1);
}
