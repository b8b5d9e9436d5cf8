/// Concurrency tests for the dispatcher and event contributions
///
/// Many tasks hit the same user record and the same community total at once;
/// no increment may be lost.
mod common;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use common::{service_with, write_file};
use veramon::quests::{GameplayEvent, QuestService, RequirementKind};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 2, 5, 9, 30, 0).unwrap()
}

fn write_fixtures(root: &std::path::Path) {
    write_file(
        root,
        "quests/daily/grind.json",
        r#"{"id":"daily_grind","title":"Grinder","requirements":[{"type":"catch","amount":1000}]}"#,
    );
    write_file(
        root,
        "events/rush.json",
        r#"{"id":"rush","name":"Catch Rush",
            "start_date":"2025-02-01T00:00:00Z","end_date":"2025-02-10T00:00:00Z",
            "community_goal":{"type":"catch","target":1000000}}"#,
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_catches_for_one_user_are_all_counted() {
    let (_tmp, service) = service_with(write_fixtures);
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for _ in 0..50 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            service
                .dispatcher()
                .on_gameplay_event_at("ash", GameplayEvent::new(RequirementKind::Catch), now())
                .await
                .map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.expect("task").expect("dispatch");
    }

    let view = service
        .quest_progress_at("ash", "daily_grind", now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.instance.unwrap().counters[0].current, 50);
    assert_eq!(
        service.events().community_progress("rush").await.unwrap().unwrap().current,
        50
    );
    assert_eq!(service.events().user_contribution("ash", "rush").await.unwrap(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_contributors_sum_exactly() {
    let (_tmp, service) = service_with(write_fixtures);
    let service: Arc<QuestService> = Arc::new(service);

    let mut handles = Vec::new();
    for n in 0..40u64 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("trainer{}", n % 8);
            service
                .events()
                .contribute_at(&user, "rush", n + 1, RequirementKind::Catch, now())
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.expect("task").expect("contribute").is_recorded());
    }

    let expected: u64 = (1..=40).sum();
    let progress = service.events().community_progress("rush").await.unwrap().unwrap();
    assert_eq!(progress.current, expected);

    let contributors = service.events().contributors("rush").await.unwrap();
    assert_eq!(contributors.len(), 8);
    assert_eq!(contributors.iter().map(|(_, amount)| amount).sum::<u64>(), expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_users_progress_independently() {
    let (_tmp, service) = service_with(write_fixtures);
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for n in 0..5 {
        for _ in 0..(n + 1) {
            let service = service.clone();
            let user = format!("user{}", n);
            handles.push(tokio::spawn(async move {
                service
                    .dispatcher()
                    .on_gameplay_event_at(&user, GameplayEvent::new(RequirementKind::Catch), now())
                    .await
                    .map(|_| ())
            }));
        }
    }
    for handle in handles {
        handle.await.expect("task").expect("dispatch");
    }

    for n in 0..5u32 {
        let view = service
            .quest_progress_at(&format!("user{}", n), "daily_grind", now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(view.instance.unwrap().counters[0].current, n + 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn padded_user_ids_serialize_on_one_record() {
    let (_tmp, service) = service_with(write_fixtures);
    let service = Arc::new(service);

    let mut handles = Vec::new();
    for n in 0..40 {
        let service = service.clone();
        let user = if n % 2 == 0 { "ash" } else { " ash " };
        handles.push(tokio::spawn(async move {
            service
                .dispatcher()
                .on_gameplay_event_at(user, GameplayEvent::new(RequirementKind::Catch), now())
                .await
                .map(|_| ())
        }));
    }
    for handle in handles {
        handle.await.expect("task").expect("dispatch");
    }

    let view = service
        .quest_progress_at("ash ", "daily_grind", now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.instance.unwrap().counters[0].current, 40);
    assert_eq!(
        service.events().contributors("rush").await.unwrap(),
        vec![("ash".to_string(), 40)]
    );
    assert_eq!(service.store().list_user_ids().unwrap(), vec!["ash".to_string()]);
}
