/// Integration tests for events and community goals
///
/// Events are loaded from JSON on disk; statuses, contributions and sweep
/// announcements are checked against a fixed clock.
mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{service_with, write_file};
use veramon::quests::{
    ActivateOutcome, ContributionOutcome, EventNotification, EventStatus, EventSweeper,
    GameplayEvent, RequirementKind,
};

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
}

fn end() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 8, 0, 0, 0).unwrap()
}

fn write_winter(root: &std::path::Path) {
    write_file(
        root,
        "events/winter.json",
        r#"{"id":"winter","name":"Winter Festival","type":"seasonal",
            "start_date":"2025-01-01T00:00:00Z","end_date":"2025-01-08T00:00:00Z",
            "community_goal":{"type":"CATCH","target":100,"description":"Catch 100 ice creatures"},
            "quests":["winter_catch"]}"#,
    );
    write_file(
        root,
        "events/quiet.json",
        r#"{"id":"quiet","name":"Quiet Week",
            "start_date":"2025-01-01T00:00:00Z","end_date":"2025-01-08T00:00:00Z"}"#,
    );
    write_file(
        root,
        "quests/event/winter.json",
        r#"{"id":"winter_catch","title":"Ice Catcher","event_id":"winter",
            "requirements":[{"type":"catch","amount":2,"target":"ice"}]}"#,
    );
}

#[tokio::test]
async fn status_follows_half_open_window() {
    let (_tmp, service) = service_with(write_winter);
    let events = service.events();

    let cases = [
        (start() - Duration::seconds(1), EventStatus::Upcoming),
        (start(), EventStatus::Active),
        (end() - Duration::seconds(1), EventStatus::Active),
        (end(), EventStatus::Ended),
    ];
    for (now, expected) in cases {
        assert_eq!(events.status_at("winter", now).await, Some(expected), "at {}", now);
    }
    assert_eq!(events.status_at("nope", start()).await, None);

    let mid = start() + Duration::days(3);
    assert_eq!(events.active_at(mid).await.len(), 2);
    assert!(events.upcoming_at(mid).await.is_empty());
    let after = end() + Duration::hours(1);
    assert_eq!(events.recently_ended_at(Duration::hours(72), after).await.len(), 2);
    assert!(events
        .recently_ended_at(Duration::hours(72), end() + Duration::days(4))
        .await
        .is_empty());
}

#[tokio::test]
async fn contributions_sum_into_community_total() {
    let (_tmp, service) = service_with(write_winter);
    let events = service.events();
    let mid = start() + Duration::days(2);

    let amounts = [("ash", 30u64), ("misty", 45), ("ash", 10)];
    for (user, amount) in amounts {
        let outcome = events
            .contribute_at(user, "winter", amount, RequirementKind::Catch, mid)
            .await
            .unwrap();
        assert!(outcome.is_recorded());
    }

    let progress = events.community_progress("winter").await.unwrap().unwrap();
    assert_eq!(progress.current, 85);
    assert_eq!(progress.target, 100);
    assert_eq!(progress.percent(), 85);
    assert!(!progress.is_reached());

    assert_eq!(events.user_contribution("ash", "winter").await.unwrap(), 40);
    assert_eq!(
        events.contributors("winter").await.unwrap(),
        vec![("misty".to_string(), 45), ("ash".to_string(), 40)]
    );

    let crossing = events
        .contribute_at("brock", "winter", 20, RequirementKind::Catch, mid)
        .await
        .unwrap();
    assert_eq!(
        crossing,
        ContributionOutcome::Recorded {
            total: 105,
            target: 100,
            goal_reached: true
        }
    );
}

#[tokio::test]
async fn contributions_rejected_outside_window_or_without_goal() {
    let (_tmp, service) = service_with(write_winter);
    let events = service.events();

    assert_eq!(
        events
            .contribute_at("ash", "winter", 5, RequirementKind::Catch, end())
            .await
            .unwrap(),
        ContributionOutcome::EventNotActive(EventStatus::Ended)
    );
    assert_eq!(
        events
            .contribute_at("ash", "quiet", 5, RequirementKind::Catch, start())
            .await
            .unwrap(),
        ContributionOutcome::NoCommunityGoal
    );
    assert_eq!(
        events
            .contribute_at("ash", "ghost", 5, RequirementKind::Catch, start())
            .await
            .unwrap(),
        ContributionOutcome::EventNotFound
    );
    assert_eq!(events.community_progress("winter").await.unwrap().unwrap().current, 0);
}

#[tokio::test]
async fn gameplay_feeds_event_quests_and_goal() {
    let (_tmp, service) = service_with(write_winter);
    let mid = start() + Duration::days(1);

    assert_eq!(
        service.activate_at("ash", "winter_catch", start() - Duration::hours(1)).await.unwrap(),
        ActivateOutcome::EventNotActive
    );
    assert_eq!(
        service.activate_at("ash", "winter_catch", mid).await.unwrap(),
        ActivateOutcome::Activated
    );

    let ice = GameplayEvent::new(RequirementKind::Catch).with_target("Ice");
    let report = service
        .dispatcher()
        .on_gameplay_event_at("ash", ice.clone(), mid)
        .await
        .unwrap();
    assert_eq!(report.updates.len(), 1);
    assert_eq!(report.contributions.len(), 1);
    assert_eq!(report.contributions[0].0, "winter");

    let report = service
        .dispatcher()
        .on_gameplay_event_at("ash", ice, mid)
        .await
        .unwrap();
    assert_eq!(report.newly_completed().count(), 1);

    // Non-matching kinds reach neither the quest nor the goal.
    let report = service
        .dispatcher()
        .on_gameplay_event_at("ash", GameplayEvent::new(RequirementKind::Trade), mid)
        .await
        .unwrap();
    assert!(report.is_empty());

    assert_eq!(
        service.events().community_progress("winter").await.unwrap().unwrap().current,
        2
    );
}

#[tokio::test]
async fn sweeper_announces_each_transition_once() {
    let (_tmp, service) = service_with(write_winter);
    let catalog = service.events().catalog_snapshot().await;
    let mut sweeper = EventSweeper::new(Duration::hours(24));

    assert!(sweeper.sweep(&catalog, start() - Duration::hours(2)).is_empty());

    let started = sweeper.sweep(&catalog, start() + Duration::minutes(1));
    assert_eq!(started.len(), 2);
    assert!(started
        .iter()
        .all(|n| matches!(n, EventNotification::Started { .. })));
    assert!(sweeper.sweep(&catalog, start() + Duration::hours(1)).is_empty());

    let reminders = sweeper.sweep(&catalog, end() - Duration::hours(12));
    assert_eq!(reminders.len(), 2);
    assert!(reminders
        .iter()
        .all(|n| matches!(n, EventNotification::EndingSoon { .. })));
    assert!(sweeper.sweep(&catalog, end() - Duration::hours(6)).is_empty());

    let ended = sweeper.sweep(&catalog, end());
    let mut ids: Vec<&str> = ended.iter().map(|n| n.event_id()).collect();
    ids.sort();
    assert_eq!(ids, vec!["quiet", "winter"]);
    assert!(sweeper.sweep(&catalog, end() + Duration::days(1)).is_empty());
}
