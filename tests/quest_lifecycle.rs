/// Integration tests for the quest lifecycle
///
/// Definitions are loaded from JSON files on disk, progress goes through the
/// service and dispatcher, and records are checked after reopening the store.
mod common;

use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{config_in, service_with, write_file};
use veramon::quests::{
    ActivateOutcome, ClaimOutcome, GameplayEvent, QuestService, QuestStatus, RequirementKind,
    Reward,
};

fn t0() -> DateTime<Utc> {
    // A Thursday afternoon
    Utc.with_ymd_and_hms(2025, 4, 10, 14, 0, 0).unwrap()
}

fn write_story_quests(root: &std::path::Path) {
    write_file(
        root,
        "quests/story/intro.json",
        r#"[
            {"id":"catch3","title":"Catch Three","requirements":[{"type":"CATCH","amount":3}],
             "rewards":[{"type":"tokens","amount":40}]},
            {"id":"after","title":"Follow Up","prerequisites":["catch3"],
             "requirements":[{"type":"battle_win","amount":1}]}
        ]"#,
    );
    write_file(
        root,
        "quests/achievement/bounty.json",
        r#"{"id":"bounty","title":"Bounty","repeatable":true,"cooldown_hours":6,"max_completions":2,
            "requirements":[{"type":"battle_win","amount":1}],
            "rewards":[{"type":"xp","amount":10}]}"#,
    );
}

async fn catch(service: &QuestService, user: &str, at: DateTime<Utc>) {
    service
        .dispatcher()
        .on_gameplay_event_at(user, GameplayEvent::new(RequirementKind::Catch), at)
        .await
        .expect("dispatch");
}

async fn win(service: &QuestService, user: &str, at: DateTime<Utc>) {
    service
        .dispatcher()
        .on_gameplay_event_at(user, GameplayEvent::new(RequirementKind::BattleWin), at)
        .await
        .expect("dispatch");
}

#[tokio::test]
async fn three_catches_complete_then_claim_once() {
    let (_tmp, service) = service_with(write_story_quests);

    assert_eq!(
        service.activate_at("ash", "catch3", t0()).await.unwrap(),
        ActivateOutcome::Activated
    );
    for n in 1..=3 {
        catch(&service, "ash", t0()).await;
        let view = service
            .quest_progress_at("ash", "catch3", t0())
            .await
            .unwrap()
            .expect("known quest");
        let expected = if n < 3 {
            QuestStatus::InProgress
        } else {
            QuestStatus::Completed
        };
        assert_eq!(view.status, expected, "after catch {}", n);
    }

    match service.claim_at("ash", "catch3", t0()).await.unwrap() {
        ClaimOutcome::Claimed(receipt) => {
            assert_eq!(receipt.rewards, vec![Reward::Tokens { amount: 40 }]);
            assert_eq!(receipt.completion_number, 1);
        }
        other => panic!("expected claim, got {:?}", other),
    }
    assert_eq!(
        service.claim_at("ash", "catch3", t0()).await.unwrap(),
        ClaimOutcome::NotCompleted(QuestStatus::Claimed)
    );

    let progress = service.user_progress_at("ash", t0()).await.unwrap();
    assert_eq!(progress.completed, vec!["catch3".to_string()]);
    assert!(progress.instance("catch3").is_none());
}

#[tokio::test]
async fn prerequisites_unlock_follow_up() {
    let (_tmp, service) = service_with(write_story_quests);
    assert_eq!(
        service.activate_at("misty", "after", t0()).await.unwrap(),
        ActivateOutcome::Rejected(QuestStatus::NotStarted)
    );

    service.activate_at("misty", "catch3", t0()).await.unwrap();
    catch(&service, "misty", t0()).await;
    service
        .dispatcher()
        .on_gameplay_event_at("misty", GameplayEvent::new(RequirementKind::Catch).with_amount(5), t0())
        .await
        .unwrap();
    assert!(matches!(
        service.claim_at("misty", "catch3", t0()).await.unwrap(),
        ClaimOutcome::Claimed(_)
    ));

    let available: Vec<String> = service
        .available_quests_at("misty", t0())
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert!(available.contains(&"after".to_string()));
    assert_eq!(
        service.activate_at("misty", "after", t0()).await.unwrap(),
        ActivateOutcome::Activated
    );
}

#[tokio::test]
async fn repeatable_quest_respects_cooldown_and_cap() {
    let (_tmp, service) = service_with(write_story_quests);

    service.activate_at("brock", "bounty", t0()).await.unwrap();
    win(&service, "brock", t0()).await;
    let receipt = match service.claim_at("brock", "bounty", t0()).await.unwrap() {
        ClaimOutcome::Claimed(receipt) => receipt,
        other => panic!("expected claim, got {:?}", other),
    };
    assert_eq!(receipt.cooldown_until, Some(t0() + Duration::hours(6)));

    let inside = t0() + Duration::hours(2);
    assert_eq!(
        service.activate_at("brock", "bounty", inside).await.unwrap(),
        ActivateOutcome::Rejected(QuestStatus::Claimed)
    );

    // After the cooldown the instance respawns on the next touch.
    let after = t0() + Duration::hours(6);
    let view = service
        .quest_progress_at("brock", "bounty", after)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(view.status, QuestStatus::InProgress);

    win(&service, "brock", after).await;
    match service.claim_at("brock", "bounty", after).await.unwrap() {
        ClaimOutcome::Claimed(receipt) => assert_eq!(receipt.completion_number, 2),
        other => panic!("expected second claim, got {:?}", other),
    }
    let later = after + Duration::days(1);
    assert_eq!(
        service.activate_at("brock", "bounty", later).await.unwrap(),
        ActivateOutcome::Rejected(QuestStatus::Claimed)
    );
}

#[tokio::test]
async fn daily_quests_rotate_at_utc_midnight() {
    let (_tmp, service) = service_with(|root| {
        write_file(
            root,
            "quests/daily/daily.json",
            r#"{"id":"daily_explore","title":"Explorer","requirements":[{"type":"explore","amount":3}]}"#,
        );
    });

    service
        .dispatcher()
        .on_gameplay_event_at("gary", GameplayEvent::new(RequirementKind::Explore), t0())
        .await
        .unwrap();
    let today = service.quest_progress_at("gary", "daily_explore", t0()).await.unwrap().unwrap();
    assert_eq!(today.instance.unwrap().counters[0].current, 1);

    let same_day = t0() + Duration::hours(9);
    let view = service.quest_progress_at("gary", "daily_explore", same_day).await.unwrap().unwrap();
    assert_eq!(view.instance.unwrap().counters[0].current, 1);

    let next_day = t0() + Duration::hours(10);
    let view = service.quest_progress_at("gary", "daily_explore", next_day).await.unwrap().unwrap();
    assert_eq!(view.status, QuestStatus::InProgress);
    assert_eq!(view.instance.unwrap().counters[0].current, 0);
}

#[tokio::test]
async fn progress_persists_across_reopen() {
    let tmp = tempfile::TempDir::new().unwrap();
    write_story_quests(tmp.path());
    let config = config_in(tmp.path());
    {
        let service = QuestService::open(&config).unwrap();
        service.activate_at("dawn", "catch3", t0()).await.unwrap();
        catch(&service, "dawn", t0()).await;
        catch(&service, "dawn", t0()).await;
    }
    let service = QuestService::open(&config).unwrap();
    let view = service.quest_progress_at("dawn", "catch3", t0()).await.unwrap().unwrap();
    assert_eq!(view.status, QuestStatus::InProgress);
    assert_eq!(view.instance.unwrap().counters[0].current, 2);
}

#[tokio::test]
async fn unknown_quest_is_reported_not_errored() {
    let (_tmp, service) = service_with(write_story_quests);
    assert_eq!(
        service.activate_at("ash", "missing", t0()).await.unwrap(),
        ActivateOutcome::QuestNotFound
    );
    assert!(service.quest_progress_at("ash", "missing", t0()).await.unwrap().is_none());
}
