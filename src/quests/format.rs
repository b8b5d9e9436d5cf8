//! Plain-text rendering of quest and event state for chat replies.
//!
//! Messages are capped at [`MAX_MESSAGE_LEN`] bytes; lists are split into
//! several messages instead of being truncated.

use chrono::{DateTime, Utc};

use crate::quests::dispatch::DispatchReport;
use crate::quests::events::{CommunityProgress, ContributionOutcome};
use crate::quests::progress::ClaimReceipt;
use crate::quests::service::QuestProgressView;
use crate::quests::types::{EventDefinition, EventStatus, QuestDefinition, QuestStatus, RequirementCounter};

/// Chat platforms reject longer messages.
pub const MAX_MESSAGE_LEN: usize = 1900;

fn truncate_utf8(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = max.saturating_sub(3);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
    text.push_str("...");
}

fn counter_line(counter: &RequirementCounter) -> String {
    let mark = if counter.is_met() { "✓" } else { " " };
    match &counter.target {
        Some(target) => format!(
            "[{}] {} {} [{}/{}]\n",
            mark, counter.kind, target, counter.current, counter.goal
        ),
        None => format!("[{}] {} [{}/{}]\n", mark, counter.kind, counter.current, counter.goal),
    }
}

/// Full status block for one quest.
pub fn format_quest_progress(view: &QuestProgressView) -> String {
    let definition = &view.definition;
    let mut output = format!("=== {} ===\n", definition.title);
    if !definition.description.is_empty() {
        output.push_str(&definition.description);
        output.push('\n');
    }
    output.push_str(&format!("Status: {}\n", view.status));

    match &view.instance {
        Some(instance) => {
            for counter in &instance.counters {
                output.push_str(&counter_line(counter));
            }
            if let (QuestStatus::InProgress, Some(expires)) = (instance.status, instance.expires_at) {
                output.push_str(&format!("Expires: {}\n", expires.format("%Y-%m-%d %H:%M UTC")));
            }
            if let Some(until) = instance.cooldown_until {
                output.push_str(&format!("Available again: {}\n", until.format("%Y-%m-%d %H:%M UTC")));
            }
        }
        None => {
            for requirement in &definition.requirements {
                output.push_str(&counter_line(&RequirementCounter::from_requirement(requirement)));
            }
        }
    }

    if !definition.rewards.is_empty() {
        let rewards: Vec<String> = definition.rewards.iter().map(|r| r.to_string()).collect();
        output.push_str(&format!("Rewards: {}\n", rewards.join(", ")));
    }
    if view.completion_count > 0 && definition.repeatable {
        output.push_str(&format!("Completed {} time(s)\n", view.completion_count));
    }

    truncate_utf8(&mut output, MAX_MESSAGE_LEN);
    output
}

/// Numbered one-line-per-quest list, split across messages as needed.
pub fn format_quest_list(header: &str, quests: &[QuestDefinition]) -> Vec<String> {
    if quests.is_empty() {
        return vec!["No quests available.".to_string()];
    }
    let mut messages = Vec::new();
    let mut current = format!("=== {} ===\n", header);
    for (idx, quest) in quests.iter().enumerate() {
        let line = format!("{}. {} [{}] ({})\n", idx + 1, quest.title, quest.quest_type, quest.id);
        if current.len() + line.len() > MAX_MESSAGE_LEN {
            messages.push(std::mem::take(&mut current));
        }
        current.push_str(&line);
    }
    messages.push(current);
    messages
}

pub fn format_claim(receipt: &ClaimReceipt) -> String {
    let rewards: Vec<String> = receipt.rewards.iter().map(|r| r.to_string()).collect();
    let mut output = if rewards.is_empty() {
        format!("Claimed {}.", receipt.quest_id)
    } else {
        format!("Claimed {}: {}.", receipt.quest_id, rewards.join(", "))
    };
    if let Some(until) = receipt.cooldown_until {
        output.push_str(&format!(" Available again {}.", until.format("%Y-%m-%d %H:%M UTC")));
    } else if receipt.next_status == QuestStatus::InProgress {
        output.push_str(" A new round has started.");
    }
    output
}

/// One line per touched quest, newly completed quests called out.
pub fn format_dispatch_report(report: &DispatchReport) -> Vec<String> {
    let mut lines = Vec::new();
    for update in &report.updates {
        if update.completed {
            lines.push(format!("Quest complete: {}! Use claim to collect your rewards.", update.title));
        } else {
            let parts: Vec<String> = update
                .counters
                .iter()
                .map(|c| format!("{}/{}", c.current, c.goal))
                .collect();
            lines.push(format!("{}: {}", update.title, parts.join(", ")));
        }
    }
    for (event_id, outcome) in &report.contributions {
        if let ContributionOutcome::Recorded { goal_reached: true, total, target } = outcome {
            lines.push(format!("Community goal for {} reached! ({}/{})", event_id, total, target));
        }
    }
    lines
}

fn progress_bar(percent: u8) -> String {
    let filled = (percent as usize) / 10;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(10 - filled))
}

pub fn format_community_progress(progress: &CommunityProgress) -> String {
    format!(
        "{} {} {}/{} {} ({}%)",
        progress.event_id,
        progress_bar(progress.percent()),
        progress.current,
        progress.target,
        progress.kind,
        progress.percent()
    )
}

/// Summary line for an event relative to `now`.
pub fn format_event_line(event: &EventDefinition, now: DateTime<Utc>) -> String {
    let status = event.status_at(now);
    let when = match status {
        EventStatus::Upcoming => {
            format!("starts {}", event.start.format("%Y-%m-%d %H:%M UTC"))
        }
        EventStatus::Active => {
            format!("ends {}", event.end.format("%Y-%m-%d %H:%M UTC"))
        }
        EventStatus::Ended => {
            format!("ended {}", event.end.format("%Y-%m-%d %H:%M UTC"))
        }
    };
    format!("{} ({}) [{}] {}", event.name, event.id, status, when)
}
