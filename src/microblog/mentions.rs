//! Mention extraction and filtering for the microblog search payload.
//!
//! The search endpoint returns a deeply nested timeline structure. The
//! extractor walks it defensively: any missing key or unexpected shape
//! yields an empty list instead of an error, so a payload change on the
//! platform side can never crash the polling loop.

use chrono::DateTime;
use serde_json::Value;
use tracing::{debug, warn};

/// Timestamp format used by the platform, e.g.
/// `Wed Oct 10 20:19:24 +0000 2018`.
const CREATED_AT_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// One `@handle` entity attached to a mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMention {
    /// Platform user id of the mentioned account.
    pub user_id: String,
    /// Handle without the leading `@`.
    pub screen_name: String,
}

/// A normalized inbound event: someone referenced a monitored account.
///
/// Produced by [`extract_mentions`], consumed once by the dispatch step,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    /// Platform id of the post.
    pub id: String,
    /// Handle of the post's author (may be empty when the payload omits it).
    pub author: String,
    /// Platform user id of the author.
    pub author_id: String,
    /// Full post text.
    pub text: String,
    /// Raw platform timestamp (see [`CREATED_AT_FORMAT`]).
    pub created_at: String,
    /// All `@handle` entities carried by the post.
    pub user_mentions: Vec<UserMention>,
}

impl Mention {
    /// The post text with every `@handle` entity removed, trimmed.
    ///
    /// Used to build the responder prompt so the model sees the question,
    /// not the addressing noise.
    pub fn text_without_handles(&self) -> String {
        let mut clean = self.text.clone();
        for mention in &self.user_mentions {
            let handle = format!("@{}", mention.screen_name);
            clean = clean.replace(&handle, "");
        }
        clean.trim().to_owned()
    }
}

/// Extract mentions from a raw search response.
///
/// Walks `result.timeline.instructions[].entries[]` looking for
/// `TimelineTweet` items. Any malformed shape degrades to an empty list.
pub fn extract_mentions(response: &Value) -> Vec<Mention> {
    let Some(instructions) = response
        .get("result")
        .and_then(|r| r.get("timeline"))
        .and_then(|t| t.get("instructions"))
        .and_then(Value::as_array)
    else {
        debug!("search response missing timeline instructions");
        return Vec::new();
    };

    let mut mentions = Vec::new();
    for instruction in instructions {
        if instruction.get("type").and_then(Value::as_str) != Some("TimelineAddEntries") {
            continue;
        }
        let Some(entries) = instruction.get("entries").and_then(Value::as_array) else {
            continue;
        };
        for entry in entries {
            if let Some(mention) = mention_from_entry(entry) {
                mentions.push(mention);
            }
        }
    }
    mentions
}

/// Extract a single mention from one timeline entry, if it is a tweet.
fn mention_from_entry(entry: &Value) -> Option<Mention> {
    let content = entry.get("content")?;
    if content.get("__typename").and_then(Value::as_str) != Some("TimelineTimelineItem") {
        return None;
    }
    let item = content.get("itemContent")?;
    if item.get("__typename").and_then(Value::as_str) != Some("TimelineTweet") {
        return None;
    }
    let result = item.get("tweet_results")?.get("result")?;
    if result.get("__typename").and_then(Value::as_str) != Some("Tweet") {
        return None;
    }

    let legacy = result.get("legacy")?;
    let author = result
        .get("core")
        .and_then(|c| c.get("user_results"))
        .and_then(|u| u.get("result"))
        .and_then(|r| r.get("legacy"))
        .and_then(|l| l.get("screen_name"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    let user_mentions = legacy
        .get("entities")
        .and_then(|e| e.get("user_mentions"))
        .and_then(Value::as_array)
        .map(|entities| {
            entities
                .iter()
                .map(|m| UserMention {
                    user_id: str_field(m, "id_str"),
                    screen_name: str_field(m, "screen_name"),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Mention {
        id: str_field(legacy, "id_str"),
        author: author.to_owned(),
        author_id: str_field(legacy, "user_id_str"),
        text: str_field(legacy, "full_text"),
        created_at: str_field(legacy, "created_at"),
        user_mentions,
    })
}

/// String field with empty-string default, mirroring the payload's
/// optional keys.
fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Keep only mentions that are new (created within `window_secs` of
/// `now_ts`) and actually address `account` (case-insensitive match on a
/// user-mention entity).
///
/// Unparsable timestamps are treated as not-new and dropped. `account`
/// carries its leading `@`.
pub fn filter_new_at(
    mentions: &[Mention],
    account: &str,
    window_secs: i64,
    now_ts: i64,
) -> Vec<Mention> {
    let cutoff = now_ts.saturating_sub(window_secs);
    let account_lower = account.to_lowercase();

    mentions
        .iter()
        .filter(|mention| {
            if mention.id.is_empty() || mention.created_at.is_empty() {
                return false;
            }

            let created_ts =
                match DateTime::parse_from_str(&mention.created_at, CREATED_AT_FORMAT) {
                    Ok(dt) => dt.timestamp(),
                    Err(e) => {
                        warn!(
                            id = %mention.id,
                            created_at = %mention.created_at,
                            error = %e,
                            "dropping mention with unparsable timestamp"
                        );
                        return false;
                    }
                };
            if created_ts < cutoff {
                return false;
            }

            mention
                .user_mentions
                .iter()
                .any(|m| format!("@{}", m.screen_name.to_lowercase()) == account_lower)
        })
        .cloned()
        .collect()
}

/// [`filter_new_at`] against the current wall clock.
pub fn filter_new(mentions: &[Mention], account: &str, window_secs: i64) -> Vec<Mention> {
    filter_new_at(mentions, account, window_secs, chrono::Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mention(id: &str, created_at: &str, handles: &[&str]) -> Mention {
        Mention {
            id: id.to_owned(),
            author: "alice".to_owned(),
            author_id: "100".to_owned(),
            text: format!("{} hello", handles.join(" ")),
            created_at: created_at.to_owned(),
            user_mentions: handles
                .iter()
                .map(|h| UserMention {
                    user_id: "1".to_owned(),
                    screen_name: h.trim_start_matches('@').to_owned(),
                })
                .collect(),
        }
    }

    // Unix timestamp for `Wed Oct 10 20:19:24 +0000 2018`.
    const REF_TS: i64 = 1_539_202_764;
    const REF_CREATED: &str = "Wed Oct 10 20:19:24 +0000 2018";

    // -- filter_new --

    #[test]
    fn keeps_recent_addressed_mention() {
        let mentions = [mention("1", REF_CREATED, &["@FlareBot"])];
        let kept = filter_new_at(&mentions, "@FlareBot", 60, REF_TS.saturating_add(30));
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn drops_mention_older_than_window() {
        let mentions = [mention("1", REF_CREATED, &["@FlareBot"])];
        let kept = filter_new_at(&mentions, "@FlareBot", 60, REF_TS.saturating_add(61));
        assert!(kept.is_empty());
    }

    #[test]
    fn handle_match_is_case_insensitive() {
        let mentions = [mention("1", REF_CREATED, &["@flarebot"])];
        let kept = filter_new_at(&mentions, "@FLAREBOT", 60, REF_TS);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn drops_mention_of_other_account() {
        let mentions = [mention("1", REF_CREATED, &["@SomeoneElse"])];
        let kept = filter_new_at(&mentions, "@FlareBot", 60, REF_TS);
        assert!(kept.is_empty());
    }

    #[test]
    fn unparsable_timestamp_dropped_not_fatal() {
        let mentions = [
            mention("1", "not a timestamp", &["@FlareBot"]),
            mention("2", REF_CREATED, &["@FlareBot"]),
        ];
        let kept = filter_new_at(&mentions, "@FlareBot", 60, REF_TS);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "2");
    }

    #[test]
    fn missing_id_or_timestamp_dropped() {
        let mut no_id = mention("", REF_CREATED, &["@FlareBot"]);
        no_id.id = String::new();
        let mut no_ts = mention("3", "", &["@FlareBot"]);
        no_ts.created_at = String::new();
        assert!(filter_new_at(&[no_id, no_ts], "@FlareBot", 60, REF_TS).is_empty());
    }

    // -- extract_mentions --

    fn timeline_response(entries: Value) -> Value {
        json!({
            "result": {
                "timeline": {
                    "instructions": [
                        {"type": "TimelineAddEntries", "entries": entries}
                    ]
                }
            }
        })
    }

    fn tweet_entry(id: &str, text: &str, screen_names: &[&str]) -> Value {
        json!({
            "content": {
                "__typename": "TimelineTimelineItem",
                "itemContent": {
                    "__typename": "TimelineTweet",
                    "tweet_results": {
                        "result": {
                            "__typename": "Tweet",
                            "legacy": {
                                "id_str": id,
                                "created_at": REF_CREATED,
                                "full_text": text,
                                "user_id_str": "42",
                                "entities": {
                                    "user_mentions": screen_names.iter().map(|s| json!({
                                        "id_str": "7",
                                        "screen_name": s
                                    })).collect::<Vec<_>>()
                                }
                            },
                            "core": {
                                "user_results": {
                                    "result": {"legacy": {"screen_name": "asker"}}
                                }
                            }
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn extracts_tweet_fields() {
        let response = timeline_response(json!([tweet_entry(
            "991",
            "@FlareBot what is the weather",
            &["FlareBot"]
        )]));
        let mentions = extract_mentions(&response);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].id, "991");
        assert_eq!(mentions[0].author, "asker");
        assert_eq!(mentions[0].author_id, "42");
        assert_eq!(mentions[0].user_mentions[0].screen_name, "FlareBot");
    }

    #[test]
    fn unrecognized_shape_yields_empty_not_error() {
        for malformed in [
            json!({}),
            json!({"result": {}}),
            json!({"result": {"timeline": {"instructions": "nope"}}}),
            json!({"result": {"timeline": {"instructions": [{"type": "Other"}]}}}),
            json!([1, 2, 3]),
            json!("just a string"),
        ] {
            assert!(extract_mentions(&malformed).is_empty());
        }
    }

    #[test]
    fn non_tweet_entries_skipped() {
        let response = timeline_response(json!([
            {"content": {"__typename": "TimelineTimelineCursor"}},
            tweet_entry("5", "hi @FlareBot", &["FlareBot"]),
        ]));
        let mentions = extract_mentions(&response);
        assert_eq!(mentions.len(), 1);
        assert_eq!(mentions[0].id, "5");
    }

    // -- text_without_handles --

    #[test]
    fn strips_all_handles_from_prompt_text() {
        let m = Mention {
            id: "1".to_owned(),
            author: "bob".to_owned(),
            author_id: "2".to_owned(),
            text: "@FlareBot @other what is FLR?".to_owned(),
            created_at: REF_CREATED.to_owned(),
            user_mentions: vec![
                UserMention {
                    user_id: "1".to_owned(),
                    screen_name: "FlareBot".to_owned(),
                },
                UserMention {
                    user_id: "2".to_owned(),
                    screen_name: "other".to_owned(),
                },
            ],
        };
        assert_eq!(m.text_without_handles(), "what is FLR?");
    }
}
