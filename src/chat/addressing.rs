//! Group-chat addressing rules.
//!
//! In a group the bot only answers when it is addressed: an `@handle`
//! mention of the bot somewhere in the text, or a direct reply to one of
//! the bot's own messages. Everything else is silently ignored. The
//! logic is pure so it can be tested without a transport.

use super::MessageEntity;

/// Decide whether a group message addresses the bot and, if so, strip
/// the addressing from the prompt text.
///
/// Resolution order:
/// 1. a `mention` entity whose span equals `@<bot_username>`
///    (case-insensitive) -- the span is removed from the text;
/// 2. a plain-text occurrence of `@<bot_username>` -- the first
///    occurrence is removed;
/// 3. a reply to one of the bot's messages -- the text is kept verbatim.
///
/// Returns `(addressed, prompt_text)`. When not addressed the original
/// text is returned unchanged.
pub fn resolve_group_mention(
    bot_username: &str,
    text: &str,
    entities: &[MessageEntity],
    is_reply_to_bot: bool,
) -> (bool, String) {
    let handle_lower = format!("@{}", bot_username.to_lowercase());

    for entity in entities {
        if entity.kind != "mention" {
            continue;
        }
        let Some((start, end)) = entity_byte_span(text, entity.offset, entity.length) else {
            continue;
        };
        if text[start..end].to_lowercase() == handle_lower {
            let mut cleaned = String::with_capacity(text.len());
            cleaned.push_str(&text[..start]);
            cleaned.push_str(&text[end..]);
            return (true, cleaned.trim().to_owned());
        }
    }

    // The handle is ASCII, so lowercasing the haystack preserves byte
    // offsets only for ASCII prefixes; guard the boundaries anyway.
    let haystack = text.to_lowercase();
    if let Some(start) = haystack.find(&handle_lower) {
        let end = start.saturating_add(handle_lower.len());
        if text.is_char_boundary(start) && end <= text.len() && text.is_char_boundary(end) {
            let mut cleaned = String::with_capacity(text.len());
            cleaned.push_str(&text[..start]);
            cleaned.push_str(&text[end..]);
            return (true, cleaned.trim().to_owned());
        }
    }

    if is_reply_to_bot {
        return (true, text.to_owned());
    }

    (false, text.to_owned())
}

/// Convert an entity's character offset and length into a byte span.
///
/// Returns `None` when the span falls outside the text.
fn entity_byte_span(text: &str, offset: usize, length: usize) -> Option<(usize, usize)> {
    let mut indices = text.char_indices().map(|(i, _)| i);
    let start = indices.nth(offset)?;
    let end = match text[start..].char_indices().map(|(i, _)| i).nth(length) {
        Some(rel) => start.saturating_add(rel),
        None if text[start..].chars().count() == length => text.len(),
        None => return None,
    };
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mention_entity(offset: usize, length: usize) -> MessageEntity {
        MessageEntity {
            kind: "mention".to_owned(),
            offset,
            length,
        }
    }

    #[test]
    fn entity_mention_is_stripped() {
        let (addressed, prompt) = resolve_group_mention(
            "BotName",
            "hello @BotName please help",
            &[mention_entity(6, 8)],
            false,
        );
        assert!(addressed);
        assert_eq!(prompt, "hello  please help");
    }

    #[test]
    fn entity_match_is_case_insensitive() {
        let (addressed, prompt) =
            resolve_group_mention("botname", "@BotName hi", &[mention_entity(0, 8)], false);
        assert!(addressed);
        assert_eq!(prompt, "hi");
    }

    #[test]
    fn entity_for_other_account_falls_through() {
        let (addressed, prompt) =
            resolve_group_mention("BotName", "@someone hi", &[mention_entity(0, 8)], false);
        assert!(!addressed);
        assert_eq!(prompt, "@someone hi");
    }

    #[test]
    fn plain_text_mention_without_entities() {
        let (addressed, prompt) =
            resolve_group_mention("BotName", "hey @botname what's up", &[], false);
        assert!(addressed);
        assert_eq!(prompt, "hey  what's up");
    }

    #[test]
    fn reply_to_bot_keeps_text_verbatim() {
        let (addressed, prompt) = resolve_group_mention("BotName", "and then?", &[], true);
        assert!(addressed);
        assert_eq!(prompt, "and then?");
    }

    #[test]
    fn unaddressed_group_message_ignored() {
        let (addressed, _) = resolve_group_mention("BotName", "just chatting", &[], false);
        assert!(!addressed);
    }

    #[test]
    fn mention_only_message_leaves_empty_prompt() {
        let (addressed, prompt) =
            resolve_group_mention("BotName", "@BotName", &[mention_entity(0, 8)], false);
        assert!(addressed);
        assert_eq!(prompt, "");
    }

    #[test]
    fn entity_offsets_are_character_based() {
        // Multibyte characters before the mention shift byte offsets.
        let text = "héllo @BotName help";
        let (addressed, prompt) =
            resolve_group_mention("BotName", text, &[mention_entity(6, 8)], false);
        assert!(addressed);
        assert_eq!(prompt, "héllo  help");
    }

    #[test]
    fn out_of_range_entity_is_ignored() {
        let (addressed, _) =
            resolve_group_mention("BotName", "short", &[mention_entity(40, 8)], false);
        assert!(!addressed);
    }

    #[test]
    fn entity_spanning_to_end_of_text() {
        let (addressed, prompt) =
            resolve_group_mention("BotName", "hi @BotName", &[mention_entity(3, 8)], false);
        assert!(addressed);
        assert_eq!(prompt, "hi");
    }
}
