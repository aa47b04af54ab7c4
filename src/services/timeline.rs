// src/services/timeline.rs

//! Parsers for GraphQL timeline and user payloads.

use serde_json::Value;

use crate::models::{User, UserPage};

const FOLLOWING_INSTRUCTIONS: &str = "/data/user/result/timeline/timeline/instructions";
const SEARCH_INSTRUCTIONS: &str = "/data/search_by_raw_query/search_timeline/timeline/instructions";
const LIST_INSTRUCTIONS: &str = "/data/list/members_timeline/timeline/instructions";

/// Parse a `Following` response.
pub fn parse_following(data: &Value) -> UserPage {
    parse_instructions(data.pointer(FOLLOWING_INSTRUCTIONS))
}

/// Parse a people `SearchTimeline` response.
pub fn parse_search(data: &Value) -> UserPage {
    parse_instructions(data.pointer(SEARCH_INSTRUCTIONS))
}

/// Parse a `ListMembers` response.
pub fn parse_list_members(data: &Value) -> UserPage {
    parse_instructions(data.pointer(LIST_INSTRUCTIONS))
}

/// Parse a `UserByRestId` response; `None` when the account is unavailable.
pub fn parse_user_by_id(data: &Value) -> Option<User> {
    data.pointer("/data/user/result").and_then(parse_user)
}

/// Build a [`User`] from a `user_results.result` object.
pub fn parse_user(result: &Value) -> Option<User> {
    let typename = result.get("__typename").and_then(Value::as_str);
    if typename.is_some_and(|name| name != "User") {
        return None;
    }
    let id = result.get("rest_id").and_then(Value::as_str)?;
    if id.is_empty() {
        return None;
    }

    let legacy = result.get("legacy").unwrap_or(&Value::Null);
    let core = result.get("core").unwrap_or(&Value::Null);
    let text = |key: &str| {
        legacy
            .get(key)
            .or_else(|| core.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let count = |key: &str| legacy.get(key).and_then(Value::as_u64).unwrap_or(0);

    Some(User {
        handle: text("screen_name"),
        display_name: text("name"),
        bio: text("description"),
        followers_count: count("followers_count"),
        following_count: count("friends_count"),
        ..User::bare(id)
    })
}

fn parse_instructions(instructions: Option<&Value>) -> UserPage {
    let mut page = UserPage::default();
    let Some(instructions) = instructions.and_then(Value::as_array) else {
        return page;
    };

    let entries = instructions
        .iter()
        .filter(|ins| ins.get("type").and_then(Value::as_str) == Some("TimelineAddEntries"))
        .filter_map(|ins| ins.get("entries").and_then(Value::as_array))
        .flatten();

    for entry in entries {
        let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or_default();
        let content = entry.get("content").unwrap_or(&Value::Null);

        if let Some(user) = content
            .pointer("/itemContent/user_results/result")
            .and_then(parse_user)
        {
            page.users.push(user);
            continue;
        }

        let is_bottom = entry_id.starts_with("cursor-bottom-")
            || content.get("cursorType").and_then(Value::as_str) == Some("Bottom");
        if is_bottom {
            page.next_cursor = content
                .get("value")
                .and_then(Value::as_str)
                .map(str::to_string);
        }
    }
    page
}
