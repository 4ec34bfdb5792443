//! Pure text transforms applied to message bodies.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{User, UserId};

// Tag-shaped runs only: `<` must be followed by a letter or `/`.
static MARKUP: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").ok());
static HORIZONTAL_SPACE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[ \t\u{a0}]+").ok());
static BLANK_LINES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r" ?\n[ \n]*").ok());
static MENTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"@([A-Za-z0-9_]{1,32})").ok());

const EMOTICONS: &[(&str, &str)] = &[
    (":)", "\u{1f642}"),
    (":(", "\u{1f641}"),
    (":D", "\u{1f604}"),
    (";)", "\u{1f609}"),
    ("<3", "\u{2764}\u{fe0f}"),
];

/// A resolved `@name` reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mention {
    pub user_id: UserId,
    pub username: String,
}

/// Strip markup, drop control characters, and collapse whitespace runs.
///
/// Newlines survive as single line breaks; every other whitespace run
/// becomes one space.
pub fn sanitize(body: &str) -> String {
    let stripped = match MARKUP.as_ref() {
        Some(markup) => markup.replace_all(body, ""),
        None => body.into(),
    };
    let printable: String = stripped
        .chars()
        .map(|ch| if ch == '\r' { '\n' } else { ch })
        .filter(|ch| !ch.is_control() || matches!(ch, '\n' | '\t'))
        .collect();
    let spaced = match HORIZONTAL_SPACE.as_ref() {
        Some(space) => space.replace_all(&printable, " ").into_owned(),
        None => printable,
    };
    let collapsed = match BLANK_LINES.as_ref() {
        Some(lines) => lines.replace_all(&spaced, "\n").into_owned(),
        None => spaced,
    };
    collapsed.trim().to_owned()
}

/// Distinct `@name` handles in order of first appearance.
pub fn mention_handles(body: &str) -> Vec<String> {
    let Some(mention) = MENTION.as_ref() else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    mention
        .captures_iter(body)
        .filter_map(|caps| caps.get(1))
        .map(|handle| handle.as_str().to_owned())
        .filter(|handle| seen.insert(handle.to_lowercase()))
        .collect()
}

/// Match handles against known users, ignoring case. Unknown handles are
/// dropped.
pub fn resolve_mentions(handles: &[String], users: &[User]) -> Vec<Mention> {
    handles
        .iter()
        .filter_map(|handle| {
            users
                .iter()
                .find(|user| user.username.eq_ignore_ascii_case(handle))
        })
        .map(|user| Mention {
            user_id: user.id,
            username: user.username.clone(),
        })
        .collect()
}

/// Replace resolved mentions with markup and emoticons with symbols.
pub fn render(body: &str, mentions: &[Mention]) -> String {
    let with_mentions = match MENTION.as_ref() {
        Some(mention) if !mentions.is_empty() => mention
            .replace_all(body, |caps: &regex::Captures<'_>| {
                let handle = caps.get(1).map_or("", |m| m.as_str());
                match mentions
                    .iter()
                    .find(|known| known.username.eq_ignore_ascii_case(handle))
                {
                    Some(known) => format!(
                        r#"<span class="mention" data-user-id="{}">@{}</span>"#,
                        known.user_id, known.username
                    ),
                    None => caps
                        .get(0)
                        .map_or_else(String::new, |m| m.as_str().to_owned()),
                }
            })
            .into_owned(),
        _ => body.to_owned(),
    };
    EMOTICONS
        .iter()
        .fold(with_mentions, |text, (emoticon, symbol)| {
            replace_outside_markup(&text, emoticon, symbol)
        })
}

fn replace_outside_markup(text: &str, pattern: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut inside_tag = false;
    let mut rest = text;
    while let Some(ch) = rest.chars().next() {
        if !inside_tag && rest.starts_with(pattern) {
            out.push_str(replacement);
            rest = &rest[pattern.len()..];
            continue;
        }
        match ch {
            '<' if rest.starts_with("<span") || rest.starts_with("</span") => inside_tag = true,
            '>' => inside_tag = false,
            _ => {}
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}

#[cfg(test)]
mod tests {
    //! Sanitising, mention, and emoticon behaviour.

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("<b>hello</b> world", "hello world")]
    #[case("  spaced \t  out  ", "spaced out")]
    #[case("line one\n\n\n  line two", "line one\nline two")]
    #[case("bell\u{7}char", "bellchar")]
    #[case("<script>alert(1)</script>", "alert(1)")]
    #[case("a < b and c > d", "a < b and c > d")]
    #[case("i <3 this > that", "i <3 this > that")]
    fn sanitize_cleans_bodies(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize(raw), expected);
    }

    #[rstest]
    fn markup_only_bodies_sanitise_to_empty() {
        assert!(sanitize("<img src=x>").is_empty());
    }

    #[rstest]
    fn handles_are_deduplicated_case_insensitively() {
        let handles = mention_handles("hi @Alice and @alice, also @bob_2");
        assert_eq!(handles, vec!["Alice".to_owned(), "bob_2".to_owned()]);
    }

    #[rstest]
    fn unknown_mentions_are_dropped() {
        let users = vec![User::new(UserId::new(4), "alice")];
        let mentions = resolve_mentions(&["ALICE".to_owned(), "ghost".to_owned()], &users);
        assert_eq!(
            mentions,
            vec![Mention {
                user_id: UserId::new(4),
                username: "alice".to_owned(),
            }]
        );
    }

    #[rstest]
    fn render_marks_up_known_mentions_only() {
        let mentions = vec![Mention {
            user_id: UserId::new(4),
            username: "alice".to_owned(),
        }];
        let rendered = render("@Alice meet @ghost", &mentions);
        assert_eq!(
            rendered,
            r#"<span class="mention" data-user-id="4">@alice</span> meet @ghost"#
        );
    }

    #[rstest]
    #[case("nice :)", "nice \u{1f642}")]
    #[case("love <3", "love \u{2764}\u{fe0f}")]
    #[case(";) :D", "\u{1f609} \u{1f604}")]
    fn emoticons_become_symbols(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(render(raw, &[]), expected);
    }
}
