use serde::{Deserialize, Serialize};

use crate::draft::CourseDraft;

pub const STATUS_DRAFT: &str = "draft";
pub const STATUS_PUBLISHED: &str = "published";

const MIN_TITLE_CHARS: usize = 3;
const MIN_DESCRIPTION_CHARS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    Draft,
    Published,
}

impl CourseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CourseStatus::Draft => STATUS_DRAFT,
            CourseStatus::Published => STATUS_PUBLISHED,
        }
    }

    pub fn parse(raw: &str) -> Option<CourseStatus> {
        match raw {
            STATUS_DRAFT => Some(CourseStatus::Draft),
            STATUS_PUBLISHED => Some(CourseStatus::Published),
            _ => None,
        }
    }
}

/// Why a draft cannot be published right now. Reported before any store
/// call is made.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishBlocker {
    NoTopics,
    TitleTooShort,
    DescriptionEmpty,
}

impl PublishBlocker {
    pub fn message(&self) -> &'static str {
        match self {
            PublishBlocker::NoTopics => "course must have at least one topic",
            PublishBlocker::TitleTooShort => "course title is too short",
            PublishBlocker::DescriptionEmpty => "course description must not be empty",
        }
    }
}

/// Completeness gates for publish/republish. Save-as-draft is never gated.
pub fn publish_blockers(draft: &CourseDraft) -> Vec<PublishBlocker> {
    let mut blockers = Vec::new();
    if draft.topics.is_empty() {
        blockers.push(PublishBlocker::NoTopics);
    }
    if draft.title.trim().chars().count() < MIN_TITLE_CHARS {
        blockers.push(PublishBlocker::TitleTooShort);
    }
    if strip_markup(&draft.description_html).chars().count() < MIN_DESCRIPTION_CHARS {
        blockers.push(PublishBlocker::DescriptionEmpty);
    }
    blockers
}

pub fn can_publish(draft: &CourseDraft) -> bool {
    publish_blockers(draft).is_empty()
}

/// Drops tags and collapses whitespace so "<p> </p>" does not count as a
/// description.
pub fn strip_markup(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::draft::CourseDraft;

    #[test]
    fn strip_markup_drops_tags_and_collapses_whitespace() {
        assert_eq!(strip_markup("<p>Hello   <b>world</b></p>"), "Hello world");
        assert_eq!(strip_markup("<p>  </p><br>"), "");
    }

    #[test]
    fn empty_course_is_blocked_on_all_gates() {
        let draft = CourseDraft::new();
        let blockers = publish_blockers(&draft);
        assert!(blockers.contains(&PublishBlocker::NoTopics));
        assert!(blockers.contains(&PublishBlocker::TitleTooShort));
        assert!(blockers.contains(&PublishBlocker::DescriptionEmpty));
    }
}
