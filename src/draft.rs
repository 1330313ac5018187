use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::ids::EntityId;
use crate::publish::CourseStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizOption {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub prompt_html: String,
    pub options: Vec<QuizOption>,
    pub correct_option: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizSettings {
    /// 0 means unlimited attempts.
    #[serde(default)]
    pub attempts_allowed: u32,
    #[serde(default = "default_passing_percent")]
    pub passing_percent: f64,
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
}

fn default_passing_percent() -> f64 {
    50.0
}

impl Default for QuizSettings {
    fn default() -> QuizSettings {
        QuizSettings {
            attempts_allowed: 0,
            passing_percent: default_passing_percent(),
            time_limit_minutes: None,
        }
    }
}

/// Kind-specific item payload. Matching is exhaustive at the reconciliation
/// boundary; there is no string `kind` check anywhere past deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemPayload {
    Lesson {
        #[serde(default)]
        content_html: String,
        #[serde(default)]
        video_ref: Option<String>,
        #[serde(default)]
        attachment_refs: Vec<String>,
    },
    Quiz {
        #[serde(default)]
        questions: Vec<QuizQuestion>,
        #[serde(default)]
        settings: QuizSettings,
    },
}

impl ItemPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            ItemPayload::Lesson { .. } => "lesson",
            ItemPayload::Quiz { .. } => "quiz",
        }
    }

    /// Every HTML field that may embed `upload://` references.
    pub fn html_fields(&self) -> Vec<&str> {
        match self {
            ItemPayload::Lesson { content_html, .. } => vec![content_html.as_str()],
            ItemPayload::Quiz { questions, .. } => {
                questions.iter().map(|q| q.prompt_html.as_str()).collect()
            }
        }
    }

    pub fn for_each_html_mut<F: FnMut(&mut String)>(&mut self, mut f: F) {
        match self {
            ItemPayload::Lesson { content_html, .. } => f(content_html),
            ItemPayload::Quiz { questions, .. } => {
                for q in questions.iter_mut() {
                    f(&mut q.prompt_html);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: EntityId,
    pub title: String,
    pub position: i64,
    pub payload: ItemPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub summary: Option<String>,
    pub position: i64,
    pub items: Vec<Item>,
}

/// Locally staged change to a media slot. An explicit removal wins over a
/// staged replacement; "keep" never overrides either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "action", content = "uploadId", rename_all = "snake_case")]
pub enum MediaStaging {
    #[default]
    Keep,
    Replace(String),
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MediaSlot {
    /// Stable reference currently persisted, if any.
    pub current: Option<String>,
    pub staging: MediaStaging,
}

impl MediaSlot {
    pub fn stage_replace(&mut self, upload_id: String) {
        // Removal already requested wins; see reconciler step 5.
        if self.staging != MediaStaging::Remove {
            self.staging = MediaStaging::Replace(upload_id);
        }
    }

    pub fn stage_remove(&mut self) {
        self.staging = MediaStaging::Remove;
    }
}

/// Persisted ids queued for deletion at the next reconciliation. Temporary
/// ids never enter these sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DeletionBuffers {
    pub topics: BTreeSet<String>,
    pub items: BTreeSet<String>,
}

impl DeletionBuffers {
    pub fn buffer_topic(&mut self, id: &EntityId) {
        if let EntityId::Persisted(raw) = id {
            self.topics.insert(raw.clone());
        }
    }

    pub fn buffer_item(&mut self, id: &EntityId) {
        if let EntityId::Persisted(raw) = id {
            self.items.insert(raw.clone());
        }
    }

    pub fn clear(&mut self) {
        self.topics.clear();
        self.items.clear();
    }
}

/// The whole course as the editor sees it. Mutations are synchronous and
/// never perform I/O; nothing here is persisted until the reconciler runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseDraft {
    /// Persisted course id, once the shell exists.
    pub id: Option<String>,
    pub title: String,
    pub slug: String,
    pub status: CourseStatus,
    pub summary: String,
    pub description_html: String,
    pub feature_image: MediaSlot,
    pub intro_video: MediaSlot,
    pub member_ids: BTreeSet<String>,
    pub topics: Vec<Topic>,
}

impl CourseDraft {
    pub fn new() -> CourseDraft {
        CourseDraft {
            id: None,
            title: String::new(),
            slug: String::new(),
            status: CourseStatus::Draft,
            summary: String::new(),
            description_html: String::new(),
            feature_image: MediaSlot::default(),
            intro_video: MediaSlot::default(),
            member_ids: BTreeSet::new(),
            topics: Vec::new(),
        }
    }

    pub fn find_topic(&self, id: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.id.as_str() == id)
    }

    pub fn find_topic_mut(&mut self, id: &str) -> Option<&mut Topic> {
        self.topics.iter_mut().find(|t| t.id.as_str() == id)
    }

    pub fn add_topic(&mut self, id: EntityId, title: String, summary: Option<String>) {
        self.topics.push(Topic {
            id,
            title,
            summary,
            position: 0,
            items: Vec::new(),
        });
        reindex_topics(&mut self.topics);
    }

    pub fn update_topic(&mut self, id: &str, title: Option<String>, summary: Option<Option<String>>) -> bool {
        let Some(topic) = self.find_topic_mut(id) else {
            return false;
        };
        if let Some(t) = title {
            topic.title = t;
        }
        if let Some(s) = summary {
            topic.summary = s;
        }
        true
    }

    /// Removes a topic, cascading its items. Persisted ids move into the
    /// deletion buffers; temporary ids are simply dropped. Idempotent: a
    /// second delete of the same id finds nothing and buffers nothing.
    pub fn delete_topic(&mut self, id: &str, buffers: &mut DeletionBuffers) -> bool {
        let Some(pos) = self.topics.iter().position(|t| t.id.as_str() == id) else {
            return false;
        };
        let topic = self.topics.remove(pos);
        buffers.buffer_topic(&topic.id);
        for item in &topic.items {
            buffers.buffer_item(&item.id);
        }
        reindex_topics(&mut self.topics);
        true
    }

    /// Reorders topics to match `order`, which must be a permutation of the
    /// current topic ids.
    pub fn reorder_topics(&mut self, order: &[String]) -> Result<(), String> {
        reorder_by_ids(&mut self.topics, order, |t| t.id.as_str())?;
        reindex_topics(&mut self.topics);
        Ok(())
    }

    pub fn add_item(&mut self, topic_id: &str, id: EntityId, title: String, payload: ItemPayload) -> bool {
        let Some(topic) = self.find_topic_mut(topic_id) else {
            return false;
        };
        topic.items.push(Item {
            id,
            title,
            position: 0,
            payload,
        });
        reindex_items(&mut topic.items);
        true
    }

    pub fn update_item(&mut self, id: &str, title: Option<String>, payload: Option<ItemPayload>) -> bool {
        for topic in self.topics.iter_mut() {
            if let Some(item) = topic.items.iter_mut().find(|i| i.id.as_str() == id) {
                if let Some(t) = title {
                    item.title = t;
                }
                if let Some(p) = payload {
                    item.payload = p;
                }
                return true;
            }
        }
        false
    }

    pub fn delete_item(&mut self, id: &str, buffers: &mut DeletionBuffers) -> bool {
        for topic in self.topics.iter_mut() {
            if let Some(pos) = topic.items.iter().position(|i| i.id.as_str() == id) {
                let item = topic.items.remove(pos);
                buffers.buffer_item(&item.id);
                reindex_items(&mut topic.items);
                return true;
            }
        }
        false
    }

    pub fn reorder_items(&mut self, topic_id: &str, order: &[String]) -> Result<(), String> {
        let Some(topic) = self.find_topic_mut(topic_id) else {
            return Err("topic not found".to_string());
        };
        reorder_by_ids(&mut topic.items, order, |i| i.id.as_str())?;
        reindex_items(&mut topic.items);
        Ok(())
    }

    /// Moves an item to another topic at the given index. Both sibling lists
    /// are reindexed; the item still belongs to exactly one topic.
    pub fn move_item(&mut self, item_id: &str, to_topic_id: &str, index: usize) -> Result<(), String> {
        let Some(dest) = self.topics.iter().position(|t| t.id.as_str() == to_topic_id) else {
            return Err("destination topic not found".to_string());
        };
        let mut moved: Option<Item> = None;
        for topic in self.topics.iter_mut() {
            if let Some(pos) = topic.items.iter().position(|i| i.id.as_str() == item_id) {
                moved = Some(topic.items.remove(pos));
                reindex_items(&mut topic.items);
                break;
            }
        }
        let Some(item) = moved else {
            return Err("item not found".to_string());
        };
        let topic = &mut self.topics[dest];
        let at = index.min(topic.items.len());
        topic.items.insert(at, item);
        reindex_items(&mut topic.items);
        Ok(())
    }

    /// Upload ids staged into media slots. Pinned during queue pruning
    /// since they appear in no HTML field.
    pub fn staged_upload_ids(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        for slot in [&self.feature_image, &self.intro_video] {
            if let MediaStaging::Replace(id) = &slot.staging {
                ids.push(id.as_str());
            }
        }
        ids
    }

    /// Every HTML field of the draft, for queue pruning: the long-form
    /// description plus every item's content.
    pub fn all_html_fields(&self) -> Vec<&str> {
        let mut fields = vec![self.description_html.as_str()];
        for topic in &self.topics {
            for item in &topic.items {
                fields.extend(item.payload.html_fields());
            }
        }
        fields
    }
}

impl Default for CourseDraft {
    fn default() -> CourseDraft {
        CourseDraft::new()
    }
}

fn reindex_topics(topics: &mut [Topic]) {
    for (i, t) in topics.iter_mut().enumerate() {
        t.position = i as i64;
    }
}

fn reindex_items(items: &mut [Item]) {
    for (i, item) in items.iter_mut().enumerate() {
        item.position = i as i64;
    }
}

fn reorder_by_ids<T, F: Fn(&T) -> &str>(list: &mut Vec<T>, order: &[String], id_of: F) -> Result<(), String> {
    if order.len() != list.len() {
        return Err("order must list every current id exactly once".to_string());
    }
    let mut remaining: Vec<T> = std::mem::take(list);
    let mut out: Vec<T> = Vec::with_capacity(order.len());
    for id in order {
        match remaining.iter().position(|e| id_of(e) == id.as_str()) {
            Some(pos) => out.push(remaining.remove(pos)),
            None => {
                // Put everything back untouched before failing.
                out.append(&mut remaining);
                *list = out;
                return Err(format!("unknown id in order: {}", id));
            }
        }
    }
    *list = out;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;

    fn lesson() -> ItemPayload {
        ItemPayload::Lesson {
            content_html: String::new(),
            video_ref: None,
            attachment_refs: Vec::new(),
        }
    }

    fn positions(topics: &[Topic]) -> Vec<i64> {
        topics.iter().map(|t| t.position).collect()
    }

    #[test]
    fn topic_positions_stay_dense_through_mutations() {
        let mut ids = IdAllocator::new();
        let mut draft = CourseDraft::new();
        let mut buffers = DeletionBuffers::default();
        for n in 0..4 {
            draft.add_topic(ids.next("topic"), format!("T{}", n), None);
        }
        assert_eq!(positions(&draft.topics), vec![0, 1, 2, 3]);

        let second = draft.topics[1].id.as_str().to_string();
        assert!(draft.delete_topic(&second, &mut buffers));
        assert_eq!(positions(&draft.topics), vec![0, 1, 2]);

        let mut order: Vec<String> = draft.topics.iter().map(|t| t.id.as_str().to_string()).collect();
        order.reverse();
        draft.reorder_topics(&order).expect("reorder");
        assert_eq!(positions(&draft.topics), vec![0, 1, 2]);
        assert_eq!(draft.topics[0].title, "T3");
    }

    #[test]
    fn deleting_persisted_topic_buffers_children_once() {
        let mut draft = CourseDraft::new();
        let mut buffers = DeletionBuffers::default();
        draft.add_topic(EntityId::Persisted("t-1".into()), "T".into(), None);
        draft.add_item("t-1", EntityId::Persisted("i-1".into()), "L".into(), lesson());
        draft.add_item("t-1", EntityId::Temp("tmp-item-1".into()), "L2".into(), lesson());

        assert!(draft.delete_topic("t-1", &mut buffers));
        assert!(!draft.delete_topic("t-1", &mut buffers));
        assert_eq!(buffers.topics.len(), 1);
        assert!(buffers.topics.contains("t-1"));
        assert_eq!(buffers.items.len(), 1);
        assert!(buffers.items.contains("i-1"));
    }

    #[test]
    fn deleting_temp_topic_buffers_nothing() {
        let mut ids = IdAllocator::new();
        let mut draft = CourseDraft::new();
        let mut buffers = DeletionBuffers::default();
        draft.add_topic(ids.next("topic"), "T".into(), None);
        let id = draft.topics[0].id.as_str().to_string();
        draft.add_item(&id, ids.next("item"), "L".into(), lesson());

        assert!(draft.delete_topic(&id, &mut buffers));
        assert!(buffers.topics.is_empty());
        assert!(buffers.items.is_empty());
    }

    #[test]
    fn move_item_keeps_both_sibling_lists_dense() {
        let mut draft = CourseDraft::new();
        draft.add_topic(EntityId::Persisted("t-1".into()), "A".into(), None);
        draft.add_topic(EntityId::Persisted("t-2".into()), "B".into(), None);
        for n in 0..3 {
            draft.add_item("t-1", EntityId::Persisted(format!("i-{}", n)), format!("L{}", n), lesson());
        }
        draft.move_item("i-1", "t-2", 0).expect("move");
        let a = draft.find_topic("t-1").expect("t-1");
        let b = draft.find_topic("t-2").expect("t-2");
        assert_eq!(a.items.iter().map(|i| i.position).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(b.items.len(), 1);
        assert_eq!(b.items[0].position, 0);
        assert_eq!(b.items[0].id.as_str(), "i-1");
    }

    #[test]
    fn reorder_rejects_non_permutations() {
        let mut draft = CourseDraft::new();
        draft.add_topic(EntityId::Persisted("t-1".into()), "A".into(), None);
        draft.add_topic(EntityId::Persisted("t-2".into()), "B".into(), None);
        assert!(draft.reorder_topics(&["t-1".into()]).is_err());
        assert!(draft
            .reorder_topics(&["t-1".into(), "t-9".into()])
            .is_err());
        // Failed reorder leaves the list intact.
        assert_eq!(draft.topics.len(), 2);
    }

    #[test]
    fn media_removal_wins_over_staged_replacement() {
        let mut slot = MediaSlot::default();
        slot.stage_remove();
        slot.stage_replace("up-1".into());
        assert_eq!(slot.staging, MediaStaging::Remove);
    }
}
