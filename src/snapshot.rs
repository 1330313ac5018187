use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::draft::{CourseDraft, DeletionBuffers};
use crate::publish::CourseStatus;

/// Opaque structural fingerprint of the draft. Equality against the saved
/// baseline is the sole dirty/clean signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature(String);

#[derive(Serialize)]
struct Fingerprint<'a> {
    status: CourseStatus,
    course_id: &'a Option<String>,
    title: &'a str,
    slug: &'a str,
    summary: &'a str,
    description_html: &'a str,
    feature_image: &'a crate::draft::MediaSlot,
    intro_video: &'a crate::draft::MediaSlot,
    // BTreeSet serializes sorted, which is what comparison needs.
    member_ids: &'a std::collections::BTreeSet<String>,
    topics: &'a [crate::draft::Topic],
    deleted_topics: &'a std::collections::BTreeSet<String>,
    deleted_items: &'a std::collections::BTreeSet<String>,
    pending_uploads: &'a [String],
}

/// Order-sensitive structural signature: topic/item order is semantic and
/// preserved, member ids are compared as a sorted set.
pub fn compute_signature(
    draft: &CourseDraft,
    buffers: &DeletionBuffers,
    pending_upload_ids: &[String],
) -> Signature {
    let fp = Fingerprint {
        status: draft.status,
        course_id: &draft.id,
        title: &draft.title,
        slug: &draft.slug,
        summary: &draft.summary,
        description_html: &draft.description_html,
        feature_image: &draft.feature_image,
        intro_video: &draft.intro_video,
        member_ids: &draft.member_ids,
        topics: &draft.topics,
        deleted_topics: &buffers.topics,
        deleted_items: &buffers.items,
        pending_uploads: pending_upload_ids,
    };
    let json = serde_json::to_vec(&fp).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&json);
    Signature(format!("{:x}", hasher.finalize()))
}

/// Compares the live draft against the last-saved baseline and carries the
/// "published version is stale" flag.
#[derive(Debug)]
pub struct ChangeTracker {
    baseline: Signature,
    needs_republish: bool,
}

impl ChangeTracker {
    pub fn new(baseline: Signature) -> ChangeTracker {
        ChangeTracker {
            baseline,
            needs_republish: false,
        }
    }

    pub fn is_dirty(&self, current: &Signature) -> bool {
        self.baseline != *current
    }

    pub fn needs_republish(&self) -> bool {
        self.needs_republish
    }

    /// Called on every mutation, before any save. Over-approximates: any
    /// edit while published flags the course stale, including edits that may
    /// not be learner-visible.
    pub fn note_mutation(&mut self, status: CourseStatus) {
        if status == CourseStatus::Published {
            self.needs_republish = true;
        }
    }

    /// Replaces the baseline after a successful save. Only a publish clears
    /// the stale flag; save-as-draft leaves it as-is.
    pub fn rebase(&mut self, baseline: Signature, published: bool) {
        self.baseline = baseline;
        if published {
            self.needs_republish = false;
        }
    }
}
