use crate::draft::{CourseDraft, DeletionBuffers, Item, MediaSlot, MediaStaging, Topic};
use crate::ids::{EntityId, IdAllocator};
use crate::snapshot::{compute_signature, ChangeTracker, Signature};
use crate::store::CourseRecord;
use crate::uploads::UploadQueue;

/// One open course editing session: the draft tree plus everything that
/// diverges from persisted state between saves. Exactly one exists per
/// daemon; abandoning it discards all local edits.
pub struct BuilderSession {
    pub draft: CourseDraft,
    pub buffers: DeletionBuffers,
    pub queue: UploadQueue,
    pub ids: IdAllocator,
    pub tracker: ChangeTracker,
    /// Set while a reconciliation is running; a second save/publish against
    /// the same session is refused until it clears.
    pub reconciling: bool,
}

impl BuilderSession {
    /// Fresh, never-persisted draft. The baseline is the empty draft itself,
    /// so the session starts clean.
    pub fn new() -> BuilderSession {
        let draft = CourseDraft::new();
        let baseline = compute_signature(&draft, &DeletionBuffers::default(), &[]);
        BuilderSession {
            draft,
            buffers: DeletionBuffers::default(),
            queue: UploadQueue::new(),
            ids: IdAllocator::new(),
            tracker: ChangeTracker::new(baseline),
            reconciling: false,
        }
    }

    /// Session over an already-persisted course. Every id in the tree is a
    /// persisted id; the loaded state is the clean baseline.
    pub fn from_record(record: CourseRecord) -> BuilderSession {
        let draft = CourseDraft {
            id: Some(record.id),
            title: record.title,
            slug: record.slug,
            status: record.status,
            summary: record.summary,
            description_html: record.description_html,
            feature_image: MediaSlot {
                current: record.feature_image_ref,
                staging: MediaStaging::Keep,
            },
            intro_video: MediaSlot {
                current: record.intro_video_ref,
                staging: MediaStaging::Keep,
            },
            member_ids: record.member_ids.into_iter().collect(),
            topics: record
                .topics
                .into_iter()
                .map(|t| Topic {
                    id: EntityId::Persisted(t.id),
                    title: t.title,
                    summary: t.summary,
                    position: t.position,
                    items: t
                        .items
                        .into_iter()
                        .map(|i| Item {
                            id: EntityId::Persisted(i.id),
                            title: i.title,
                            position: i.position,
                            payload: i.payload,
                        })
                        .collect(),
                })
                .collect(),
        };
        let baseline = compute_signature(&draft, &DeletionBuffers::default(), &[]);
        BuilderSession {
            draft,
            buffers: DeletionBuffers::default(),
            queue: UploadQueue::new(),
            ids: IdAllocator::new(),
            tracker: ChangeTracker::new(baseline),
            reconciling: false,
        }
    }

    pub fn signature(&self) -> Signature {
        compute_signature(&self.draft, &self.buffers, &self.queue.ids())
    }

    pub fn is_dirty(&self) -> bool {
        self.tracker.is_dirty(&self.signature())
    }

    /// Bookkeeping after any draft mutation: flags a published course stale
    /// and drops queued uploads no longer referenced by any content.
    pub fn after_mutation(&mut self) {
        self.tracker.note_mutation(self.draft.status);
        let fields = self.draft.all_html_fields();
        let pinned = self.draft.staged_upload_ids();
        self.queue.prune_by_content(fields, pinned);
    }
}

impl Default for BuilderSession {
    fn default() -> BuilderSession {
        BuilderSession::new()
    }
}
