use crate::draft::{MediaSlot, MediaStaging};
use crate::ids::EntityId;
use crate::publish::{publish_blockers, CourseStatus, PublishBlocker};
use crate::session::BuilderSession;
use crate::snapshot::compute_signature;
use crate::store::{AssetStore, CourseFields, CourseStore, ItemFields, MediaKind, StoreError, TopicFields};
use crate::uploads::{referenced_upload_ids, substitute_reference, UploadQueue};

#[derive(Debug, Clone, Copy)]
pub enum SaveMode {
    /// Explicit "Save Draft". Unpublishing a published course this way
    /// removes learner access, so it only happens when the caller confirms.
    Draft { confirm_unpublish: bool },
    /// Publish or republish.
    Publish,
}

#[derive(Debug)]
pub enum ReconcileError {
    /// Completeness gates failed; no store call was made.
    Validation(Vec<PublishBlocker>),
    /// Another reconciliation is already running against this session.
    InProgress,
    Store(StoreError),
    Upload { upload_id: String, source: StoreError },
}

impl ReconcileError {
    pub fn code(&self) -> &'static str {
        match self {
            ReconcileError::Validation(_) => "validation_failed",
            ReconcileError::InProgress => "save_in_progress",
            ReconcileError::Store(e) => e.code(),
            ReconcileError::Upload { .. } => "upload_failed",
        }
    }
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Validation(blockers) => {
                let msgs: Vec<&str> = blockers.iter().map(|b| b.message()).collect();
                write!(f, "cannot publish: {}", msgs.join("; "))
            }
            ReconcileError::InProgress => write!(f, "a save is already in progress"),
            ReconcileError::Store(e) => write!(f, "{}", e),
            ReconcileError::Upload { upload_id, source } => {
                write!(f, "upload {} failed: {}", upload_id, source)
            }
        }
    }
}

impl std::error::Error for ReconcileError {}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> ReconcileError {
        ReconcileError::Store(e)
    }
}

#[derive(Debug)]
pub struct ReconcileOutcome {
    pub course_id: String,
    pub status: CourseStatus,
    pub needs_republish: bool,
}

/// Commits the session's draft to the store. Runs the steps strictly in
/// order; the first failure aborts the remainder and leaves already
/// committed steps in place (no rollback) with the dirty baseline
/// unadvanced, so the next save re-attempts the unsaved remainder.
pub fn save<S>(
    session: &mut BuilderSession,
    mode: SaveMode,
    store: &mut S,
) -> Result<ReconcileOutcome, ReconcileError>
where
    S: CourseStore + AssetStore,
{
    if session.reconciling {
        return Err(ReconcileError::InProgress);
    }
    if matches!(mode, SaveMode::Publish) {
        let blockers = publish_blockers(&session.draft);
        if !blockers.is_empty() {
            return Err(ReconcileError::Validation(blockers));
        }
    }
    session.reconciling = true;
    let result = run(session, mode, store);
    session.reconciling = false;
    result
}

fn course_fields(session_draft: &crate::draft::CourseDraft, status: CourseStatus) -> CourseFields {
    CourseFields {
        title: session_draft.title.clone(),
        slug: session_draft.slug.clone(),
        status,
        summary: session_draft.summary.clone(),
        description_html: session_draft.description_html.clone(),
    }
}

fn run<S>(
    session: &mut BuilderSession,
    mode: SaveMode,
    store: &mut S,
) -> Result<ReconcileOutcome, ReconcileError>
where
    S: CourseStore + AssetStore,
{
    let BuilderSession {
        draft,
        buffers,
        queue,
        tracker,
        ..
    } = session;

    let was_published = draft.status == CourseStatus::Published;
    let target = match mode {
        SaveMode::Publish => CourseStatus::Published,
        SaveMode::Draft { confirm_unpublish } => {
            if was_published && !confirm_unpublish {
                CourseStatus::Published
            } else {
                CourseStatus::Draft
            }
        }
    };

    // Drop queued binaries no longer referenced by any content before
    // anything is uploaded.
    let fields: Vec<&str> = draft.all_html_fields();
    let pinned = draft.staged_upload_ids();
    queue.prune_by_content(fields, pinned);

    // Step 1: ensure the persisted course shell exists.
    let course_id = match draft.id.clone() {
        Some(id) => id,
        None => {
            let id = store.create_course(&course_fields(draft, target))?;
            draft.id = Some(id.clone());
            id
        }
    };

    // Step 2: finalize course-level inline references (long description).
    let referenced = referenced_upload_ids(&draft.description_html);
    finalize_batch(&referenced, queue, store, |upload_id, stable| {
        draft.description_html = substitute_reference(&draft.description_html, upload_id, stable);
    })?;

    // Step 3: course scalar fields.
    store.update_course(&course_id, &course_fields(draft, target))?;

    // Step 4: membership as a full-replacement set.
    let members: Vec<String> = draft.member_ids.iter().cloned().collect();
    store.replace_members(&course_id, &members)?;

    // Step 5: staged intro media and cover image.
    for (slot, kind) in [
        (&mut draft.feature_image, MediaKind::FeatureImage),
        (&mut draft.intro_video, MediaKind::IntroVideo),
    ] {
        finalize_media_slot(slot, kind, &course_id, queue, store)?;
    }

    // Step 6: create or update topics in draft order, resolving temp ids.
    for topic in draft.topics.iter_mut() {
        let fields = TopicFields {
            title: topic.title.clone(),
            summary: topic.summary.clone(),
            position: topic.position,
        };
        match &topic.id {
            EntityId::Temp(_) => {
                let real = store.create_topic(&course_id, &fields)?;
                topic.id = EntityId::Persisted(real);
            }
            EntityId::Persisted(id) => store.update_topic(id, &fields)?,
        }
    }

    // Step 7: canonical topic order.
    let topic_order: Vec<String> = draft.topics.iter().map(|t| t.id.as_str().to_string()).collect();
    store.reorder_topics(&course_id, &topic_order)?;

    // Step 8: items in draft order, finalizing their queued uploads first so
    // the final item write already carries stable references.
    for topic in draft.topics.iter_mut() {
        let topic_id = topic.id.as_str().to_string();
        for item in topic
            .items
            .iter_mut()
            .filter(|i| !buffers.items.contains(i.id.as_str()))
        {
            let mut referenced: Vec<String> = Vec::new();
            for html in item.payload.html_fields() {
                for id in referenced_upload_ids(html) {
                    if !referenced.contains(&id) {
                        referenced.push(id);
                    }
                }
            }
            let payload = &mut item.payload;
            finalize_batch(&referenced, queue, store, |upload_id, stable| {
                payload.for_each_html_mut(|html| *html = substitute_reference(html, upload_id, stable));
            })?;

            let fields = ItemFields {
                title: item.title.clone(),
                position: item.position,
                payload: item.payload.clone(),
            };
            match &item.id {
                EntityId::Temp(_) => {
                    let real = store.create_item(&topic_id, &fields)?;
                    item.id = EntityId::Persisted(real);
                }
                EntityId::Persisted(id) => store.update_item(id, &fields)?,
            }
        }
    }

    // Step 9: canonical item order per topic.
    for topic in draft.topics.iter() {
        let order: Vec<String> = topic.items.iter().map(|i| i.id.as_str().to_string()).collect();
        store.reorder_items(topic.id.as_str(), &order)?;
    }

    // Step 10: buffered deletions, items before topics. A topic delete may
    // cascade server-side; the other order could race that cascade.
    for item_id in buffers.items.iter() {
        store.delete_item(item_id)?;
    }
    for topic_id in buffers.topics.iter() {
        store.delete_topic(topic_id)?;
    }

    // Step 11: reset local divergence and advance the baseline.
    buffers.clear();
    queue.clear();
    draft.status = target;
    let published = matches!(mode, SaveMode::Publish);
    let unpublished = was_published && target == CourseStatus::Draft;
    let baseline = compute_signature(draft, buffers, &queue.ids());
    tracker.rebase(baseline, published || unpublished);

    Ok(ReconcileOutcome {
        course_id,
        status: target,
        needs_republish: tracker.needs_republish(),
    })
}

/// Uploads every queued binary a batch references, substituting the stable
/// reference for each success. A failed entry never blocks the entries after
/// it; the first failure is surfaced once the whole batch has been attempted.
fn finalize_batch<S>(
    referenced: &[String],
    queue: &mut UploadQueue,
    store: &mut S,
    mut substitute: impl FnMut(&str, &str),
) -> Result<(), ReconcileError>
where
    S: AssetStore,
{
    let mut first_failure: Option<ReconcileError> = None;
    for upload_id in referenced {
        let Some(bytes) = queue.bytes_of(upload_id) else {
            continue;
        };
        match store.upload_binary(upload_id, &bytes) {
            Ok(stable) => {
                substitute(upload_id, &stable);
                queue.release(upload_id);
            }
            Err(source) => {
                if first_failure.is_none() {
                    first_failure = Some(ReconcileError::Upload {
                        upload_id: upload_id.clone(),
                        source,
                    });
                }
            }
        }
    }
    match first_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn finalize_media_slot<S>(
    slot: &mut MediaSlot,
    kind: MediaKind,
    course_id: &str,
    queue: &mut UploadQueue,
    store: &mut S,
) -> Result<(), ReconcileError>
where
    S: CourseStore + AssetStore,
{
    match slot.staging.clone() {
        MediaStaging::Keep => Ok(()),
        MediaStaging::Remove => {
            if let Some(current) = slot.current.take() {
                store.delete_binary(&current)?;
            }
            store.set_course_media(course_id, kind, None)?;
            slot.staging = MediaStaging::Keep;
            Ok(())
        }
        MediaStaging::Replace(upload_id) => {
            let Some(bytes) = queue.bytes_of(&upload_id) else {
                return Err(ReconcileError::Upload {
                    source: StoreError::NotFound(format!("staged media upload {}", upload_id)),
                    upload_id,
                });
            };
            let stable = store.upload_binary(&upload_id, &bytes).map_err(|source| {
                ReconcileError::Upload {
                    upload_id: upload_id.clone(),
                    source,
                }
            })?;
            store.set_course_media(course_id, kind, Some(stable.clone()))?;
            queue.release(&upload_id);
            slot.current = Some(stable);
            slot.staging = MediaStaging::Keep;
            Ok(())
        }
    }
}
