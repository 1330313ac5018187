use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Scheme used inside draft HTML to reference a not-yet-uploaded binary,
/// e.g. `<img src="upload://tmp-upload-3">`. Finalization substitutes these
/// with stable `asset://` references.
pub const UPLOAD_SCHEME: &str = "upload://";

/// A revocable preview the UI can display while the binary is still local.
/// Revocation is irreversible; the file is removed best-effort.
#[derive(Debug)]
pub struct PreviewHandle {
    path: PathBuf,
}

impl PreviewHandle {
    pub fn new(path: PathBuf) -> PreviewHandle {
        PreviewHandle { path }
    }

    fn revoke(self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

#[derive(Debug)]
pub struct PendingUpload {
    pub bytes: Vec<u8>,
    pub preview: Option<PreviewHandle>,
}

/// Client-held binaries staged for upload, keyed by provisional id and
/// reference-counted against the draft's current HTML content.
#[derive(Debug, Default)]
pub struct UploadQueue {
    entries: BTreeMap<String, PendingUpload>,
}

impl UploadQueue {
    pub fn new() -> UploadQueue {
        UploadQueue::default()
    }

    /// Stages a binary under a provisional id. Re-registering an id that is
    /// already queued is a no-op.
    pub fn register(&mut self, upload_id: &str, bytes: Vec<u8>, preview: Option<PreviewHandle>) {
        if self.entries.contains_key(upload_id) {
            if let Some(p) = preview {
                p.revoke();
            }
            return;
        }
        self.entries
            .insert(upload_id.to_string(), PendingUpload { bytes, preview });
    }

    pub fn contains(&self, upload_id: &str) -> bool {
        self.entries.contains_key(upload_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Drops every entry whose id no longer appears in any of the given HTML
    /// fields, revoking its preview. Ids in `pinned` survive regardless;
    /// media-slot uploads appear in no HTML field. Returns the ids released
    /// by this call; pruning again with unchanged content releases nothing
    /// further.
    pub fn prune_by_content<'a, 'b, I, P>(&mut self, html_fields: I, pinned: P) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
        P: IntoIterator<Item = &'b str>,
    {
        let mut surviving: BTreeSet<String> = BTreeSet::new();
        for html in html_fields {
            for id in referenced_upload_ids(html) {
                surviving.insert(id);
            }
        }
        for id in pinned {
            surviving.insert(id.to_string());
        }
        let doomed: Vec<String> = self
            .entries
            .keys()
            .filter(|id| !surviving.contains(*id))
            .cloned()
            .collect();
        for id in &doomed {
            self.release(id);
        }
        doomed
    }

    /// Removes one entry, revoking any preview. Used after a successful
    /// upload and by `clear`.
    pub fn release(&mut self, upload_id: &str) -> bool {
        match self.entries.remove(upload_id) {
            Some(entry) => {
                if let Some(p) = entry.preview {
                    p.revoke();
                }
                true
            }
            None => false,
        }
    }

    /// Binary for a queued entry. Finalization reads the bytes, uploads, and
    /// calls `release` only after the upload succeeded, so a failed upload
    /// leaves the entry queued for retry.
    pub fn bytes_of(&self, upload_id: &str) -> Option<Vec<u8>> {
        self.entries.get(upload_id).map(|e| e.bytes.clone())
    }

    /// Releases everything. Run after a completed reconciliation.
    pub fn clear(&mut self) {
        let ids: Vec<String> = self.entries.keys().cloned().collect();
        for id in ids {
            self.release(&id);
        }
    }
}

fn is_upload_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Extracts provisional upload ids referenced by `upload://` URLs, in
/// document order, deduplicated on first occurrence.
pub fn referenced_upload_ids(html: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut rest = html;
    while let Some(at) = rest.find(UPLOAD_SCHEME) {
        let tail = &rest[at + UPLOAD_SCHEME.len()..];
        let end = tail
            .char_indices()
            .find(|(_, c)| !is_upload_id_char(*c))
            .map(|(i, _)| i)
            .unwrap_or(tail.len());
        let id = &tail[..end];
        if !id.is_empty() && !out.iter().any(|seen| seen == id) {
            out.push(id.to_string());
        }
        rest = &tail[end..];
    }
    out
}

/// Replaces every `upload://<upload_id>` occurrence with the stable
/// reference obtained from the asset store.
pub fn substitute_reference(html: &str, upload_id: &str, stable_ref: &str) -> String {
    let needle = format!("{}{}", UPLOAD_SCHEME, upload_id);
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(at) = rest.find(&needle) {
        let after = &rest[at + needle.len()..];
        // Guard against replacing a prefix of a longer id.
        if after.chars().next().map(is_upload_id_char).unwrap_or(false) {
            out.push_str(&rest[..at + needle.len()]);
            rest = after;
            continue;
        }
        out.push_str(&rest[..at]);
        out.push_str(stable_ref);
        rest = after;
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with(ids: &[&str]) -> UploadQueue {
        let mut q = UploadQueue::new();
        for id in ids {
            q.register(id, vec![1, 2, 3], None);
        }
        q
    }

    #[test]
    fn referenced_ids_in_document_order() {
        let html = r#"<p><img src="upload://up-b"> then <img src="upload://up-a"></p>"#;
        assert_eq!(referenced_upload_ids(html), vec!["up-b", "up-a"]);
    }

    #[test]
    fn prune_releases_only_unreferenced_entries() {
        let mut q = queue_with(&["up-a", "up-b"]);
        let html = r#"<img src="upload://up-b">"#;
        let released = q.prune_by_content([html], []);
        assert_eq!(released, vec!["up-a".to_string()]);
        assert!(!q.contains("up-a"));
        assert!(q.contains("up-b"));
    }

    #[test]
    fn prune_is_idempotent() {
        let mut q = queue_with(&["up-a", "up-b"]);
        let html = r#"<img src="upload://up-b">"#;
        let first = q.prune_by_content([html], []);
        let second = q.prune_by_content([html], []);
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert!(q.contains("up-b"));
    }

    #[test]
    fn pinned_ids_survive_prune() {
        let mut q = queue_with(&["up-img", "up-old"]);
        let released = q.prune_by_content([""], ["up-img"]);
        assert_eq!(released, vec!["up-old".to_string()]);
        assert!(q.contains("up-img"));
    }

    #[test]
    fn register_is_idempotent() {
        let mut q = UploadQueue::new();
        q.register("up-a", vec![1], None);
        q.register("up-a", vec![9, 9, 9], None);
        assert_eq!(q.bytes_of("up-a"), Some(vec![1]));
    }

    #[test]
    fn substitution_respects_id_boundaries() {
        let html = r#"<img src="upload://up-1"><img src="upload://up-12">"#;
        let out = substitute_reference(html, "up-1", "asset://aaa");
        assert_eq!(out, r#"<img src="asset://aaa"><img src="upload://up-12">"#);
    }
}
