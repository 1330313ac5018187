
use serde_json::json;
use test_support::{request_ok, spawn_sidecar, temp_dir};

#[test]
fn dropping_a_reference_revokes_its_preview() {
    let workspace = temp_dir("coursebuilder-uploads");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let preview_a = workspace.join("preview-a.png");
    let preview_b = workspace.join("preview-b.png");
    std::fs::write(&preview_a, b"a").expect("write preview a");
    std::fs::write(&preview_b, b"b").expect("write preview b");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "builder.open", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "builder.uploads.register",
        json!({
            "uploadId": "up-a",
            "bytesHex": "dead",
            "previewPath": preview_a.to_string_lossy()
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "builder.uploads.register",
        json!({
            "uploadId": "up-b",
            "bytesHex": "beef",
            "previewPath": preview_b.to_string_lossy()
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "builder.course.update",
        json!({
            "descriptionHtml":
                "<img src=\"upload://up-a\"><img src=\"upload://up-b\">"
        }),
    );
    let state = request_ok(&mut stdin, &mut reader, "6", "builder.state", json!({}));
    let pending = state["pendingUploads"].as_array().expect("pendingUploads");
    assert_eq!(pending.len(), 2);

    // Deleting the image from the editor drops its queue entry and preview.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "builder.course.update",
        json!({ "descriptionHtml": "<img src=\"upload://up-b\">" }),
    );
    let state = request_ok(&mut stdin, &mut reader, "8", "builder.state", json!({}));
    assert_eq!(state["pendingUploads"], json!(["up-b"]));
    assert!(!preview_a.exists(), "orphaned preview file is removed");
    assert!(preview_b.exists(), "referenced preview file is kept");
}

#[test]
fn media_staged_upload_survives_unrelated_edits() {
    let workspace = temp_dir("coursebuilder-media-stage");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "builder.open", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "builder.uploads.register",
        json!({ "uploadId": "up-cover", "bytesHex": "00ff00ff" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "builder.media.stage",
        json!({ "slot": "featureImage", "uploadId": "up-cover" }),
    );

    // A cover image never appears in HTML content; an unrelated edit must
    // not prune it from the queue.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "builder.course.update",
        json!({ "title": "Renamed Course" }),
    );
    let state = request_ok(&mut stdin, &mut reader, "6", "builder.state", json!({}));
    assert_eq!(state["pendingUploads"], json!(["up-cover"]));

    // Explicit removal wins over the staged replacement.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "builder.media.remove",
        json!({ "slot": "featureImage" }),
    );
    let state = request_ok(&mut stdin, &mut reader, "8", "builder.state", json!({}));
    assert_eq!(
        state["draft"]["feature_image"]["staging"]["action"],
        "remove"
    );
}
