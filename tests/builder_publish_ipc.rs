
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn open_builder(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    workspace: &std::path::Path,
) {
    let _ = request_ok(
        stdin,
        reader,
        "w",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(stdin, reader, "o", "builder.open", json!({}));
}

#[test]
fn publish_is_gated_until_the_course_is_complete() {
    let workspace = temp_dir("coursebuilder-gates");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_builder(&mut stdin, &mut reader, &workspace);

    let error = request_err(&mut stdin, &mut reader, "1", "builder.publish", json!({}));
    assert_eq!(error["code"], "validation_failed");
    let blockers = error["details"]["blockers"].as_array().expect("blockers");
    assert_eq!(blockers.len(), 3);
    assert!(blockers.contains(&json!("no_topics")));
    assert!(blockers.contains(&json!("title_too_short")));
    assert!(blockers.contains(&json!("description_empty")));

    // Markup alone does not satisfy the description gate.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "builder.course.update",
        json!({ "title": "Rust Basics", "descriptionHtml": "<p>   <br/>  </p>" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "builder.topics.add",
        json!({ "title": "Week 1" }),
    );
    let error = request_err(&mut stdin, &mut reader, "4", "builder.publish", json!({}));
    assert_eq!(error["code"], "validation_failed");
    assert_eq!(
        error["details"]["blockers"],
        json!(["description_empty"])
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "builder.course.update",
        json!({ "descriptionHtml": "<p>Learn the borrow checker properly.</p>" }),
    );
    let state = request_ok(&mut stdin, &mut reader, "6", "builder.state", json!({}));
    assert_eq!(state["flags"]["canPublish"], true);

    let published = request_ok(&mut stdin, &mut reader, "7", "builder.publish", json!({}));
    assert_eq!(published["status"], "published");
    assert_eq!(published["needsRepublish"], false);
}

#[test]
fn editing_a_published_course_marks_it_stale() {
    let workspace = temp_dir("coursebuilder-stale");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    open_builder(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "builder.course.update",
        json!({
            "title": "Rust Basics",
            "descriptionHtml": "<p>Learn the borrow checker properly.</p>"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "builder.topics.add",
        json!({ "title": "Week 1" }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "3", "builder.publish", json!({}));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "builder.course.update",
        json!({ "summary": "Now with lifetimes" }),
    );
    let state = request_ok(&mut stdin, &mut reader, "5", "builder.state", json!({}));
    assert_eq!(state["flags"]["isDirty"], true);
    assert_eq!(state["flags"]["needsRepublish"], true);

    // Saving as draft without confirming keeps the course published and
    // keeps the stale flag.
    let saved = request_ok(&mut stdin, &mut reader, "6", "builder.saveDraft", json!({}));
    assert_eq!(saved["status"], "published");
    assert_eq!(saved["needsRepublish"], true);
    assert_eq!(saved["state"]["flags"]["isDirty"], false);

    // Republishing clears it.
    let republished = request_ok(&mut stdin, &mut reader, "7", "builder.publish", json!({}));
    assert_eq!(republished["status"], "published");
    assert_eq!(republished["needsRepublish"], false);

    // Explicitly confirmed unpublish takes the course back to draft.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "builder.course.update",
        json!({ "summary": "Rewriting" }),
    );
    let unpublished = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "builder.saveDraft",
        json!({ "confirmUnpublish": true }),
    );
    assert_eq!(unpublished["status"], "draft");
    assert_eq!(unpublished["needsRepublish"], false);
}
