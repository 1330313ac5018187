
use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

fn publish_quiz_course(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    workspace: &std::path::Path,
) -> (String, String) {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(stdin, reader, "s2", "builder.open", json!({}));
    let _ = request_ok(
        stdin,
        reader,
        "s3",
        "builder.course.update",
        json!({
            "title": "Rust Basics",
            "descriptionHtml": "<p>Learn the borrow checker properly.</p>"
        }),
    );
    let topic = request_ok(
        stdin,
        reader,
        "s4",
        "builder.topics.add",
        json!({ "title": "Week 1" }),
    );
    let topic_id = topic["topicId"].as_str().expect("topicId").to_string();
    let _ = request_ok(
        stdin,
        reader,
        "s5",
        "builder.items.add",
        json!({
            "topicId": topic_id,
            "title": "Checkpoint",
            "payload": {
                "kind": "quiz",
                "questions": [
                    {
                        "id": "q1",
                        "prompt_html": "<p>What moves by default?</p>",
                        "options": [
                            { "id": "a", "label": "Owned values" },
                            { "id": "b", "label": "References" }
                        ],
                        "correct_option": "a"
                    },
                    {
                        "id": "q2",
                        "prompt_html": "<p>What does ? do?</p>",
                        "options": [
                            { "id": "a", "label": "Panics" },
                            { "id": "b", "label": "Propagates errors" }
                        ],
                        "correct_option": "b"
                    }
                ],
                "settings": { "attempts_allowed": 2, "passing_percent": 50.0 }
            }
        }),
    );
    let published = request_ok(stdin, reader, "s6", "builder.publish", json!({}));
    let course_id = published["courseId"].as_str().expect("courseId").to_string();
    let item_id = published["state"]["draft"]["topics"][0]["items"][0]["id"]
        .as_str()
        .expect("persisted item id")
        .to_string();
    (course_id, item_id)
}

#[test]
fn attempts_are_scored_and_capped_by_the_ceiling() {
    let workspace = temp_dir("coursebuilder-attempts");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (course_id, item_id) = publish_quiz_course(&mut stdin, &mut reader, &workspace);

    let started = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attempts.start",
        json!({ "itemId": item_id, "userId": "stu-1" }),
    );
    assert_eq!(started["attempt"]["attempt_number"], 1);
    assert_eq!(started["attempt"]["status"], "in_progress");

    // A second start while one is open is refused outright.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "attempts.start",
        json!({ "itemId": item_id, "userId": "stu-1" }),
    );
    assert_eq!(error["code"], "attempt_in_progress");

    // Debounced edits are written before grading, so nothing typed in the
    // last moments is lost.
    let autosaved = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "attempts.autosave",
        json!({
            "courseId": course_id,
            "itemId": item_id,
            "userId": "stu-1",
            "answers": { "q1": "b", "q2": "a" }
        }),
    );
    assert_eq!(autosaved["debounced"], true);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attempts.submit",
        json!({ "itemId": item_id, "userId": "stu-1" }),
    );
    assert_eq!(submitted["attempt"]["score_percent"], 0.0);
    assert_eq!(submitted["summary"]["passed"], false);
    assert_eq!(submitted["summary"]["attempts_used"], 1);
    assert_eq!(submitted["summary"]["can_retake"], true);

    // Second attempt, everything right this time.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attempts.retake",
        json!({ "itemId": item_id, "userId": "stu-1" }),
    );
    assert_eq!(second["attempt"]["attempt_number"], 2);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attempts.autosave",
        json!({
            "courseId": course_id,
            "itemId": item_id,
            "userId": "stu-1",
            "answers": { "q1": "a", "q2": "b" },
            "flush": true
        }),
    );
    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attempts.submit",
        json!({ "itemId": item_id, "userId": "stu-1" }),
    );
    assert_eq!(submitted["attempt"]["score_percent"], 100.0);
    assert_eq!(submitted["summary"]["passed"], true);
    assert_eq!(submitted["summary"]["best_score_percent"], 100.0);
    assert_eq!(submitted["summary"]["can_retake"], false);

    // Ceiling of two submitted attempts is exhausted.
    let error = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "attempts.start",
        json!({ "itemId": item_id, "userId": "stu-1" }),
    );
    assert_eq!(error["code"], "attempts_exhausted");
    assert_eq!(error["details"]["attemptsAllowed"], 2);

    // Another learner is unaffected by stu-1's history.
    let other = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attempts.start",
        json!({ "itemId": item_id, "userId": "stu-2" }),
    );
    assert_eq!(other["attempt"]["attempt_number"], 1);
}

#[test]
fn flush_never_errors_the_unload_path() {
    let workspace = temp_dir("coursebuilder-flush");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (course_id, item_id) = publish_quiz_course(&mut stdin, &mut reader, &workspace);

    // No attempt open: the write is refused but the call still succeeds.
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "attempts.autosave",
        json!({
            "courseId": course_id,
            "itemId": item_id,
            "userId": "stu-1",
            "answers": { "q1": "a" },
            "flush": true
        }),
    );
    assert_eq!(result["written"], false);
    assert_eq!(result["reason"], "no_attempt_in_progress");
}

#[test]
fn hide_flush_writes_answers_staged_for_another_quiz() {
    let workspace = temp_dir("coursebuilder-hideflush");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (course_id, quiz_a) = publish_quiz_course(&mut stdin, &mut reader, &workspace);

    // A second quiz in the same course.
    let state = request_ok(&mut stdin, &mut reader, "1", "builder.state", json!({}));
    let topic_id = state["draft"]["topics"][0]["id"].as_str().expect("topic id").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "builder.items.add",
        json!({
            "topicId": topic_id,
            "title": "Checkpoint 2",
            "payload": {
                "kind": "quiz",
                "questions": [
                    {
                        "id": "q1",
                        "prompt_html": "<p>Does Drop run on move?</p>",
                        "options": [
                            { "id": "a", "label": "No" },
                            { "id": "b", "label": "Yes" }
                        ],
                        "correct_option": "a"
                    }
                ],
                "settings": { "attempts_allowed": 0, "passing_percent": 50.0 }
            }
        }),
    );
    let published = request_ok(&mut stdin, &mut reader, "3", "builder.publish", json!({}));
    let quiz_b = published["state"]["draft"]["topics"][0]["items"][1]["id"]
        .as_str()
        .expect("second quiz id")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attempts.start",
        json!({ "itemId": quiz_a, "userId": "stu-1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attempts.start",
        json!({ "itemId": quiz_b, "userId": "stu-1" }),
    );

    // Correct answers staged for the first quiz, still inside the quiet window.
    let autosaved = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attempts.autosave",
        json!({
            "courseId": course_id,
            "itemId": quiz_a,
            "userId": "stu-1",
            "answers": { "q1": "a", "q2": "b" }
        }),
    );
    assert_eq!(autosaved["debounced"], true);

    // The tab hides while the second quiz is on screen. Its answers are
    // written now, and the first quiz's staged answers must land too.
    let flushed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attempts.autosave",
        json!({
            "courseId": course_id,
            "itemId": quiz_b,
            "userId": "stu-1",
            "answers": { "q1": "a" },
            "flush": true
        }),
    );
    assert_eq!(flushed["written"], true);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attempts.submit",
        json!({ "itemId": quiz_a, "userId": "stu-1" }),
    );
    assert_eq!(submitted["attempt"]["score_percent"], 100.0);

    let submitted = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attempts.submit",
        json!({ "itemId": quiz_b, "userId": "stu-1" }),
    );
    assert_eq!(submitted["attempt"]["score_percent"], 100.0);
}

#[test]
fn lessons_do_not_take_attempts() {
    let workspace = temp_dir("coursebuilder-notquiz");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(&mut stdin, &mut reader, "2", "builder.open", json!({}));
    let topic = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "builder.topics.add",
        json!({ "title": "Week 1" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "builder.items.add",
        json!({
            "topicId": topic["topicId"].as_str().expect("topicId"),
            "title": "Reading",
            "payload": { "kind": "lesson", "content_html": "<p>Read this.</p>" }
        }),
    );
    let saved = request_ok(&mut stdin, &mut reader, "5", "builder.saveDraft", json!({}));
    let item_id = saved["state"]["draft"]["topics"][0]["items"][0]["id"]
        .as_str()
        .expect("item id")
        .to_string();

    let error = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "attempts.start",
        json!({ "itemId": item_id, "userId": "stu-1" }),
    );
    assert_eq!(error["code"], "not_a_quiz");
}
