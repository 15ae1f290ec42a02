use super::*;

#[tokio::test]
async fn test_pause_before_start_is_rejected() {
    let t = TestAgent::new().await;
    let task = t.download(&t.caller("com.app"), json!({})).await;

    let err = task.pause().await.unwrap_err();
    assert_eq!(err.code(), 21900007);
    let err = task.resume().await.unwrap_err();
    assert_eq!(err.code(), 21900007);

    assert_eq!(task.state().await, State::Initialized);
}

#[tokio::test]
async fn test_download_completes_and_reports_metadata() {
    let server = MockServer::start().await;
    serve_body(&server, "/data.bin", Duration::ZERO).await;
    let t = TestAgent::new().await;
    let task = download_task(&t, &server, "/data.bin", "data.bin", json!({})).await;

    task.start().await.unwrap();
    wait_for_state(&task, State::Completed).await;

    assert_eq!(std::fs::read(t.path("data.bin")).unwrap(), BODY);
    let info = task.query().await.unwrap();
    assert_eq!(info.status, State::Completed);
    assert_eq!(info.downloaded_bytes, 20);
    assert_eq!(info.total_bytes, 20);
    assert_eq!(info.file_name, "data.bin");
    assert_eq!(info.tries, 1);
    assert_eq!(info.failed_reason, None);
    assert_eq!(info.progress.extras.get("etag").map(String::as_str), Some("\"v1\""));
    assert_eq!(task.query_mime_type().await.unwrap(), "application/octet-stream");
}

#[tokio::test]
async fn test_range_download_transfers_inclusive_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/range.bin"))
        .and(header("range", "bytes=5-10"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 5-10/20")
                .set_body_bytes(&BODY[5..=10]),
        )
        .expect(1)
        .mount(&server)
        .await;
    let t = TestAgent::new().await;
    let task = download_task(&t, &server, "/range.bin", "range.bin", json!({ "begins": 5, "ends": 10 })).await;

    task.start().await.unwrap();
    wait_for_state(&task, State::Completed).await;

    let progress = task.progress();
    assert_eq!(progress.processed, 6);
    assert_eq!(progress.sizes, vec![6]);
    assert_eq!(std::fs::read(t.path("range.bin")).unwrap(), b"56789a");
}

#[tokio::test]
async fn test_start_is_idempotent_while_running() {
    let server = MockServer::start().await;
    serve_body(&server, "/slow.bin", Duration::from_secs(3)).await;
    let t = TestAgent::new().await;
    let task = download_task(&t, &server, "/slow.bin", "slow.bin", json!({})).await;

    task.start().await.unwrap();
    task.start().await.unwrap();
    assert_eq!(task.state().await, State::Running);

    task.stop().await.unwrap();
    assert_eq!(task.state().await, State::Stopped);
    // Stopping again changes nothing
    task.stop().await.unwrap();
    assert_eq!(task.state().await, State::Stopped);
}

#[tokio::test]
async fn test_start_checks_index_and_range() {
    let t = TestAgent::new().await;
    let caller = t.caller("com.app");

    let out_of_range = t.download(&caller, json!({ "index": 1 })).await;
    assert_eq!(out_of_range.start().await.unwrap_err().code(), 401);
    assert_eq!(out_of_range.state().await, State::Initialized);

    let inverted = t.download(&caller, json!({ "begins": 10, "ends": 5 })).await;
    assert_eq!(inverted.start().await.unwrap_err().code(), 401);
    assert_eq!(inverted.state().await, State::Initialized);
}

#[tokio::test]
async fn test_pause_and_resume_finish_the_download() {
    let server = MockServer::start().await;
    serve_body(&server, "/pausable.bin", Duration::from_millis(300)).await;
    let t = TestAgent::new().await;
    let task = download_task(&t, &server, "/pausable.bin", "pausable.bin", json!({})).await;

    task.start().await.unwrap();
    task.pause().await.unwrap();
    let info = task.query().await.unwrap();
    assert_eq!(info.status, State::Paused);
    assert_eq!(info.paused_reason, Some(Reason::UserOperation));

    // Pausing twice is an error, not a no-op
    assert_eq!(task.pause().await.unwrap_err().code(), 21900007);

    task.resume().await.unwrap();
    wait_for_state(&task, State::Completed).await;
    assert_eq!(std::fs::read(t.path("pausable.bin")).unwrap(), BODY);
    assert_eq!(task.query().await.unwrap().paused_reason, None);
}

#[tokio::test]
async fn test_back_to_back_operations_serialize() {
    let server = MockServer::start().await;
    serve_body(&server, "/race.bin", Duration::from_millis(200)).await;
    let t = TestAgent::new().await;
    let task = download_task(&t, &server, "/race.bin", "race.bin", json!({})).await;

    task.start().await.unwrap();
    // Neither call is awaited before the other is issued
    let (paused, resumed) = tokio::join!(task.pause(), task.resume());
    paused.unwrap();
    resumed.unwrap();

    wait_for_state(&task, State::Completed).await;
    assert_eq!(std::fs::read(t.path("race.bin")).unwrap(), BODY);
}

#[tokio::test]
async fn test_completed_task_cannot_restart() {
    let server = MockServer::start().await;
    serve_body(&server, "/done.bin", Duration::ZERO).await;
    let t = TestAgent::new().await;
    let task = download_task(&t, &server, "/done.bin", "done.bin", json!({})).await;

    task.start().await.unwrap();
    wait_for_state(&task, State::Completed).await;

    assert_eq!(task.start().await.unwrap_err().code(), 21900007);
    task.stop().await.unwrap();
    assert_eq!(task.state().await, State::Completed);
}

#[tokio::test]
async fn test_stopped_task_starts_over() {
    let server = MockServer::start().await;
    serve_body(&server, "/again.bin", Duration::from_millis(200)).await;
    let t = TestAgent::new().await;
    let task = download_task(&t, &server, "/again.bin", "again.bin", json!({})).await;

    task.start().await.unwrap();
    task.stop().await.unwrap();
    task.start().await.unwrap();
    wait_for_state(&task, State::Completed).await;
    assert_eq!(std::fs::read(t.path("again.bin")).unwrap(), BODY);
}

#[tokio::test]
async fn test_remove_cancels_and_absorbs() {
    let server = MockServer::start().await;
    serve_body(&server, "/gone.bin", Duration::from_secs(3)).await;
    let t = TestAgent::new().await;
    let task = download_task(&t, &server, "/gone.bin", "gone.bin", json!({})).await;
    let id = task.id();

    task.start().await.unwrap();
    assert!(task.remove().await.unwrap());
    assert!(task.remove().await.unwrap());
    assert_eq!(task.state().await, State::Removed);

    assert_eq!(task.start().await.unwrap_err().code(), 21900006);
    assert_eq!(task.pause().await.unwrap_err().code(), 21900006);
    assert_eq!(task.stop().await.unwrap_err().code(), 21900006);
    assert_eq!(task.query().await.unwrap_err().code(), 21900006);
    assert_eq!(task.query_mime_type().await.unwrap_err().code(), 21900006);
    assert_eq!(task.on("failed", Listener::new(|_| {})).unwrap_err().code(), 21900006);
    // Kind validation still comes first
    assert_eq!(task.on("finished", Listener::new(|_| {})).unwrap_err().code(), 401);

    let caller = t.caller("com.app");
    assert_eq!(t.agent.task(&caller, id).await.unwrap_err().code(), 21900006);
    assert!(t.agent.registry().is_empty().await);
    assert!(!t.path("gone.bin").exists());
    assert!(!t.path("gone.bin.part").exists());
}

#[tokio::test]
async fn test_remove_waits_for_worker_before_deleting_partial_file() {
    let server = MockServer::start().await;
    serve_body(&server, "/throttled.bin", Duration::ZERO).await;
    let t = TestAgent::with_config(|config| config.min_speed_limit = 1).await;
    let task = download_task(&t, &server, "/throttled.bin", "throttled.bin", json!({})).await;

    // 4 B/s keeps the worker writing the partial file for seconds
    task.set_max_speed(4).await.unwrap();
    task.start().await.unwrap();
    let part = t.path("throttled.bin.part");
    tokio::time::timeout(Duration::from_secs(5), async {
        while !part.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    assert!(task.remove().await.unwrap());
    assert!(!part.exists());
    settle().await;
    assert!(!part.exists());
    assert!(!t.path("throttled.bin").exists());
}

#[tokio::test]
async fn test_tasks_belong_to_their_bundle() {
    let t = TestAgent::new().await;
    let owner = t.caller("com.app");
    let task = t.download(&owner, json!({})).await;

    assert_eq!(t.agent.task(&owner, task.id()).await.unwrap().id(), task.id());
    let err = t.agent.task(&t.caller("com.other"), task.id()).await.unwrap_err();
    assert_eq!(err.code(), 21900006);
}

#[tokio::test]
async fn test_set_max_speed_enforces_minimum() {
    let t = TestAgent::new().await;
    let task = t.download(&t.caller("com.app"), json!({})).await;

    let err = task.set_max_speed(1024).await.unwrap_err();
    assert_eq!(err.code(), 401);
    task.set_max_speed(1024 * 1024).await.unwrap();
}

#[tokio::test]
async fn test_upload_sends_files() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        // One request per file
        .expect(2)
        .mount(&server)
        .await;
    let t = TestAgent::new().await;
    let first = t.path("a.txt");
    let second = t.path("b.txt");
    std::fs::write(&first, b"hello").unwrap();
    std::fs::write(&second, b"upload!").unwrap();

    let task = t
        .agent
        .create(
            &t.caller("com.app"),
            &json!({
                "action": "upload",
                "url": format!("{}/upload", server.uri()),
                "method": "PUT",
                "data": [{ "name": "a", "path": first }, { "name": "b", "path": second }],
            }),
        )
        .await
        .unwrap();
    assert_eq!(task.config().header("content-type"), Some("multipart/form-data"));

    task.start().await.unwrap();
    wait_for_state(&task, State::Completed).await;

    let info = task.query().await.unwrap();
    assert_eq!(info.total_bytes, 12);
    assert_eq!(info.downloaded_bytes, 12);
    assert_eq!(info.progress.sizes, vec![5, 7]);
}
