use super::*;
use crate::llm::{ChatResponse, Tool};
use crate::store::test_helpers::{seed_board, test_store};
use crate::store::{ChangeKind, Collection};
use serde_json::json;
use std::sync::Mutex;

// =============================================================================
// MockLlm
// =============================================================================

struct MockLlm {
    responses: Mutex<Vec<ChatResponse>>,
}

impl MockLlm {
    fn new(responses: Vec<ChatResponse>) -> Arc<dyn LlmChat> {
        Arc::new(Self { responses: Mutex::new(responses) })
    }
}

#[async_trait::async_trait]
impl LlmChat for MockLlm {
    async fn chat(
        &self,
        _max_tokens: u32,
        _system: &str,
        _messages: &[Message],
        _tools: Option<&[Tool]>,
    ) -> Result<ChatResponse, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(text_response("done"))
        } else {
            Ok(responses.remove(0))
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}

fn text_response(text: &str) -> ChatResponse {
    ChatResponse {
        content: vec![ContentBlock::Text { text: text.into() }],
        model: "mock".into(),
        stop_reason: "end_turn".into(),
        input_tokens: 10,
        output_tokens: 5,
    }
}

fn tool_response(calls: Vec<(&str, &str, serde_json::Value)>) -> ChatResponse {
    ChatResponse {
        content: calls
            .into_iter()
            .map(|(id, name, input)| ContentBlock::ToolUse { id: id.into(), name: name.into(), input })
            .collect(),
        model: "mock".into(),
        stop_reason: "tool_use".into(),
        input_tokens: 20,
        output_tokens: 15,
    }
}

async fn run(
    store: &Store,
    llm: &Arc<dyn LlmChat>,
    board_id: BoardId,
    command: &str,
) -> Result<AgentOutcome, AgentError> {
    let snapshot = store.snapshot(board_id, Collection::Objects).await.unwrap();
    run_agent(
        store,
        llm,
        &traces::Tracer::disabled(),
        &AgentConfig::default(),
        board_id,
        "agent-user",
        command,
        snapshot,
    )
    .await
}

// =============================================================================
// basic flows
// =============================================================================

#[tokio::test]
async fn text_only_run_commits_nothing() {
    let store = test_store();
    let board = seed_board(&store).await;
    let llm = MockLlm::new(vec![
        text_response("Nothing to do here."),
        // Consumed by the turn-0 nudge retry.
        text_response("Really, nothing."),
    ]);

    let outcome = run(&store, &llm, board, "just say hi").await.unwrap();
    assert!(outcome.actions.is_empty());
    assert_eq!(outcome.summary, "Really, nothing.");
    assert!(store.snapshot(board, Collection::Objects).await.unwrap().is_empty());
}

#[tokio::test]
async fn tool_calls_accumulate_and_commit_once() {
    let store = test_store();
    let board = seed_board(&store).await;
    let mut sub = store.subscribe(board, Collection::Objects).await.unwrap();
    assert!(sub.rx.recv().await.unwrap().is_empty());

    let llm = MockLlm::new(vec![
        tool_response(vec![
            ("tu_1", "createFrame", json!({"title": "Ideas", "x": 0, "y": 0, "width": 400, "height": 300})),
            ("tu_2", "createStickyNote", json!({"text": "first", "x": 60, "y": 120})),
        ]),
        text_response("Created a frame with a note."),
    ]);

    let outcome = run(&store, &llm, board, "set up an ideas frame").await.unwrap();
    assert_eq!(outcome.actions.len(), 2);
    assert!(!outcome.partial);

    // The whole plan lands as one store delivery.
    let delivery = sub.rx.recv().await.unwrap();
    assert!(delivery.len() >= 2);
    assert!(delivery.iter().all(|e| e.kind == ChangeKind::Added || e.kind == ChangeKind::Modified));
    assert!(sub.rx.try_recv().is_err(), "exactly one delivery for the batch");

    let objects = store.snapshot(board, Collection::Objects).await.unwrap();
    assert_eq!(objects.len(), 2);
}

#[tokio::test]
async fn unknown_id_call_is_reported_but_not_committed() {
    let store = test_store();
    let board = seed_board(&store).await;
    let llm = MockLlm::new(vec![
        tool_response(vec![
            ("tu_1", "moveObject", json!({"objectId": "fabricated-01", "x": 10, "y": 10})),
            ("tu_2", "createStickyNote", json!({"text": "real", "x": 0, "y": 0})),
        ]),
        text_response("Moved and created."),
    ]);

    let outcome = run(&store, &llm, board, "move that thing").await.unwrap();
    assert_eq!(outcome.actions.len(), 2);
    assert!(outcome.actions[0].error.as_deref().unwrap().contains("unknown object id"));
    assert!(outcome.actions[1].error.is_none());

    // Only the create landed.
    let objects = store.snapshot(board, Collection::Objects).await.unwrap();
    assert_eq!(objects.len(), 1);
}

#[tokio::test]
async fn turn_zero_nudge_is_sent_exactly_once() {
    struct Capture {
        calls: Mutex<Vec<Vec<Message>>>,
    }

    #[async_trait::async_trait]
    impl LlmChat for Capture {
        async fn chat(
            &self,
            _max_tokens: u32,
            _system: &str,
            messages: &[Message],
            _tools: Option<&[Tool]>,
        ) -> Result<ChatResponse, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            Ok(text_response("no tools from me"))
        }

        fn model(&self) -> &str {
            "mock"
        }
    }

    let store = test_store();
    let board = seed_board(&store).await;
    let capture = Arc::new(Capture { calls: Mutex::new(Vec::new()) });
    let llm: Arc<dyn LlmChat> = capture.clone();

    run(&store, &llm, board, "do something").await.unwrap();

    let calls = capture.calls.lock().unwrap();
    // Turn 0, then exactly one nudged retry.
    assert_eq!(calls.len(), 2);
    let nudge = calls[1].last().unwrap();
    match &nudge.content {
        crate::llm::Content::Text(t) => assert!(t.contains("must use the provided tools")),
        crate::llm::Content::Blocks(_) => panic!("nudge should be plain text"),
    }
}

#[tokio::test]
async fn single_call_turn_earns_a_batch_more_nudge() {
    struct Capture {
        calls: Mutex<Vec<Vec<Message>>>,
        responses: Mutex<Vec<ChatResponse>>,
    }

    #[async_trait::async_trait]
    impl LlmChat for Capture {
        async fn chat(
            &self,
            _max_tokens: u32,
            _system: &str,
            messages: &[Message],
            _tools: Option<&[Tool]>,
        ) -> Result<ChatResponse, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(text_response("done"))
            } else {
                Ok(responses.remove(0))
            }
        }

        fn model(&self) -> &str {
            "mock"
        }
    }

    let store = test_store();
    let board = seed_board(&store).await;
    let capture = Arc::new(Capture {
        calls: Mutex::new(Vec::new()),
        responses: Mutex::new(vec![tool_response(vec![(
            "tu_1",
            "createStickyNote",
            json!({"text": "only one", "x": 0, "y": 0}),
        )])]),
    });
    let llm: Arc<dyn LlmChat> = capture.clone();

    run(&store, &llm, board, "make notes").await.unwrap();

    let calls = capture.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    let followup = calls[1].last().unwrap();
    let crate::llm::Content::Blocks(blocks) = &followup.content else {
        panic!("tool results should be blocks");
    };
    let has_nudge = blocks
        .iter()
        .any(|b| matches!(b, ContentBlock::Text { text } if text.contains("all remaining tool calls")));
    assert!(has_nudge, "batch-more nudge rides with the tool result");
}

#[tokio::test]
async fn turn_ceiling_stops_a_chatty_model() {
    struct Endless;

    #[async_trait::async_trait]
    impl LlmChat for Endless {
        async fn chat(
            &self,
            _max_tokens: u32,
            _system: &str,
            _messages: &[Message],
            _tools: Option<&[Tool]>,
        ) -> Result<ChatResponse, LlmError> {
            Ok(tool_response(vec![
                ("tu_a", "createStickyNote", json!({"text": "again", "x": 0, "y": 0})),
                ("tu_b", "createStickyNote", json!({"text": "and again", "x": 300, "y": 0})),
            ]))
        }

        fn model(&self) -> &str {
            "mock"
        }
    }

    let store = test_store();
    let board = seed_board(&store).await;
    let llm: Arc<dyn LlmChat> = Arc::new(Endless);

    let outcome = run(&store, &llm, board, "loop forever").await.unwrap();
    // MAX_TURNS turns × 2 creates, then the loop is cut off.
    assert_eq!(outcome.actions.len(), AgentConfig::default().max_turns * 2);
}

// =============================================================================
// timeouts and failures
// =============================================================================

struct SlowLlm {
    first: Mutex<Vec<ChatResponse>>,
}

#[async_trait::async_trait]
impl LlmChat for SlowLlm {
    async fn chat(
        &self,
        _max_tokens: u32,
        _system: &str,
        _messages: &[Message],
        _tools: Option<&[Tool]>,
    ) -> Result<ChatResponse, LlmError> {
        let next = self.first.lock().unwrap().pop();
        match next {
            Some(response) => Ok(response),
            None => {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(text_response("too late"))
            }
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}

fn short_timeout_config() -> AgentConfig {
    AgentConfig { per_turn_timeout: std::time::Duration::from_millis(100), ..AgentConfig::default() }
}

#[tokio::test]
async fn timeout_with_empty_plan_is_a_transient_error() {
    let store = test_store();
    let board = seed_board(&store).await;
    let llm: Arc<dyn LlmChat> = Arc::new(SlowLlm { first: Mutex::new(Vec::new()) });

    let result = run_agent(
        &store,
        &llm,
        &traces::Tracer::disabled(),
        &short_timeout_config(),
        board,
        "agent-user",
        "anything",
        Vec::new(),
    )
    .await;
    assert!(matches!(result, Err(AgentError::TurnTimeout)));
}

#[tokio::test]
async fn timeout_after_actions_commits_partially() {
    let store = test_store();
    let board = seed_board(&store).await;
    let llm: Arc<dyn LlmChat> = Arc::new(SlowLlm {
        first: Mutex::new(vec![tool_response(vec![(
            "tu_1",
            "createStickyNote",
            json!({"text": "landed", "x": 0, "y": 0}),
        )])]),
    });

    let outcome = run_agent(
        &store,
        &llm,
        &traces::Tracer::disabled(),
        &short_timeout_config(),
        board,
        "agent-user",
        "make a note then stall",
        Vec::new(),
    )
    .await
    .unwrap();

    assert!(outcome.partial);
    assert!(outcome.summary.contains("partially completed"));
    let objects = store.snapshot(board, Collection::Objects).await.unwrap();
    assert_eq!(objects.len(), 1);
}

#[tokio::test]
async fn llm_failure_with_empty_plan_surfaces() {
    struct Failing;

    #[async_trait::async_trait]
    impl LlmChat for Failing {
        async fn chat(
            &self,
            _max_tokens: u32,
            _system: &str,
            _messages: &[Message],
            _tools: Option<&[Tool]>,
        ) -> Result<ChatResponse, LlmError> {
            Err(LlmError::ApiResponse { status: 529, body: "overloaded".into() })
        }

        fn model(&self) -> &str {
            "mock"
        }
    }

    let store = test_store();
    let board = seed_board(&store).await;
    let llm: Arc<dyn LlmChat> = Arc::new(Failing);

    let result = run(&store, &llm, board, "anything").await;
    let err = result.unwrap_err();
    assert!(matches!(err, AgentError::Llm(_)));
    assert!(err.retryable());
}

// =============================================================================
// auto-fit at commit
// =============================================================================

#[tokio::test]
async fn commit_grows_frames_around_their_children() {
    let store = test_store();
    let board = seed_board(&store).await;
    let llm = MockLlm::new(vec![
        tool_response(vec![
            ("tu_1", "createFrame", json!({"title": "Strengths", "x": 0, "y": 0, "width": 200, "height": 150})),
            ("tu_2", "createStickyNote", json!({"text": "fast", "x": 20, "y": 80})),
        ]),
        text_response("Built the quadrant."),
    ]);

    run(&store, &llm, board, "start a swot").await.unwrap();

    let objects = store.snapshot(board, Collection::Objects).await.unwrap();
    let frame = objects
        .iter()
        .find_map(|(_, f)| {
            (crate::model::text(f, "type") == Some("frame")).then(|| crate::model::world_bbox(f).unwrap())
        })
        .expect("frame exists");
    let note = objects
        .iter()
        .find_map(|(_, f)| {
            (crate::model::text(f, "type") == Some("sticky")).then(|| crate::model::world_bbox(f).unwrap())
        })
        .expect("sticky exists");

    assert!(note.x - frame.x >= 30.0);
    assert!(note.y - frame.y >= 70.0);
    assert!(frame.right() - note.right() >= 30.0);
    assert!(frame.bottom() - note.bottom() >= 30.0);
}

#[tokio::test]
async fn swot_template_lands_as_one_batch_with_contained_stickies() {
    let store = test_store();
    let board = seed_board(&store).await;
    let mut sub = store.subscribe(board, Collection::Objects).await.unwrap();
    assert!(sub.rx.recv().await.unwrap().is_empty());

    let quadrants = [
        ("Strengths", 0.0, 0.0),
        ("Weaknesses", 500.0, 0.0),
        ("Opportunities", 0.0, 400.0),
        ("Threats", 500.0, 400.0),
    ];
    let frame_calls: Vec<(String, String, serde_json::Value)> = quadrants
        .iter()
        .enumerate()
        .map(|(i, (title, x, y))| {
            (
                format!("tu_f{i}"),
                "createFrame".to_owned(),
                json!({"title": title, "x": x, "y": y, "width": 400, "height": 300}),
            )
        })
        .collect();
    let sticky_calls: Vec<(String, String, serde_json::Value)> = quadrants
        .iter()
        .enumerate()
        .map(|(i, (title, x, y))| {
            (
                format!("tu_s{i}"),
                "createStickyNote".to_owned(),
                json!({"text": format!("{title} item"), "x": x + 40.0, "y": y + 90.0}),
            )
        })
        .collect();

    let llm = MockLlm::new(vec![
        ChatResponse {
            content: frame_calls
                .iter()
                .chain(sticky_calls.iter())
                .map(|(id, name, input)| ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                })
                .collect(),
            model: "mock".into(),
            stop_reason: "tool_use".into(),
            input_tokens: 100,
            output_tokens: 80,
        },
        text_response("Created a SWOT template."),
    ]);

    let outcome = run(&store, &llm, board, "Create a SWOT template.").await.unwrap();
    assert_eq!(outcome.actions.len(), 8);
    assert!(outcome.actions.iter().all(|a| a.error.is_none()));

    // One store delivery carries the whole batch.
    let delivery = sub.rx.recv().await.unwrap();
    assert!(delivery.len() >= 8);
    assert!(sub.rx.try_recv().is_err());

    let objects = store.snapshot(board, Collection::Objects).await.unwrap();
    let frames: Vec<(&str, crate::model::BBox)> = objects
        .iter()
        .filter(|(_, f)| crate::model::text(f, "type") == Some("frame"))
        .map(|(_, f)| {
            (crate::model::text(f, "text").unwrap(), crate::model::world_bbox(f).unwrap())
        })
        .collect();
    assert_eq!(frames.len(), 4);
    for title in ["Strengths", "Weaknesses", "Opportunities", "Threats"] {
        assert!(frames.iter().any(|(t, _)| *t == title), "missing {title}");
    }

    // Every sticky sits inside exactly its quadrant with the required padding.
    for (_, f) in objects.iter().filter(|(_, f)| crate::model::text(f, "type") == Some("sticky")) {
        let sticky = crate::model::world_bbox(f).unwrap();
        let home = frames
            .iter()
            .find(|(_, frame)| frame.contains_point_strict(sticky.x, sticky.y))
            .expect("sticky inside a frame");
        let frame = home.1;
        assert!(sticky.x - frame.x >= 30.0);
        assert!(sticky.y - frame.y >= 70.0);
        assert!(frame.right() - sticky.right() >= 30.0);
        assert!(frame.bottom() - sticky.bottom() >= 30.0);
    }
}

#[tokio::test]
async fn identical_commands_produce_identical_shapes() {
    // Determinism of counts and types (positions and ids may differ).
    let responses = || {
        vec![
            tool_response(vec![
                ("tu_1", "createFrame", json!({"title": "Plan", "x": 0, "y": 0})),
                ("tu_2", "createStickyNote", json!({"text": "step 1", "x": 40, "y": 90})),
                ("tu_3", "createStickyNote", json!({"text": "step 2", "x": 40, "y": 200})),
            ]),
            text_response("Planned."),
        ]
    };

    let mut type_counts = Vec::new();
    for _ in 0..2 {
        let store = test_store();
        let board = seed_board(&store).await;
        let llm = MockLlm::new(responses());
        run(&store, &llm, board, "plan my week").await.unwrap();

        let mut types: Vec<String> = store
            .snapshot(board, Collection::Objects)
            .await
            .unwrap()
            .iter()
            .filter_map(|(_, f)| crate::model::text(f, "type").map(str::to_owned))
            .collect();
        types.sort();
        type_counts.push(types);
    }
    assert_eq!(type_counts[0], type_counts[1]);
}
