mod common;

use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;

use advisor_chat::chat::HistoryEntry;
use advisor_chat::store::{CustomerRecord, Identity, Role};
use advisor_chat::{AdvisorError, ChatEvent, MessageRole, Scenario};
use common::{
    MockLlmProvider, SlowReplyProvider, SlowStreamProvider, count_letters, text_response,
    tool_response,
};

async fn collect(handle: &mut advisor_chat::TurnHandle) -> Vec<ChatEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_tool_turn_persists_one_assistant_message_with_payload() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let provider = MockLlmProvider::with_responses(vec![
        count_letters("call-1", "Hello"),
        text_response("\"Hello\" has 5 letters."),
    ]);
    let controller = common::controller(&tmp_dir, provider);

    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");
    let reply = controller
        .send(&id, "How many letters are in Hello?", None)
        .await
        .expect("turn should succeed");

    assert_eq!(reply.message.content, "\"Hello\" has 5 letters.");
    assert_eq!(reply.message.tool_name.as_deref(), Some("letter_counter"));
    let details = reply
        .message
        .calculation_details
        .as_ref()
        .expect("calculation payload persisted");
    assert_eq!(details.result["letters"], 5);

    let history = controller.history(&id).await.expect("history");
    let roles: Vec<Role> = history.iter().map(|m| m.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);
    assert_eq!(history[1].id, reply.message.id);
}

#[tokio::test]
async fn test_stream_orders_tool_events_before_text_and_completion_last() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let provider = MockLlmProvider::with_responses(vec![
        count_letters("call-1", "Hello"),
        text_response("Five letters."),
    ]);
    let controller = common::controller(&tmp_dir, provider);
    let id = controller
        .start(Scenario::New, Some(""), Some("visitor-7"))
        .await
        .expect("start");

    let mut handle = controller
        .send_stream(&id, "Count the letters in Hello", None)
        .await
        .expect("stream should start");
    let events = collect(&mut handle).await;
    let reply = handle.wait().await.expect("turn should succeed");

    let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["tool", "calculation_details", "data", "complete"]);
    match events.last() {
        Some(ChatEvent::Complete { message_id, .. }) => assert_eq!(message_id, &reply.message.id),
        other => panic!("expected completion, got {:?}", other),
    }
    assert!(events.last().is_some_and(ChatEvent::is_terminal));
    assert!(events[3].to_sse().starts_with("event: complete\ndata: {"));

    let conversation = controller.conversation(&id).await.expect("conversation");
    assert_eq!(conversation.identity, Identity::Session("visitor-7".into()));
}

#[tokio::test]
async fn test_disconnect_persists_delivered_prefix() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let provider = SlowStreamProvider::new(
        &["Paying ", "off ", "the ", "card ", "takes ", "about ", "a year."],
        Duration::from_millis(50),
    );
    let controller = common::controller(&tmp_dir, provider);
    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");

    let mut handle = controller
        .send_stream(&id, "How long until my card is paid off?", None)
        .await
        .expect("stream should start");

    let mut received = String::new();
    while let Some(event) = handle.next_event().await {
        if let ChatEvent::Data { text } = event {
            received.push_str(&text);
        }
        if received.len() >= "Paying off ".len() {
            break;
        }
    }
    let outcome = handle.abandon().await;
    assert!(matches!(outcome, Err(AdvisorError::Interrupted)));

    let history = controller.history(&id).await.expect("history");
    assert_eq!(history.len(), 2);
    let partial = &history[1];
    assert_eq!(partial.role, Role::Assistant);
    assert!(partial.content.starts_with("Paying off"));
    assert!(partial.content.len() < "Paying off the card takes about a year.".len());
    assert_eq!(partial.error.as_deref(), Some("stream interrupted"));
}

#[tokio::test]
async fn test_provider_failure_emits_error_and_keeps_partial_reply() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let provider = MockLlmProvider::with_responses(vec![tool_response(
        "Let me count.",
        "call-1",
        "letter_counter",
        serde_json::json!({ "text": "budget" }),
    )])
    .then_fail("invalid request: context too long");
    let controller = common::controller(&tmp_dir, provider);
    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");

    let mut handle = controller
        .send_stream(&id, "How many letters in budget?", None)
        .await
        .expect("stream should start");
    let events = collect(&mut handle).await;
    let outcome = handle.wait().await;

    assert!(matches!(outcome, Err(AdvisorError::Agent(_))));
    match events.last() {
        Some(ChatEvent::Error { message }) => assert!(message.contains("context too long")),
        other => panic!("expected an error event, got {:?}", other),
    }
    assert!(!events.iter().any(|e| matches!(e, ChatEvent::Complete { .. })));

    let history = controller.history(&id).await.expect("history");
    assert_eq!(history.len(), 2);
    let partial = &history[1];
    assert_eq!(partial.content, "Let me count.");
    assert!(partial.calculation_details.is_some());
    assert!(
        partial
            .error
            .as_deref()
            .is_some_and(|e| e.contains("context too long"))
    );
}

#[tokio::test]
async fn test_unknown_tool_is_reported_to_the_model() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let provider = MockLlmProvider::with_responses(vec![
        tool_response("", "call-1", "broken_tool", serde_json::json!({})),
        text_response("That tool is not available."),
    ]);
    let calls = provider.call_log();
    let controller = common::controller(&tmp_dir, provider);
    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");

    let reply = controller
        .send(&id, "Use the broken tool", None)
        .await
        .expect("turn should succeed");
    assert_eq!(reply.message.content, "That tool is not available.");
    assert!(reply.message.tool_name.is_none());

    let calls = calls.lock().unwrap();
    let tool_message = calls[1]
        .iter()
        .find(|m| m.role == MessageRole::Tool)
        .expect("tool result sent back");
    let result = &tool_message
        .tool_result
        .as_ref()
        .expect("tool result")
        .result;
    assert!(result.contains("unknown_tool"));
}

#[tokio::test]
async fn test_start_enforces_identity_rules() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let controller = common::controller(&tmp_dir, MockLlmProvider::single_response("unused"));

    let missing = controller.start(Scenario::Existing, None, None).await;
    assert!(matches!(missing, Err(AdvisorError::InvalidIdentity(_))));

    let unknown = controller.start(Scenario::Existing, Some("C-404"), None).await;
    assert!(matches!(unknown, Err(AdvisorError::InvalidIdentity(_))));

    let mixed = controller
        .start(Scenario::New, Some("C-001"), Some("visitor"))
        .await;
    assert!(matches!(mixed, Err(AdvisorError::InvalidIdentity(_))));

    controller
        .store()
        .upsert_customer(&CustomerRecord {
            customer_id: "C-001".into(),
            name: "Dana Reyes".into(),
            annual_income: 84_000.0,
            monthly_debt_payments: 1_150.0,
            credit_score: 712,
            savings: 18_500.0,
            created_at: Utc::now(),
        })
        .await
        .expect("add customer");

    let both = controller
        .start(Scenario::Existing, Some("C-001"), Some("visitor"))
        .await;
    assert!(matches!(both, Err(AdvisorError::InvalidIdentity(_))));

    let id = controller
        .start(Scenario::Existing, Some("C-001"), None)
        .await
        .expect("known customer may start");
    let conversation = controller.conversation(&id).await.expect("conversation");
    assert_eq!(conversation.scenario(), Scenario::Existing);
    assert_eq!(conversation.identity.customer_id(), Some("C-001"));

    let generated = controller
        .start(Scenario::New, None, None)
        .await
        .expect("new visitor may start");
    let conversation = controller
        .conversation(&generated)
        .await
        .expect("conversation");
    assert!(
        conversation
            .identity
            .session_id()
            .is_some_and(|s| !s.is_empty())
    );
}

#[tokio::test]
async fn test_closed_conversation_rejects_messages() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let controller = common::controller(&tmp_dir, MockLlmProvider::single_response("unused"));
    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");

    controller.close(&id).await.expect("close");
    let result = controller.send(&id, "Are you there?", None).await;
    assert!(matches!(result, Err(AdvisorError::Conversation(_))));
    assert!(controller.history(&id).await.expect("history").is_empty());

    let empty = controller.send("missing", "hello", None).await;
    assert!(matches!(empty, Err(AdvisorError::Conversation(_))));
}

#[tokio::test]
async fn test_client_history_replaces_stored_context_without_duplicating_prompt() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let provider = MockLlmProvider::single_response("Your ratio is 16%.");
    let calls = provider.call_log();
    let controller = common::controller(&tmp_dir, provider);
    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");

    let history = vec![
        HistoryEntry::new(Role::User, "I earn 84k a year."),
        HistoryEntry::new(Role::Assistant, "Noted."),
        HistoryEntry::new(Role::User, "What is my debt-to-income ratio?"),
    ];
    controller
        .send(&id, "What is my debt-to-income ratio?", Some(history))
        .await
        .expect("turn should succeed");

    let calls = calls.lock().unwrap();
    let contents: Vec<&str> = calls[0].iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "I earn 84k a year.",
            "Noted.",
            "What is my debt-to-income ratio?"
        ]
    );
}

#[tokio::test]
async fn test_reply_echoing_the_prompt_is_stripped() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let provider = MockLlmProvider::single_response("Should I rent or buy? Renting is cheaper here.");
    let controller = common::controller(&tmp_dir, provider);
    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");

    let reply = controller
        .send(&id, "should I rent or buy?", None)
        .await
        .expect("turn should succeed");
    assert_eq!(reply.message.content, "Renting is cheaper here.");
}

#[tokio::test]
async fn test_summarize_and_delete_message() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let provider = MockLlmProvider::with_responses(vec![
        text_response("About 14 months."),
        text_response(
            r#"{"title": "Credit card payoff", "summary": "The user asked how long payoff takes."}"#,
        ),
    ]);
    let controller = common::controller(&tmp_dir, provider);
    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");
    let reply = controller
        .send(&id, "How long to pay off $5,000?", None)
        .await
        .expect("turn should succeed");

    let summary = controller.summarize(&id).await.expect("summarize");
    assert_eq!(summary.title, "Credit card payoff");
    let stored = controller.summary(&id).await.expect("summary").expect("saved");
    assert_eq!(stored.summary, "The user asked how long payoff takes.");

    controller
        .delete_message(&id, &reply.message.id)
        .await
        .expect("delete message");
    let history = controller.history(&id).await.expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].role, Role::User);

    let missing = controller.delete_message(&id, "no-such-message").await;
    assert!(matches!(missing, Err(AdvisorError::Conversation(_))));

    controller.delete_conversation(&id).await.expect("delete");
    assert!(matches!(
        controller.history(&id).await,
        Err(AdvisorError::Conversation(_))
    ));
}

#[tokio::test]
async fn test_concurrent_turns_on_one_conversation_do_not_interleave() {
    let tmp_dir = TempDir::new().expect("create temp dir");
    let controller = common::controller(
        &tmp_dir,
        SlowReplyProvider::new(Duration::from_millis(100)),
    );
    let id = controller
        .start(Scenario::New, None, None)
        .await
        .expect("start");

    let first = {
        let controller = controller.clone();
        let id = id.clone();
        tokio::spawn(async move { controller.send(&id, "first", None).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = {
        let controller = controller.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let mut handle = controller.send_stream(&id, "second", None).await?;
            while handle.next_event().await.is_some() {}
            handle.wait().await
        })
    };
    first.await.expect("first task").expect("first turn");
    second.await.expect("second task").expect("second turn");

    let history = controller.history(&id).await.expect("history");
    let transcript: Vec<(Role, &str)> = history
        .iter()
        .map(|m| (m.role, m.content.as_str()))
        .collect();
    assert_eq!(
        transcript,
        vec![
            (Role::User, "first"),
            (Role::Assistant, "reply to first (1 in context)"),
            (Role::User, "second"),
            (Role::Assistant, "reply to second (3 in context)"),
        ]
    );
}
