use super::*;
use crate::api::client::{ByteStream, MockStreamProducer};
use crate::api::mock_client::{
    content_event, done_event, text_response, tool_call_event, MockApiClient,
};
use crate::api::ApiClient;
use crate::config::Config;
use crate::error::{ChatError, ValidationError};
use crate::state::{FileContext, Message, Role, UserInput, PROVISIONAL_SESSION_NAME};
use crate::storage::{
    get_typed, set_typed, MemoryStore, LEARNED_FACTS_KEY, SESSIONS_KEY, SYSTEM_PROMPT_KEY,
};
use crate::tools::{
    ChatTool, FeatureFlags, ToolEffect, ToolExecutionError, ToolOutcome, ToolRegistry,
    IMAGE_TOOL_NAME, LEARNING_TOOL_NAME, SEARCH_TOOL_NAME,
};
use crate::types::{CompletionRequest, ToolCallDelta, ToolDefinition, WireRole};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Returns a fixed outcome and records the arguments it was called with.
struct StubTool {
    name: &'static str,
    outcome: ToolOutcome,
    calls: Arc<Mutex<Vec<Value>>>,
}

impl StubTool {
    fn new(name: &'static str, outcome: ToolOutcome) -> (Self, Arc<Mutex<Vec<Value>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                name,
                outcome,
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }
}

#[async_trait]
impl ChatTool for StubTool {
    fn name(&self) -> &'static str {
        self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(self.name, "stub", json!({ "type": "object" }))
    }

    async fn execute(&self, arguments: &Value) -> Result<ToolOutcome, ToolExecutionError> {
        self.calls.lock().unwrap().push(arguments.clone());
        Ok(self.outcome.clone())
    }
}

async fn manager_with(
    mock: &MockApiClient,
    config: Config,
) -> (ConversationManager, MemoryStore) {
    let store = MemoryStore::new();
    let client = ApiClient::new_mock(Arc::new(mock.clone()));
    let manager = ConversationManager::new_mock(client, config, Arc::new(store.clone()))
        .await
        .expect("manager should build");
    (manager, store)
}

async fn seed_session(manager: &mut ConversationManager, messages: Vec<Message>) {
    manager.sessions_mut().create("Seeded").await.unwrap();
    let session = manager.sessions_mut().current_mut().unwrap();
    for message in messages {
        session.messages.append(message);
    }
}

fn contents(manager: &ConversationManager) -> Vec<(Role, String)> {
    manager
        .history()
        .unwrap()
        .iter()
        .map(|message| (message.role, message.content.clone()))
        .collect()
}

fn search_registry(summary: &str) -> (ToolRegistry, Arc<Mutex<Vec<Value>>>) {
    let mut registry = ToolRegistry::new(FeatureFlags {
        web_grounding: true,
        ..FeatureFlags::default()
    });
    let (tool, calls) = StubTool::new(SEARCH_TOOL_NAME, ToolOutcome::text(summary));
    registry.register(Arc::new(tool));
    (registry, calls)
}

fn weather_tool_round() -> Vec<String> {
    vec![
        tool_call_event(Some("call_weather"), Some(SEARCH_TOOL_NAME), "{\"query\":"),
        tool_call_event(None, None, "\"weather\"}"),
        done_event(),
    ]
}

fn drain(mut rx: mpsc::UnboundedReceiver<ConversationStreamUpdate>) -> Vec<ConversationStreamUpdate> {
    let mut updates = Vec::new();
    while let Ok(update) = rx.try_recv() {
        updates.push(update);
    }
    updates
}

#[tokio::test]
async fn test_plain_reply_is_streamed_and_persisted() {
    let mock = MockApiClient::new(vec![text_response(&["Hel", "lo"])]);
    let (mut manager, store) = manager_with(&mock, Config::default()).await;
    seed_session(&mut manager, Vec::new()).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let outcome = manager
        .send_message(UserInput::text("Hi"), Some(&tx))
        .await
        .unwrap();
    drop(tx);

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "Hi".to_string()),
            (Role::Assistant, "Hello".to_string())
        ]
    );

    let persisted: Vec<Value> = get_typed(&store, SESSIONS_KEY).await.unwrap().unwrap();
    let messages = persisted[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1]["content"], "Hello");

    let updates = drain(rx);
    assert_eq!(
        updates.first(),
        Some(&ConversationStreamUpdate::AssistantStarted { index: 1 })
    );
    assert_eq!(
        updates.last(),
        Some(&ConversationStreamUpdate::TurnFinished(TurnOutcome::Completed))
    );

    let requests = mock.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].tools.is_none());
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].messages[0].text(), "Hi");
}

#[tokio::test]
async fn test_tool_call_runs_tool_then_recurses_without_tools() {
    let mock = MockApiClient::new(vec![
        weather_tool_round(),
        text_response(&["It is sunny."]),
    ]);
    let (manager, _) = manager_with(&mock, Config::default()).await;
    let (registry, calls) = search_registry("1. Forecast (https://w.example)\nSunny");
    let mut manager = manager.with_tools(registry);
    seed_session(&mut manager, Vec::new()).await;

    let (tx, rx) = mpsc::unbounded_channel();
    let outcome = manager
        .send_message(UserInput::text("What's the weather?"), Some(&tx))
        .await
        .unwrap();
    drop(tx);
    assert_eq!(outcome, TurnOutcome::Completed);

    assert_eq!(*calls.lock().unwrap(), vec![json!({ "query": "weather" })]);

    let history = manager.history().unwrap();
    assert_eq!(history.len(), 3);
    let tool_result = history.get(1).unwrap();
    assert_eq!(tool_result.role, Role::Assistant);
    assert_eq!(tool_result.name.as_deref(), Some(SEARCH_TOOL_NAME));
    assert_eq!(tool_result.tool_call_id.as_deref(), Some("call_weather"));
    assert!(tool_result.content.contains("Forecast"));
    assert_eq!(history.get(2).unwrap().content, "It is sunny.");
    assert!(history.iter().all(|message| !message.is_transient()));

    let updates = drain(rx);
    assert!(updates.iter().any(|update| matches!(
        update,
        ConversationStreamUpdate::ToolProcessing { tool_call_id, .. } if tool_call_id == "call_weather"
    )));
    assert!(updates.iter().any(|update| matches!(
        update,
        ConversationStreamUpdate::ToolCompleted { index: 1, .. }
    )));

    let requests = mock.requests();
    assert_eq!(requests.len(), 2);
    let offered = requests[0].tools.as_ref().expect("tools offered first");
    assert_eq!(offered[0].function.name, SEARCH_TOOL_NAME);
    assert!(requests[1].tools.is_none());
    let follow_up = &requests[1].messages;
    assert_eq!(follow_up.len(), 2);
    assert_eq!(follow_up[1].role(), WireRole::Assistant);
    assert!(follow_up[1].text().contains("Forecast"));
}

#[tokio::test]
async fn test_text_before_tool_call_is_kept() {
    let mut first_round = vec![content_event("Let me check. ")];
    first_round.extend(weather_tool_round());
    let mock = MockApiClient::new(vec![first_round, text_response(&["Sunny."])]);
    let (manager, _) = manager_with(&mock, Config::default()).await;
    let (registry, _) = search_registry("summary");
    let mut manager = manager.with_tools(registry);
    seed_session(&mut manager, Vec::new()).await;

    manager
        .send_message(UserInput::text("weather?"), None)
        .await
        .unwrap();

    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "weather?".to_string()),
            (Role::Assistant, "Let me check. ".to_string()),
            (Role::Assistant, "summary".to_string()),
            (Role::Assistant, "Sunny.".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_tool_rounds_are_bounded() {
    let mut second_round = weather_tool_round();
    second_round.insert(0, content_event("Done."));
    let mock = MockApiClient::new(vec![weather_tool_round(), second_round]);
    let config = Config {
        max_tool_rounds: 1,
        ..Config::default()
    };
    let (manager, _) = manager_with(&mock, config).await;
    let (registry, calls) = search_registry("summary");
    let mut manager = manager.with_tools(registry);
    seed_session(&mut manager, Vec::new()).await;

    let outcome = manager
        .send_message(UserInput::text("loop"), None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(mock.requests().len(), 2);
    assert_eq!(manager.history().unwrap().len(), 3);
    assert_eq!(
        manager.history().unwrap().last_assistant_message().unwrap().content,
        "Done."
    );
}

#[tokio::test]
async fn test_stream_failure_appends_retry_notice() {
    let mock = MockApiClient::new(Vec::new());
    let (mut manager, store) = manager_with(&mock, Config::default()).await;
    seed_session(&mut manager, Vec::new()).await;

    let outcome = manager
        .send_message(UserInput::text("Hi"), None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "Hi".to_string()),
            (Role::Assistant, STREAM_FAILURE_MESSAGE.to_string())
        ]
    );
    let persisted: Vec<Value> = get_typed(&store, SESSIONS_KEY).await.unwrap().unwrap();
    assert_eq!(persisted[0]["messages"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_malformed_chunk_fails_turn_with_retry_notice() {
    let mock = MockApiClient::new(vec![vec![
        content_event("Partial"),
        "data: {not json}".to_string(),
        content_event(" never shown"),
        done_event(),
    ]]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    seed_session(&mut manager, Vec::new()).await;

    let outcome = manager
        .send_message(UserInput::text("Hi"), None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "Hi".to_string()),
            (Role::Assistant, STREAM_FAILURE_MESSAGE.to_string())
        ]
    );
}

#[tokio::test]
async fn test_missing_credentials_is_a_configuration_error() {
    let store = MemoryStore::new();
    let config = Config {
        api_url: "https://api.cerebras.ai/v1".to_string(),
        api_key: None,
        ..Config::default()
    };
    let mut manager = ConversationManager::new(config, Arc::new(store))
        .await
        .unwrap();

    let err = manager
        .send_message(UserInput::text("Hi"), None)
        .await
        .expect_err("no key configured");

    assert!(matches!(err, ChatError::Configuration(_)));
    assert!(manager.history().is_none());
    assert!(!manager.is_streaming());
}

/// Emits the scripted chunks and presses stop just before chunk `stop_at`.
struct StoppingProducer {
    handle: Arc<Mutex<Option<StopHandle>>>,
    chunks: Vec<String>,
    stop_at: usize,
    reason: StopReason,
}

impl MockStreamProducer for StoppingProducer {
    fn create_mock_stream(&self, _request: &CompletionRequest) -> Result<ByteStream> {
        let handle = self.handle.lock().unwrap().clone();
        let stop_at = self.stop_at;
        let reason = self.reason;
        let items = self
            .chunks
            .clone()
            .into_iter()
            .enumerate()
            .map(move |(position, chunk)| {
                if position == stop_at {
                    if let Some(handle) = &handle {
                        handle.stop(reason);
                    }
                }
                Ok::<Bytes, anyhow::Error>(Bytes::from(format!("{chunk}\n\n")))
            });
        Ok(Box::pin(stream::iter(items)))
    }
}

async fn stopping_manager(reason: StopReason) -> ConversationManager {
    let slot = Arc::new(Mutex::new(None));
    let producer = StoppingProducer {
        handle: Arc::clone(&slot),
        chunks: text_response(&["Hel", "lo", " world"]),
        stop_at: 1,
        reason,
    };
    let manager = ConversationManager::new_mock(
        ApiClient::new_mock(Arc::new(producer)),
        Config::default(),
        Arc::new(MemoryStore::new()),
    )
    .await
    .unwrap();
    *slot.lock().unwrap() = Some(manager.stop_handle());
    manager
}

#[tokio::test]
async fn test_forced_stop_marks_message_and_ignores_later_deltas() {
    let mut manager = stopping_manager(StopReason::User).await;
    seed_session(&mut manager, Vec::new()).await;

    let outcome = manager
        .send_message(UserInput::text("Hi"), None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Stopped(StopReason::User));
    let reply = manager.history().unwrap().last_assistant_message().unwrap();
    assert_eq!(reply.content, "Hel [forced stop, by user]");
    assert!(!manager.is_streaming());
}

#[tokio::test]
async fn test_superseded_edit_marks_reply_aborted() {
    let mut manager = stopping_manager(StopReason::Superseded).await;
    seed_session(
        &mut manager,
        vec![Message::user("A"), Message::assistant("X")],
    )
    .await;

    let outcome = manager
        .edit_user_message(0, UserInput::text("B"), None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Stopped(StopReason::Superseded));
    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "B".to_string()),
            (Role::Assistant, "Hel [aborted]".to_string())
        ]
    );
}

#[tokio::test]
async fn test_stopped_revamp_keeps_partial_text_with_marker() {
    let mut manager = stopping_manager(StopReason::Superseded).await;
    seed_session(
        &mut manager,
        vec![Message::user("Q"), Message::assistant("Original text")],
    )
    .await;

    let outcome = manager
        .revamp_assistant_message(1, "shorter", None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Stopped(StopReason::Superseded));
    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "Q".to_string()),
            (Role::Assistant, "Hel [aborted]".to_string())
        ]
    );
    assert!(!manager.is_streaming());
}

/// Presses stop while it runs, as a user would during a slow search.
struct StoppingSearch {
    handle: Arc<Mutex<Option<StopHandle>>>,
}

#[async_trait]
impl ChatTool for StoppingSearch {
    fn name(&self) -> &'static str {
        SEARCH_TOOL_NAME
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(SEARCH_TOOL_NAME, "stops", json!({ "type": "object" }))
    }

    async fn execute(&self, _arguments: &Value) -> Result<ToolOutcome, ToolExecutionError> {
        if let Some(handle) = self.handle.lock().unwrap().as_ref() {
            handle.stop(StopReason::User);
        }
        Ok(ToolOutcome::text("summary"))
    }
}

#[tokio::test]
async fn test_stop_during_tool_call_leaves_marker_message() {
    let mock = MockApiClient::new(vec![weather_tool_round(), text_response(&["unused"])]);
    let (manager, store) = manager_with(&mock, Config::default()).await;
    let slot = Arc::new(Mutex::new(Some(manager.stop_handle())));
    let mut registry = ToolRegistry::new(FeatureFlags {
        web_grounding: true,
        ..FeatureFlags::default()
    });
    registry.register(Arc::new(StoppingSearch {
        handle: Arc::clone(&slot),
    }));
    let mut manager = manager.with_tools(registry);
    seed_session(&mut manager, Vec::new()).await;

    let outcome = manager
        .send_message(UserInput::text("weather?"), None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Stopped(StopReason::User));
    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "weather?".to_string()),
            (Role::Assistant, "summary".to_string()),
            (Role::Assistant, "[forced stop, by user]".to_string()),
        ]
    );
    assert_eq!(mock.requests().len(), 1);
    let persisted: Vec<Value> = get_typed(&store, SESSIONS_KEY).await.unwrap().unwrap();
    assert_eq!(persisted[0]["messages"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_edit_latest_user_message_truncates_and_regenerates() {
    let mock = MockApiClient::new(vec![text_response(&["Y"])]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    seed_session(
        &mut manager,
        vec![Message::user("A"), Message::assistant("X")],
    )
    .await;

    manager
        .edit_user_message(0, UserInput::text("B"), None)
        .await
        .unwrap();

    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "B".to_string()),
            (Role::Assistant, "Y".to_string())
        ]
    );
    let request = &mock.requests()[0];
    assert_eq!(request.messages.len(), 1);
    assert_eq!(request.messages[0].text(), "B");
}

#[tokio::test]
async fn test_edit_rejections_leave_history_untouched() {
    let mock = MockApiClient::new(Vec::new());
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    seed_session(
        &mut manager,
        vec![
            Message::user("A"),
            Message::assistant("X"),
            Message::user("B"),
            Message::assistant("Y"),
        ],
    )
    .await;
    let before = manager.history().unwrap().clone();

    let stale = manager
        .edit_user_message(0, UserInput::text("changed"), None)
        .await;
    assert!(matches!(
        stale,
        Err(ChatError::Validation(ValidationError::NotLatestUserMessage { index: 0 }))
    ));

    let blank = manager.edit_user_message(2, UserInput::text("  "), None).await;
    assert!(matches!(
        blank,
        Err(ChatError::Validation(ValidationError::EmptyContent))
    ));

    let wrong_role = manager
        .edit_user_message(1, UserInput::text("x"), None)
        .await;
    assert!(matches!(
        wrong_role,
        Err(ChatError::Validation(ValidationError::NotUserMessage { index: 1 }))
    ));

    assert_eq!(manager.history().unwrap(), &before);
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_redo_without_preceding_user_message_is_rejected() {
    let mock = MockApiClient::new(vec![text_response(&["unused"])]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    seed_session(&mut manager, vec![Message::assistant("Welcome!")]).await;
    let before = manager.history().unwrap().clone();

    let err = manager.redo_assistant_message(0, None).await.unwrap_err();

    assert!(matches!(
        err,
        ChatError::Validation(ValidationError::NoPrecedingUserMessage { index: 0 })
    ));
    assert_eq!(manager.history().unwrap(), &before);
    assert!(mock.requests().is_empty());
}

#[tokio::test]
async fn test_redo_replaces_target_and_everything_after() {
    let mock = MockApiClient::new(vec![text_response(&["Fresh"])]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    seed_session(
        &mut manager,
        vec![
            Message::user("Q1"),
            Message::assistant("Old"),
            Message::user("Q2"),
            Message::assistant("Later"),
        ],
    )
    .await;

    manager.redo_assistant_message(1, None).await.unwrap();

    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "Q1".to_string()),
            (Role::Assistant, "Fresh".to_string())
        ]
    );
}

#[tokio::test]
async fn test_revamp_rewrites_in_place() {
    let mock = MockApiClient::new(vec![text_response(&["Short ", "answer."])]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    manager
        .set_system_prompt(Some("Be helpful.".to_string()))
        .await
        .unwrap();
    seed_session(
        &mut manager,
        vec![
            Message::user("Explain Rust"),
            Message::assistant("A very long answer"),
            Message::user("Thanks"),
        ],
    )
    .await;

    let outcome = manager
        .revamp_assistant_message(1, "make it shorter", None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    let history = manager.history().unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history.get(1).unwrap().content, "Short answer.");

    let request = &mock.requests()[0];
    assert!(request.tools.is_none());
    assert_eq!(request.messages.len(), 3);
    assert_eq!(request.messages[0].role(), WireRole::System);
    let instruction = request.messages[2].text();
    assert!(instruction.contains("A very long answer"));
    assert!(instruction.contains("make it shorter"));
}

#[tokio::test]
async fn test_revamp_failure_restores_original() {
    let mock = MockApiClient::new(Vec::new());
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    seed_session(
        &mut manager,
        vec![Message::user("Q"), Message::assistant("Original text")],
    )
    .await;

    let outcome = manager
        .revamp_assistant_message(1, "more formal", None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Failed);
    assert_eq!(
        manager.history().unwrap().get(1).unwrap().content,
        "Original text"
    );
}

#[tokio::test]
async fn test_first_message_creates_session_and_names_it_with_fallback() {
    let mock = MockApiClient::new(vec![text_response(&["Hi there"])]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    assert!(manager.sessions().is_empty());

    manager
        .send_message(UserInput::text("What is the weather like today"), None)
        .await
        .unwrap();
    assert_eq!(
        manager.sessions().current().unwrap().name,
        PROVISIONAL_SESSION_NAME
    );

    assert_eq!(manager.wait_for_session_titles().await.unwrap(), 1);
    assert_eq!(manager.sessions().current().unwrap().name, "What is the");
}

#[tokio::test]
async fn test_generated_title_is_truncated() {
    let mock = MockApiClient::new(vec![
        text_response(&["Sure."]),
        text_response(&["Interplanetary Logistics Planning"]),
    ]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;

    manager
        .send_message(UserInput::text("Plan a Mars supply run"), None)
        .await
        .unwrap();
    manager.wait_for_session_titles().await.unwrap();

    assert_eq!(
        manager.sessions().current().unwrap().name,
        "Interplanetary Logis..."
    );
    let naming_request = &mock.requests()[1];
    assert_eq!(naming_request.messages[0].text(), TITLE_INSTRUCTION);
    assert_eq!(naming_request.messages[1].text(), "Plan a Mars supply run");
}

#[tokio::test]
async fn test_existing_session_is_not_renamed() {
    let mock = MockApiClient::new(vec![text_response(&["ok"])]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    seed_session(&mut manager, Vec::new()).await;

    manager
        .send_message(UserInput::text("hello there friend"), None)
        .await
        .unwrap();

    assert_eq!(manager.wait_for_session_titles().await.unwrap(), 0);
    assert_eq!(manager.sessions().current().unwrap().name, "Seeded");
    assert_eq!(mock.requests().len(), 1);
}

#[tokio::test]
async fn test_image_tool_attaches_url_to_latest_assistant_message() {
    let url = "https://img.example/cat.png";
    let mock = MockApiClient::new(vec![
        vec![
            tool_call_event(Some("call_img"), Some(IMAGE_TOOL_NAME), "{\"prompt\":\"a cat\"}"),
            done_event(),
        ],
        text_response(&["Here is your cat."]),
    ]);
    let (manager, _) = manager_with(&mock, Config::default()).await;
    let mut registry = ToolRegistry::new(FeatureFlags {
        image_generation: true,
        ..FeatureFlags::default()
    });
    let (tool, _) = StubTool::new(
        IMAGE_TOOL_NAME,
        ToolOutcome::with_effect(url, ToolEffect::ImageGenerated(url.to_string())),
    );
    registry.register(Arc::new(tool));
    let mut manager = manager.with_tools(registry);
    seed_session(&mut manager, Vec::new()).await;

    manager
        .send_message(UserInput::text("draw a cat"), None)
        .await
        .unwrap();

    let session = manager.sessions().current().unwrap();
    let tool_result = session.messages.get(1).unwrap();
    assert_eq!(tool_result.content, url);
    assert_eq!(tool_result.generated_images, vec![url.to_string()]);
    assert_eq!(session.generated_images, vec![url.to_string()]);
}

#[tokio::test]
async fn test_learning_tool_refreshes_system_prompt() {
    let mock = MockApiClient::new(vec![
        vec![
            tool_call_event(
                Some("call_learn"),
                Some(LEARNING_TOOL_NAME),
                "{\"action\":\"add\",\"fact\":\"Likes green tea\"}",
            ),
            done_event(),
        ],
        text_response(&["Noted."]),
    ]);
    let config = Config {
        features: FeatureFlags {
            learning: true,
            ..FeatureFlags::default()
        },
        ..Config::default()
    };
    let (mut manager, store) = manager_with(&mock, config).await;
    manager
        .set_system_prompt(Some("Be brief.".to_string()))
        .await
        .unwrap();
    seed_session(&mut manager, Vec::new()).await;

    manager
        .send_message(UserInput::text("I love green tea"), None)
        .await
        .unwrap();

    let expected = "Be brief.\n\nLearned information about the user:\nLikes green tea";
    assert_eq!(manager.system_prompt(), Some(expected));
    let stored: Option<String> = get_typed(&store, SYSTEM_PROMPT_KEY).await.unwrap();
    assert_eq!(stored.as_deref(), Some(expected));

    let follow_up = &mock.requests()[1];
    assert_eq!(follow_up.messages[0].text(), expected);
}

#[tokio::test]
async fn test_new_system_prompt_keeps_learned_facts() {
    let mock = MockApiClient::new(Vec::new());
    let (mut manager, store) = manager_with(&mock, Config::default()).await;
    set_typed(&store, LEARNED_FACTS_KEY, "Likes tea").await.unwrap();

    manager
        .set_system_prompt(Some("Be kind.".to_string()))
        .await
        .unwrap();

    let expected = "Be kind.\n\nLearned information about the user:\nLikes tea";
    assert_eq!(manager.system_prompt(), Some(expected));
    let stored: Option<String> = get_typed(&store, SYSTEM_PROMPT_KEY).await.unwrap();
    assert_eq!(stored.as_deref(), Some(expected));
}

fn reasoning_config() -> Config {
    Config {
        features: FeatureFlags {
            multi_turn_cot: true,
            ..FeatureFlags::default()
        },
        ..Config::default()
    }
}

#[tokio::test]
async fn test_reasoning_stops_early_when_rounds_converge() {
    let mock = MockApiClient::new(vec![
        text_response(&["The answer is four."]),
        text_response(&["the answer is four."]),
        text_response(&["Four."]),
    ]);
    let (mut manager, _) = manager_with(&mock, reasoning_config()).await;
    seed_session(&mut manager, Vec::new()).await;

    let outcome = manager
        .send_message(UserInput::text("What is 2 + 2?"), None)
        .await
        .unwrap();

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(
        contents(&manager),
        vec![
            (Role::User, "What is 2 + 2?".to_string()),
            (Role::Assistant, "The answer is four.".to_string()),
            (Role::Assistant, "the answer is four.".to_string()),
            (Role::Assistant, "Four.".to_string()),
        ]
    );

    let requests = mock.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].temperature, REASONING_TEMPERATURE);
    assert_eq!(requests[0].messages[0].text(), INITIAL_REASONING_PROMPT);
    assert!(requests[0].tools.is_none());
    assert!(requests[1].messages[0]
        .text()
        .contains("Previous reasoning:\nThe answer is four."));
    assert_eq!(requests[1].messages.len(), 3);
}

#[tokio::test]
async fn test_reasoning_synthesizes_after_round_limit() {
    let mut responses: Vec<Vec<String>> = ["alpha", "bravo", "charlie", "delta", "echo"]
        .iter()
        .map(|round| text_response(&[*round]))
        .collect();
    responses.push(text_response(&["Final answer."]));
    let mock = MockApiClient::new(responses);
    let (mut manager, _) = manager_with(&mock, reasoning_config()).await;
    seed_session(&mut manager, Vec::new()).await;

    manager
        .send_message(UserInput::text("Name five words"), None)
        .await
        .unwrap();

    let history = manager.history().unwrap();
    assert_eq!(history.len(), 2 + MAX_REASONING_ROUNDS);
    assert_eq!(history.last_assistant_message().unwrap().content, "Final answer.");

    let requests = mock.requests();
    assert_eq!(requests.len(), MAX_REASONING_ROUNDS + 1);
    let synthesis = requests.last().unwrap();
    assert_eq!(synthesis.temperature, SYNTHESIS_TEMPERATURE);
    assert_eq!(synthesis.messages[0].text(), SYNTHESIS_PROMPT);
    assert_eq!(synthesis.messages[1].role(), WireRole::User);
    assert_eq!(synthesis.messages[1].text(), "Name five words");
    assert_eq!(synthesis.messages.len(), 2 + MAX_REASONING_ROUNDS);
    assert_eq!(synthesis.messages[6].text(), "Turn 5:\necho");
}

#[tokio::test]
async fn test_session_file_context_joins_system_content() {
    let mock = MockApiClient::new(vec![text_response(&["ok"])]);
    let (mut manager, _) = manager_with(&mock, Config::default()).await;
    seed_session(&mut manager, Vec::new()).await;
    manager.sessions_mut().current_mut().unwrap().file_context = Some(FileContext {
        name: "notes.md".to_string(),
        kind: "text/markdown".to_string(),
        content: "launch on friday".to_string(),
    });

    manager
        .send_message(UserInput::text("when is launch?"), None)
        .await
        .unwrap();

    let system = &mock.requests()[0].messages[0];
    assert_eq!(system.role(), WireRole::System);
    assert_eq!(
        system.text(),
        "File Context - Title: notes.md\nContent: launch on friday"
    );
}

#[test]
fn test_tool_call_buffer_waits_for_complete_arguments() {
    let mut buffer = ToolCallBuffer::default();
    let first = buffer.push(ToolCallDelta {
        id: Some("call_1".to_string()),
        name: Some(SEARCH_TOOL_NAME.to_string()),
        arguments: "{\"query\": \"rust".to_string(),
    });
    assert!(first.is_none());

    let done = buffer
        .push(ToolCallDelta {
            id: None,
            name: None,
            arguments: " async\"}".to_string(),
        })
        .expect("arguments now parse");
    assert_eq!(done.id, "call_1");
    assert_eq!(done.arguments, json!({ "query": "rust async" }));
}

#[test]
fn test_tool_call_buffer_needs_a_name_and_an_object() {
    let mut buffer = ToolCallBuffer::default();
    assert!(buffer
        .push(ToolCallDelta {
            id: Some("call_1".to_string()),
            name: None,
            arguments: "{}".to_string(),
        })
        .is_none());
    assert!(buffer
        .push(ToolCallDelta {
            id: Some("call_2".to_string()),
            name: Some(SEARCH_TOOL_NAME.to_string()),
            arguments: "42".to_string(),
        })
        .is_none());
    assert!(buffer.has_pending());
}
