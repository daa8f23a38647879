//! End-to-end runs of the support crew with scripted models and canned tools.
//!
//! No network: every model reply is computed from the request it answers, so
//! these tests exercise prompt rendering, the agent loop and the pipeline
//! together.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crew::core::code_blocks::fenced_blocks;
use crew::core::scope::SourceScope;
use crew::core::template::placeholders;
use crew::core::types::{Agent, InputBindings, Task};
use crew::pipeline::{Pipeline, PipelineError};
use crew::reasoning::model::{ModelReply, ModelRequest, Role};
use crew::reasoning::prompt::DELEGATE_FUNCTION;
use crew::reasoning::{AgentReasoner, ReasoningError, ReasoningLimits, ReasoningOutput};
use crew::support::{
    FINAL_REVIEW, QUALITY_ASSURANCE, SUPPORT_REPRESENTATIVE, SupportTools, support_crew,
};
use crew::test_support::{
    FailingTool, FnModel, RecordingReasoner, StaticTool, acme_bindings, call,
};
use crew::tools::ToolError;

const DOCS_PAGE: &str = "Set `temperature` between 0 and 2.\n\n```python\nfrom openai import OpenAI\n\nclient = OpenAI()\nresponse = client.chat.completions.create(\n    model=\"gpt-4o\",\n    temperature=0.2,\n    messages=[{\"role\": \"user\", \"content\": \"Hello\"}],\n)\n```";

const PRIOR_HEADER: &str = "the result of the previous stage:\n";

fn docs_scope() -> SourceScope {
    SourceScope::parse("https://platform.openai.com/docs").expect("scope")
}

fn system_prompt(request: &ModelRequest) -> &str {
    request
        .messages
        .first()
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

fn task_prompt(request: &ModelRequest) -> &str {
    request
        .messages
        .get(1)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

fn speaker(request: &ModelRequest) -> &'static str {
    [SUPPORT_REPRESENTATIVE, QUALITY_ASSURANCE, FINAL_REVIEW]
        .into_iter()
        .find(|role| system_prompt(request).starts_with(&format!("You are {role}.")))
        .unwrap_or_default()
}

fn tool_answers(request: &ModelRequest) -> Vec<&str> {
    request
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| m.content.as_str())
        .collect()
}

fn prior_result(request: &ModelRequest) -> Option<&str> {
    task_prompt(request)
        .split_once(PRIOR_HEADER)
        .map(|(_, prior)| prior.trim())
}

/// Support looks up the docs once and quotes the first code block it got
/// back; later stages pass their prior result on unchanged.
fn relay_model() -> FnModel {
    FnModel::new(|request| {
        let answers = tool_answers(request);
        let reply = match speaker(request) {
            SUPPORT_REPRESENTATIVE if answers.is_empty() => ModelReply::calls(vec![call(
                "search_internet",
                json!({ "query": "temperature parameter" }),
            )]),
            SUPPORT_REPRESENTATIVE => {
                let block = answers
                    .iter()
                    .flat_map(|answer| fenced_blocks(answer))
                    .map(|block| block.raw.to_string())
                    .next()
                    .unwrap_or_default();
                ModelReply::text(format!("Hi Jo! Here is how to set it:\n\n{block}"))
            }
            _ => ModelReply::text(format!(
                "Reviewed for Acme.\n\n{}",
                prior_result(request).unwrap_or_default()
            )),
        };
        Ok(reply)
    })
}

fn tools(search: Arc<StaticTool>) -> SupportTools {
    SupportTools {
        search,
        scrape: Arc::new(StaticTool::text("read_website_content", DOCS_PAGE)),
    }
}

fn crew_with(model: Arc<FnModel>, tools: SupportTools) -> Pipeline {
    let reasoner = AgentReasoner::new(model, ReasoningLimits::default());
    support_crew(tools, Arc::new(reasoner), docs_scope()).expect("crew")
}

#[tokio::test]
async fn code_block_from_docs_survives_every_stage() {
    let model = Arc::new(relay_model());
    let search = Arc::new(StaticTool::text("search_internet", DOCS_PAGE));
    let crew = crew_with(model.clone(), tools(search.clone()));

    let report = crew
        .execute(&acme_bindings(), &CancellationToken::new())
        .await
        .expect("run");

    let block = fenced_blocks(DOCS_PAGE)[0].raw;
    assert!(report.output.contains(block));
    assert_eq!(report.context.len(), 3);
    assert_eq!(search.calls(), vec!["temperature parameter"]);

    let first = &report.context.records()[0].output;
    assert_eq!(first.tool_invocations.len(), 1);
    assert!(!first.used_fallback);

    // The final reviewer is offered neither tools nor delegation.
    let final_requests: Vec<ModelRequest> = model
        .requests()
        .into_iter()
        .filter(|r| speaker(r) == FINAL_REVIEW)
        .collect();
    assert_eq!(final_requests.len(), 1);
    assert!(final_requests[0].functions.is_empty());
}

#[tokio::test]
async fn stage_two_sees_stage_one_output_verbatim() {
    let sentinel = "SENTINEL-7f3a: use `temperature=0.2`.";
    let model = Arc::new(FnModel::new(move |request| {
        Ok(match speaker(request) {
            SUPPORT_REPRESENTATIVE => ModelReply::text(sentinel),
            QUALITY_ASSURANCE => ModelReply::text("QA approved."),
            _ => ModelReply::text("Final answer."),
        })
    }));
    let search = Arc::new(StaticTool::text("search_internet", DOCS_PAGE));
    let crew = crew_with(model.clone(), tools(search));

    let output = crew.run(&acme_bindings()).await.expect("run");
    assert_eq!(output, "Final answer.");

    let requests = model.requests();
    let qa = requests
        .iter()
        .find(|r| speaker(r) == QUALITY_ASSURANCE)
        .expect("qa request");
    assert_eq!(prior_result(qa), Some(sentinel));
    let review = requests
        .iter()
        .find(|r| speaker(r) == FINAL_REVIEW)
        .expect("final request");
    assert_eq!(prior_result(review), Some("QA approved."));

    let support = requests
        .iter()
        .find(|r| speaker(r) == SUPPORT_REPRESENTATIVE)
        .expect("support request");
    assert_eq!(prior_result(support), None);
    assert!(!task_prompt(support).contains("previous stage"));
}

#[tokio::test]
async fn failing_tools_fall_back_and_the_run_still_completes() {
    let search = Arc::new(FailingTool::new(
        "search_internet",
        ToolError::Network("connection refused".to_string()),
    ));
    let scrape = Arc::new(FailingTool::new(
        "read_website_content",
        ToolError::Timeout(std::time::Duration::from_secs(30)),
    ));
    let model = Arc::new(FnModel::new(|request| {
        let answered = !tool_answers(request).is_empty();
        Ok(match speaker(request) {
            SUPPORT_REPRESENTATIVE if !answered => ModelReply::calls(vec![
                call("search_internet", json!({ "query": "temperature" })),
                call(
                    "read_website_content",
                    json!({ "query": "https://platform.openai.com/docs/api-reference" }),
                ),
            ]),
            SUPPORT_REPRESENTATIVE => {
                ModelReply::text("I could not reach the docs; temperature is usually 0 to 2.")
            }
            QUALITY_ASSURANCE => ModelReply::text("Flagged as unverified."),
            _ => ModelReply::text("Polished, unverified answer."),
        })
    }));
    let tools = SupportTools {
        search: search.clone(),
        scrape: scrape.clone(),
    };
    let crew = crew_with(model.clone(), tools);

    let report = crew
        .execute(&acme_bindings(), &CancellationToken::new())
        .await
        .expect("run completes despite tool failures");

    assert_eq!(report.output, "Polished, unverified answer.");
    assert_eq!(search.call_count(), 1);
    assert_eq!(scrape.call_count(), 1);

    let records = report.context.records();
    assert!(records[0].output.used_fallback);
    assert_eq!(records[0].output.tool_invocations.len(), 2);
    assert!(!records[1].output.used_fallback);

    // Failures reach the model as messages, never as invented content.
    let retry = model
        .requests()
        .into_iter()
        .find(|r| speaker(r) == SUPPORT_REPRESENTATIVE && !tool_answers(r).is_empty())
        .expect("second support turn");
    let answers = tool_answers(&retry);
    assert!(answers[0].contains("failed (network)"));
    assert!(answers[1].contains("failed (timeout)"));

    let qa = model
        .requests()
        .into_iter()
        .find(|r| speaker(r) == QUALITY_ASSURANCE)
        .expect("qa request");
    assert!(task_prompt(&qa).contains("unverified"));
}

#[tokio::test]
async fn acme_run_leaves_no_placeholders_in_any_prompt() {
    let model = Arc::new(relay_model());
    let search = Arc::new(StaticTool::text("search_internet", DOCS_PAGE));
    let crew = crew_with(model.clone(), tools(search));

    let output = crew.run(&acme_bindings()).await.expect("run");
    assert!(placeholders(&output).is_empty(), "output: {output}");
    assert!(output.contains("Hi Jo!"));

    let requests = model.requests();
    assert!(requests.len() >= 4);
    for request in &requests {
        for message in &request.messages {
            for key in ["customer", "person", "inquiry", "prior_output"] {
                assert!(
                    !message.content.contains(&format!("{{{key}}}")),
                    "unresolved {{{key}}} in {:?} message",
                    message.role
                );
            }
            assert!(!message.content.contains("DeepLearningAI"));
        }
    }

    let support = &requests[0];
    assert!(system_prompt(support).contains("providing support to Acme"));
    assert!(task_prompt(support).contains("Jo from Acme is the one that reached out"));
    assert!(task_prompt(support).contains("How do I set the temperature parameter"));
}

#[tokio::test]
async fn missing_binding_fails_before_any_model_or_tool_call() {
    let model = Arc::new(relay_model());
    let search = Arc::new(StaticTool::text("search_internet", DOCS_PAGE));
    let crew = crew_with(model.clone(), tools(search.clone()));
    let bindings = InputBindings::new()
        .with("customer", "Acme")
        .with("person", "Jo");

    let err = crew.run(&bindings).await.unwrap_err();

    match &err {
        PipelineError::Template { index, source, .. } => {
            assert_eq!(*index, 0);
            assert_eq!(source.key(), "inquiry");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(crew.validate(&bindings).is_err());
    assert!(model.requests().is_empty());
    assert!(search.calls().is_empty());
}

#[tokio::test]
async fn qa_can_delegate_a_lookup_to_support() {
    let model = Arc::new(FnModel::new(|request| {
        let answers = tool_answers(request);
        Ok(match speaker(request) {
            QUALITY_ASSURANCE if answers.is_empty() => ModelReply::calls(vec![call(
                DELEGATE_FUNCTION,
                json!({
                    "coworker": SUPPORT_REPRESENTATIVE,
                    "task": "Confirm the allowed temperature range",
                    "context": "Customer asked about the temperature parameter",
                }),
            )]),
            QUALITY_ASSURANCE => ModelReply::text(format!("Checked: {}", answers[0])),
            SUPPORT_REPRESENTATIVE if task_prompt(request).contains("Confirm the allowed") => {
                ModelReply::text("Range is 0 to 2.")
            }
            SUPPORT_REPRESENTATIVE => ModelReply::text("Draft answer."),
            _ => ModelReply::text("Final."),
        })
    }));
    let search = Arc::new(StaticTool::text("search_internet", DOCS_PAGE));
    let crew = crew_with(model.clone(), tools(search));

    let report = crew
        .execute(&acme_bindings(), &CancellationToken::new())
        .await
        .expect("run");

    let qa = &report.context.records()[1].output;
    assert_eq!(qa.text, "Checked: Range is 0 to 2.");
    assert_eq!(qa.delegations.len(), 1);
    assert_eq!(qa.delegations[0].coworker, SUPPORT_REPRESENTATIVE);
    assert_eq!(qa.delegations[0].depth, 1);

    let qa_request = model
        .requests()
        .into_iter()
        .find(|r| speaker(r) == QUALITY_ASSURANCE)
        .expect("qa request");
    assert!(qa_request.functions.iter().any(|f| f.name == DELEGATE_FUNCTION));
}

#[tokio::test]
async fn qa_lookups_are_held_to_the_docs_site() {
    let model = Arc::new(FnModel::new(|request| {
        let answers = tool_answers(request);
        Ok(match speaker(request) {
            QUALITY_ASSURANCE if answers.is_empty() => ModelReply::calls(vec![call(
                "read_website_content",
                json!({ "query": "https://stackoverflow.com/q/1" }),
            )]),
            QUALITY_ASSURANCE => ModelReply::text(format!("Checked: {}", answers[0])),
            SUPPORT_REPRESENTATIVE => ModelReply::text("Draft answer."),
            _ => ModelReply::text("Final."),
        })
    }));
    let tools = SupportTools {
        search: Arc::new(StaticTool::text("search_internet", DOCS_PAGE)),
        scrape: Arc::new(StaticTool::sourced(
            "read_website_content",
            "https://stackoverflow.com/q/1",
            "OFFSITE-CONTENT",
        )),
    };
    let crew = crew_with(model, tools);

    let report = crew
        .execute(&acme_bindings(), &CancellationToken::new())
        .await
        .expect("run");

    let qa = &report.context.records()[1].output;
    assert_eq!(qa.tool_invocations.len(), 1);
    assert!(matches!(
        qa.tool_invocations[0].response,
        Err(ToolError::NotFound(_))
    ));
    assert!(qa.used_fallback);
    assert!(!qa.text.contains("OFFSITE-CONTENT"));
    assert!(!report.output.contains("OFFSITE-CONTENT"));
}

#[tokio::test]
async fn endless_delegation_stops_at_the_depth_limit() {
    let alpha = Arc::new(Agent::new("Alpha", "answer", "likes to delegate").with_delegation(true));
    let beta = Arc::new(Agent::new("Beta", "answer", "also delegates").with_delegation(true));
    let model = Arc::new(FnModel::new(|request| {
        let target = if system_prompt(request).starts_with("You are Alpha.") {
            "Beta"
        } else {
            "Alpha"
        };
        Ok(ModelReply::calls(vec![call(
            DELEGATE_FUNCTION,
            json!({ "coworker": target, "task": "you take it", "context": "none" }),
        )]))
    }));
    let reasoner = AgentReasoner::new(model.clone(), ReasoningLimits::default());
    let pipeline = Pipeline::new(
        vec![
            Task::new("first", "Answer {inquiry}", "an answer", alpha).with_delegation(true),
            Task::new("second", "Review it", "a review", beta),
        ],
        Arc::new(reasoner),
    )
    .expect("pipeline");

    let err = pipeline.run(&acme_bindings()).await.unwrap_err();

    match err {
        PipelineError::Failed { index, cause, .. } => {
            assert_eq!(index, 0);
            assert!(matches!(
                cause,
                ReasoningError::DelegationDepthExceeded { depth: 3, max: 2 }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(model.requests().len(), 3);
}

#[tokio::test]
async fn final_review_may_not_alter_code_blocks() {
    let reasoner = Arc::new(RecordingReasoner::new(|ctx, _| {
        let text = if ctx.role == FINAL_REVIEW {
            "```python\nclient.chat.completions.create(temperature=0.7)\n```".to_string()
        } else {
            format!("Answer:\n\n{DOCS_PAGE}")
        };
        Ok(ReasoningOutput::text(text))
    }));
    let search = Arc::new(StaticTool::text("search_internet", DOCS_PAGE));
    let crew = support_crew(tools(search), reasoner.clone(), docs_scope()).expect("crew");

    let err = crew.run(&acme_bindings()).await.unwrap_err();

    match err {
        PipelineError::Failed { index, cause, .. } => {
            assert_eq!(index, 2);
            assert!(matches!(cause, ReasoningError::CodeBlocksAltered { missing: 1 }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(reasoner.contexts().len(), 3);
}

#[tokio::test]
async fn cancellation_stops_at_the_next_stage_boundary() {
    let reasoner = Arc::new(RecordingReasoner::echo());
    let search = Arc::new(StaticTool::text("search_internet", DOCS_PAGE));
    let crew = support_crew(tools(search), reasoner.clone(), docs_scope()).expect("crew");
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let err = crew
        .execute_with(&acme_bindings(), &cancel, |_| trigger.cancel())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Cancelled { index: 1 }));
    assert_eq!(reasoner.contexts().len(), 1);
}
