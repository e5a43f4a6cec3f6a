//! Session controller
//!
//! Drives one session per question: query the model for a `{reasoning,
//! code}` step, execute the code in the sandbox, feed the observation back,
//! and repeat until the terminal primitive fires or a budget runs out.
//! Exactly one LLM call or sandbox execution is outstanding at a time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cr_providers::Gateway;

use crate::config::Config;
use crate::llm::{CallQuota, LlmClient, LlmRequest};
use crate::registry::LoadedReview;
use crate::review::citations::{normalize_citation, parse_raw_citations};
use crate::sandbox::{Executor, SessionInterceptor};
use crate::types::{AnswerBlock, ChatMessage, DiffCitation, DiffSelection, Iteration};
use crate::{Error, Result};

use super::answer::{parse_action, parse_answer_blocks};
use super::events::SessionEvent;
use super::prompt;
use super::session::{ReviewSession, SessionStatus};

/// Inputs to one `ask` call.
#[derive(Debug, Clone, Default)]
pub struct AskParams {
    pub question: String,
    pub conversation: Vec<ChatMessage>,
    pub selection: Option<DiffSelection>,
}

impl AskParams {
    pub fn question(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }
}

/// Final state of a completed session.
#[derive(Debug)]
pub struct AskOutcome {
    pub blocks: Vec<AnswerBlock>,
    pub citations: Vec<DiffCitation>,
    pub status: SessionStatus,
    pub transcript: Vec<Iteration>,
}

/// Drives review sessions against one gateway and LLM driver.
#[derive(Clone)]
pub struct Controller {
    llm: Arc<dyn LlmClient>,
    gateway: Arc<Gateway>,
    config: Arc<Config>,
}

impl Controller {
    pub fn new(llm: Arc<dyn LlmClient>, gateway: Arc<Gateway>, config: Config) -> Self {
        Self {
            llm,
            gateway,
            config: Arc::new(config),
        }
    }

    /// Open a session and stream its events.
    ///
    /// The returned channel always yields `start` first and `end` last,
    /// with every `iteration` frame preceding the first `block`.
    pub fn ask(
        &self,
        loaded: Arc<LoadedReview>,
        params: AskParams,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(64);
        let controller = self.clone();
        tokio::spawn(async move {
            controller.run(loaded, params, cancel, tx).await;
        });
        rx
    }

    /// One-shot variant: run the session to completion and return the
    /// outcome directly. Events are still produced for observability.
    pub async fn answer(
        &self,
        loaded: Arc<LoadedReview>,
        params: AskParams,
        cancel: CancellationToken,
    ) -> AskOutcome {
        let (tx, mut rx) = mpsc::channel(64);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let outcome = self.run(loaded, params, cancel, tx).await;
        let _ = drain.await;
        outcome
    }

    /// Run one full session, emitting events on `tx`.
    pub async fn run(
        &self,
        loaded: Arc<LoadedReview>,
        params: AskParams,
        cancel: CancellationToken,
        tx: mpsc::Sender<SessionEvent>,
    ) -> AskOutcome {
        let _ = tx
            .send(SessionEvent::Start {
                question: params.question.clone(),
            })
            .await;

        let mut runner = SessionRunner::new(self, loaded, params, cancel, tx.clone());
        let outcome = runner.run().await;

        let _ = tx
            .send(SessionEvent::End {
                citations: outcome.citations.clone(),
            })
            .await;
        outcome
    }
}

struct SessionRunner<'a> {
    controller: &'a Controller,
    loaded: Arc<LoadedReview>,
    params: AskParams,
    cancel: CancellationToken,
    tx: mpsc::Sender<SessionEvent>,
    session: ReviewSession,
    executor: Executor,
    interceptor: SessionInterceptor,
    quota: Arc<CallQuota>,
    deadline: Instant,
    diff_context: String,
}

impl<'a> SessionRunner<'a> {
    fn new(
        controller: &'a Controller,
        loaded: Arc<LoadedReview>,
        params: AskParams,
        cancel: CancellationToken,
        tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let config = &controller.config;
        let quota = Arc::new(CallQuota::new(
            config.rlm.max_llm_calls,
            config.rlm.max_tokens,
        ));
        let interceptor = SessionInterceptor::new(
            Arc::clone(&controller.gateway),
            loaded.pr_ref.clone(),
            loaded.pr_info.base_sha.clone(),
            loaded.pr_info.head_sha.clone(),
            Arc::clone(&controller.llm),
            config.llm.sub_model.clone(),
            Arc::clone(&quota),
        );
        let session = ReviewSession::new(
            loaded.pr_info.review_id.clone(),
            params.question.clone(),
            loaded.pr_info.clone(),
            config.rlm.max_iterations,
        );
        let diff_context = prompt::build_diff_context(&loaded.pr_info);
        let deadline = Instant::now() + Duration::from_secs(config.rlm.deadline_secs);
        let executor = Executor::new(config.sandbox.clone());

        Self {
            controller,
            loaded,
            params,
            cancel,
            tx,
            session,
            executor,
            interceptor,
            quota,
            deadline,
            diff_context,
        }
    }

    async fn run(&mut self) -> AskOutcome {
        self.session.set_status(SessionStatus::Running);
        let variables = sandbox_variables(&self.loaded.pr_info);
        let budget = self.session.iteration_budget;
        let mut consecutive_parse_failures = 0u32;

        let result = loop {
            if self.cancel.is_cancelled() {
                break Err(Error::Cancelled);
            }
            if Instant::now() >= self.deadline {
                break Err(Error::Deadline);
            }
            let index = self.session.next_index();
            if index > budget {
                break Ok(None);
            }

            let started = Instant::now();
            let action = match self.generate_action(index).await {
                Ok(action) => {
                    consecutive_parse_failures = 0;
                    action
                }
                Err(Error::Parse(message)) => {
                    warn!(index, %message, "model output failed to parse");
                    consecutive_parse_failures += 1;
                    let iteration = Iteration {
                        index,
                        max: budget,
                        reasoning: String::new(),
                        code: String::new(),
                        output: None,
                        error: Some("parse".to_string()),
                        duration_ms: started.elapsed().as_millis() as u64,
                    };
                    self.record_iteration(iteration).await;
                    if consecutive_parse_failures >= 2 {
                        break Err(Error::Parse(message));
                    }
                    continue;
                }
                Err(err) => break Err(err),
            };

            let observation = tokio::select! {
                () = self.cancel.cancelled() => break Err(Error::Cancelled),
                result = self.executor.execute(&self.interceptor, &action.code, &variables) => {
                    match result {
                        Ok(observation) => observation,
                        Err(err) => break Err(err),
                    }
                }
            };

            let iteration = Iteration {
                index,
                max: budget,
                reasoning: action.reasoning,
                code: action.code,
                output: render_output(&observation),
                error: observation.error.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            };
            self.record_iteration(iteration).await;

            if let Some(payload) = observation.answer {
                break Ok(Some(payload));
            }
        };

        self.executor.shutdown().await;

        match result {
            Ok(Some(payload)) => {
                self.session.set_status(SessionStatus::Answering);
                let citations = self.validated_citations(&payload.citations);
                self.emit_blocks(&payload.blocks).await;
                self.finish(SessionStatus::Done, payload.blocks, citations)
            }
            Ok(None) => self.forced_synthesis().await,
            Err(err) => self.fail(err).await,
        }
    }

    /// Query the model for the next `{reasoning, code}` step, retrying once
    /// with a stricter instruction on a parse failure.
    async fn generate_action(&mut self, index: u32) -> Result<super::answer::ActionStep> {
        let mut retry_hint = false;
        let mut last_parse_error = None;
        for _ in 0..2 {
            self.quota.acquire()?;
            let prompt_text = prompt::build_action_prompt(
                &self.diff_context,
                &self.params.conversation,
                self.params.selection.as_ref(),
                &self.session.transcript,
                &self.params.question,
                index,
                self.session.iteration_budget,
                retry_hint,
            );
            let request = LlmRequest::new(
                self.controller.config.llm.main_model.clone(),
                prompt_text,
            )
            .with_system(prompt::SYSTEM_PROMPT)
            .with_json_response();

            let completion = tokio::select! {
                () = self.cancel.cancelled() => return Err(Error::Cancelled),
                result = self.controller.llm.complete(&request) => result?,
            };
            self.quota.record(&completion.usage);

            match parse_action(&completion.text) {
                Ok(action) => return Ok(action),
                Err(err) => {
                    debug!(index, "retrying with strict instruction");
                    last_parse_error = Some(err);
                    retry_hint = true;
                }
            }
        }
        Err(last_parse_error.unwrap_or_else(|| Error::Parse("no model output".to_string())))
    }

    /// Budget exhausted without `answer(...)`: force a final synthesis.
    async fn forced_synthesis(&mut self) -> AskOutcome {
        self.session.set_status(SessionStatus::Answering);
        info!(
            review_id = %self.session.review_id,
            "iteration budget exhausted, forcing synthesis"
        );

        let blocks = match self.quota.acquire() {
            Ok(()) => {
                let prompt_text = prompt::build_forced_answer_prompt(
                    &self.diff_context,
                    &self.session.transcript,
                    &self.params.question,
                );
                let request = LlmRequest::new(
                    self.controller.config.llm.main_model.clone(),
                    prompt_text,
                )
                .with_system(prompt::SYSTEM_PROMPT);
                match self.controller.llm.complete(&request).await {
                    Ok(completion) => {
                        self.quota.record(&completion.usage);
                        parse_answer_blocks(&completion.text)
                    }
                    Err(err) => vec![truncation_block(&format!(
                        "the final synthesis call failed: {err}"
                    ))],
                }
            }
            Err(_) => vec![truncation_block("the session's LLM budget was exhausted")],
        };

        self.emit_blocks(&blocks).await;
        self.finish(SessionStatus::Done, blocks, Vec::new())
    }

    async fn fail(&mut self, err: Error) -> AskOutcome {
        let status = match err {
            Error::Deadline => SessionStatus::TimedOut,
            Error::BudgetExceeded(_) => {
                // Graceful path: explain the truncation instead of failing.
                let blocks = vec![truncation_block(&err.to_string())];
                self.emit_blocks(&blocks).await;
                return self.finish(SessionStatus::Done, blocks, Vec::new());
            }
            _ => SessionStatus::Failed,
        };
        warn!(review_id = %self.session.review_id, code = err.code(), "session ended with error");
        let _ = self
            .tx
            .send(SessionEvent::error(err.code(), err.to_string()))
            .await;
        self.session.set_status(status);
        self.session.set_status(SessionStatus::Done);
        AskOutcome {
            blocks: Vec::new(),
            citations: Vec::new(),
            status,
            transcript: self.session.transcript.clone(),
        }
    }

    fn finish(
        &mut self,
        status: SessionStatus,
        blocks: Vec<AnswerBlock>,
        citations: Vec<DiffCitation>,
    ) -> AskOutcome {
        self.session.set_status(status);
        AskOutcome {
            blocks,
            citations,
            status,
            transcript: self.session.transcript.clone(),
        }
    }

    async fn record_iteration(&mut self, iteration: Iteration) {
        let event = SessionEvent::Iteration(iteration.clone());
        if let Err(err) = self.session.push_iteration(iteration) {
            warn!(%err, "dropping out-of-order iteration");
            return;
        }
        let _ = self.tx.send(event).await;
    }

    async fn emit_blocks(&self, blocks: &[AnswerBlock]) {
        for (index, block) in blocks.iter().enumerate() {
            let _ = self
                .tx
                .send(SessionEvent::Block {
                    index,
                    block: block.clone(),
                })
                .await;
        }
    }

    /// Normalize model-supplied citations and keep those naming changed
    /// files; full side repair happens in the review pipeline.
    fn validated_citations(&self, raw: &[Value]) -> Vec<DiffCitation> {
        parse_raw_citations(raw)
            .into_iter()
            .filter_map(normalize_citation)
            .filter(|c| self.loaded.pr_info.touches(&c.path))
            .collect()
    }
}

fn render_output(observation: &crate::sandbox::Observation) -> Option<String> {
    let mut output = observation.stdout.clone();
    if let Some(value) = &observation.return_value {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&format!("=> {value}"));
    }
    if output.is_empty() {
        None
    } else {
        Some(output)
    }
}

fn truncation_block(reason: &str) -> AnswerBlock {
    AnswerBlock::markdown(format!(
        "The review was cut short because {reason}. The findings above reflect only the \
         iterations that completed."
    ))
}

/// Variables injected into the guest interpreter.
fn sandbox_variables(pr: &cr_providers::PRInfo) -> Map<String, Value> {
    let mut variables = Map::new();
    variables.insert(
        "pr".to_string(),
        json!({
            "number": pr.number,
            "title": pr.title,
            "baseSha": pr.base_sha,
            "headSha": pr.head_sha,
            "files": pr.files.iter().map(|f| json!({
                "path": f.path,
                "status": f.status.as_str(),
                "additions": f.additions,
                "deletions": f.deletions,
            })).collect::<Vec<_>>(),
        }),
    );
    variables
}
