//! Sandbox executor
//!
//! Runs model-generated code in an isolated child interpreter. The child is
//! spawned with a scrubbed environment and Python's isolated mode; its only
//! outward channel is the JSON-lines capability bus owned by the
//! interceptor. The host enforces wall-clock, stdout, and capability
//! limits, and restarts the guest after a timeout.

mod interceptor;
mod protocol;

use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::config::SandboxConfig;
use crate::types::AnswerBlock;
use crate::{Error, Result};

use protocol::{GuestEvent, HostMessage};

pub use interceptor::{CapabilityHandler, SessionInterceptor};

/// Terminal payload produced by the `answer(...)` primitive.
#[derive(Debug, Clone)]
pub struct AnswerPayload {
    pub blocks: Vec<AnswerBlock>,
    /// Raw citation values as the model supplied them; validated later.
    pub citations: Vec<Value>,
}

/// Result of one sandboxed execution.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub stdout: String,
    /// Rendered value of a trailing expression, REPL style
    pub return_value: Option<String>,
    pub error: Option<String>,
    pub truncated: bool,
    pub duration_ms: u64,
    /// Present when this execution called `answer(...)`
    pub answer: Option<AnswerPayload>,
}

struct Guest {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

const RUNNER_SOURCE: &str = include_str!("runner.py");

impl Guest {
    async fn spawn(config: &SandboxConfig) -> Result<Self> {
        let mut command = Command::new(&config.python_command);
        command
            .arg("-I")
            .arg("-u")
            .arg("-X")
            .arg("utf8")
            .arg("-c")
            .arg(RUNNER_SOURCE)
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Sandbox(format!(
                    "interpreter not found at '{}'",
                    config.python_command
                ))
            } else {
                Error::Io(e)
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Sandbox("failed to capture guest stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Sandbox("failed to capture guest stdout".to_string()))?;

        let mut guest = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };
        guest
            .send(&HostMessage::Init {
                max_stdout_bytes: config.max_stdout_bytes,
            })
            .await?;
        debug!(pid = ?guest.child.id(), "spawned sandbox guest");
        Ok(guest)
    }

    async fn send(&mut self, message: &HostMessage<'_>) -> Result<()> {
        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await.map_err(Error::Io)?;
        self.stdin.flush().await.map_err(Error::Io)?;
        Ok(())
    }

    async fn read_event(&mut self) -> Result<GuestEvent> {
        let mut line = String::new();
        let read = self.stdout.read_line(&mut line).await.map_err(Error::Io)?;
        if read == 0 {
            return Err(Error::Sandbox("guest interpreter exited".to_string()));
        }
        serde_json::from_str(line.trim())
            .map_err(|e| Error::Sandbox(format!("invalid guest message: {e}")))
    }

    async fn shutdown(&mut self) {
        let _ = self.stdin.shutdown().await;
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for Guest {
    fn drop(&mut self) {
        self.child.start_kill().ok();
    }
}

/// Per-session sandbox with a persistent guest interpreter.
///
/// Guest globals survive across executions within a session; a timeout
/// forfeits the current execution and replaces the interpreter.
pub struct Executor {
    config: SandboxConfig,
    guest: Option<Guest>,
}

impl Executor {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            guest: None,
        }
    }

    /// Execute one code block under the interceptor.
    ///
    /// Capability errors surface inside the guest as same-named exceptions
    /// and never abort the session; a wall-clock timeout yields
    /// `error = "timeout"`.
    pub async fn execute(
        &mut self,
        handler: &dyn CapabilityHandler,
        code: &str,
        variables: &Map<String, Value>,
    ) -> Result<Observation> {
        let started = Instant::now();
        let result = self.execute_inner(handler, code, variables, started).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(mut observation) => {
                observation.duration_ms = duration_ms;
                Ok(observation)
            }
            Err(Error::SandboxTimeout(secs)) => {
                warn!(secs, "sandbox execution timed out");
                if let Some(mut guest) = self.guest.take() {
                    guest.shutdown().await;
                }
                Ok(Observation {
                    error: Some("timeout".to_string()),
                    duration_ms,
                    ..Default::default()
                })
            }
            Err(other) => {
                // Protocol-level failures poison the guest; drop it so the
                // next execution starts clean.
                if let Some(mut guest) = self.guest.take() {
                    guest.shutdown().await;
                }
                Err(other)
            }
        }
    }

    async fn execute_inner(
        &mut self,
        handler: &dyn CapabilityHandler,
        code: &str,
        variables: &Map<String, Value>,
        started: Instant,
    ) -> Result<Observation> {
        if self.guest.is_none() {
            self.guest = Some(Guest::spawn(&self.config).await?);
        }
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let Some(guest) = self.guest.as_mut() else {
            return Err(Error::Sandbox("guest failed to start".to_string()));
        };

        guest.send(&HostMessage::Exec { code, variables }).await?;

        let mut llm_queries: u32 = 0;
        loop {
            let remaining = timeout
                .checked_sub(started.elapsed())
                .ok_or(Error::SandboxTimeout(self.config.timeout_secs))?;
            let event = tokio::time::timeout(remaining, guest.read_event())
                .await
                .map_err(|_| Error::SandboxTimeout(self.config.timeout_secs))??;

            match event {
                GuestEvent::CapabilityCall { name, args, kwargs } => {
                    let remaining = timeout
                        .checked_sub(started.elapsed())
                        .ok_or(Error::SandboxTimeout(self.config.timeout_secs))?;
                    let outcome = tokio::time::timeout(
                        remaining,
                        dispatch_capability(
                            handler,
                            &name,
                            &args,
                            &kwargs,
                            &mut llm_queries,
                            self.config.max_llm_queries,
                        ),
                    )
                    .await
                    .map_err(|_| Error::SandboxTimeout(self.config.timeout_secs))?;

                    let reply = match outcome {
                        Ok(value) => HostMessage::CapabilityResult {
                            ok: true,
                            value: Some(value),
                            error: None,
                            error_kind: None,
                        },
                        Err(err) => HostMessage::CapabilityResult {
                            ok: false,
                            value: None,
                            error: Some(err.to_string()),
                            error_kind: Some(interceptor::guest_error_kind(&err).to_string()),
                        },
                    };
                    guest.send(&reply).await?;
                }
                GuestEvent::ExecResult {
                    kind,
                    stdout,
                    truncated,
                    value,
                    blocks,
                    citations,
                    error,
                } => {
                    return match kind.as_str() {
                        "done" => Ok(Observation {
                            stdout,
                            return_value: value,
                            truncated,
                            ..Default::default()
                        }),
                        "answer" => {
                            let blocks: Vec<AnswerBlock> = blocks
                                .map(serde_json::from_value)
                                .transpose()?
                                .unwrap_or_default();
                            let citations = match citations {
                                Some(Value::Array(items)) => items,
                                _ => Vec::new(),
                            };
                            Ok(Observation {
                                stdout,
                                truncated,
                                answer: Some(AnswerPayload { blocks, citations }),
                                ..Default::default()
                            })
                        }
                        "error" => Ok(Observation {
                            stdout,
                            truncated,
                            error: error.or_else(|| Some("execution failed".to_string())),
                            ..Default::default()
                        }),
                        other => Err(Error::Sandbox(format!(
                            "unknown exec result kind: {other}"
                        ))),
                    };
                }
            }
        }
    }

    /// Tear down the guest interpreter.
    pub async fn shutdown(&mut self) {
        if let Some(mut guest) = self.guest.take() {
            guest.shutdown().await;
        }
    }
}

async fn dispatch_capability(
    handler: &dyn CapabilityHandler,
    name: &str,
    args: &[Value],
    kwargs: &Map<String, Value>,
    llm_queries: &mut u32,
    max_llm_queries: u32,
) -> Result<Value> {
    match name {
        "fetch_file" => {
            let path = str_arg(args, 0, "path")?;
            let sha = opt_str_kwarg(kwargs, "sha");
            handler.fetch_file(path, sha).await.map(Value::String)
        }
        "search" => {
            let query = str_arg(args, 0, "query")?;
            let sha = opt_str_kwarg(kwargs, "sha");
            let hits = handler.search(query, sha).await?;
            Ok(serde_json::to_value(hits)?)
        }
        "llm_query" => {
            if *llm_queries >= max_llm_queries {
                return Err(Error::CapabilityDenied(format!(
                    "llm_query limit of {max_llm_queries} per execution reached"
                )));
            }
            *llm_queries += 1;
            let prompt = str_arg(args, 0, "prompt")?;
            let system = opt_str_kwarg(kwargs, "system");
            handler.llm_query(prompt, system).await.map(Value::String)
        }
        other => Err(Error::CapabilityDenied(format!(
            "unknown capability: {other}"
        ))),
    }
}

fn str_arg<'a>(args: &'a [Value], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::CapabilityDenied(format!("argument `{name}` must be a string")))
}

fn opt_str_kwarg<'a>(kwargs: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    kwargs.get(name).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cr_providers::SearchHit;

    struct StubHandler;

    #[async_trait]
    impl CapabilityHandler for StubHandler {
        async fn fetch_file(&self, path: &str, _sha: Option<&str>) -> Result<String> {
            if path == "missing.txt" {
                return Err(Error::from(cr_providers::Error::NotFound(path.into())));
            }
            Ok(format!("contents of {path}"))
        }

        async fn search(&self, query: &str, _sha: Option<&str>) -> Result<Vec<SearchHit>> {
            Ok(vec![SearchHit {
                path: "src/lib.rs".into(),
                line: 3,
                snippet: format!("match for {query}"),
            }])
        }

        async fn llm_query(&self, prompt: &str, _system: Option<&str>) -> Result<String> {
            Ok(format!("echo: {prompt}"))
        }
    }

    fn executor() -> Executor {
        Executor::new(SandboxConfig::default())
    }

    fn exec_timeout(secs: u64) -> Executor {
        Executor::new(SandboxConfig {
            timeout_secs: secs,
            ..SandboxConfig::default()
        })
    }

    #[tokio::test]
    async fn test_print_is_captured() {
        let mut executor = executor();
        let obs = executor
            .execute(&StubHandler, "print('hello sandbox')", &Map::new())
            .await
            .unwrap();
        assert_eq!(obs.stdout, "hello sandbox\n");
        assert!(obs.error.is_none());
        assert!(obs.answer.is_none());
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_trailing_expression_value() {
        let mut executor = executor();
        let obs = executor
            .execute(&StubHandler, "x = 40\nx + 2", &Map::new())
            .await
            .unwrap();
        assert_eq!(obs.return_value.as_deref(), Some("42"));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_state_persists_across_executions() {
        let mut executor = executor();
        executor
            .execute(&StubHandler, "state = {'n': 1}", &Map::new())
            .await
            .unwrap();
        let obs = executor
            .execute(&StubHandler, "state['n'] + 1", &Map::new())
            .await
            .unwrap();
        assert_eq!(obs.return_value.as_deref(), Some("2"));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_capability_fetch_file_roundtrip() {
        let mut executor = executor();
        let obs = executor
            .execute(&StubHandler, "print(fetch_file('README'))", &Map::new())
            .await
            .unwrap();
        assert_eq!(obs.stdout, "contents of README\n");
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_capability_error_raises_named_exception() {
        let mut executor = executor();
        let code = r#"
try:
    fetch_file('missing.txt')
except NotFound as e:
    print('caught NotFound')
"#;
        let obs = executor
            .execute(&StubHandler, code, &Map::new())
            .await
            .unwrap();
        assert_eq!(obs.stdout, "caught NotFound\n");
        assert!(obs.error.is_none());
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_uncaught_capability_error_is_short_traceback() {
        let mut executor = executor();
        let obs = executor
            .execute(&StubHandler, "fetch_file('missing.txt')", &Map::new())
            .await
            .unwrap();
        let error = obs.error.unwrap();
        assert!(error.contains("NotFound"), "{error}");
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_answer_is_terminal() {
        let mut executor = executor();
        let code = r#"answer([{"type": "markdown", "content": "No issues."}])"#;
        let obs = executor
            .execute(&StubHandler, code, &Map::new())
            .await
            .unwrap();
        let payload = obs.answer.unwrap();
        assert_eq!(payload.blocks.len(), 1);
        assert_eq!(payload.blocks[0].content, "No issues.");
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_capability_after_answer_dropped_silently() {
        let mut executor = executor();
        let code = r#"
try:
    answer(["done"])
except BaseException as signal:
    result = fetch_file('README')
    print('result is', result)
    raise signal
"#;
        let obs = executor
            .execute(&StubHandler, code, &Map::new())
            .await
            .unwrap();
        let payload = obs.answer.expect("answer should still terminate");
        assert_eq!(payload.blocks[0].content, "done");
        assert!(obs.stdout.contains("result is None"));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_second_answer_is_error() {
        let mut executor = executor();
        let code = r#"
try:
    answer(["first"])
except BaseException:
    pass
try:
    answer(["second"])
except RuntimeError as e:
    print('second rejected:', e)
"#;
        let obs = executor
            .execute(&StubHandler, code, &Map::new())
            .await
            .unwrap();
        assert!(obs.stdout.contains("second rejected"));
        let payload = obs.answer.unwrap();
        assert_eq!(payload.blocks[0].content, "first");
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stdout_truncated_with_marker() {
        let mut executor = Executor::new(SandboxConfig {
            max_stdout_bytes: 64,
            ..SandboxConfig::default()
        });
        let obs = executor
            .execute(&StubHandler, "print('x' * 1000)", &Map::new())
            .await
            .unwrap();
        assert!(obs.truncated);
        assert!(obs.stdout.ends_with("…[truncated]"), "{}", obs.stdout);
        assert_eq!(obs.stdout.len(), 64 + "…[truncated]".len());
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_stdout_cap_is_bytes_not_chars() {
        let mut executor = Executor::new(SandboxConfig {
            max_stdout_bytes: 64,
            ..SandboxConfig::default()
        });
        // Two UTF-8 bytes per char, so 1000 chars is well past the cap.
        let obs = executor
            .execute(&StubHandler, "print('é' * 1000)", &Map::new())
            .await
            .unwrap();
        assert!(obs.truncated);
        assert!(obs.stdout.ends_with("…[truncated]"), "{}", obs.stdout);
        let kept = obs.stdout.trim_end_matches("…[truncated]");
        assert!(kept.len() <= 64, "kept {} bytes", kept.len());
        assert!(kept.chars().all(|c| c == 'é'));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let mut executor = exec_timeout(1);
        let obs = executor
            .execute(&StubHandler, "while True: pass", &Map::new())
            .await
            .unwrap();
        assert_eq!(obs.error.as_deref(), Some("timeout"));
        // The session continues with a fresh guest.
        let obs = executor
            .execute(&StubHandler, "1 + 1", &Map::new())
            .await
            .unwrap();
        assert_eq!(obs.return_value.as_deref(), Some("2"));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_llm_query_limit_enforced() {
        let mut executor = Executor::new(SandboxConfig {
            max_llm_queries: 2,
            ..SandboxConfig::default()
        });
        let code = r#"
print(llm_query('one'))
print(llm_query('two'))
try:
    llm_query('three')
except CapabilityDenied:
    print('third denied')
"#;
        let obs = executor
            .execute(&StubHandler, code, &Map::new())
            .await
            .unwrap();
        assert!(obs.stdout.contains("echo: one"));
        assert!(obs.stdout.contains("echo: two"));
        assert!(obs.stdout.contains("third denied"));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_variables_are_injected() {
        let mut executor = executor();
        let mut variables = Map::new();
        variables.insert(
            "pr".to_string(),
            serde_json::json!({"number": 7, "title": "Fix"}),
        );
        let obs = executor
            .execute(&StubHandler, "print(pr['number'], pr['title'])", &variables)
            .await
            .unwrap();
        assert_eq!(obs.stdout, "7 Fix\n");
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_search_results_shape() {
        let mut executor = executor();
        let code = r#"
hits = search('TODO')
print(hits[0]['path'], hits[0]['line'])
"#;
        let obs = executor
            .execute(&StubHandler, code, &Map::new())
            .await
            .unwrap();
        assert_eq!(obs.stdout, "src/lib.rs 3\n");
        executor.shutdown().await;
    }
}
