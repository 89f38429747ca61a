//! Generator backed by an external script speaking JSON lines.
//!
//! The subprocess is spawned on first use and must print a `ready` message.
//! Each request is one line on stdin and gets exactly one line back on
//! stdout:
//!
//! ```text
//! → {"type":"generate","id":"req-1","fields":{...}}
//! ← {"type":"result","id":"req-1","result":{"title":...,"seo_score":82.5}}
//! ← {"type":"error","id":"req-1","kind":"quota_exceeded","error":"..."}
//! ```
//!
//! A timeout or broken pipe drops the process; the next call respawns it.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use autopress_core::{CollaboratorError, GeneratedContent, Generator};
use autopress_shared::{BridgeSection, ContentFields, ContentPayload, FailureKind};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Generate { id: String, fields: &'a ContentFields },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result { id: String, result: BridgeResult },
    Error {
        id: String,
        #[serde(default)]
        kind: Option<String>,
        error: String,
    },
}

#[derive(Debug, Deserialize)]
struct BridgeResult {
    title: String,
    #[serde(default)]
    slug: String,
    body: String,
    #[serde(default)]
    meta_description: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    seo_score: f64,
    #[serde(default)]
    extra: serde_json::Value,
}

impl From<BridgeResult> for GeneratedContent {
    fn from(r: BridgeResult) -> Self {
        GeneratedContent {
            payload: ContentPayload {
                title: r.title,
                slug: r.slug,
                body: r.body,
                meta_description: r.meta_description,
                tags: r.tags,
                category: r.category,
                degraded: false,
                extra: r.extra,
            },
            seo_score: r.seo_score,
        }
    }
}

fn bridge_error(message: impl Into<String>) -> CollaboratorError {
    CollaboratorError::new(FailureKind::Generation, message)
}

/// Failure kinds a script may report; anything else is a generation error.
fn reported_kind(kind: Option<&str>) -> FailureKind {
    match kind {
        Some("quota_exceeded") => FailureKind::QuotaExceeded,
        Some("rate_limited") => FailureKind::RateLimited,
        Some("timeout") => FailureKind::Timeout,
        _ => FailureKind::Generation,
    }
}

// ---------------------------------------------------------------------------
// Bridge handle
// ---------------------------------------------------------------------------

struct BridgeHandle {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl BridgeHandle {
    async fn spawn(config: &BridgeSection) -> Result<Self, CollaboratorError> {
        info!(cmd = %config.command, args = ?config.args, "spawning generator bridge");

        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                bridge_error(format!(
                    "failed to spawn bridge: {e}. Is `{}` installed?",
                    config.command
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| bridge_error("failed to capture bridge stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| bridge_error("failed to capture bridge stdout"))?;

        let mut handle = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };

        match handle.read_message().await? {
            ResponseMessage::Ready => {
                info!("bridge is ready");
                Ok(handle)
            }
            other => Err(bridge_error(format!("expected ready message, got {other:?}"))),
        }
    }

    async fn read_message(&mut self) -> Result<ResponseMessage, CollaboratorError> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .await
            .map_err(|e| bridge_error(format!("bridge read error: {e}")))?;
        if line.is_empty() {
            return Err(bridge_error("bridge closed stdout unexpectedly"));
        }
        serde_json::from_str(line.trim()).map_err(|e| {
            let snippet: String = line.chars().take(200).collect();
            bridge_error(format!("invalid bridge message: {e} (got: {snippet})"))
        })
    }

    async fn write_message(&mut self, msg: &RequestMessage<'_>) -> Result<(), CollaboratorError> {
        let mut json = serde_json::to_string(msg)
            .map_err(|e| bridge_error(format!("failed to serialize request: {e}")))?;
        json.push('\n');
        self.stdin
            .write_all(json.as_bytes())
            .await
            .map_err(|e| bridge_error(format!("failed to write to bridge stdin: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| bridge_error(format!("failed to flush bridge stdin: {e}")))
    }

    /// The outer error is a transport or protocol failure; the inner result
    /// is what the script answered.
    async fn generate(
        &mut self,
        fields: &ContentFields,
    ) -> Result<Result<GeneratedContent, CollaboratorError>, CollaboratorError> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);
        self.write_message(&RequestMessage::Generate {
            id: id.clone(),
            fields,
        })
        .await?;

        match self.read_message().await? {
            ResponseMessage::Result { id: resp_id, result } if resp_id == id => Ok(Ok(result.into())),
            ResponseMessage::Error {
                id: resp_id,
                kind,
                error,
            } if resp_id == id => Ok(Err(CollaboratorError::new(
                reported_kind(kind.as_deref()),
                error,
            ))),
            other => Err(bridge_error(format!("unexpected response to {id}: {other:?}"))),
        }
    }

    async fn shutdown(mut self) {
        if self.write_message(&RequestMessage::Shutdown).await.is_err() {
            return;
        }
        match tokio::time::timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(Ok(status)) => info!(?status, "bridge exited"),
            Ok(Err(e)) => warn!("bridge wait error: {e}"),
            Err(_) => warn!("bridge did not exit after shutdown, killing"),
        }
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// [`Generator`] talking to the bridge subprocess. Requests are serialized.
pub struct BridgeGenerator {
    config: BridgeSection,
    handle: Mutex<Option<BridgeHandle>>,
}

impl BridgeGenerator {
    pub fn new(config: &BridgeSection) -> Self {
        Self {
            config: config.clone(),
            handle: Mutex::new(None),
        }
    }

    /// Ask the subprocess to exit, if one is running.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.shutdown().await;
        }
    }
}

#[async_trait]
impl Generator for BridgeGenerator {
    async fn generate(&self, fields: &ContentFields) -> Result<GeneratedContent, CollaboratorError> {
        let mut slot = self.handle.lock().await;
        if slot.is_none() {
            *slot = Some(BridgeHandle::spawn(&self.config).await?);
        }
        let Some(handle) = slot.as_mut() else {
            return Err(bridge_error("bridge process unavailable"));
        };

        let timeout = Duration::from_secs(self.config.timeout_secs.max(1));
        let failure = match tokio::time::timeout(timeout, handle.generate(fields)).await {
            Ok(Ok(reply)) => return reply,
            Ok(Err(e)) => e,
            Err(_) => CollaboratorError::new(
                FailureKind::Timeout,
                format!("no bridge response within {}s", timeout.as_secs()),
            ),
        };

        // The stream position is unknown after a transport failure.
        debug!(error = %failure, "dropping bridge process");
        *slot = None;
        Err(failure)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script(body: &str) -> BridgeSection {
        BridgeSection {
            command: "sh".into(),
            args: vec!["-c".into(), body.into()],
            timeout_secs: 5,
        }
    }

    fn fields() -> ContentFields {
        ContentFields {
            name: "Grinder".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn generates_through_the_bridge() {
        let generator = BridgeGenerator::new(&script(
            r#"echo '{"type":"ready"}'
read line
echo '{"type":"result","id":"req-1","result":{"title":"Grinder review","slug":"grinder","body":"<p>x</p>","tags":["coffee"],"seo_score":82.5}}'
read line"#,
        ));
        let generated = generator.generate(&fields()).await.unwrap();
        assert_eq!(generated.payload.title, "Grinder review");
        assert_eq!(generated.payload.tags, vec!["coffee".to_string()]);
        assert!(!generated.payload.degraded);
        assert_eq!(generated.seo_score, 82.5);
        generator.shutdown().await;
    }

    #[tokio::test]
    async fn quota_errors_are_classified() {
        let generator = BridgeGenerator::new(&script(
            r#"echo '{"type":"ready"}'
read line
echo '{"type":"error","id":"req-1","kind":"quota_exceeded","error":"monthly quota used"}'
read line"#,
        ));
        let err = generator.generate(&fields()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::QuotaExceeded);
        assert_eq!(err.message, "monthly quota used");
    }

    #[tokio::test]
    async fn missing_ready_message_fails() {
        let generator = BridgeGenerator::new(&script("exit 0"));
        let err = generator.generate(&fields()).await.unwrap_err();
        assert_eq!(err.kind, FailureKind::Generation);
        assert!(err.message.contains("closed stdout"));
    }
}
