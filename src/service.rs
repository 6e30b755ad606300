//! Request/response envelopes and the newline delimited JSON serve loop.
//!
//! Every action maps to one [`ServiceResponse`] shape:
//!
//! | action      | success                          |
//! |-------------|----------------------------------|
//! | `list`      | `["name", "dir/", ...]`          |
//! | `remove`    | `{"error": 0}`                   |
//! | `move`      | `{"path": target, "error": 0}`   |
//! | `mkdir`     | `{"path": path, "error": 0}`     |
//! | `tv_rename` | `{"path": new_path, "error": 0}` |
//!
//! Failures are `{"error": -1, "message": ...}` with the jail root stripped
//! from the message.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use crate::error::Error;
use crate::fsops::{DirectoryEntry, FileManager};
use crate::lookup::LookupClient;
use crate::rename::EpisodeRenamer;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ServiceRequest {
    List {
        #[serde(default)]
        path: String,
    },
    Remove {
        path: String,
    },
    Move {
        source: String,
        target: String,
    },
    Mkdir {
        path: String,
    },
    TvRename {
        path: String,
    },
}

impl ServiceRequest {
    pub fn action(&self) -> &'static str {
        match self {
            ServiceRequest::List { .. } => "list",
            ServiceRequest::Remove { .. } => "remove",
            ServiceRequest::Move { .. } => "move",
            ServiceRequest::Mkdir { .. } => "mkdir",
            ServiceRequest::TvRename { .. } => "tv_rename",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ServiceResponse {
    Listing(Vec<String>),
    Done { error: i32 },
    Path { path: String, error: i32 },
    Failure { error: i32, message: String },
}

impl ServiceResponse {
    pub fn done() -> Self {
        Self::Done { error: 0 }
    }

    pub fn path(path: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            error: 0,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            error: -1,
            message: message.into(),
        }
    }

    pub fn listing(entries: &[DirectoryEntry]) -> Self {
        Self::Listing(entries.iter().map(DirectoryEntry::display_name).collect())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

#[derive(Debug, Serialize)]
struct Reply {
    id: Option<Value>,
    result: ServiceResponse,
}

pub struct Service {
    files: FileManager,
    lookup: LookupClient,
}

impl Service {
    pub fn new(files: FileManager, lookup: LookupClient) -> Self {
        Self { files, lookup }
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn lookup(&self) -> &LookupClient {
        &self.lookup
    }

    #[instrument(skip_all, fields(action = request.action()))]
    pub async fn handle(&self, request: ServiceRequest) -> ServiceResponse {
        let result = match request {
            ServiceRequest::List { path } => self
                .files
                .list(&path)
                .await
                .map(|entries| ServiceResponse::listing(&entries)),
            ServiceRequest::Remove { path } => self
                .files
                .remove(&path)
                .await
                .map(|()| ServiceResponse::done()),
            ServiceRequest::Move { source, target } => self
                .files
                .rename(&source, &target)
                .await
                .map(|()| ServiceResponse::path(target)),
            ServiceRequest::Mkdir { path } => self
                .files
                .make_directory(&path)
                .await
                .map(|()| ServiceResponse::path(path)),
            ServiceRequest::TvRename { path } => EpisodeRenamer::new(self.files.jail(), &self.lookup)
                .rename_episode(&path)
                .await
                .map(ServiceResponse::path),
        };
        result.unwrap_or_else(|err| self.failure(&err))
    }

    /// The client-facing form of `err`.
    pub fn failure(&self, err: &Error) -> ServiceResponse {
        let message = self.files.jail().redact(&err.chain_message());
        warn!(%message, "request failed");
        ServiceResponse::failure(message)
    }

    /// Answer one line of the serve protocol. The `id` is taken from the raw
    /// object first, so a request with an unknown action is still answered
    /// under its own id.
    async fn handle_line(&self, line: &str) -> Reply {
        let mut value = match serde_json::from_str::<Value>(line) {
            Ok(value) => value,
            Err(err) => return unhandled(None, err),
        };
        let id = value.as_object_mut().and_then(|object| object.remove("id"));
        match ServiceRequest::deserialize(value) {
            Ok(request) => Reply {
                id,
                result: self.handle(request).await,
            },
            Err(err) => unhandled(id, err),
        }
    }
}

/// Read one JSON request per line from `input` and write one reply per line
/// to `output`. Each request runs on its own task, so replies are written in
/// completion order and carry the request `id`.
pub async fn serve<R, W>(service: Arc<Service>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut pending = JoinSet::new();
    let mut reading = true;
    info!(root = %service.files.jail().root().display(), "serving requests");

    while reading || !pending.is_empty() {
        tokio::select! {
            line = lines.next_line(), if reading => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    let service = Arc::clone(&service);
                    pending.spawn(async move { service.handle_line(&line).await });
                }
                None => reading = false,
            },
            Some(joined) = pending.join_next() => match joined {
                Ok(reply) => write_reply(&mut output, &reply).await?,
                Err(err) => warn!(%err, "request task failed"),
            },
            else => break,
        }
    }
    Ok(())
}

fn unhandled(id: Option<Value>, err: serde_json::Error) -> Reply {
    warn!(%err, "unhandled request");
    Reply {
        id,
        result: ServiceResponse::failure(format!("Unhandled request: {err}")),
    }
}

async fn write_reply<W>(output: &mut W, reply: &Reply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(reply)?;
    line.push(b'\n');
    output.write_all(&line).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jail::Jail;
    use crate::lookup::LookupConfig;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn create_test_service() -> (TempDir, Service) {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("jail");
        fs::create_dir_all(root.join("shows")).unwrap();
        fs::write(root.join("notes.txt"), "x").unwrap();
        let jail = Jail::new(&root, false).unwrap();
        let lookup = LookupClient::new(&LookupConfig {
            endpoint: "http://127.0.0.1:9/quickinfo.php".to_string(),
            ..LookupConfig::default()
        })
        .unwrap();
        (temp_dir, Service::new(FileManager::new(jail), lookup))
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            serde_json::to_value(ServiceResponse::Listing(vec![
                "a/".to_string(),
                "b".to_string()
            ]))
            .unwrap(),
            json!(["a/", "b"])
        );
        assert_eq!(
            serde_json::to_value(ServiceResponse::done()).unwrap(),
            json!({"error": 0})
        );
        assert_eq!(
            serde_json::to_value(ServiceResponse::path("/x")).unwrap(),
            json!({"path": "/x", "error": 0})
        );
        assert_eq!(
            serde_json::to_value(ServiceResponse::failure("nope")).unwrap(),
            json!({"error": -1, "message": "nope"})
        );
    }

    #[test]
    fn test_request_parsing() {
        let request: ServiceRequest =
            serde_json::from_value(json!({"action": "move", "source": "/a", "target": "/b"}))
                .unwrap();
        assert_eq!(
            request,
            ServiceRequest::Move {
                source: "/a".to_string(),
                target: "/b".to_string()
            }
        );
        let request: ServiceRequest = serde_json::from_value(json!({"action": "list"})).unwrap();
        assert_eq!(
            request,
            ServiceRequest::List {
                path: String::new()
            }
        );
        assert!(serde_json::from_value::<ServiceRequest>(json!({"action": "proxy"})).is_err());
    }

    #[tokio::test]
    async fn test_handle_list() {
        let (_temp_dir, service) = create_test_service();
        let response = service
            .handle(ServiceRequest::List {
                path: "/".to_string(),
            })
            .await;
        let ServiceResponse::Listing(mut names) = response else {
            panic!("expected a listing, got {response:?}");
        };
        names.sort();
        assert_eq!(names, vec!["notes.txt", "shows/"]);
    }

    #[tokio::test]
    async fn test_handle_mkdir_and_move() {
        let (_temp_dir, service) = create_test_service();
        let response = service
            .handle(ServiceRequest::Mkdir {
                path: "/shows/lost".to_string(),
            })
            .await;
        assert_eq!(response, ServiceResponse::path("/shows/lost"));

        let response = service
            .handle(ServiceRequest::Move {
                source: "/notes.txt".to_string(),
                target: "/shows/lost/notes.txt".to_string(),
            })
            .await;
        assert_eq!(response, ServiceResponse::path("/shows/lost/notes.txt"));
        assert!(
            service
                .files()
                .jail()
                .root()
                .join("shows/lost/notes.txt")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_handle_remove() {
        let (_temp_dir, service) = create_test_service();
        let response = service
            .handle(ServiceRequest::Remove {
                path: "notes.txt".to_string(),
            })
            .await;
        assert_eq!(response, ServiceResponse::done());
    }

    #[tokio::test]
    async fn test_failure_hides_jail_root() {
        let (_temp_dir, service) = create_test_service();
        let response = service
            .handle(ServiceRequest::List {
                path: "missing".to_string(),
            })
            .await;
        let ServiceResponse::Failure { error, message } = response else {
            panic!("expected a failure, got {response:?}");
        };
        assert_eq!(error, -1);
        assert_eq!(message, "/missing: no such file or directory");
    }

    #[tokio::test]
    async fn test_handle_outside_jail() {
        let (_temp_dir, service) = create_test_service();
        let response = service
            .handle(ServiceRequest::Remove {
                path: "../../etc".to_string(),
            })
            .await;
        assert_eq!(response, ServiceResponse::failure("path outside of jail"));
    }

    #[tokio::test]
    async fn test_serve_replies_per_line() {
        let (_temp_dir, service) = create_test_service();
        let input = concat!(
            r#"{"id": 1, "action": "mkdir", "path": "/movies"}"#,
            "\n\n",
            r#"{"id": 2, "action": "frobnicate"}"#,
            "\n",
            "not json\n",
        );
        let mut output = Vec::new();
        serve(Arc::new(service), input.as_bytes(), &mut output)
            .await
            .unwrap();

        let replies = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(replies.len(), 3);
        assert!(replies.contains(&json!({"id": 1, "result": {"path": "/movies", "error": 0}})));
        let failures = replies
            .iter()
            .filter(|reply| reply["result"]["error"] == json!(-1))
            .count();
        assert_eq!(failures, 2);
    }

    #[tokio::test]
    async fn test_unknown_action_keeps_id() {
        let (_temp_dir, service) = create_test_service();
        let reply = service
            .handle_line(r#"{"id": "req-7", "action": "frobnicate"}"#)
            .await;
        assert_eq!(reply.id, Some(json!("req-7")));
        assert!(reply.result.is_failure());

        let reply = service.handle_line(r#"{"id": 8, "action": "remove"}"#).await;
        assert_eq!(reply.id, Some(json!(8)));
        assert!(reply.result.is_failure());

        let reply = service.handle_line("not json").await;
        assert_eq!(reply.id, None);
        assert!(reply.result.is_failure());
    }
}
