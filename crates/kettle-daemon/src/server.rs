//! Unix socket server

use kettle_core::Sandbox;
use kettle_core::protocol::{self, Request, Response};
use std::future::Future;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};

/// Accept connections until `shutdown` resolves.
///
/// Connections already accepted keep running on their own tasks; the caller
/// drains them through [`Sandbox::shutdown`].
pub async fn run(
    listener: UnixListener,
    sandbox: Arc<Sandbox>,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    tokio::pin!(shutdown);

    loop {
        let (stream, _) = tokio::select! {
            () = &mut shutdown => {
                tracing::info!("no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => accepted?,
        };
        let sandbox = Arc::clone(&sandbox);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, sandbox).await {
                tracing::error!(error = %e, "connection error");
            }
        });
    }
}

/// Serve requests on one connection, one at a time.
async fn handle_connection(mut stream: UnixStream, sandbox: Arc<Sandbox>) -> std::io::Result<()> {
    while let Some(request) = protocol::read_frame::<_, Request>(&mut stream).await? {
        tracing::debug!(request = request_kind(&request), "received request");
        let response = handle_request(request, &sandbox).await;
        protocol::write_frame(&mut stream, &response).await?;
    }
    Ok(())
}

/// Handle a single request
async fn handle_request(request: Request, sandbox: &Sandbox) -> Response {
    match request {
        Request::CompileAndRun { source } => match protocol::validate_submission(&source) {
            Ok(source) => Response::Result(sandbox.compile_and_run(source).await),
            Err(e) => Response::Rejected {
                message: e.to_string(),
            },
        },
        Request::Status => Response::Status(sandbox.status()),
        Request::Ping => Response::Pong,
    }
}

const fn request_kind(request: &Request) -> &'static str {
    match request {
        Request::CompileAndRun { .. } => "compile_and_run",
        Request::Status => "status",
        Request::Ping => "ping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kettle_core::SandboxConfig;
    use pretty_assertions::assert_eq;

    fn sandbox(root: &std::path::Path) -> Arc<Sandbox> {
        let config = SandboxConfig::builder()
            .temp_root(root)
            .javac_path("/nonexistent/bin/javac")
            .build();
        Arc::new(Sandbox::new(config).unwrap())
    }

    #[tokio::test]
    async fn blank_source_never_reaches_the_sandbox() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());

        let response = handle_request(
            Request::CompileAndRun {
                source: "   \n".into(),
            },
            &sandbox,
        )
        .await;

        assert_eq!(
            response,
            Response::Rejected {
                message: protocol::EMPTY_SUBMISSION.into()
            }
        );
        assert_eq!(sandbox.status().total, 0);
    }

    #[tokio::test]
    async fn faults_come_back_as_results() {
        let root = tempfile::tempdir().unwrap();
        let sandbox = sandbox(root.path());

        let response = handle_request(
            Request::CompileAndRun {
                source: "public class Main {}".into(),
            },
            &sandbox,
        )
        .await;

        let Response::Result(result) = response else {
            panic!("unexpected response: {response:?}");
        };
        assert_eq!(result.output, "");
        assert!(result.errors.starts_with("toolchain unavailable"));
    }

    #[tokio::test]
    async fn serves_over_a_socket_until_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let socket = root.path().join("kettle.sock");
        let listener = UnixListener::bind(&socket).unwrap();
        let sandbox = sandbox(&root.path().join("work"));
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(run(listener, Arc::clone(&sandbox), async move {
            let _ = stop_rx.await;
        }));

        let mut client = UnixStream::connect(&socket).await.unwrap();
        protocol::write_frame(&mut client, &Request::Ping).await.unwrap();
        let pong: Option<Response> = protocol::read_frame(&mut client).await.unwrap();
        assert_eq!(pong, Some(Response::Pong));

        protocol::write_frame(&mut client, &Request::Status).await.unwrap();
        let status: Option<Response> = protocol::read_frame(&mut client).await.unwrap();
        assert!(matches!(status, Some(Response::Status(s)) if s.total == 0 && !s.shutting_down));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
