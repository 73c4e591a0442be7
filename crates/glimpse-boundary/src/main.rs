//! Glimpse boundary worker: one isolated render per process.
//!
//! Spawned by [`glimpse_sandbox::host::ProcessBoundaryFactory`] with only
//! `GLIMPSE_BOUNDARY_ID` in its environment. Frames arrive on stdin and
//! leave on stdout; stderr carries warnings only.

use anyhow::{Context, Result};
use glimpse_boundary::{render, RenderLimits};
use glimpse_sandbox::host::BOUNDARY_ID_ENV;
use glimpse_sandbox::protocol::{read_frame_with_limit, write_envelope, DEFAULT_MAX_MESSAGE_SIZE};
use glimpse_sandbox::{BoundaryId, Envelope, SandboxMessage};
use serde_json::json;
use tokio::io::{self, BufReader};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let boundary = BoundaryId::from(
        std::env::var(BOUNDARY_ID_ENV)
            .with_context(|| format!("{BOUNDARY_ID_ENV} is not set"))?
            .as_str(),
    );
    let env_keys: Vec<String> = std::env::vars().map(|(k, _)| k).collect();
    for key in env_keys {
        std::env::remove_var(&key);
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(tracing::Level::WARN)
        .init();

    let limits = RenderLimits::from_args(std::env::args().skip(1))?;

    let mut stdin = BufReader::new(io::stdin());
    let mut stdout = io::stdout();

    write_envelope(&mut stdout, &Envelope::new(boundary.clone(), SandboxMessage::Ready))
        .await
        .context("failed to announce readiness")?;

    while let Some(frame) = read_frame_with_limit(&mut stdin, DEFAULT_MAX_MESSAGE_SIZE)
        .await
        .context("failed to read from host")?
    {
        let Some(envelope) = Envelope::decode(&frame) else {
            tracing::warn!(len = frame.len(), "dropping malformed frame");
            continue;
        };
        if envelope.boundary != boundary {
            tracing::warn!(boundary = %envelope.boundary, "dropping frame for another boundary");
            continue;
        }
        let kind = envelope.message.kind();
        let SandboxMessage::ExecuteRequest { code, data } = envelope.message else {
            tracing::warn!(?kind, "ignoring unexpected message");
            continue;
        };

        let reply = match render(code, data, limits).await {
            Ok(html) => SandboxMessage::ExecuteSuccess {
                data: Some(json!({ "html": html })),
            },
            Err(e) => SandboxMessage::ExecuteFailure {
                error: e.to_string(),
            },
        };
        write_envelope(&mut stdout, &Envelope::new(boundary, reply))
            .await
            .context("failed to write render result")?;
        return Ok(());
    }

    // Host closed stdin without a request.
    Ok(())
}
