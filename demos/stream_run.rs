use std::io::{stdout, Write};

use openai_assistants::{
    assistants::{
        events::EventPhase,
        runs::{CreateThreadBuilder, CreateThreadMessageRequest, CreateThreadRunBuilder},
        stream::{observe, RunStream, StreamEvent},
    },
    client::OpenAiClient,
    Credentials,
};
use tokio_util::sync::CancellationToken;

// Usage: cargo run --example stream_run -- <assistant id> <prompt>
// Reads `OPENAI_KEY` (and optionally `OPENAI_BASE_URL`) from the environment or `.env`.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "openai_assistants=info".to_owned()))
        .init();

    let mut args = std::env::args().skip(1);
    let assistant_id = args.next().ok_or_else(|| anyhow::anyhow!("missing assistant id"))?;
    let prompt = args.collect::<Vec<_>>().join(" ");

    let client = OpenAiClient::new(Credentials::from_env()?)?;
    let request = CreateThreadRunBuilder::default()
        .assistant_id(assistant_id)
        .thread(
            CreateThreadBuilder::default()
                .messages(vec![CreateThreadMessageRequest::user(prompt)])
                .build()?,
        )
        .build()?;

    // Ctrl-C stops reading and keeps whatever the run got to.
    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        }
    });

    let mut printed = 0;
    let observer = observe(|event| {
        match event {
            StreamEvent::Message { phase, message } => {
                let text = message.text();
                if phase == EventPhase::Created {
                    printed = 0;
                }
                if text.len() > printed {
                    print!("{}", &text[printed..]);
                    printed = text.len();
                    stdout().flush()?;
                }
                if phase == EventPhase::Completed {
                    println!();
                }
            }
            StreamEvent::Error(error) => eprintln!("server error: {error}"),
            StreamEvent::ProtocolViolation(violation) => eprintln!("skipped update: {violation}"),
            _ => {}
        }
        Ok(())
    });

    let run = client
        .create_thread_run_stream(request, RunStream::with_cancellation(cancel), observer)
        .await?;

    println!("run {} finished as {:?}", run.id, run.status);
    if let Some(usage) = run.usage {
        println!("{} tokens used", usage.total_tokens);
    }

    Ok(())
}
