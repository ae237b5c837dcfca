use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use colored::Colorize;
use pruefstand::{
    eval::{inquiry_suite, EvalRunner, ExitPolicy, FixtureSet},
    langfuse::LangfuseClient,
    logging,
    pipeline::DEFAULT_INQUIRY_MODEL,
    providers::{openai::OpenAI, scripted::ScriptedProvider},
    structured::StructuredClient,
    trace::{LogSink, TraceRecorder, TraceSink},
    LLMProvider,
};

#[derive(Parser)]
#[command(name = "inquiry-eval")]
#[command(about = "Classify fixture messages and check the results")]
struct Args {
    /// Directory of JSON fixtures
    #[arg(short, long, default_value = "fixtures")]
    fixtures: PathBuf,

    /// Model name (falls back to OPENAI_MODEL, then the built-in default)
    #[arg(short, long)]
    model: Option<String>,

    /// Replay each fixture's recorded output instead of calling the API
    #[arg(long)]
    scripted: bool,

    /// Export traces to Langfuse instead of the log
    #[arg(long)]
    langfuse: bool,

    /// Exit with status 1 when any test fails
    #[arg(long)]
    fail_on_failure: bool,

    /// Per-request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    logging::init("info");
    let args = Args::parse();

    let fixtures = FixtureSet::load_dir(&args.fixtures)?;

    let provider: Arc<dyn LLMProvider> = if args.scripted {
        Arc::new(ScriptedProvider::from_replies(fixtures.recorded_replies()))
    } else {
        Arc::new(OpenAI::from_env()?)
    };
    let model = args
        .model
        .or_else(|| std::env::var("OPENAI_MODEL").ok())
        .unwrap_or_else(|| DEFAULT_INQUIRY_MODEL.to_string());

    let mut client = StructuredClient::new(provider, model);
    if let Some(ms) = args.timeout_ms {
        client = client.with_timeout(Duration::from_millis(ms));
    }

    let sink: Arc<dyn TraceSink> = if args.langfuse {
        Arc::new(LangfuseClient::from_env()?)
    } else {
        Arc::new(LogSink)
    };
    let recorder = TraceRecorder::new(sink);
    let scope = recorder.root_scope();

    let summary = EvalRunner::new()
        .run_suite(inquiry_suite(&client, &scope, &fixtures))
        .await;
    recorder.flush().await;

    println!();
    for result in &summary.results {
        if result.passed {
            println!("{} {}", "✅".green(), result.name);
        } else {
            println!("{} {}", "❌".red(), result.name.red());
            if let Some(reason) = &result.failure_reason {
                println!("   {}", reason.dimmed());
            }
        }
    }
    println!("\n{}", summary.summary_line().bold());

    let policy = if args.fail_on_failure {
        ExitPolicy::FailOnAnyFailure
    } else {
        ExitPolicy::AlwaysSucceed
    };
    std::process::exit(policy.exit_code(&summary));
}
