use std::sync::Arc;

use clap::{Parser, ValueEnum};
use pruefstand::{
    langfuse::LangfuseClient,
    logging,
    pipeline::{customer_support_pipeline, simple_story_generator, DEFAULT_SUPPORT_MODEL},
    providers::openai::OpenAI,
    structured::StructuredClient,
    trace::{LogSink, TraceRecorder, TraceSink},
};

const BUSINESS_QUERY: &str = "Hi, I'm having issues with my Premium subscription.
I was charged twice this month and need a refund.
This is urgent as it's affecting my budget.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Example {
    Story,
    Business,
    All,
}

#[derive(Parser)]
#[command(name = "support-pipeline")]
#[command(about = "Run the traced story and customer-support examples")]
struct Args {
    #[arg(value_enum, default_value_t = Example::All)]
    example: Example,

    /// Story topic
    #[arg(long, default_value = "a robot learning to cook")]
    topic: String,

    /// Customer query for the business example
    #[arg(long, default_value = BUSINESS_QUERY)]
    query: String,

    #[arg(short, long)]
    model: Option<String>,

    /// Export traces to Langfuse instead of the log
    #[arg(long)]
    langfuse: bool,
}

fn preview(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    logging::init("info");
    let args = Args::parse();

    let model = args
        .model
        .or_else(|| std::env::var("OPENAI_MODEL").ok())
        .unwrap_or_else(|| DEFAULT_SUPPORT_MODEL.to_string());
    let client = StructuredClient::new(Arc::new(OpenAI::from_env()?), model);

    let sink: Arc<dyn TraceSink> = if args.langfuse {
        Arc::new(LangfuseClient::from_env()?)
    } else {
        Arc::new(LogSink)
    };
    let recorder = TraceRecorder::new(sink);
    let scope = recorder.root_scope();

    if matches!(args.example, Example::Story | Example::All) {
        let story = simple_story_generator(&client, &scope, &args.topic).await?;
        println!("Generated story: {}...", preview(&story, 100));
    }

    if matches!(args.example, Example::Business | Example::All) {
        let (analysis, response) = customer_support_pipeline(&client, &scope, &args.query).await?;

        println!("Analysis:");
        println!("- Category: {}", analysis.category);
        println!("- Urgency: {}", analysis.urgency.as_str());
        println!("- Summary: {}", analysis.summary);
        println!("\nGenerated Response:\n");
        println!("{}...", preview(&response, 150));
    }

    recorder.flush().await;
    Ok(())
}
