use clap::{Parser, ValueEnum};
use pruefstand::{
    error::RegistrationError,
    langfuse::LangfuseClient,
    logging,
    score::{ScoreConfig, ScoreConfigRegistry, ScoreDataType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DataType {
    Boolean,
    Numeric,
    Categorical,
}

impl From<DataType> for ScoreDataType {
    fn from(value: DataType) -> Self {
        match value {
            DataType::Boolean => ScoreDataType::Boolean,
            DataType::Numeric => ScoreDataType::Numeric,
            DataType::Categorical => ScoreDataType::Categorical,
        }
    }
}

#[derive(Parser)]
#[command(name = "score-config")]
#[command(about = "Register a score config with Langfuse (defaults to the boolean \"Pass\" config)")]
struct Args {
    #[arg(long, requires = "data_type")]
    name: Option<String>,

    #[arg(long, value_enum)]
    data_type: Option<DataType>,

    #[arg(long, default_value = "")]
    description: String,

    #[arg(long)]
    min: Option<f64>,

    #[arg(long)]
    max: Option<f64>,

    /// Category as label=value, repeatable
    #[arg(long = "category", value_parser = parse_category)]
    categories: Vec<(String, f64)>,
}

fn parse_category(raw: &str) -> Result<(String, f64), String> {
    let (label, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected label=value, got {raw:?}"))?;
    let value = value
        .parse::<f64>()
        .map_err(|err| format!("invalid category value {value:?}: {err}"))?;
    Ok((label.to_string(), value))
}

fn build_config(args: Args) -> ScoreConfig {
    let (Some(name), Some(data_type)) = (args.name, args.data_type) else {
        return ScoreConfig::pass();
    };

    let mut config = ScoreConfig::new(name, data_type.into(), args.description);
    config.min_value = args.min;
    config.max_value = args.max;
    for (label, value) in args.categories {
        config = config.with_category(label, value);
    }
    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    logging::init("info");
    let config = build_config(Args::parse());

    let client = LangfuseClient::from_env()?;
    match client.register(&config).await {
        Ok(id) => println!("Created score config {} ({id})", config.name),
        Err(RegistrationError::DuplicateName(name)) => {
            println!("Score config {name} already exists");
        }
        Err(err) => return Err(err.into()),
    }

    Ok(())
}
