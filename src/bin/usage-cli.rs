use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "usage-cli")]
#[command(about = "Query and feed a metrics-usage registry", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum OriginArg {
    Grafana,
    Perses,
    PrometheusRule,
}

impl OriginArg {
    fn as_str(self) -> &'static str {
        match self {
            OriginArg::Grafana => "grafana",
            OriginArg::Perses => "perses",
            OriginArg::PrometheusRule => "prometheus_rule",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show which sources use a metric
    Get { name: String },
    /// List used metrics
    List {
        #[arg(long)]
        origin: Option<OriginArg>,
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List invalid usages
    Invalid {
        #[arg(long)]
        source: Option<String>,
    },
    /// Dump the full registry
    Export,
    /// Ingestion statistics
    Stats,
    /// Report the complete metric set of one source (full replace)
    Push {
        #[arg(long)]
        source: String,
        #[arg(long, value_enum)]
        origin: OriginArg,
        /// Metric used by the source (repeatable)
        #[arg(long = "metric")]
        metrics: Vec<String>,
        /// Broken expression as EXPR::DETAIL (repeatable)
        #[arg(long = "invalid")]
        invalid: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let res = match cli.command {
        Commands::Get { name } => {
            client.get(format!("{}/api/v1/metrics/{}", cli.url, name)).send().await?
        }
        Commands::List { origin, prefix, limit } => {
            let mut query: Vec<(&str, String)> = Vec::new();
            if let Some(origin) = origin {
                query.push(("origin", origin.as_str().to_string()));
            }
            if let Some(prefix) = prefix {
                query.push(("prefix", prefix));
            }
            if let Some(limit) = limit {
                query.push(("limit", limit.to_string()));
            }
            client
                .get(format!("{}/api/v1/metrics", cli.url))
                .query(&query)
                .send()
                .await?
        }
        Commands::Invalid { source } => {
            let query: Vec<(&str, String)> = source.into_iter().map(|s| ("source", s)).collect();
            client
                .get(format!("{}/api/v1/invalid_metrics", cli.url))
                .query(&query)
                .send()
                .await?
        }
        Commands::Export => client.get(format!("{}/api/v1/export", cli.url)).send().await?,
        Commands::Stats => client.get(format!("{}/api/v1/stats", cli.url)).send().await?,
        Commands::Push {
            source,
            origin,
            metrics,
            invalid,
        } => {
            let invalid: Vec<Value> = invalid
                .iter()
                .map(|raw| {
                    let (expression, detail) = raw.rsplit_once("::").unwrap_or((raw.as_str(), ""));
                    json!({ "expression": expression, "detail": detail })
                })
                .collect();
            let body = json!({
                "source": { "id": source, "origin": origin.as_str() },
                "valid_metrics": metrics,
                "invalid_metrics": invalid,
            });
            client
                .post(format!("{}/api/v1/usage", cli.url))
                .json(&body)
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    let text = res.text().await?;
    match serde_json::from_str::<Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
    }
    Ok(())
}
