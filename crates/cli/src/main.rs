//! Sculpin command-line client.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use reqwest::{Client, Response};
use sculpin_core::Metric;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "sculpin-cli")]
#[command(about = "Sculpin vector collection client")]
struct Args {
    /// Server URL
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new collection
    CreateCollection {
        /// Collection name
        #[arg(long)]
        name: String,
        /// Vector dimension
        #[arg(long)]
        dimension: usize,
        /// Distance metric (l2 or cosine)
        #[arg(long, default_value = "l2")]
        metric: Metric,
        /// Number of IVF partitions
        #[arg(long)]
        partitions: Option<usize>,
        /// Vectors needed before the index trains itself
        #[arg(long)]
        train_threshold: Option<usize>,
        /// Only build the index on an explicit rebuild
        #[arg(long)]
        manual_index: bool,
    },
    /// List all collections
    ListCollections,
    /// Drop a collection and its data
    DropCollection {
        /// Collection name
        #[arg(long)]
        name: String,
    },
    /// Load random vectors into a collection
    LoadRandom {
        /// Collection name
        #[arg(long)]
        collection: String,
        /// Number of vectors to insert
        #[arg(long)]
        count: u64,
        /// Vector dimension
        #[arg(long)]
        dimension: usize,
        /// Batch size for inserts
        #[arg(long, default_value = "1000")]
        batch_size: u64,
        /// First id to assign
        #[arg(long, default_value = "0")]
        start_id: u64,
        /// Seed for reproducible vectors
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Run random search queries and report latency
    SearchRandom {
        /// Collection name
        #[arg(long)]
        collection: String,
        /// Vector dimension
        #[arg(long)]
        dimension: usize,
        /// Number of queries to run
        #[arg(long, default_value = "100")]
        num_queries: usize,
        /// Number of results per query
        #[arg(long, default_value = "10")]
        top_k: usize,
        /// Number of partitions to probe
        #[arg(long, default_value = "4")]
        nprobe: usize,
    },
    /// Count live vectors
    Count {
        /// Collection name
        #[arg(long)]
        collection: String,
    },
    /// Get collection statistics
    Stats {
        /// Collection name
        #[arg(long)]
        collection: String,
    },
    /// Retrain and rebuild the index of a collection
    Rebuild {
        /// Collection name
        #[arg(long)]
        collection: String,
    },
}

#[derive(Debug, Serialize)]
struct PointInput {
    id: u64,
    vector: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct InsertRequest {
    points: Vec<PointInput>,
}

#[derive(Debug, Deserialize)]
struct InsertReport {
    inserted: usize,
    failed: usize,
}

#[derive(Debug, Serialize)]
struct SearchRequest {
    vector: Vec<f32>,
    top_k: usize,
    nprobe: usize,
    include_payload: bool,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct SearchResponse {
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct SearchResultItem {
    id: u64,
    distance: f32,
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    name: String,
    dimension: usize,
    metric: String,
    state: String,
    count: usize,
}

#[derive(Debug, Deserialize)]
struct CountResponse {
    count: usize,
}

fn generate_random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim)
        .map(|_| {
            let x: f64 = StandardNormal.sample(rng);
            x as f32
        })
        .collect()
}

/// Print a failed response's error message.
async fn report_error(context: &str, resp: Response) -> Result<()> {
    let status = resp.status();
    let text = resp.text().await?;
    let message = serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|body| {
            let kind = body["error"]["kind"].as_str()?.to_string();
            let message = body["error"]["message"].as_str()?.to_string();
            Some(format!("{} ({})", message, kind))
        })
        .unwrap_or(text);
    println!("Error {}: {} [{}]", context, message, status);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn create_collection(
    client: &Client,
    server: &str,
    name: &str,
    dimension: usize,
    metric: Metric,
    partitions: Option<usize>,
    train_threshold: Option<usize>,
    manual_index: bool,
) -> Result<()> {
    let url = format!("{}/v1/collections", server);
    let mut settings = json!({ "metric": metric, "auto_index": !manual_index });
    if let Some(n) = partitions {
        settings["num_partitions"] = json!(n);
    }
    if let Some(n) = train_threshold {
        settings["train_threshold"] = json!(n);
    }
    let req = json!({ "name": name, "dimension": dimension, "settings": settings });

    let resp = client.post(&url).json(&req).send().await?;

    if resp.status().is_success() {
        println!("Collection '{}' created successfully", name);
    } else {
        report_error("creating collection", resp).await?;
    }

    Ok(())
}

async fn list_collections(client: &Client, server: &str) -> Result<()> {
    let url = format!("{}/v1/collections", server);
    let resp = client.get(&url).send().await?;

    if resp.status().is_success() {
        let collections: Vec<CollectionInfo> = resp.json().await?;
        if collections.is_empty() {
            println!("No collections found");
        } else {
            println!(
                "{:<20} {:<10} {:<8} {:<10} {:<10}",
                "NAME", "DIMENSION", "METRIC", "STATE", "COUNT"
            );
            println!("{}", "-".repeat(62));
            for c in collections {
                println!(
                    "{:<20} {:<10} {:<8} {:<10} {:<10}",
                    c.name, c.dimension, c.metric, c.state, c.count
                );
            }
        }
    } else {
        report_error("listing collections", resp).await?;
    }

    Ok(())
}

async fn drop_collection(client: &Client, server: &str, name: &str) -> Result<()> {
    let url = format!("{}/v1/collections/{}", server, name);
    let resp = client.delete(&url).send().await?;

    if resp.status().is_success() {
        println!("Collection '{}' dropped", name);
    } else {
        report_error("dropping collection", resp).await?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn load_random(
    client: &Client,
    server: &str,
    collection: &str,
    count: u64,
    dimension: usize,
    batch_size: u64,
    start_id: u64,
    seed: Option<u64>,
) -> Result<()> {
    let url = format!("{}/v1/collections/{}/points", server, collection);
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let start = Instant::now();
    let mut total_inserted = 0;
    let mut total_failed = 0;

    for batch_start in (0..count).step_by(batch_size.max(1) as usize) {
        let batch_end = (batch_start + batch_size.max(1)).min(count);

        let points: Vec<PointInput> = (batch_start..batch_end)
            .map(|i| PointInput {
                id: start_id + i,
                vector: generate_random_vector(&mut rng, dimension),
            })
            .collect();

        let req = InsertRequest { points };
        let resp = client.post(&url).json(&req).send().await?;

        if !resp.status().is_success() {
            report_error("inserting batch", resp).await?;
            return Ok(());
        }

        let report: InsertReport = resp.json().await?;
        total_inserted += report.inserted;
        total_failed += report.failed;
        print!("\rInserted {}/{} vectors...", total_inserted, count);
    }

    let elapsed = start.elapsed();
    println!(
        "\nInserted {} vectors ({} failed) in {:.2?}",
        total_inserted, total_failed, elapsed
    );
    println!(
        "Throughput: {:.0} vectors/sec",
        total_inserted as f64 / elapsed.as_secs_f64()
    );

    Ok(())
}

/// Latency summary over successful queries.
#[derive(Debug, PartialEq)]
struct LatencyStats {
    mean: Duration,
    min: Duration,
    max: Duration,
    p50: Duration,
    p95: Duration,
    p99: Duration,
}

impl LatencyStats {
    fn from_samples(mut latencies: Vec<Duration>) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }
        latencies.sort();
        let n = latencies.len();
        let percentile = |p: f64| latencies[((n as f64 * p) as usize).min(n - 1)];
        let sum: Duration = latencies.iter().sum();
        Some(Self {
            mean: sum / n as u32,
            min: latencies[0],
            max: latencies[n - 1],
            p50: percentile(0.50),
            p95: percentile(0.95),
            p99: percentile(0.99),
        })
    }
}

async fn search_random(
    client: &Client,
    server: &str,
    collection: &str,
    dimension: usize,
    num_queries: usize,
    top_k: usize,
    nprobe: usize,
) -> Result<()> {
    let url = format!("{}/v1/collections/{}/search", server, collection);
    let mut rng = StdRng::from_entropy();

    let mut latencies: Vec<Duration> = Vec::with_capacity(num_queries);

    println!("Running {} random queries...", num_queries);

    for i in 0..num_queries {
        let req = SearchRequest {
            vector: generate_random_vector(&mut rng, dimension),
            top_k,
            nprobe,
            include_payload: false,
        };

        let start = Instant::now();
        let resp = client.post(&url).json(&req).send().await?;
        let elapsed = start.elapsed();

        if resp.status().is_success() {
            let _results: SearchResponse = resp.json().await?;
            latencies.push(elapsed);
        } else {
            report_error(&format!("on query {}", i), resp).await?;
        }

        if (i + 1) % 10 == 0 {
            print!("\rCompleted {}/{} queries...", i + 1, num_queries);
        }
    }

    println!("\n");

    let total: Duration = latencies.iter().sum();
    let successful = latencies.len();
    let Some(stats) = LatencyStats::from_samples(latencies) else {
        println!("No successful queries");
        return Ok(());
    };

    println!("Search Latency Statistics:");
    println!("  Mean:  {:>10.2?}", stats.mean);
    println!("  Min:   {:>10.2?}", stats.min);
    println!("  Max:   {:>10.2?}", stats.max);
    println!("  P50:   {:>10.2?}", stats.p50);
    println!("  P95:   {:>10.2?}", stats.p95);
    println!("  P99:   {:>10.2?}", stats.p99);
    println!(
        "  QPS:   {:>10.0}",
        successful as f64 / total.as_secs_f64()
    );

    Ok(())
}

async fn count(client: &Client, server: &str, collection: &str) -> Result<()> {
    let url = format!("{}/v1/collections/{}/count", server, collection);
    let resp = client.get(&url).send().await?;

    if resp.status().is_success() {
        let body: CountResponse = resp.json().await?;
        println!("{}", body.count);
    } else {
        report_error("counting vectors", resp).await?;
    }

    Ok(())
}

async fn get_stats(client: &Client, server: &str, collection: &str) -> Result<()> {
    let url = format!("{}/v1/collections/{}/stats", server, collection);
    let resp = client.get(&url).send().await?;

    if resp.status().is_success() {
        let stats: Value = resp.json().await?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        report_error("getting stats", resp).await?;
    }

    Ok(())
}

async fn rebuild(client: &Client, server: &str, collection: &str) -> Result<()> {
    let url = format!("{}/v1/collections/{}/rebuild", server, collection);
    let start = Instant::now();
    let resp = client.post(&url).send().await?;

    if resp.status().is_success() {
        let result: Value = resp.json().await?;
        println!(
            "Index rebuilt in {:.2?}: {}",
            start.elapsed(),
            serde_json::to_string_pretty(&result)?
        );
    } else {
        report_error("rebuilding index", resp).await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let client = Client::new();

    match args.command {
        Commands::CreateCollection {
            name,
            dimension,
            metric,
            partitions,
            train_threshold,
            manual_index,
        } => {
            create_collection(
                &client,
                &args.server,
                &name,
                dimension,
                metric,
                partitions,
                train_threshold,
                manual_index,
            )
            .await?;
        }
        Commands::ListCollections => {
            list_collections(&client, &args.server).await?;
        }
        Commands::DropCollection { name } => {
            drop_collection(&client, &args.server, &name).await?;
        }
        Commands::LoadRandom {
            collection,
            count,
            dimension,
            batch_size,
            start_id,
            seed,
        } => {
            load_random(
                &client,
                &args.server,
                &collection,
                count,
                dimension,
                batch_size,
                start_id,
                seed,
            )
            .await?;
        }
        Commands::SearchRandom {
            collection,
            dimension,
            num_queries,
            top_k,
            nprobe,
        } => {
            search_random(
                &client,
                &args.server,
                &collection,
                dimension,
                num_queries,
                top_k,
                nprobe,
            )
            .await?;
        }
        Commands::Count { collection } => {
            count(&client, &args.server, &collection).await?;
        }
        Commands::Stats { collection } => {
            get_stats(&client, &args.server, &collection).await?;
        }
        Commands::Rebuild { collection } => {
            rebuild(&client, &args.server, &collection).await?;
        }
    }

    Ok(())
}
