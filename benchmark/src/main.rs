use clap::Parser;
use hdrhistogram::Histogram;
use prometheus::{Encoder, TextEncoder};
use registry::{
    metrics, FileStore, MemoryStore, RegistrationInput, RemoteStore, RuntimeConfig, Synchronizer,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const REGIONS: [&str; 4] = ["North", "South", "East", "West"];
const AGE_GROUPS: [&str; 4] = ["18-30", "31-45", "46-60", "60+"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of concurrent registrants
    #[arg(short, long, default_value = "4")]
    concurrency: usize,

    /// Registrations per registrant
    #[arg(short, long, default_value = "50")]
    operations: usize,

    /// Pause between operations in ms
    #[arg(short, long, default_value = "0")]
    interval: u64,

    /// Directory of the file store; overrides `data_dir` from the config
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Run against an in-memory store instead of the file store
    #[arg(long, conflicts_with = "data_dir")]
    memory: bool,

    /// Runtime config file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Print the Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,
}

fn random_input() -> RegistrationInput {
    RegistrationInput {
        region: REGIONS[rand::random::<usize>() % REGIONS.len()].to_string(),
        age_group: AGE_GROUPS[rand::random::<usize>() % AGE_GROUPS.len()].to_string(),
        sensitive_info: format!("document-{}", rand::random::<u32>()),
    }
}

/// File store directory to use, or `None` for the in-memory store
fn store_dir(args: &Args, config: &RuntimeConfig) -> Option<String> {
    if args.memory {
        return None;
    }
    Some(
        args.data_dir
            .clone()
            .unwrap_or_else(|| config.data_dir.clone()),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::try_init().unwrap_or_default();
    let args = Args::parse();
    metrics::init_registry();

    let base_config = RuntimeConfig::from_toml(&args.config).unwrap_or_default();
    let store: Arc<dyn RemoteStore> = match store_dir(&args, &base_config) {
        Some(dir) => {
            println!("Using file store at {}", dir);
            Arc::new(FileStore::open(dir)?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let register_hist = Arc::new(Mutex::new(Histogram::<u64>::new(3)?));
    let transition_hist = Arc::new(Mutex::new(Histogram::<u64>::new(3)?));
    let failures = Arc::new(Mutex::new(0u64));

    println!(
        "Starting benchmark with {} registrants, {} registrations each",
        args.concurrency, args.operations
    );
    let started = Instant::now();

    let mut handles = vec![];
    for worker in 0..args.concurrency {
        let sync = Synchronizer::new(
            store.clone(),
            base_config.clone().with_principal(format!("registrant-{}", worker)),
        );
        let register_hist = register_hist.clone();
        let transition_hist = transition_hist.clone();
        let failures = failures.clone();
        let operations = args.operations;
        let interval = args.interval;

        handles.push(tokio::spawn(async move {
            for op in 0..operations {
                let start = Instant::now();
                let id = match sync.register(random_input()).await {
                    Ok(id) => id,
                    Err(e) => {
                        log::error!("register failed: {}", e);
                        *failures.lock().await += 1;
                        continue;
                    }
                };
                let _ = register_hist
                    .lock()
                    .await
                    .record(start.elapsed().as_micros() as u64);

                let start = Instant::now();
                let principal = sync.principal().to_string();
                let result = if op % 2 == 0 {
                    sync.verify(&id, &principal).await
                } else {
                    sync.reject(&id, &principal).await
                };
                match result {
                    Ok(()) => {
                        let _ = transition_hist
                            .lock()
                            .await
                            .record(start.elapsed().as_micros() as u64);
                    }
                    Err(e) => {
                        log::error!("transition of {} failed: {}", id, e);
                        *failures.lock().await += 1;
                    }
                }

                if interval > 0 {
                    tokio::time::sleep(Duration::from_millis(interval)).await;
                }
            }
        }));
    }

    for handle in handles {
        handle.await?;
    }
    let elapsed = started.elapsed();

    let checker = Synchronizer::new(store.clone(), base_config);
    let records = checker.refresh().await?;
    let stats = checker.stats();
    let expected = args.concurrency * args.operations;

    println!("\nBenchmark Results:");
    println!("Elapsed: {:.2}s", elapsed.as_secs_f64());
    println!("Failures: {}", *failures.lock().await);
    println!(
        "Indexed records: {} (expected at least {})",
        records.len(),
        expected
    );
    println!(
        "Pending: {}, Verified: {}, Rejected: {}",
        stats.pending, stats.verified, stats.rejected
    );

    for (name, hist) in [("register", &register_hist), ("transition", &transition_hist)] {
        let hist = hist.lock().await;
        println!("\n{} latency (microseconds):", name);
        println!("p50: {}", hist.value_at_percentile(50.0));
        println!("p90: {}", hist.value_at_percentile(90.0));
        println!("p99: {}", hist.value_at_percentile(99.0));
        println!("p99.9: {}", hist.value_at_percentile(99.9));
    }

    if args.metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metrics::REGISTRY_INSTANCE.gather(), &mut buffer)?;
        println!("\n{}", String::from_utf8_lossy(&buffer));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_dir_falls_back_to_config() {
        let mut config = RuntimeConfig::new();
        config.data_dir = "/var/lib/registry".to_string();

        let args = Args::parse_from(["benchmark"]);
        assert_eq!(
            store_dir(&args, &config).as_deref(),
            Some("/var/lib/registry")
        );

        let args = Args::parse_from(["benchmark", "--data-dir", "/tmp/run"]);
        assert_eq!(store_dir(&args, &config).as_deref(), Some("/tmp/run"));

        let args = Args::parse_from(["benchmark", "--memory"]);
        assert_eq!(store_dir(&args, &config), None);
    }
}
