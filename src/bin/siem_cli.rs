use std::path::{Path, PathBuf};
use structopt::StructOpt;

use siem_pipeline::config::Config;
use siem_pipeline::input::{JsonlReader, TrafficGenerator};
use siem_pipeline::queue::{publish_record, QueueTransport, RedisQueue};
use siem_pipeline::EventRecord;

/// SIEM pipeline command line interface
#[derive(StructOpt, Debug)]
#[structopt(name = "siem", about = "SIEM pipeline CLI")]
pub enum Cli {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Publish event records from a JSON-lines file
    Publish {
        /// Path to the record file
        #[structopt(short, long)]
        file: PathBuf,
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Publish synthetic traffic followed by a brute-force burst
    Simulate {
        /// Path to configuration file
        #[structopt(short, long, default_value = "config.toml")]
        config: PathBuf,
        /// Number of ordinary records to publish
        #[structopt(short, long, default_value = "20")]
        normal: usize,
        /// Address the burst comes from
        #[structopt(long, default_value = "66.66.66.66")]
        attack_ip: String,
        /// Number of failed logins in the burst
        #[structopt(long, default_value = "7")]
        attempts: usize,
    },
}

fn load_config(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = if path.exists() {
        Config::from_file(path)?
    } else {
        log::warn!("Config file not found, using defaults");
        Config::default()
    };
    config.apply_env_overrides();
    Ok(config)
}

async fn connect_producer(config: &Config) -> Result<RedisQueue, Box<dyn std::error::Error>> {
    // Producers never receive, so the consumer id only names an unused list
    let queue = RedisQueue::connect(
        &config.queue.redis_url,
        &config.queue.queue_name,
        "producer",
        config.queue.poll_interval(),
    )
    .await?;
    queue.ping().await?;
    Ok(queue)
}

/// Publish every record, counting the ones the queue refused
async fn publish_all(queue: &dyn QueueTransport, records: &[EventRecord]) -> (usize, usize) {
    let mut sent = 0;
    let mut failed = 0;

    for record in records {
        match publish_record(queue, record).await {
            Ok(()) => sent += 1,
            Err(e) => {
                log::error!("Failed to publish record {}: {}", record.id, e);
                failed += 1;
            }
        }
    }
    (sent, failed)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let cli = Cli::from_args();

    match cli {
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cli::Publish { file, config } => {
            if !file.exists() {
                eprintln!("File not found: {:?}", file);
                std::process::exit(1);
            }

            let config = load_config(&config)?;
            let records = JsonlReader::new(&file).read_records()?;
            let queue = connect_producer(&config).await?;

            let (sent, failed) = publish_all(&queue, &records).await;
            println!(
                "Published {} record(s) to '{}' ({} rejected)",
                sent, config.queue.queue_name, failed
            );
            if failed > 0 {
                std::process::exit(2);
            }
        }
        Cli::Simulate {
            config,
            normal,
            attack_ip,
            attempts,
        } => {
            let config = load_config(&config)?;
            let queue = connect_producer(&config).await?;
            let mut generator = TrafficGenerator::new(attack_ip.clone());

            let mut records: Vec<EventRecord> = (0..normal).map(|_| generator.normal()).collect();
            records.extend(generator.attack_burst(attempts));

            let (sent, failed) = publish_all(&queue, &records).await;
            println!(
                "Published {} record(s), including {} failed login(s) from {} ({} rejected)",
                sent, attempts, attack_ip, failed
            );
            if attempts as u64 >= config.detection.threshold {
                println!(
                    "Expect one brute force alert for {} (threshold {} in {}s)",
                    attack_ip, config.detection.threshold, config.detection.window_seconds
                );
            }
        }
    }

    Ok(())
}
