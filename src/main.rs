use anyhow::Result;
use clap::Parser;
use log::{info, LevelFilter};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use smartreply::context::ConversationStore;
use smartreply::core::config::Config;
use smartreply::providers::http::HttpCompletionClient;
use smartreply::scheduler::{Completion, Priority, SuggestionRequest, SuggestionScheduler};

#[derive(Parser)]
#[clap(author, version, about = "Adaptive scheduling for AI reply suggestions")]
struct Cli {
    /// Path to config file
    #[clap(short, long, default_value = "config.toml")]
    config: String,

    /// Debug mode
    #[clap(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new().filter_level(log_level).init();

    print_banner();

    // Load configuration
    let config = Config::from_file(&cli.config)?;

    let client = Arc::new(
        HttpCompletionClient::from_config(&config.provider)
            .map_err(|e| anyhow::anyhow!("Failed to create completion client: {}", e))?,
    );
    let scheduler = SuggestionScheduler::new(&config, client)?;
    let store = ConversationStore::new(
        config.context.window_cap,
        config.context.max_conversations,
    );

    // Recover anything a previous run left behind
    let recovered = scheduler.restore().await;
    if recovered > 0 {
        info!("Re-submitted {} recovered requests", recovered);
    }

    println!("Type incoming messages, one per line (Ctrl-D to quit):");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no: u64 = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        line_no += 1;

        let context = store.recent("demo", 10).await;
        store
            .add_message("demo", "them", &line, false, Some(format!("demo-{}", line_no)), None)
            .await;

        let (tx, rx) = tokio::sync::oneshot::channel();
        let accepted = scheduler
            .submit(SuggestionRequest {
                content: line.clone(),
                identifier: Some(format!("demo-{}", line_no)),
                priority: Priority::High,
                context,
                completion: Completion::Live(Box::new(move |outcome| {
                    let _ = tx.send(outcome);
                })),
            })
            .await;
        if !accepted {
            println!("  (queue full, try again later)");
            continue;
        }

        match rx.await {
            Ok(Ok(options)) => {
                for (i, option) in options.iter().enumerate() {
                    println!("  {}. {}", i + 1, option);
                }
            }
            Ok(Err(e)) => println!("  error: {}", e),
            Err(_) => println!("  error: scheduler dropped the request"),
        }

        let stats = scheduler.stats().await;
        info!(
            "queue depth {}, rate {:.2} req/s, {}",
            stats.queue_depth, stats.current_rate, stats.workers
        );
    }

    scheduler.shutdown().await;
    info!("Goodbye");

    Ok(())
}

fn print_banner() {
    println!("\n====================================================");
    println!("  SmartReply - Adaptive Suggestion Scheduler v0.1.0");
    println!("====================================================");
    println!("  ✅ Priority Scheduler     ✅ Adaptive Rate Limiter");
    println!("  ✅ Context Windows        ✅ Result Cache");
    println!("  ✅ Durable Queue Snapshot");
    println!("====================================================\n");
}
