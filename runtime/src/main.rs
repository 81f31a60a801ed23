//! `datashare` - broker over JSON-lines feeds
//!
//! Reads deliveries from stdin, metadata events from the file named by
//! `DATASHARE_METADATA_PATH` (a FIFO works), and prints what would be
//! published to the local and upstream exchanges.

use anyhow::Context;
use datashare_runtime::prelude::*;
use tokio::io::BufReader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    datashare_runtime::run(|broker| async move {
        let broker = broker
            .local_sink(StdoutSink::new("data.topic"))
            .upstream_sink(StdoutSink::new("to-beehive"))
            .source(DeliveryFeed::new(BufReader::new(tokio::io::stdin())));

        let broker = match std::env::var_os("DATASHARE_METADATA_PATH") {
            Some(path) => {
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("opening metadata feed {}", path.to_string_lossy()))?;
                broker.source(PodInfoFeed::new(BufReader::new(file)))
            }
            None => {
                tracing::warn!("DATASHARE_METADATA_PATH not set, every message will wait for metadata");
                broker
            }
        };

        Ok(broker)
    })
    .await
}
