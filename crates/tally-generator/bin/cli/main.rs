mod cli;

use crate::cli::{LogFormatArg, CLI};
use clap::Parser;
use tally_core::CounterStore;
use tally_generator::SerialCodeGenerator;
use tally_store::{MemoryCounterStore, RedisCounterStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_format);

    info!(
        key_prefix = %config.key_prefix,
        format = %config.format,
        reset_period_ms = config.reset_period_ms,
        redis = config.redis_url.is_some(),
        count = config.count,
        "starting tally"
    );

    let settings = config.generator_config().into_settings()?;

    match config.redis_url.as_deref() {
        Some(url) => {
            let store = RedisCounterStore::connect(url).await?;
            print_codes(SerialCodeGenerator::new(settings, store)?, config.count).await?;
        }
        None => {
            print_codes(
                SerialCodeGenerator::new(settings, MemoryCounterStore::new())?,
                config.count,
            )
            .await?;
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormatArg) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);

    match format {
        LogFormatArg::Text => builder.init(),
        LogFormatArg::Json => builder.json().init(),
    }
}

async fn print_codes<S: CounterStore>(
    generator: SerialCodeGenerator<S>,
    count: usize,
) -> Result<(), tally_generator::GenerateError> {
    for code in generator.batch_generate(count).await? {
        println!("{code}");
    }
    Ok(())
}
