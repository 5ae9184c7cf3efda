mod logger;
mod opt;

use std::{process, sync::Arc};

use anyhow::Context as _;
use structopt::StructOpt;
use table_store_connector::{RestStore, Translator};
use tokio::io::AsyncReadExt;

use crate::{logger::Logger, opt::TableStoreOpt};

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => (),
        Ok(false) => process::exit(1),
        Err(err) => {
            tracing::error!("{err:#}");
            eprintln!("{err:#}");
            process::exit(2);
        }
    }
}

/// Returns whether the statement succeeded.
async fn run() -> anyhow::Result<bool> {
    let opts = TableStoreOpt::from_args();

    let mut logger = Logger::new();
    logger.log_format(opts.log_format);
    logger.log_queries(opts.log_queries);
    logger.install()?;

    table_store_connector::describe_metrics();

    let store = RestStore::new(opts.store_config()?)?;
    let translator = Translator::new(Arc::new(store), opts.connector_config()?);

    let statement = match &opts.statement {
        Some(statement) => statement.clone(),
        None => {
            let mut statement = String::new();
            tokio::io::stdin()
                .read_to_string(&mut statement)
                .await
                .context("reading the statement from stdin")?;
            statement
        }
    };

    tracing::info!(url = %opts.url, "executing statement");

    let result = translator.execute(&statement, &opts.params()).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(result.success)
}
