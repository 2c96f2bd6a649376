//! Manual smoke test against a running MongoDB instance.
//!
//! Walks through connect, probe, read, record numbering, create, update and delete, printing
//! what comes back. Demonstration only; it writes to the target collection.
//!
//! Usage:
//!   shelter-smoke --user aacuser --password ...          # local instance, aac.animals
//!   SHELTER_PASSWORD=... shelter-smoke --user aacuser --debug
//!   RUST_LOG=animal_shelter_core=debug shelter-smoke ...  # fine-grained log control

use std::time::Duration;

use animal_shelter::{bson::doc, config::ConnectionConfig, error::ShelterResult};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "shelter-smoke", about = "Exercise the shelter repository against MongoDB")]
struct Args {
    #[arg(long, env = "SHELTER_USER")]
    user: String,

    #[arg(long, env = "SHELTER_PASSWORD", hide_env_values = true)]
    password: String,

    #[arg(long, env = "SHELTER_HOST", default_value = "127.0.0.1")]
    host: String,

    #[arg(long, env = "SHELTER_PORT", default_value_t = 27017)]
    port: u16,

    #[arg(long, env = "SHELTER_DATABASE", default_value = "aac")]
    database: String,

    #[arg(long, env = "SHELTER_COLLECTION", default_value = "animals")]
    collection: String,

    /// Server selection timeout in milliseconds
    #[arg(long, default_value_t = 8_000)]
    timeout_ms: u64,

    /// Breed used for the filtered read and the create/update/delete round trip
    #[arg(long, default_value = "Labrador Retriever Mix")]
    breed: String,

    /// Enable debug logging (unless RUST_LOG is set)
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    // Ignore the error if a subscriber is already installed
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .compact()
        .try_init();
}

#[tokio::main]
async fn main() -> ShelterResult<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = ConnectionConfig::new(
        args.user,
        args.password,
        args.host,
        args.port,
        args.database,
        args.collection,
    )
    .with_server_selection_timeout(Duration::from_millis(args.timeout_ms));

    println!("Setting up database connection to {}", config.redacted_uri());
    let repository = animal_shelter::mongodb::connect(&config).await?;

    println!("Connection test");
    println!("{:?}", repository.probe().await?);

    println!("Read test - no filter");
    println!("{:?}", repository.read(doc! {}, None).await?);

    println!("Read test - breed {}", args.breed);
    let matches = repository.read(doc! { "breed": args.breed.as_str() }, None).await?;
    println!("{}", matches.len());
    for record in matches.iter().take(5) {
        println!("{record}");
    }

    println!("Record number test");
    println!("{}", repository.next_record_num().await?);

    if let Some(first) = matches.first() {
        println!("Create test");
        let numbers = repository.create(first.clone()).await?;
        println!("Create result: {numbers:?}");

        println!("Update test");
        let animal_id = first.get_str("animal_id").unwrap_or("B721406");
        let modified = repository
            .update(
                doc! { "animal_id": animal_id },
                doc! { "$set": { "note": "updated by shelter-smoke" } },
            )
            .await?;
        println!("{modified} records updated.");

        println!("Removal test - last record added");
        let last = repository.next_record_num().await? - 1;
        let deleted = repository.delete(doc! { "rec_num": last }).await?;
        println!("{deleted} records deleted from the collection.");
    } else {
        tracing::warn!(breed = %args.breed, "no matching records; skipping create/update/delete");
    }

    repository.shutdown().await
}
