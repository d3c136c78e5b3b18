//! Place one booking from the command line.
//!
//! ```bash
//! cargo run --bin book -- --user-id 1 --event-id 5 --tickets 3
//! ```
//!
//! Prints the confirmation as JSON on success. Client errors (unknown customer
//! or event, not enough tickets) exit with status 2, infrastructure errors
//! with status 1.

use clap::Parser;
use std::process::ExitCode;
use ticketflow_core::booking::BookingRequest;
use ticketflow_core::types::{CustomerId, EventId};
use ticketing::Config;
use ticketing::app::Infrastructure;
use ticketing::telemetry::init_tracing;

/// Place a booking and publish it to the booking topic.
#[derive(Parser, Debug)]
#[command(name = "book", version, about)]
struct Args {
    /// Customer placing the booking
    #[arg(long)]
    user_id: i64,

    /// Event to book
    #[arg(long)]
    event_id: i64,

    /// Number of tickets
    #[arg(long, default_value_t = 1)]
    tickets: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = Config::from_env()?;
    init_tracing(config.server.log_format);

    let infra = Infrastructure::connect(config).await?;
    let workflow = infra.booking_workflow();
    let request = BookingRequest::new(
        CustomerId::new(args.user_id),
        EventId::new(args.event_id),
        args.tickets,
    );

    let outcome = workflow.create_booking(request).await;
    infra.pool.close().await;

    match outcome {
        Ok(confirmation) => {
            println!("{}", serde_json::to_string_pretty(&confirmation)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_client_error() => {
            eprintln!("Booking refused: {e}");
            Ok(ExitCode::from(2))
        }
        Err(e) => Err(e.into()),
    }
}
