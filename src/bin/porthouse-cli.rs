//! `porthouse-cli`: an operator command-line client that issues RPCs
//! against a running Porthouse mesh (spec §6 "CLI").
//!
//! Sub-verbs mirror the exchanges a running mesh exposes: `cmdl` talks to
//! whichever rotator/tracker prefix is named, `scheduler` to the schedule
//! model's RPC surface, `packets` to the router, `housekeeping` to the
//! frame-store/update-broadcast exchange. Every sub-verb is a thin
//! JSON-in/JSON-out wrapper around [`RpcClient::call`].

use clap::{Parser, Subcommand};
use porthouse::broker::BrokerClient;
use porthouse::config;
use porthouse::domain_types::RoutingKey;
use porthouse::rpc::RpcClient;

#[derive(Parser)]
#[command(name = "porthouse-cli", about = "Operator CLI for a running Porthouse mesh", version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Rotator/tracker control-and-monitor RPCs.
    Cmdl {
        /// Module prefix, e.g. `uhf-rotator`.
        prefix: String,
        /// RPC verb, e.g. `status`, `rotate`, `stop`.
        verb: String,
        /// JSON request body (default `{}`).
        #[arg(default_value = "{}")]
        body: String,
    },
    /// Scheduler RPCs (`add_task`, `remove_task`, `list_tasks`, …).
    Scheduler {
        /// RPC verb.
        verb: String,
        /// JSON request body (default `{}`).
        #[arg(default_value = "{}")]
        body: String,
    },
    /// Packet router RPCs (`list`, `connect`, `disconnect`, `disconnect_all`).
    Packets {
        /// RPC verb.
        verb: String,
        /// JSON request body (default `{}`).
        #[arg(default_value = "{}")]
        body: String,
    },
    /// Housekeeping exchange RPCs.
    Housekeeping {
        /// RPC verb.
        verb: String,
        /// JSON request body (default `{}`).
        #[arg(default_value = "{}")]
        body: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let globals = config::load_globals()?;
    let broker = BrokerClient::connect(&globals.amqp_url).await?;
    let rpc = RpcClient::new(broker);
    rpc.spawn_reply_listener().await?;

    let (exchange, routing_key, body) = match cli.command {
        Command::Cmdl { prefix, verb, body } => (
            "rotator".to_string(),
            format!("{prefix}.rpc.{verb}"),
            body,
        ),
        Command::Scheduler { verb, body } => ("scheduler".to_string(), format!("rpc.{verb}"), body),
        Command::Packets { verb, body } => ("packets".to_string(), format!("rpc.{verb}"), body),
        Command::Housekeeping { verb, body } => ("housekeeping".to_string(), format!("rpc.{verb}"), body),
    };

    let request: serde_json::Value = serde_json::from_str(&body)?;
    let key = RoutingKey::try_new(routing_key)?;
    let response = rpc.call(&exchange, &key, &request, None).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
