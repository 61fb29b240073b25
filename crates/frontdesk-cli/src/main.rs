//! Frontdesk CLI: place, answer and list kiosk voice calls.

#![forbid(unsafe_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use frontdesk_call::{
    CallConfig, CallHandle, CallOrchestrator, CallServices, Endpoint, GatewayClient,
    RtcPeerFactory, SilenceCapture,
};
use frontdesk_common::{CallState, Role};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "frontdesk")]
#[command(about = "Frontdesk kiosk voice calls")]
struct Args {
    /// Signaling gateway base URL
    #[arg(
        long,
        global = true,
        env = "FRONTDESK_GATEWAY_URL",
        default_value = "http://127.0.0.1:3000"
    )]
    gateway: String,

    /// Identifier of this kiosk or console [default: kiosk-1 for call, front-desk for answer]
    #[arg(long, global = true, env = "FRONTDESK_ENDPOINT_ID")]
    id: Option<String>,

    /// Room or kiosk channel for new calls
    #[arg(long, global = true, env = "FRONTDESK_CHANNEL", default_value = "lobby")]
    channel: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Call the front desk from this kiosk
    Call {
        /// Session id to use (generated if omitted)
        #[arg(short, long)]
        session: Option<Uuid>,
    },

    /// Answer a ringing call as the staff console
    Answer {
        /// Session id of the ringing call
        session: Uuid,
    },

    /// List calls ringing for the staff console
    Incoming,

    /// Show version information
    Version,
}

impl Args {
    fn endpoint_id(&self, role: Role) -> &str {
        match (&self.id, role) {
            (Some(id), _) => id.as_str(),
            (None, Role::Kiosk) => "kiosk-1",
            (None, Role::Console) => "front-desk",
        }
    }
}

fn orchestrator(args: &Args, role: Role) -> Result<CallOrchestrator> {
    let config = CallConfig::from_env()?;
    let gateway = Arc::new(GatewayClient::new(&args.gateway)?);
    let services = CallServices {
        log: gateway.clone(),
        capture: Arc::new(SilenceCapture),
        peers: Arc::new(RtcPeerFactory::new().context("failed to set up WebRTC")?),
        store: gateway,
    };
    Ok(CallOrchestrator::new(
        Endpoint::new(role, args.endpoint_id(role), &args.channel),
        config,
        services,
    ))
}

/// Print state changes until the call ends; Ctrl-C hangs up.
async fn follow(handle: CallHandle) -> Result<()> {
    let mut watch = handle.watch();
    let mut last_state = None;
    loop {
        let snapshot = watch.borrow_and_update().clone();
        if last_state != Some(snapshot.state) {
            println!("[{}] {}", handle.session_id(), snapshot.state);
            last_state = Some(snapshot.state);
        }
        match snapshot.state {
            CallState::Ended => return Ok(()),
            CallState::Failed => {
                let reason = snapshot.error.unwrap_or_else(|| "unknown error".into());
                anyhow::bail!("call failed: {reason}");
            }
            _ => {}
        }

        tokio::select! {
            changed = watch.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("hanging up...");
                handle.end("hangup").await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    frontdesk_common::init_tracing();

    let args = Args::parse();

    match args.command {
        Command::Call { session } => {
            let session_id = session.unwrap_or_else(Uuid::new_v4);
            let calls = orchestrator(&args, Role::Kiosk)?;
            let handle = calls.initiate_call(session_id).await?;
            println!("Calling front desk, session {}", session_id);
            follow(handle).await?;
        }
        Command::Answer { session } => {
            let calls = orchestrator(&args, Role::Console)?;
            let handle = calls.answer_call(session).await?;
            follow(handle).await?;
        }
        Command::Incoming => {
            let calls = orchestrator(&args, Role::Console)?;
            let ringing = calls.incoming_calls().await?;
            if ringing.is_empty() {
                println!("No incoming calls");
            }
            for call in ringing {
                println!(
                    "{}  channel={}  kiosk={}  since={}",
                    call.id,
                    call.channel,
                    call.kiosk_id,
                    call.created_at.format("%H:%M:%S")
                );
            }
        }
        Command::Version => {
            println!("frontdesk {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
