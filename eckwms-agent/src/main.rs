use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use eckwms_core::models::{PullRequest, RegisterInstanceRequest, SubmitScanRequest};
use eckwms_core::{EckwmsClient, PulledScan, Reachability, ScanSink, SyncAgent, Tier};
use std::io::Write;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// eckWMS agent - talks to a scan relay on behalf of a site
#[derive(Parser)]
#[command(name = "eckwms-agent")]
#[command(about = "Site-side agent for the eckWMS scan relay", long_about = None)]
struct Cli {
    /// Relay base URL
    #[arg(long, env = "ECKWMS_RELAY_URL", default_value = "http://127.0.0.1:8780")]
    relay_url: String,

    /// Instance API key
    #[arg(long, env = "ECKWMS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new instance and print its API key
    Register {
        /// Display name of the site
        name: String,

        /// Requested tier, applied only together with --admin-token
        #[arg(long, value_parser = parse_tier, requires = "admin_token")]
        tier: Option<Tier>,

        /// Relay admin token
        #[arg(long, env = "ECKWMS_ADMIN_TOKEN", hide_env_values = true)]
        admin_token: Option<String>,

        /// Mark the instance as a public demo (device IDs are dropped)
        #[arg(long)]
        public_demo: bool,

        /// Registration token, if the relay requires one
        #[arg(long, env = "ECKWMS_REGISTRATION_TOKEN", hide_env_values = true)]
        registration_token: Option<String>,
    },

    /// Report reachability to the relay
    Heartbeat {
        #[arg(long)]
        public_ip: Option<String>,

        /// Local address, may be repeated
        #[arg(long = "local-ip")]
        local_ips: Vec<String>,

        #[arg(long)]
        proxy_url: Option<String>,
    },

    /// Submit a scan as a device would
    Submit {
        /// Scan payload
        payload: String,

        /// Parse the payload as JSON instead of sending it as text
        #[arg(long)]
        json: bool,

        #[arg(long)]
        priority: Option<i64>,

        #[arg(long)]
        device_id: Option<String>,

        /// Scan type tag
        #[arg(long = "type")]
        scan_type: Option<String>,
    },

    /// Pull buffered scans without confirming them
    Pull {
        #[arg(long)]
        limit: Option<u32>,

        #[arg(long)]
        min_priority: Option<i64>,
    },

    /// Confirm scans by ID
    Confirm {
        #[arg(required = true)]
        scan_ids: Vec<Uuid>,
    },

    /// Show buffer counts for this instance
    Status,

    /// Continuously pull, verify, print and confirm scans
    Sync {
        /// Seconds to wait when the buffer is drained
        #[arg(long, default_value_t = 10)]
        interval: u64,

        #[arg(long)]
        limit: Option<u32>,

        #[arg(long)]
        min_priority: Option<i64>,

        /// Run a single round and exit
        #[arg(long)]
        once: bool,
    },
}

fn parse_tier(raw: &str) -> std::result::Result<Tier, String> {
    Tier::parse(raw).ok_or_else(|| format!("unknown tier '{}', expected free or paid", raw))
}

/// Writes each verified scan to stdout as one JSON line.
struct StdoutSink;

impl ScanSink for StdoutSink {
    fn accept(&mut self, scan: &PulledScan) -> std::result::Result<(), String> {
        let line = serde_json::to_string(scan).map_err(|e| e.to_string())?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{}", line).map_err(|e| e.to_string())
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = EckwmsClient::new(&cli.relay_url, cli.api_key.as_deref())?;

    match cli.command {
        Commands::Register {
            name,
            tier,
            public_demo,
            registration_token,
            admin_token,
        } => {
            let request = RegisterInstanceRequest {
                name,
                tier,
                public_demo,
                ..RegisterInstanceRequest::default()
            };
            let registration = client
                .register(
                    &request,
                    registration_token.as_deref(),
                    admin_token.as_deref(),
                )
                .await?;
            tracing::info!(instance_id = %registration.instance_id, "Instance registered");
            print_json(&registration)?;
        }
        Commands::Heartbeat {
            public_ip,
            local_ips,
            proxy_url,
        } => {
            let reachability = Reachability {
                public_ip,
                local_ips,
                proxy_url,
            };
            print_json(&client.heartbeat(&reachability).await?)?;
        }
        Commands::Submit {
            payload,
            json,
            priority,
            device_id,
            scan_type,
        } => {
            let payload = if json {
                serde_json::from_str(&payload).context("Payload is not valid JSON")?
            } else {
                serde_json::Value::String(payload)
            };
            let request = SubmitScanRequest {
                payload,
                device_id,
                priority,
                scan_type,
            };
            print_json(&client.submit(&request).await?)?;
        }
        Commands::Pull {
            limit,
            min_priority,
        } => {
            let response = client
                .pull(&PullRequest {
                    limit,
                    min_priority,
                })
                .await?;
            print_json(&response)?;
        }
        Commands::Confirm { scan_ids } => {
            print_json(&client.confirm(&scan_ids).await?)?;
        }
        Commands::Status => {
            print_json(&client.status().await?)?;
        }
        Commands::Sync {
            interval,
            limit,
            min_priority,
            once,
        } => {
            let agent = SyncAgent::new(
                client,
                PullRequest {
                    limit,
                    min_priority,
                },
            );
            let mut sink = StdoutSink;

            if once {
                agent.sync_once(&mut sink).await?;
            } else {
                tracing::info!("Syncing from {}", cli.relay_url);
                let error = agent
                    .run(&mut sink, Duration::from_secs(interval.max(1)))
                    .await;
                return Err(error.into());
            }
        }
    }

    Ok(())
}
