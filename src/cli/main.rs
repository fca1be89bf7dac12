use clap::{Parser, Subcommand};
use event_relay::{
    config::Config,
    messaging::{MessagingService, Topic},
    telemetry::init_tracing,
    AppError,
};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "event-relay-cli")]
#[command(about = "Event relay operator CLI", long_about = None)]
struct Cli {
    /// Configuration file layered over the built-in defaults
    #[arg(short, long, env = "CONFIG_PATH", default_value = "config/default.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish a raw JSON message
    Produce {
        #[arg(short, long)]
        topic: String,

        /// JSON payload
        #[arg(short, long)]
        message: String,

        /// Partition key
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Emit a typed event to its canonical topic
    Emit {
        #[command(subcommand)]
        event: EmitCommand,
    },

    /// Print the health report
    Health,
}

#[derive(Subcommand)]
enum EmitCommand {
    /// Emit user.created
    UserCreated {
        #[arg(long)]
        user_id: String,

        #[arg(long)]
        email: String,

        #[arg(long)]
        name: Option<String>,
    },

    /// Emit user.updated
    UserUpdated {
        #[arg(long)]
        user_id: String,

        /// JSON object of changed fields
        #[arg(long)]
        changes: String,
    },

    /// Emit email.sent
    EmailSent {
        #[arg(long)]
        to: String,

        #[arg(long)]
        subject: String,

        #[arg(long)]
        template: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match Config::load_from(Some(cli.config.as_path())) {
        Ok(config) => config,
        Err(e) => exit_with(&e),
    };
    init_tracing(&config.observability);

    let messaging = match MessagingService::kafka(config.messaging) {
        Ok(messaging) => messaging,
        Err(e) => exit_with(&AppError::from(e)),
    };

    let outcome = run(&messaging, cli.command).await;

    if let Err(e) = messaging.shutdown().await {
        tracing::warn!(error = %e, "Error during messaging shutdown");
    }

    match outcome {
        Ok((body, healthy)) => {
            print_json(&body);
            if !healthy {
                std::process::exit(1);
            }
        }
        Err(e) => exit_with(&e),
    }
}

/// Run one command; the flag is `false` when the command reports a
/// degraded state
async fn run(messaging: &MessagingService, command: Commands) -> Result<(Value, bool), AppError> {
    match command {
        Commands::Produce {
            topic,
            message,
            key,
        } => {
            if topic.trim().is_empty() {
                return Err(AppError::Validation("topic must not be empty".to_string()));
            }
            let message: Value = serde_json::from_str(&message)
                .map_err(|e| AppError::Validation(format!("message is not valid JSON: {}", e)))?;

            let producer = messaging.producer();
            match key.filter(|key| !key.is_empty()) {
                Some(key) => producer.produce_with_key(&topic, &key, &message).await?,
                None => producer.produce(&topic, &message).await?,
            }

            Ok((
                json!({
                    "success": true,
                    "topic": topic,
                    "message": "Message produced successfully",
                }),
                true,
            ))
        }

        Commands::Emit { event } => {
            let emitter = messaging.emitter();
            let (event_type, topic) = match event {
                EmitCommand::UserCreated {
                    user_id,
                    email,
                    name,
                } => {
                    emitter.emit_user_created(user_id, email, name).await?;
                    ("user.created", Topic::Users)
                }
                EmitCommand::UserUpdated { user_id, changes } => {
                    let changes: Map<String, Value> = serde_json::from_str(&changes).map_err(|e| {
                        AppError::Validation(format!("changes must be a JSON object: {}", e))
                    })?;
                    emitter.emit_user_updated(user_id, changes).await?;
                    ("user.updated", Topic::Users)
                }
                EmitCommand::EmailSent {
                    to,
                    subject,
                    template,
                } => {
                    emitter.emit_email_sent(to, subject, template).await?;
                    ("email.sent", Topic::Emails)
                }
            };

            Ok((
                json!({
                    "success": true,
                    "type": event_type,
                    "topic": topic.to_string(),
                }),
                true,
            ))
        }

        Commands::Health => {
            let report = messaging.health().report().await;
            let healthy = report.is_healthy();
            Ok((serde_json::to_value(&report)?, healthy))
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(_) => println!("{}", value),
    }
}

fn exit_with(err: &AppError) -> ! {
    print_json(&err.to_body());
    std::process::exit(1);
}
