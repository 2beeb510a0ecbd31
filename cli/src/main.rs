mod device;

use clap::{Parser, Subcommand};
use device::{read_wav, write_wav, ConsoleBridge, FilePlatform};
use rust_decimal::Decimal;
use sonicpay_core::profile::{register_profiles_json, registered_profiles, require_profile};
use sonicpay_core::{
    AudioModemError, Decoder, Encoder, SessionConfig, SessionEvent, SessionStatus, TransferError,
    TransferPayload, TransferSession, TransferState, MODEM_SAMPLE_RATE,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// How often the session is ticked
const TICK_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wav(#[from] hound::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Modem(#[from] AudioModemError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("Unsupported WAV sample format: {0} bits")]
    UnsupportedWav(u16),

    #[error("Time expired before a token arrived")]
    TimeExpired,

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Parser)]
#[command(name = "sonicpay")]
#[command(about = "Hand a wallet token between devices over near-ultrasonic audio")]
struct Cli {
    /// Session configuration (JSON)
    #[arg(long, global = true, value_name = "CONFIG.JSON")]
    config: Option<PathBuf>,

    /// Extra modem profiles to register (JSON object keyed by name)
    #[arg(long, global = true, value_name = "PROFILES.JSON")]
    profile_file: Option<PathBuf>,

    /// Modem profile; overrides the configuration
    #[arg(short, long, global = true)]
    profile: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a token transfer to a WAV file
    Encode {
        #[arg(long)]
        token_id: String,

        #[arg(long)]
        amount: Decimal,

        /// Output WAV file
        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        /// Output sample rate
        #[arg(short, long, default_value_t = MODEM_SAMPLE_RATE)]
        sample_rate: u32,
    },

    /// Decode a token transfer from a WAV file and print it as JSON
    Decode {
        /// Input WAV file
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,
    },

    /// Run a send session that plays into a WAV file in real time
    Send {
        #[arg(long)]
        token_id: String,

        #[arg(long)]
        amount: Decimal,

        #[arg(value_name = "OUTPUT.WAV")]
        output: PathBuf,

        #[arg(short, long, default_value_t = MODEM_SAMPLE_RATE)]
        sample_rate: u32,
    },

    /// Run a receive session that listens to a WAV file in real time
    Receive {
        #[arg(value_name = "INPUT.WAV")]
        input: PathBuf,

        /// Seconds to wait for a token; overrides the configuration
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// List registered modem profiles as JSON
    Profiles,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Encode {
            token_id,
            amount,
            output,
            sample_rate,
        } => encode_command(&config, &token_id, amount, &output, sample_rate)?,
        Commands::Decode { input } => decode_command(&config, &input)?,
        Commands::Send {
            token_id,
            amount,
            output,
            sample_rate,
        } => send_command(config, &token_id, amount, output, sample_rate).await?,
        Commands::Receive { input, timeout } => {
            let mut config = config;
            if let Some(secs) = timeout {
                config.receive_timeout_secs = secs.max(1);
            }
            receive_command(config, &input).await?
        }
        Commands::Profiles => profiles_command()?,
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<SessionConfig, CliError> {
    if let Some(path) = &cli.profile_file {
        let names = register_profiles_json(&std::fs::read_to_string(path)?)?;
        tracing::info!("Registered profiles {:?} from {}", names, path.display());
    }

    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };
    if let Some(profile) = &cli.profile {
        config.profile = profile.clone();
    }
    require_profile(&config.profile)?;
    Ok(config)
}

fn encode_command(
    config: &SessionConfig,
    token_id: &str,
    amount: Decimal,
    output: &Path,
    sample_rate: u32,
) -> Result<(), CliError> {
    let profile = require_profile(&config.profile)?;
    let payload = TransferPayload::new(token_id, amount)?;
    let bytes = payload.encode(profile.payload_format)?;

    let encoder = Encoder::new(&profile)?;
    let samples = encoder.encode_at_rate(&bytes, sample_rate)?;
    tracing::info!(
        "Encoded {} payload bytes with profile '{}' to {} samples",
        bytes.len(),
        config.profile,
        samples.len()
    );

    write_wav(output, &samples, sample_rate)?;
    println!("{}", payload.to_json()?);
    Ok(())
}

fn decode_command(config: &SessionConfig, input: &Path) -> Result<(), CliError> {
    let profile = require_profile(&config.profile)?;
    let (samples, sample_rate) = read_wav(input)?;

    let mut decoder = Decoder::new(&profile)?;
    let payload = decoder.decode_payload(&samples, sample_rate)?;
    tracing::info!("Decoded token {} ({})", payload.token_id(), payload.amount());

    println!("{}", payload.to_json()?);
    Ok(())
}

async fn send_command(
    config: SessionConfig,
    token_id: &str,
    amount: Decimal,
    output: PathBuf,
    sample_rate: u32,
) -> Result<(), CliError> {
    let platform = FilePlatform::speaker(output, sample_rate);
    let mut session = TransferSession::new(config, Box::new(platform), Box::new(ConsoleBridge));
    session.start_send(token_id, amount, std::time::Instant::now())?;

    run_session(&mut session).await?;
    match session.payload() {
        Some(payload) => println!("{}", payload.to_json()?),
        None => return Err(CliError::Cancelled),
    }
    Ok(())
}

async fn receive_command(config: SessionConfig, input: &Path) -> Result<(), CliError> {
    let (samples, sample_rate) = read_wav(input)?;
    let platform = FilePlatform::microphone(samples, sample_rate);
    let mut session = TransferSession::new(config, Box::new(platform), Box::new(ConsoleBridge));
    session.start_receive(std::time::Instant::now())?;

    run_session(&mut session).await?;
    match (session.state(), session.payload()) {
        (TransferState::Done, Some(payload)) => println!("{}", payload.to_json()?),
        _ if session.status() == &SessionStatus::TimeExpired => return Err(CliError::TimeExpired),
        _ => return Err(CliError::Cancelled),
    }
    Ok(())
}

/// Tick the session until it leaves its active state or ctrl-c cancels it.
async fn run_session(session: &mut TransferSession) -> Result<(), CliError> {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while session.state().is_active() {
        tokio::select! {
            tick = interval.tick() => {
                session.tick(tick.into_std());
                tracing::debug!("{} level {:.2}", session.status(), session.level());
            }
            _ = &mut ctrl_c => {
                session.cancel();
            }
        }
    }

    for event in session.take_events() {
        match event {
            SessionEvent::Failed(e) => return Err(e.into()),
            SessionEvent::TimedOut => tracing::warn!("{}", SessionStatus::TimeExpired),
            other => tracing::info!("{:?}", other),
        }
    }
    Ok(())
}

fn profiles_command() -> Result<(), CliError> {
    let profiles: serde_json::Map<String, serde_json::Value> = registered_profiles()
        .into_iter()
        .map(|(name, profile)| Ok((name, serde_json::to_value(profile.as_ref())?)))
        .collect::<Result<_, serde_json::Error>>()?;
    println!("{}", serde_json::to_string_pretty(&profiles)?);
    Ok(())
}
