mod app;
mod bluetooth;
mod config;
mod device;
mod instance_lock;
mod now_playing;
mod preset;
mod protocol;

use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use config::AppConfig;
use device::Controls;
use now_playing::Source;
use preset::{MediaIdentity, PresetKind, Resolution, SaveKind};
use protocol::{Frame, Parameter};

#[derive(Parser)]
#[command(name = "subtune", about = "Per-track presets for SVS subwoofers over Bluetooth LE")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write one setting to the subwoofer
    Set {
        #[arg(value_enum)]
        parameter: Parameter,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },
    /// Show which preset applies to the given media
    Resolve {
        #[command(flatten)]
        identity: IdentityArgs,
        /// Resolve against this template instead of the selected target
        #[arg(long)]
        target: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Resolve the preset for the given media and write it to the subwoofer
    Apply {
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Save a preset for the given media
    Save {
        #[command(subcommand)]
        level: SaveLevel,
    },
    /// Remove every track, album, artist and genre preset for the given media
    Clear {
        #[command(flatten)]
        identity: IdentityArgs,
    },
    /// Manage named templates
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
    /// Manage the fallback template used when nothing more specific is saved
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },
    /// Follow now-playing updates and keep the subwoofer on the active preset
    Watch {
        /// Read now-playing JSON lines from stdin instead of the configured command
        #[arg(long)]
        stdin: bool,
        /// Write logs to this file instead of stderr
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Show the preset store location and what it holds
    Status,
    /// List paired or discovered subwoofers
    Devices,
    /// Print the effective configuration
    Config {
        /// Save it to the config path (creates the file with defaults)
        #[arg(long)]
        write: bool,
    },
    /// Encode or decode a parameter write frame without touching the device
    Frame {
        #[command(subcommand)]
        action: FrameAction,
    },
}

#[derive(Args, Debug, Default)]
struct IdentityArgs {
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    artist: Option<String>,
    #[arg(long)]
    album: Option<String>,
    #[arg(long)]
    genre: Option<String>,
}

impl IdentityArgs {
    fn identity(&self) -> MediaIdentity {
        MediaIdentity {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            genre: self.genre.clone(),
        }
    }
}

#[derive(Args, Debug)]
struct ControlArgs {
    #[arg(long, allow_negative_numbers = true)]
    volume: f64,
    #[arg(long, allow_negative_numbers = true)]
    phase: f64,
}

impl ControlArgs {
    fn controls(&self) -> Controls {
        Controls {
            volume: self.volume,
            phase: self.phase,
        }
        .clamped()
    }
}

#[derive(Subcommand)]
enum SaveLevel {
    Track(SavePresetArgs),
    Release(SavePresetArgs),
    Artist(SavePresetArgs),
    Genre(SavePresetArgs),
    /// Update the HOME preset
    Home(ControlArgs),
}

#[derive(Args, Debug)]
struct SavePresetArgs {
    #[command(flatten)]
    identity: IdentityArgs,
    #[command(flatten)]
    controls: ControlArgs,
}

#[derive(Subcommand)]
enum TemplateAction {
    List,
    Show { name: String },
    Save {
        name: String,
        #[command(flatten)]
        controls: ControlArgs,
    },
    Delete { name: String },
}

#[derive(Subcommand)]
enum TargetAction {
    Show,
    Set { name: String },
    Clear,
}

#[derive(Subcommand)]
enum FrameAction {
    Encode {
        #[arg(value_enum)]
        parameter: Parameter,
        #[arg(allow_negative_numbers = true)]
        value: f64,
    },
    Decode { hex: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("subtune=debug".parse()?)
        .add_directive("bluer=info".parse()?);

    // Watch can run for hours under a session manager; let it log to a file.
    if let Command::Watch {
        log_file: Some(path),
        ..
    } = &cli.command
    {
        let log_file = std::fs::File::create(path)
            .with_context(|| format!("cannot create log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(log_file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let config = AppConfig::load();

    match cli.command {
        Command::Set { parameter, value } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                let (subwoofer, _worker) = app::connect(&config).await?;
                subwoofer.set(parameter, value).await?;
                Ok::<_, anyhow::Error>(())
            })
        }
        Command::Resolve {
            identity,
            target,
            json,
        } => {
            let library = app::open_library(&config)?;
            let identity = identity.identity();
            let identity = (!identity.is_empty()).then_some(&identity);
            let resolution = match target {
                Some(name) => library.resolve(identity, Some(&name)),
                None => library.resolve_active(identity),
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&resolution)?);
            } else {
                print_resolution(&resolution);
            }
            Ok(())
        }
        Command::Apply { identity } => {
            let library = app::open_library(&config)?;
            let identity = identity.identity();
            let resolution = library.resolve_active((!identity.is_empty()).then_some(&identity));
            print_resolution(&resolution);

            let controls = resolution.active.record.controls;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                let (subwoofer, _worker) = app::connect(&config).await?;
                subwoofer.apply(&controls).await?;
                Ok::<_, anyhow::Error>(())
            })
        }
        Command::Save { level } => {
            let mut library = app::open_library(&config)?;
            let (kind, args) = match level {
                SaveLevel::Home(controls) => {
                    library.save_home(controls.controls())?;
                    println!("Home: {}", controls.controls());
                    return Ok(());
                }
                SaveLevel::Track(args) => (SaveKind::Track, args),
                SaveLevel::Release(args) => (SaveKind::Release, args),
                SaveLevel::Artist(args) => (SaveKind::Artist, args),
                SaveLevel::Genre(args) => (SaveKind::Genre, args),
            };
            let controls = args.controls.controls();
            let key = library.save_preset(kind, &args.identity.identity(), controls)?;
            println!("{}: {}", key.label(), controls);
            Ok(())
        }
        Command::Clear { identity } => {
            let identity = identity.identity();
            if identity.is_empty() {
                bail!("nothing to clear: pass --title, --artist, --album or --genre");
            }
            let mut library = app::open_library(&config)?;
            library.clear_presets(&identity)?;
            Ok(())
        }
        Command::Template { action } => {
            let mut library = app::open_library(&config)?;
            match action {
                TemplateAction::List => {
                    let selected = library.selected_target();
                    for name in library.list_templates() {
                        let marker = if selected.as_deref() == Some(name.as_str()) {
                            "*"
                        } else {
                            " "
                        };
                        println!("{} {}", marker, name);
                    }
                }
                TemplateAction::Show { name } => {
                    let controls = library
                        .get_template(&name)
                        .ok_or_else(|| anyhow!("no template named {:?}", name))?;
                    println!("{}: {}", name, controls);
                }
                TemplateAction::Save { name, controls } => {
                    library.save_template(&name, controls.controls())?;
                }
                TemplateAction::Delete { name } => {
                    library.delete_template(&name)?;
                }
            }
            Ok(())
        }
        Command::Target { action } => {
            let mut library = app::open_library(&config)?;
            match action {
                TargetAction::Show => match library.selected_target() {
                    Some(name) => println!("{}", name),
                    None => println!("Home"),
                },
                TargetAction::Set { name } => library.set_selected_target(Some(&name))?,
                TargetAction::Clear => library.set_selected_target(None)?,
            }
            Ok(())
        }
        Command::Watch { stdin, .. } => {
            let source = match (&config.now_playing_command, stdin) {
                (Some(argv), false) if !argv.is_empty() => Source::Command(argv.clone()),
                _ => Source::Stdin,
            };
            info!("subtune watch starting");
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(app::run_watch(config, source))
        }
        Command::Status => {
            let library = app::open_library(&config)?;
            let store = library.store();
            println!("Store: {}", store.substrate().path().display());
            println!("Home: {}", library.home().controls);
            println!(
                "Target: {}",
                library.selected_target().as_deref().unwrap_or("Home")
            );
            for kind in [
                PresetKind::Track,
                PresetKind::Release,
                PresetKind::Artist,
                PresetKind::Genre,
                PresetKind::Template,
            ] {
                println!("  {:<8} {}", kind.as_str(), store.count(kind));
            }
            Ok(())
        }
        Command::Devices => {
            let runtime = tokio::runtime::Runtime::new()?;
            let devices = runtime.block_on(bluetooth::scanner::list_devices(&config.device_name))?;
            if devices.is_empty() {
                println!("No {} known to the adapter", config.device_name);
            }
            for device in devices {
                let state = if device.connected { "connected" } else { "" };
                println!("{}  {}  {}", device.address, device.name, state);
            }
            Ok(())
        }
        Command::Config { write } => {
            println!("# {}", AppConfig::path().display());
            print!("{}", toml::to_string_pretty(&config)?);
            if write {
                config.save()?;
            }
            Ok(())
        }
        Command::Frame { action } => {
            match action {
                FrameAction::Encode { parameter, value } => {
                    println!("{}", Frame::encode(parameter, value)?);
                }
                FrameAction::Decode { hex } => {
                    let bytes = parse_hex(&hex)?;
                    let write = Frame::decode(&bytes)?;
                    match write.parameter() {
                        Some(parameter) => println!("{} = {}", parameter, write.value()),
                        None => println!(
                            "block {:#04x} offset {:#04x} raw {}",
                            write.block_id, write.offset, write.raw
                        ),
                    }
                }
            }
            Ok(())
        }
    }
}

fn print_resolution(resolution: &Resolution) {
    for entry in &resolution.chain {
        let status = match &entry.record {
            Some(record) if entry.is_saved() => record.controls.to_string(),
            _ if entry.key.is_some() => "not saved".to_string(),
            _ => "n/a".to_string(),
        };
        let label = entry
            .key
            .as_ref()
            .map(|key| key.label())
            .unwrap_or_else(|| entry.kind.to_string());
        println!("  {:<8} {:<40} {}", entry.kind.as_str(), label, status);
    }
    let active = &resolution.active;
    println!(
        "Active: {} ({}) {}",
        active.record.title, active.kind, active.record.controls
    );
}

fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: Vec<u8> = text.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
    if let Some(&bad) = digits.iter().find(|b| !b.is_ascii_hexdigit()) {
        bail!("not a hex digit in {:?} (byte {:#04x})", text, bad);
    }
    if digits.len() % 2 != 0 {
        bail!("odd number of hex digits");
    }
    digits
        .chunks(2)
        .map(|pair| -> Result<u8> {
            let pair = std::str::from_utf8(pair)?;
            Ok(u8::from_str_radix(pair, 16)?)
        })
        .collect()
}
