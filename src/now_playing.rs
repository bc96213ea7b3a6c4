use std::process::Stdio;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::preset::MediaIdentity;

/// One update from the now-playing watcher, emitted as a JSON object per line.
///
/// Only the identity fields matter for preset lookup; timing and artwork are
/// carried for display.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub duration: Option<f64>,
    pub elapsed_time: Option<f64>,
    pub is_playing: Option<bool>,
    /// `data:` URI.
    pub artwork: Option<String>,
    /// Set by the watcher when it cannot read the media session.
    pub error: Option<String>,
}

impl NowPlaying {
    pub fn identity(&self) -> MediaIdentity {
        MediaIdentity {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            genre: self.genre.clone(),
        }
    }
}

/// Where now-playing lines come from.
#[derive(Debug, Clone)]
pub enum Source {
    /// Spawn this argv and read its stdout.
    Command(Vec<String>),
    /// Read our own stdin.
    Stdin,
}

/// Parse one watcher line. `Ok(None)` for blank lines and watcher-reported errors.
pub fn parse_line(line: &str) -> Result<Option<NowPlaying>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let update: NowPlaying = serde_json::from_str(line).context("invalid now-playing line")?;
    if let Some(err) = &update.error {
        warn!("Now-playing watcher reported: {}", err);
        return Ok(None);
    }
    Ok(Some(update))
}

/// Start reading now-playing updates. The receiver yields an identity each
/// time it changes. An empty identity means nothing is playing.
pub fn spawn_watcher(source: Source) -> Result<(mpsc::Receiver<MediaIdentity>, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(16);

    let task = match source {
        Source::Command(argv) => {
            let Some((program, args)) = argv.split_first() else {
                bail!("now-playing command is empty");
            };
            let mut child = Command::new(program)
                .args(args)
                .stdout(Stdio::piped())
                .stdin(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("failed to start now-playing watcher {:?}", program))?;
            let stdout = child
                .stdout
                .take()
                .context("now-playing watcher has no stdout")?;
            info!("Now-playing watcher started: {}", argv.join(" "));

            tokio::spawn(async move {
                read_loop(BufReader::new(stdout), tx).await;
                match child.wait().await {
                    Ok(status) => info!("Now-playing watcher exited: {}", status),
                    Err(e) => warn!("Now-playing watcher wait failed: {}", e),
                }
            })
        }
        Source::Stdin => {
            info!("Reading now-playing updates from stdin");
            tokio::spawn(read_loop(BufReader::new(tokio::io::stdin()), tx))
        }
    };

    Ok((rx, task))
}

async fn read_loop<R: AsyncBufRead + Unpin>(reader: R, tx: mpsc::Sender<MediaIdentity>) {
    let mut lines = reader.lines();
    let mut last: Option<MediaIdentity> = None;

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("Now-playing stream closed");
                return;
            }
            Err(e) => {
                warn!("Now-playing read error: {}", e);
                return;
            }
        };

        let update = match parse_line(&line) {
            Ok(Some(update)) => update,
            Ok(None) => continue,
            Err(e) => {
                warn!("{:#}", e);
                continue;
            }
        };

        let identity = update.identity();
        if last.as_ref() == Some(&identity) {
            continue;
        }
        debug!(
            "Now playing: {} (playing={:?}, {:?}/{:?}s, artwork={})",
            identity,
            update.is_playing,
            update.elapsed_time,
            update.duration,
            update.artwork.is_some(),
        );
        last = Some(identity.clone());

        if tx.send(identity).await.is_err() {
            debug!("Now-playing receiver dropped, stopping");
            return;
        }
    }
}
