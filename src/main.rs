use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;

use mediashelf::commands::{download, player, playlist};
use mediashelf::config::AppConfig;
use mediashelf::download::DownloadSubsystem;
use mediashelf::executor::MainSequence;
use mediashelf::playback::{
    PlaybackSession, PlayerController, PlayerLaunch, SessionCommand, SessionState,
};
use mediashelf::App;

const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

const USAGE: &str = "usage: mediashelf <command>

  playlists                      list playlists
  create <name>                  create a playlist
  delete <playlist>              delete a playlist and its items
  items <playlist>               list the items of a playlist
  add <playlist> <file|url>      add a local file or http(s) URL
  remove-item <item>             remove one item
  play <playlist>                play a playlist in a background session
  open <playlist> <item>         open the player at an item of a playlist
  stream <url>                   open the player on an http, https or rtsp URL
  download <url> [playlist]      download into a playlist (Downloads by default)";

fn parse_id(arg: Option<&String>, what: &str) -> Result<i64> {
    let raw = arg.with_context(|| format!("missing {} id\n\n{}", what, USAGE))?;
    raw.parse()
        .with_context(|| format!("invalid {} id: {}", what, raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };

    let config = AppConfig::load()?;
    let app = App::start(config).await?;
    let result = run(&app, command, &args[1..]).await;
    app.shutdown().await;
    result
}

async fn run(app: &App, command: &str, args: &[String]) -> Result<()> {
    match command {
        "playlists" => {
            for p in playlist::get_playlists(&app.store).await? {
                println!("{:>5}  {}", p.id, p.name);
            }
        }
        "create" => {
            let name = args.join(" ");
            let created = playlist::create_playlist(&app.store, &name).await?;
            println!("Created playlist {} ({})", created.name, created.id);
        }
        "delete" => {
            let id = parse_id(args.first(), "playlist")?;
            playlist::delete_playlist(&app.store, id).await?;
            println!("Deleted playlist {}", id);
        }
        "items" => {
            let id = parse_id(args.first(), "playlist")?;
            for item in playlist::get_media_items(&app.store, id).await? {
                println!("{:>5}  {}  <{}>", item.id, item.title().unwrap_or("-"), item.uri);
            }
        }
        "add" => {
            let id = parse_id(args.first(), "playlist")?;
            let Some(locator) = args.get(1) else {
                bail!("missing file or URL\n\n{}", USAGE);
            };
            let item = if mediashelf::resolver::is_network(locator) {
                playlist::add_url(&app.store, app.resolver.clone(), id, locator).await?
            } else {
                playlist::add_local_file(&app.store, app.resolver.clone(), id, locator).await?
            };
            println!("Added {} ({})", item.title().unwrap_or(&item.uri), item.id);
        }
        "remove-item" => {
            let id = parse_id(args.first(), "item")?;
            playlist::delete_media_item(&app.store, id).await?;
            println!("Removed item {}", id);
        }
        "play" => {
            let id = parse_id(args.first(), "playlist")?;
            play_playlist(app, id)?;
        }
        "open" => {
            let playlist_id = parse_id(args.first(), "playlist")?;
            let media_id = parse_id(args.get(1), "item")?;
            let launch =
                player::launch_for_item(&app.store, app.resolver.clone(), playlist_id, media_id)
                    .await?;
            open_player(app, launch)?;
        }
        "stream" => {
            let Some(url) = args.first() else {
                bail!("missing URL\n\n{}", USAGE);
            };
            let launch = player::validate_playback_url(url, app.resolver.as_ref())?;
            open_player(app, launch)?;
        }
        "download" => {
            let Some(url) = args.first() else {
                bail!("missing URL\n\n{}", USAGE);
            };
            let playlist_id = match args.get(1) {
                Some(_) => Some(parse_id(args.get(1), "playlist")?),
                None => None,
            };
            let downloads: &dyn DownloadSubsystem = app.downloads.as_ref();
            let id =
                download::start_download(downloads, &app.store, app.resolver.clone(), url, playlist_id)
                    .await?;
            println!("Download {} queued, waiting for it to finish...", id);
        }
        other => bail!("unknown command: {}\n\n{}", other, USAGE),
    }
    Ok(())
}

/// Runs a background session until the playlist is loaded.
fn play_playlist(app: &App, playlist_id: i64) -> Result<()> {
    let main = MainSequence::new();
    let mut session = PlaybackSession::new(app.playback_context(), main.handle());
    session.handle_command(Some(SessionCommand::PlayPlaylist(playlist_id)))?;

    let settled = tokio::task::block_in_place(|| {
        main.run_until(&mut session, EVENT_TIMEOUT, |s| {
            s.state() == SessionState::Playing || s.is_released()
        })
    });
    if !settled {
        bail!("timed out loading playlist {}", playlist_id);
    }

    match session.engine().and_then(|e| e.current_entry()) {
        Some(entry) if session.state() == SessionState::Playing => {
            let total = session.engine().map(|e| e.queue_len()).unwrap_or(0);
            println!("Now playing: {} ({} items queued)", entry.title, total);
        }
        _ => println!("Nothing to play in playlist {}", playlist_id),
    }

    session.release();
    Ok(())
}

/// Walks a foreground player through one visible lifecycle.
fn open_player(app: &App, launch: PlayerLaunch) -> Result<()> {
    let main = MainSequence::new();
    let downloads: Arc<dyn DownloadSubsystem> = app.downloads.clone();
    let mut controller = PlayerController::create(
        app.playback_context(),
        downloads,
        app.config.release_policy,
        main.handle(),
        Some(launch),
    )?;
    controller.on_start()?;
    controller.on_resume()?;

    let ready = tokio::task::block_in_place(|| {
        main.run_until(&mut controller, EVENT_TIMEOUT, |c| c.current().is_some())
    });
    if ready {
        println!("Now playing: {}", controller.title());
        for (index, entry) in controller.queue().iter().enumerate() {
            println!("{:>5}  {}", index, entry.title);
        }
    }
    for notice in controller.take_notices() {
        println!("{}", notice);
    }

    controller.on_pause()?;
    controller.on_stop()?;
    controller.on_destroy()?;
    Ok(())
}
