/*
    spotify-export-rs | Rust CLI tool to export playlists and Liked Songs to CSV.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use export_core::{
    parse_callback, Config, CredentialManager, ExportEvent, ExportTarget, Exporter, HttpTransport,
    LibraryClient, PaginatedFetcher, PlaylistId, ReqwestTransport, Session, SystemClock,
};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "spotify-export")]
#[command(about = "Export your Spotify playlists and Liked Songs to CSV files", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shows the profile of the account you log in with
    Whoami,
    /// Lists all your playlists with their IDs
    List {
        /// Also write the playlist list to a JSON file (e.g., --json=playlists.json)
        #[arg(long)]
        json: Option<String>,
    },
    /// Exports playlists and/or Liked Songs to CSV, one file each
    Export {
        /// Export your 'Liked Songs'
        #[arg(long)]
        liked: bool,
        /// Playlist to export (ID, spotify:playlist: URI or open.spotify.com link). Repeatable.
        #[arg(long = "playlist", short = 'p', value_name = "PLAYLIST_ID")]
        playlists: Vec<String>,
        /// Export 'Liked Songs' and every playlist
        #[arg(long)]
        all: bool,
        /// Directory the CSV files are written to
        #[arg(long, short = 'o', default_value = ".")]
        out_dir: PathBuf,
    },
}

/// Everything that lives for one login session.
struct App {
    credentials: CredentialManager,
    library: LibraryClient,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::Whoami => {
            let app = login().await;
            handle_whoami(&app).await;
            app.credentials.logout();
        }
        Commands::List { json } => {
            let app = login().await;
            handle_list(&app, json.as_deref()).await;
            app.credentials.logout();
        }
        Commands::Export {
            liked,
            playlists,
            all,
            out_dir,
        } => {
            if !liked && !all && playlists.is_empty() {
                eprintln!("Nothing to export. Use --liked, --playlist <ID> or --all.");
                process::exit(2);
            }

            let mut ids = Vec::with_capacity(playlists.len());
            for raw in playlists {
                match PlaylistId::parse(raw) {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        eprintln!("{}", e);
                        process::exit(2);
                    }
                }
            }

            let app = login().await;
            handle_export(&app, *liked || *all, *all, &ids, out_dir).await;
            app.credentials.logout();
        }
    }
}

async fn login() -> App {
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            eprintln!("Set SPOTIFY_CLIENT_ID (and optionally SPOTIFY_REDIRECT_URI) in your environment or .env file.");
            process::exit(1);
        }
    };

    let session = Arc::new(Session::new(Arc::new(SystemClock)));
    let transport: Arc<dyn HttpTransport> = match ReqwestTransport::new() {
        Ok(t) => Arc::new(t),
        Err(e) => {
            eprintln!("Error initializing HTTP client: {}", e);
            process::exit(1);
        }
    };
    let credentials = CredentialManager::new(config.clone(), transport.clone(), session.clone());

    if let Err(e) = authorize(&credentials).await {
        eprintln!();
        eprintln!("Login failed: {:#}", e);
        process::exit(1);
    }

    let library = LibraryClient::new(PaginatedFetcher::new(config, transport, session));
    App {
        credentials,
        library,
    }
}

async fn authorize(credentials: &CredentialManager) -> anyhow::Result<()> {
    let url = credentials
        .begin_login()
        .context("Could not build the authorization URL")?;

    println!("Opening the Spotify login page in your browser...");
    if webbrowser::open(url.as_str()).is_err() {
        log::debug!("Could not launch a browser");
    }
    println!("If nothing opened, visit this URL:");
    println!();
    println!("    {}", url);
    println!();
    print!("After approving, paste the URL you were redirected to: ");
    std::io::stdout().flush().ok();

    let mut redirected = String::new();
    std::io::stdin()
        .read_line(&mut redirected)
        .context("Failed to read the redirect URL")?;

    let code = parse_callback(&redirected)?;
    credentials.complete_login(&code).await?;

    println!("[OK] Logged in.");
    Ok(())
}

async fn handle_whoami(app: &App) {
    match app.library.profile().await {
        Ok(user) => {
            println!();
            println!("---------------------------------------------------");
            println!("Name:      {}", user.name());
            println!("User ID:   {}", user.id);
            println!("Country:   {}", user.country.as_deref().unwrap_or("-"));
            println!("Plan:      {}", user.product.as_deref().unwrap_or("-"));
            if let Some(url) = &user.external_urls.spotify {
                println!("Profile:   {}", url);
            }
            println!("---------------------------------------------------");
        }
        Err(e) => {
            eprintln!("Failed to load your profile: {}", e);
            process::exit(1);
        }
    }
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() > max {
        format!("{}..", value.chars().take(max - 2).collect::<String>())
    } else {
        value.to_string()
    }
}

async fn handle_list(app: &App, json_path: Option<&str>) {
    println!("Fetching your playlists...");

    let liked_count = match app.library.liked_songs_count().await {
        Ok(count) => count,
        Err(e) => {
            eprintln!("Failed to count Liked Songs: {}", e);
            process::exit(1);
        }
    };

    match app.library.playlists(|_| {}).await {
        Ok(playlists) => {
            // Header
            println!();
            println!(
                "{:<25} | {:<30} | {:<20} | {:<6} | {:<5}",
                "ID", "Name", "Owner", "Tracks", "Collab"
            );
            println!(
                "{:-<25}-+-{:-<30}-+-{:-<20}-+-{:-<6}-+-{:-<5}",
                "", "", "", "", ""
            );
            println!(
                "{:<25} | {:<30} | {:<20} | {:<6} | {:<5}",
                "(use --liked)", "Liked Songs", "you", liked_count, "No"
            );

            for pl in &playlists {
                let collab = if pl.collaborative { "Yes" } else { "No" };
                println!(
                    "{:<25} | {:<30} | {:<20} | {:<6} | {:<5}",
                    pl.id,
                    truncate(&pl.name, 30),
                    truncate(pl.owner_name(), 20),
                    pl.tracks.total,
                    collab
                );
            }
            println!();
            println!("Total: {} playlists + Liked Songs", playlists.len());
            println!("Tip: Copy an ID and run 'spotify-export export -p <ID>'");

            if let Some(path) = json_path {
                match File::create(path) {
                    Ok(mut file) => {
                        let json_content =
                            serde_json::to_string_pretty(&playlists).unwrap_or_default();
                        if let Err(e) = file.write_all(json_content.as_bytes()) {
                            eprintln!();
                            eprintln!("[ERROR] Failed to write playlists to file: {}", e);
                        } else {
                            println!();
                            println!("[SAVED] Playlists saved to: {}", path);
                        }
                    }
                    Err(e) => eprintln!("[ERROR] Failed to create file '{}': {}", path, e),
                }
            }
        }
        Err(e) => {
            eprintln!("Failed to list playlists: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_export(
    app: &App,
    include_liked: bool,
    all_playlists: bool,
    ids: &[PlaylistId],
    out_dir: &Path,
) {
    let mut targets = Vec::new();
    if include_liked {
        targets.push(ExportTarget::LikedSongs);
    }

    if all_playlists || !ids.is_empty() {
        println!("Fetching your playlists...");
        let playlists = match app.library.playlists(|_| {}).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to list playlists: {}", e);
                process::exit(1);
            }
        };

        if all_playlists {
            for pl in playlists {
                match PlaylistId::parse(&pl.id) {
                    Ok(id) => targets.push(ExportTarget::Playlist { id, name: pl.name }),
                    Err(e) => log::warn!("Skipping playlist '{}': {}", pl.name, e),
                }
            }
        } else {
            for id in ids {
                // Followed playlists of other users may not be in the list.
                let name = playlists
                    .iter()
                    .find(|pl| pl.id == id.as_str())
                    .map(|pl| pl.name.clone())
                    .unwrap_or_else(|| "Playlist".to_string());
                targets.push(ExportTarget::Playlist {
                    id: id.clone(),
                    name,
                });
            }
        }
    }

    let exporter = Exporter::new(&app.library, out_dir);
    let result = exporter
        .export_all(&targets, |event| match event {
            ExportEvent::Started { name, index, total } => {
                println!("[{}/{}] Fetching: {}...", index + 1, total, name);
            }
            ExportEvent::Progress { progress, .. } => {
                match progress.page_count {
                    Some(pages) => print!(
                        "\r    page {}/{} ({}%)",
                        progress.page_index,
                        pages,
                        progress.percent()
                    ),
                    None => print!("\r    page {} ({}%)", progress.page_index, progress.percent()),
                }
                std::io::stdout().flush().ok();
            }
            ExportEvent::Finished(file) => {
                println!();
                println!(
                    "[OK] Exported: {} ({} tracks) -> {}",
                    file.name,
                    file.track_count,
                    file.path.display()
                );
            }
        })
        .await;

    match result {
        Ok(files) => {
            println!();
            println!("Successfully exported {} playlist(s)!", files.len());
        }
        Err(e) => {
            eprintln!();
            eprintln!("[ERROR] Export failed: {}", e);
            process::exit(1);
        }
    }
}
