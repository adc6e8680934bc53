use anyhow::Result;
use std::path::Path;

use songtag_core::SongTagError;
use songtag_core::config::{mask, Config, Credentials, APPLICATION_KEY_VAR, USER_KEY_VAR};

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).map_err(SongTagError::from)?;

    println!("songtag configuration\n");
    print!("{}", config.to_toml()?);

    println!("\n[tools]");
    let tools = [
        ("yt-dlp", config.yt_dlp_path()),
        ("ffmpeg", config.ffmpeg_path()),
        ("fpcalc", config.fpcalc_path()),
        ("sacad", config.sacad_path()),
        ("jpegtran", config.jpegtran_path()),
    ];
    for (name, path) in tools {
        match path {
            Some(p) => println!("  {} = {:?}", name, p),
            None => println!("  {} = (not found)", name),
        }
    }

    println!("\n[credentials]");
    match Credentials::from_env() {
        Ok(credentials) => {
            println!("  {} = {}", APPLICATION_KEY_VAR, mask(&credentials.application_key));
            match credentials.user_key.as_deref() {
                Some(key) => println!("  {} = {}", USER_KEY_VAR, mask(key)),
                None => println!("  {} = (not set)", USER_KEY_VAR),
            }
        }
        Err(e) => println!("  {}", e),
    }

    // Show config file locations
    println!("\nConfig sources (later entries override earlier ones):");
    if let Some(config_dir) = dirs::config_dir() {
        println!("  1. {}/songtag/config.toml", config_dir.display());
    }
    if let Some(p) = config_path {
        println!("  2. {} (specified)", p.display());
    }
    println!("  3. Environment variables (SONGTAG_*, nested keys with __)");
    println!("  4. Command line options");

    Ok(())
}
