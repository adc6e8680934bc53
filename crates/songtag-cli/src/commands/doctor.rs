use anyhow::Result;
use std::path::{Path, PathBuf};
use std::process::Command;

use songtag_core::SongTagError;
use songtag_core::config::{mask, Config, Credentials};

struct Tool {
    name: &'static str,
    path: Option<PathBuf>,
    version_arg: &'static str,
    required: bool,
    install_hint: &'static str,
}

pub async fn run(config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path).map_err(SongTagError::from)?;

    println!("songtag dependency check\n");

    let tools = [
        Tool {
            name: "yt-dlp",
            path: config.yt_dlp_path(),
            version_arg: "--version",
            required: true,
            install_hint: "pip install yt-dlp",
        },
        Tool {
            name: "ffmpeg",
            path: config.ffmpeg_path(),
            version_arg: "-version",
            required: true,
            install_hint: "install ffmpeg from your package manager",
        },
        Tool {
            name: "fpcalc",
            path: config.fpcalc_path(),
            version_arg: "-version",
            required: true,
            install_hint: "install chromaprint (libchromaprint-tools)",
        },
        Tool {
            name: "sacad",
            path: config.sacad_path(),
            version_arg: "--version",
            required: false,
            install_hint: "pip install sacad (only for --cover-source sacad)",
        },
        Tool {
            name: "jpegtran",
            path: config.jpegtran_path(),
            version_arg: "-version",
            required: false,
            install_hint: "install libjpeg-turbo-progs (optional cover recompression)",
        },
    ];

    let mut all_ok = true;
    for tool in &tools {
        print!("{:<14} ", format!("{}:", tool.name));
        match &tool.path {
            Some(path) => match tool_version(path, tool.version_arg) {
                Some(version) => println!("OK ({})", version),
                None => {
                    println!("FOUND but failed to get version");
                    all_ok &= !tool.required;
                }
            },
            None => {
                println!("{}", if tool.required { "NOT FOUND" } else { "not found (optional)" });
                println!("               Install: {}", tool.install_hint);
                all_ok &= !tool.required;
            }
        }
    }

    print!("{:<14} ", "AcoustID key:");
    match Credentials::from_env() {
        Ok(credentials) => {
            println!("OK ({})", mask(&credentials.application_key));
            print!("{:<14} ", "User key:");
            match credentials.user_key.as_deref() {
                Some(key) => println!("OK ({})", mask(key)),
                None => println!("not set (submissions disabled)"),
            }
        }
        Err(e) => {
            println!("MISSING");
            println!("               {}", e);
            all_ok = false;
        }
    }

    println!();
    if all_ok {
        println!("All dependencies OK!");
    } else {
        println!("Some dependencies are missing. See above for installation instructions.");
    }

    Ok(())
}

/// First non-empty line of the tool's version output
fn tool_version(path: &Path, arg: &str) -> Option<String> {
    let out = Command::new(path).arg(arg).output().ok()?;
    let text = if out.stdout.is_empty() { out.stderr } else { out.stdout };
    String::from_utf8_lossy(&text)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(|l| l.chars().take(60).collect())
}
