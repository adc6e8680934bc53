//! Interactive metadata review on the terminal

use async_trait::async_trait;
use indicatif::ProgressBar;
use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex};

use songtag_core::fallback::{ManualEdit, MetadataEditor};
use songtag_core::track::TrackMetadata;

/// The spinner of the song being processed, cleared from the screen while questions are asked
#[derive(Clone, Default)]
pub struct ActiveProgress(Arc<Mutex<Option<ProgressBar>>>);

impl ActiveProgress {
    pub fn set(&self, pb: Option<ProgressBar>) {
        if let Ok(mut slot) = self.0.lock() {
            *slot = pb;
        }
    }

    fn current(&self) -> Option<ProgressBar> {
        self.0.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Reads corrections from stdin; blank answers keep the proposed value
pub struct StdinEditor {
    can_submit: bool,
    progress: ActiveProgress,
}

impl StdinEditor {
    /// `can_submit` enables the AcoustID submission question
    pub fn new(can_submit: bool, progress: ActiveProgress) -> Self {
        Self { can_submit, progress }
    }
}

#[async_trait]
impl MetadataEditor for StdinEditor {
    async fn review(&self, source_title: &str, proposed: &TrackMetadata, confident: bool) -> io::Result<ManualEdit> {
        let source_title = source_title.to_string();
        let proposed = proposed.clone();
        let can_submit = self.can_submit;
        let progress = self.progress.current();

        tokio::task::spawn_blocking(move || {
            suspended(progress.as_ref(), || {
                let stdin = io::stdin();
                let mut input = stdin.lock();
                let mut output = io::stderr();
                review_with(&mut input, &mut output, &source_title, &proposed, confident, can_submit)
            })
        })
        .await
        .map_err(io::Error::other)?
    }
}

/// Runs `f` with the spinner erased; it is redrawn afterwards
fn suspended<R>(progress: Option<&ProgressBar>, f: impl FnOnce() -> R) -> R {
    match progress {
        Some(pb) => pb.suspend(f),
        None => f(),
    }
}

fn review_with(
    input: &mut impl BufRead,
    output: &mut impl Write,
    source_title: &str,
    proposed: &TrackMetadata,
    confident: bool,
    can_submit: bool,
) -> io::Result<ManualEdit> {
    writeln!(output)?;
    if confident {
        writeln!(output, "Review metadata for \"{}\"", source_title)?;
    } else {
        writeln!(output, "No confident match for \"{}\"", source_title)?;
    }

    let mut metadata = proposed.clone();
    loop {
        metadata.artist = ask(input, output, "Artist", &metadata.artist)?;
        metadata.title = ask(input, output, "Title", &metadata.title)?;
        metadata.album = ask(input, output, "Album", &metadata.album)?;

        writeln!(output, "  -> {}", metadata)?;
        if confirm(input, output, "Use this metadata?", true)? {
            break;
        }
    }

    // Release details no longer apply once names were edited
    if metadata.artist != proposed.artist || metadata.album != proposed.album {
        metadata.release_group_id = None;
        metadata.track_number = None;
        metadata.year = None;
    }

    let submit = can_submit && confirm(input, output, "Submit to AcoustID?", false)?;
    Ok(ManualEdit { metadata, submit })
}

fn read_line(input: &mut impl BufRead) -> io::Result<String> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "input closed"));
    }
    Ok(line.trim().to_string())
}

fn ask(input: &mut impl BufRead, output: &mut impl Write, label: &str, current: &str) -> io::Result<String> {
    write!(output, "  {} [{}]: ", label, current)?;
    output.flush()?;
    let answer = read_line(input)?;
    Ok(if answer.is_empty() {
        current.to_string()
    } else {
        answer
    })
}

fn confirm(input: &mut impl BufRead, output: &mut impl Write, question: &str, default: bool) -> io::Result<bool> {
    let hint = if default { "Y/n" } else { "y/N" };
    loop {
        write!(output, "  {} [{}] ", question, hint)?;
        output.flush()?;
        match read_line(input)?.to_lowercase().as_str() {
            "" => return Ok(default),
            "y" | "yes" => return Ok(true),
            "n" | "no" => return Ok(false),
            _ => writeln!(output, "  Please answer y or n")?,
        }
    }
}
