mod cli;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use pims_core::export::FrameExporter;
use pims_core::sniff::sniff;
use pims_core::{open_with, OpenOptions, SliceSpec};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Info { input, reader } => {
            let kind = match reader {
                Some(kind) => kind,
                None => sniff(&input).with_context(|| format!("cannot sniff {}", input.display()))?,
            };
            let options = OpenOptions {
                reader: Some(kind),
                ..OpenOptions::default()
            };
            let seq = open_with(&input, &options)
                .with_context(|| format!("failed to open {}", input.display()))?;

            println!("Reader: {kind}");
            println!("{seq}");
            seq.close().context("failed to close source")?;
            Ok(())
        }
        cli::Command::Export {
            input,
            output,
            start,
            stop,
            step,
            grey,
            annotate,
            font,
            reader,
        } => {
            if step == 0 {
                bail!("--step must not be zero");
            }
            info!(?input, ?output, ?start, ?stop, step, grey, annotate, "starting export");

            let options = OpenOptions {
                reader,
                as_grey: grey,
                ..OpenOptions::default()
            };
            let mut seq = open_with(&input, &options)
                .with_context(|| format!("failed to open {}", input.display()))?;

            std::fs::create_dir_all(&output)
                .with_context(|| format!("failed to create {}", output.display()))?;

            let exporter = FrameExporter::new(font.as_deref());
            if annotate && !exporter.can_annotate() {
                warn!("annotation requested without a usable --font, frames will be unlabelled");
            }

            let view = seq
                .slice(SliceSpec::new(start, stop, step))
                .context("invalid frame range")?;
            if view.is_empty() {
                warn!("frame range selects no frames");
            }

            let mut written = 0usize;
            for frame in view {
                let frame = frame.context("failed to read frame")?;
                exporter
                    .save_frame(&frame, &output, annotate)
                    .with_context(|| format!("failed to save frame {:?}", frame.frame_no()))?;
                written += 1;
            }

            info!(written, ?output, "export complete");
            seq.close().context("failed to close source")?;
            Ok(())
        }
    }
}
