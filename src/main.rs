use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, Level};

use framepipe::batch::{self, BatchOptions};
use framepipe::media::{ffmpeg, snapshot, source::EncodedVideo};
use framepipe::utils::config;
use framepipe::{DecodeRequest, FrameDecoder, FrameGeometry, SeekOffset};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Decoder executable. Defaults to $FRAMEPIPE_DECODER, then .env, then a PATH search for ffmpeg.
    #[arg(long, global = true)]
    decoder: Option<PathBuf>,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct GeometryArgs {
    #[arg(long, default_value_t = 256)]
    width: u32,

    #[arg(long, default_value_t = 256)]
    height: u32,

    #[arg(long = "frames", default_value_t = 16)]
    num_frames: u32,

    /// Seconds to skip before the first frame
    #[arg(long, default_value_t = 0.0)]
    seek: f64,
}

impl GeometryArgs {
    fn resolve(&self) -> Result<(FrameGeometry, SeekOffset)> {
        let geometry = FrameGeometry::new(self.width, self.height, self.num_frames)?;
        let seek = SeekOffset::new(self.seek)?;
        Ok((geometry, seek))
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode one video into raw RGB24 frames
    Decode {
        input: PathBuf,

        #[command(flatten)]
        geometry: GeometryArgs,

        /// Write the raw frame buffer here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write every frame as PNG into this directory
        #[arg(long)]
        png_dir: Option<PathBuf>,

        /// Write the JSON report here instead of stdout
        #[arg(long)]
        report: Option<PathBuf>,

        /// Let the decoder open the file itself instead of feeding it over stdin
        #[arg(long)]
        from_disk: bool,
    },

    /// Decode every video under a directory
    Batch {
        input_dir: PathBuf,

        #[arg(short, long)]
        out_dir: PathBuf,

        #[arg(short, long, default_value_t = 2)]
        workers: usize,

        #[command(flatten)]
        geometry: GeometryArgs,

        /// Write this many frames per video as PNG
        #[arg(long)]
        png_frames: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let decoder = config::resolve_decoder(cli.decoder)?;

    match cli.command {
        Command::Decode {
            input,
            geometry,
            output,
            png_dir,
            report,
            from_disk,
        } => {
            let (geometry, seek) = geometry.resolve()?;
            info!("Decoding {:?} at {}x{}, {} frames", input, geometry.width(), geometry.height(), geometry.num_frames());

            let (buffer, decode_report) = if from_disk {
                ffmpeg::extract_frames(&decoder, &input, geometry, seek)?
            } else {
                let video = EncodedVideo::load(&input)?;
                let request = DecodeRequest::new(&video, geometry, seek);
                FrameDecoder::new(decoder).decode(&request)?
            };

            if let Some(path) = output {
                fs::write(&path, buffer.as_bytes()).with_context(|| format!("Failed to write {:?}", path))?;
                info!("Wrote {} bytes to {:?}", buffer.as_bytes().len(), path);
            }

            if let Some(dir) = png_dir {
                let written = snapshot::write_pngs(&buffer, &dir, None)?;
                info!("Wrote {} PNG frames to {:?}", written.len(), dir);
            }

            let json = serde_json::to_string_pretty(&decode_report)?;
            match report {
                Some(path) => fs::write(&path, json).with_context(|| format!("Failed to write {:?}", path))?,
                None => println!("{}", json),
            }
        }
        Command::Batch {
            input_dir,
            out_dir,
            workers,
            geometry,
            png_frames,
        } => {
            let (geometry, seek) = geometry.resolve()?;
            info!("Batch decoding {:?} into {:?}", input_dir, out_dir);

            let summary = batch::run_batch(&BatchOptions {
                input_dir,
                out_dir,
                workers,
                geometry,
                seek,
                decoder,
                png_frames,
            })?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    info!("Done.");
    Ok(())
}
