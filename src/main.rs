use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};
use commands::{
    detect_shift, fill_gaps_in_image, smooth_image, stack_frames, subtract_dark, StackOptions,
};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("star_trail=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stack {
            inputs,
            output,
            config,
            mode,
            fade,
            tail,
            dark,
            preview,
            preview_dir,
            preview_interval,
            format,
            align_options,
            gap_options,
        } => {
            stack_frames(
                &inputs,
                StackOptions {
                    output,
                    config,
                    mode,
                    fade,
                    tail,
                    darks: dark,
                    preview,
                    preview_dir,
                    preview_interval,
                    format,
                    align: align_options,
                    gap: gap_options,
                },
            )?;
        }
        Commands::FillGaps {
            input,
            output,
            method,
            gap_size,
            threshold,
            adaptive,
            min_gap,
            max_gap,
        } => {
            fill_gaps_in_image(
                &input, &output, &method, gap_size, threshold, adaptive, min_gap, max_gap,
            )?;
        }
        Commands::Smooth {
            input,
            output,
            window,
            sigma,
            continuity,
        } => {
            smooth_image(&input, &output, window, sigma, continuity)?;
        }
        Commands::DetectShift {
            image,
            reference,
            detector,
            max_shift,
            format,
        } => {
            detect_shift(&image, &reference, &detector, max_shift, &format)?;
        }
        Commands::DarkSubtract {
            input,
            dark,
            output,
        } => {
            subtract_dark(&input, &dark, &output)?;
        }
    }

    Ok(())
}
