use std::error::Error;
use std::path::PathBuf;

use clap::Parser;
use log::{debug, info};

use refldata::data::handle::ProfileFileHandle;
use refldata::sim::profile_gen::ProfileGenerator;
use reflcore::algorithm::peak_select::{PeakFinder, SelectionConfig};

/// Select peak and low-resolution pixel ranges on a reflectometry count profile
#[derive(Parser, Debug)]
#[command(name = "refl-select", version, about)]
struct Args {
    /// Profile file to analyze (.json, or whitespace text)
    #[arg(conflicts_with = "demo")]
    input: Option<PathBuf>,

    /// Analyze a synthetic demo profile instead of a file
    #[arg(long)]
    demo: bool,

    /// Seed for the demo profile generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Margin applied to the low-resolution range edges
    #[arg(long, default_value_t = 4)]
    back_offset: i64,

    /// Also compute the primary (clocking) range from the flanks
    #[arg(long)]
    primary: bool,

    /// Emit the selection as JSON
    #[arg(long)]
    json: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let profile = if args.demo {
        info!("generating synthetic demo profile (seed {})", args.seed);
        ProfileGenerator::default().generate(args.seed)
    } else {
        let path = args
            .input
            .as_ref()
            .ok_or("no input file given (pass a path or --demo)")?;
        info!("reading profile from {}", path.display());
        ProfileFileHandle::new(path).read_profile()?
    };
    debug!("{}", profile);

    let n_pixels = profile.len();
    let config = SelectionConfig {
        back_offset: args.back_offset,
        compute_primary: args.primary,
    };
    let selection = PeakFinder::new(profile, config)?.select()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&selection)?);
    } else {
        println!("profile:         {} pixels", n_pixels);
        println!("peak pixel:      {}", selection.peak_pixel);
        println!("peak range:      {}", selection.peak);
        println!(
            "low-res range:   {} (clamped: {})",
            selection.low_res,
            selection.low_res.clamped(n_pixels)
        );
        if let Some(primary) = selection.primary {
            println!("primary range:   {}", primary);
        }
    }

    Ok(())
}
