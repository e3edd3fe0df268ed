// Full measurement example
//
// Runs a repeated IV-curve experiment against a rig and prints the result
// as a table, mirroring `solread read PORT -r -c -s -e --save`.

use std::fs::File;
use std::path::Path;

use clap::Parser;
use polars::prelude::{CsvWriter, SerWriter};
use solread_rs::SolarCell;

#[derive(Parser)]
#[command(about = "Read the IV characteristic of a solar cell")]
struct Args {
    /// Serial port of the rig; the first discovered rig when omitted
    port: Option<String>,

    /// Bias voltage to put on the resistor, in volts
    #[arg(short, long, default_value_t = 1.65)]
    resvalue: f64,

    /// Number of sweeps to average over
    #[arg(short, long, default_value_t = 5)]
    counts: usize,

    /// Sweep start voltage
    #[arg(short, long, default_value_t = 0.0)]
    start: f64,

    /// Sweep end voltage
    #[arg(short, long, default_value_t = 3.3)]
    end: f64,

    /// Save the curve to this CSV file (without extension)
    #[arg(long)]
    save: Option<String>,
}

/// First of `name.csv`, `name-1.csv`, `name-2.csv`, ... that does not exist
/// yet, so repeated runs never clobber earlier measurements.
fn free_filename(stem: &str) -> String {
    let plain = format!("{}.csv", stem);
    if !Path::new(&plain).exists() {
        return plain;
    }
    let mut i = 1;
    loop {
        let candidate = format!("{}-{}.csv", stem, i);
        if !Path::new(&candidate).exists() {
            return candidate;
        }
        i += 1;
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    println!("Connecting...");
    let mut cell = SolarCell::connect(args.port.as_deref())?;

    println!(
        "Scanning {} times from {} V to {} V (bias {} V)",
        args.counts, args.start, args.end, args.resvalue
    );
    let result = cell.exec_experiment(args.counts, args.start, args.end, args.resvalue)?;

    let mut df = result.to_dataframe()?;
    println!("{}", df);

    if let Some(stem) = args.save {
        let filename = free_filename(&stem);
        let file = File::create(&filename)?;
        CsvWriter::new(file).finish(&mut df)?;
        println!("Data saved to {}", filename);
    }

    println!("Scanning complete!");
    Ok(())
}
