// Device discovery example
//
// Lists the serial ports that look like a solar cell rig, optionally
// filtered by a search string, mirroring `solread list --search`.

use clap::Parser;
use solread_rs::SolConnector;

#[derive(Parser)]
#[command(about = "List serial ports with an attached solar cell rig")]
struct Args {
    /// Only show ports whose name or product string contains this text
    #[arg(short, long)]
    search: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let devices = SolConnector::get_available_devices(args.search.as_deref())?;

    if devices.is_empty() {
        match args.search {
            Some(query) => println!("No connections located that match your query '{}'.", query),
            None => println!("No connections located."),
        }
        return Ok(());
    }

    println!("{} connection(s) located:", devices.len());
    for device in devices {
        println!("  {} at {}", device.name, device.port);
    }

    Ok(())
}
