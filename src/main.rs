use std::error::Error;

use clap::{Args, Parser, Subcommand};
use log::info;
use simple_logger::SimpleLogger;

use osmpg::style::read_style_file;
use osmpg::table::{Table, TABLE_KINDS};
use osmpg::{HstoreMode, Options, Projection};

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a style file and print the derived table schemas
    Inspect(Inspect),
    /// Create the destination tables in a PostgreSQL schema
    Setup(Setup),
}

#[derive(Args)]
struct Inspect {
    /// Style file path
    #[clap(short, long)]
    style: String,

    /// Table name prefix
    #[clap(short, long, default_value = "planet_osm")]
    prefix: String,

    /// Generic tags hstore column: none, norm or all
    #[clap(long, default_value = "none")]
    hstore: String,

    /// Additional named hstore column (repeatable)
    #[clap(long)]
    hstore_column: Vec<String>,
}

#[derive(Args)]
struct Setup {
    /// Target PostgreSQL connection string
    #[clap(short, long)]
    connectionstring: String,

    /// Style file path
    #[clap(short, long)]
    style: String,

    /// Table name prefix
    #[clap(short, long, default_value = "planet_osm")]
    prefix: String,

    /// Store data in lat/long (EPSG:4326) instead of spherical mercator
    #[clap(short, long)]
    latlong: bool,

    /// Generic tags hstore column: none, norm or all
    #[clap(long, default_value = "none")]
    hstore: String,

    /// Additional named hstore column (repeatable)
    #[clap(long)]
    hstore_column: Vec<String>,

    /// Tablespace for the data tables
    #[clap(long)]
    tablespace_main_data: Option<String>,
}

fn hstore_mode(value: &str) -> Result<HstoreMode, Box<dyn Error>> {
    match value {
        "none" => Ok(HstoreMode::None),
        "norm" => Ok(HstoreMode::Norm),
        "all" => Ok(HstoreMode::All),
        other => Err(format!("unknown hstore mode '{}'", other).into()),
    }
}

fn inspect(args: &Inspect) -> Result<(), Box<dyn Error>> {
    let mode = hstore_mode(&args.hstore)?;
    let (export, enable_way_area) = read_style_file(&args.style)?;
    for kind in TABLE_KINDS {
        println!("{}{} ({})", args.prefix, kind.suffix(), kind.geometry_type());
        println!("    osm_id int8");
        for info in export.columns(kind.osm_kind()) {
            println!("    \"{}\" {}", info.name, info.column_type);
        }
        for hstore in &args.hstore_column {
            println!("    \"{}\" hstore", hstore);
        }
        println!("    way geometry({})", kind.geometry_type());
        if mode != HstoreMode::None {
            println!("    tags hstore");
        }
    }
    if !enable_way_area {
        println!("way_area auto column disabled by style");
    }
    Ok(())
}

fn setup(args: &Setup) -> Result<(), Box<dyn Error>> {
    let options = Options {
        conninfo: args.connectionstring.clone(),
        prefix: args.prefix.clone(),
        style: args.style.clone(),
        projection: if args.latlong { Projection::LatLong } else { Projection::Mercator },
        enable_hstore: hstore_mode(&args.hstore)?,
        hstore_columns: args.hstore_column.clone(),
        tblsmain_data: args.tablespace_main_data.clone(),
        ..Options::default()
    };
    let (export, _) = read_style_file(&options.style)?;
    for kind in TABLE_KINDS {
        let table = Table::setup(kind, &options, &export)?;
        info!("Created {}{}", options.prefix, kind.suffix());
        drop(table);
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    SimpleLogger::new().env().init()?;
    let cli = Cli::parse();
    match &cli.command {
        Commands::Inspect(args) => inspect(args)?,
        Commands::Setup(args) => setup(args)?,
    }
    info!("Done!");
    Ok(())
}
