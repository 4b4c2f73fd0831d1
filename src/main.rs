use std::fs::File;
use std::io::{self, BufWriter, Write};

use clap::{Arg, ArgAction, ArgMatches, Command};
use eligibility_overlay::{
    center, load_layer, logging, overlay, Crs, DataReader, Error, InputFormat, OverlayConfig,
    Result, Settings, StorageContext,
};
use geo::Rect;
use tracing::info;

fn format_arg() -> Arg {
    Arg::new("format")
        .short('t')
        .long("format")
        .default_value("csv")
        .help("Reader format: csv, parquet or geoparquet")
}

fn delimiter_arg() -> Arg {
    Arg::new("delimiter")
        .short('d')
        .long("delimiter")
        .help("Field delimiter for delimited text (default '|')")
}

fn cli() -> Command {
    Command::new("eligibility-overlay")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspects geography datasets and computes bonus-eligibility overlays")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("list").about("List files in the configured storage backend"))
        .subcommand(
            Command::new("columns")
                .about("Print the column names of a dataset")
                .arg(Arg::new("file").required(true))
                .arg(format_arg())
                .arg(delimiter_arg()),
        )
        .subcommand(
            Command::new("count")
                .about("Count the records of a dataset")
                .arg(Arg::new("file").required(true))
                .arg(format_arg())
                .arg(delimiter_arg()),
        )
        .subcommand(
            Command::new("overlay")
                .about("Intersect a base layer with a community layer")
                .arg(
                    Arg::new("community")
                        .short('c')
                        .long("community")
                        .required(true)
                        .help("Community identifier, e.g. justice40"),
                )
                .arg(Arg::new("base").short('b').long("base").required(true))
                .arg(
                    Arg::new("base-format")
                        .long("base-format")
                        .default_value("geoparquet")
                        .help("csv, parquet, geoparquet or geojson"),
                )
                .arg(Arg::new("layer").short('l').long("layer").required(true))
                .arg(
                    Arg::new("layer-format")
                        .long("layer-format")
                        .default_value("geoparquet")
                        .help("csv, parquet, geoparquet or geojson"),
                )
                .arg(
                    Arg::new("geometry-column")
                        .short('g')
                        .long("geometry-column")
                        .default_value("geometry"),
                )
                .arg(Arg::new("crs").long("crs").default_value("EPSG:3857"))
                .arg(delimiter_arg())
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .help("GeoJSON output path (stdout if omitted)"),
                ),
        )
        .subcommand(
            Command::new("center")
                .about("Latitude and longitude of the center of EPSG:3857 bounds")
                .arg(
                    Arg::new("bounds")
                        .num_args(4)
                        .required(true)
                        .allow_negative_numbers(true)
                        .value_parser(clap::value_parser!(f64))
                        .value_names(["MIN_X", "MIN_Y", "MAX_X", "MAX_Y"]),
                ),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log at debug level unless RUST_LOG is set"),
        )
}

fn parse_delimiter(matches: &ArgMatches) -> Result<Option<u8>> {
    match matches.get_one::<String>("delimiter") {
        None => Ok(None),
        Some(d) if d.len() == 1 => Ok(Some(d.as_bytes()[0])),
        Some(d) => Err(Error::Usage(format!(
            "Delimiter must be a single byte, got '{}'",
            d
        ))),
    }
}

fn string_arg<'a>(matches: &'a ArgMatches, id: &str) -> &'a str {
    matches.get_one::<String>(id).map(String::as_str).unwrap_or_default()
}

fn run(matches: &ArgMatches) -> Result<()> {
    let context = StorageContext::new(Settings::from_env()?);

    match matches.subcommand() {
        Some(("list", _)) => {
            for name in context.resolve()?.list_contents()? {
                println!("{}", name);
            }
        }
        Some(("columns", sub)) => {
            let reader = DataReader::for_label(&context, Some(string_arg(sub, "format")))?;
            for name in reader.col_names(string_arg(sub, "file"), parse_delimiter(sub)?)? {
                println!("{}", name);
            }
        }
        Some(("count", sub)) => {
            let reader = DataReader::for_label(&context, Some(string_arg(sub, "format")))?;
            let mut count = 0usize;
            for record in reader.iterate(string_arg(sub, "file"), parse_delimiter(sub)?) {
                record?;
                count += 1;
            }
            println!("{}", count);
        }
        Some(("overlay", sub)) => {
            let crs = Crs::new(string_arg(sub, "crs"));
            let geometry_column = string_arg(sub, "geometry-column");
            let delimiter = parse_delimiter(sub)?;

            let base = load_layer(
                &context,
                string_arg(sub, "base"),
                InputFormat::from_label(string_arg(sub, "base-format"))?,
                geometry_column,
                delimiter,
                crs.clone(),
            )?;
            let layer = load_layer(
                &context,
                string_arg(sub, "layer"),
                InputFormat::from_label(string_arg(sub, "layer-format"))?,
                geometry_column,
                delimiter,
                crs,
            )?;

            let result = overlay(
                string_arg(sub, "community"),
                &base,
                &layer,
                &OverlayConfig::default(),
            )?;

            match sub.get_one::<String>("output") {
                Some(path) => {
                    let writer = BufWriter::new(File::create(path)?);
                    result.write_geojson(writer)?;
                    info!(path = %path, features = result.len(), "Wrote overlay");
                }
                None => {
                    let stdout = io::stdout();
                    let mut writer = stdout.lock();
                    result.write_geojson(&mut writer)?;
                    writeln!(writer)?;
                }
            }
        }
        Some(("center", sub)) => {
            let values: Vec<f64> = sub
                .get_many::<f64>("bounds")
                .map(|v| v.copied().collect())
                .unwrap_or_default();
            if let [min_x, min_y, max_x, max_y] = values[..] {
                let (lat, lon) = center(Rect::new((min_x, min_y), (max_x, max_y)))?;
                println!("{} {}", lat, lon);
            }
        }
        _ => {}
    }
    Ok(())
}

fn main() {
    let matches = cli().get_matches();

    let directive = if matches.get_flag("verbose") {
        "eligibility_overlay=debug"
    } else {
        "eligibility_overlay=info"
    };
    if let Err(e) = logging::init_logging(directive) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(&matches) {
        eprintln!("Error: {}", e);
        if matches!(e, Error::Validation(_)) {
            eprintln!("Please check the community name and that both layers share a CRS.");
        }
        std::process::exit(1);
    }
}
