use clap::{Arg, Command};
use std::io::{self, Write};

const FIRST: [&str; 8] = ["Avery", "Blake", "Casey", "Dana", "Emerson", "Finley", "Gray", "Harper"];
const LAST: [&str; 6] = ["Johnson", "Martinez", "Nguyen", "Okafor", "Reyes", "Schmidt"];
const COMPANIES: [&str; 5] = ["Northwind", "Contoso, Ltd", "Fabrikam", "Adatum", "Tailspin"];
const CITIES: [&str; 4] = ["Seattle", "Portland", "Austin", "Chicago"];

fn header(style: &str) -> &'static str {
    match style {
        "spaced" => "Full name,Email address,Phone number,Company name,Address,City,State,Country,Zip,Balance",
        "lower" => "name,email,phone,organisation,address,city,state,country,zip,balance",
        _ => "Name,Email,Phone_number,Company_name,Address,City,State,Country,Zip,Balance",
    }
}

fn main() -> anyhow::Result<()> {
    let matches = Command::new("gen")
        .about("Generate a synthetic contact feed")
        .arg(
            Arg::new("rows")
                .long("rows")
                .value_parser(clap::value_parser!(u64))
                .required(true),
        )
        .arg(
            Arg::new("headers")
                .long("headers")
                .value_parser(["snake", "spaced", "lower"])
                .default_value("snake"),
        )
        .arg(
            Arg::new("malformed_every")
                .long("malformed-every")
                .help("Emit a row with an unmatched quote every N rows (0 = never)")
                .value_parser(clap::value_parser!(u64))
                .default_value("0"),
        )
        .get_matches();

    let rows: u64 = matches.get_one("rows").copied().unwrap_or_default();
    let style = matches
        .get_one::<String>("headers")
        .map(String::as_str)
        .unwrap_or("snake");
    let malformed_every: u64 = matches.get_one("malformed_every").copied().unwrap_or(0);

    let mut out = io::BufWriter::new(io::stdout().lock());
    writeln!(&mut out, "{}", header(style))?;

    // Deterministic data so runs can be diffed.
    for i in 0..rows {
        let first = FIRST[(i % FIRST.len() as u64) as usize];
        let last = LAST[(i / 3 % LAST.len() as u64) as usize];
        let company = COMPANIES[(i % COMPANIES.len() as u64) as usize];
        let city = CITIES[(i % CITIES.len() as u64) as usize];
        if malformed_every > 0 && i % malformed_every == malformed_every - 1 {
            writeln!(&mut out, "{first} \"{last},broken{i}@example.com,,,,,,,,")?;
            continue;
        }
        writeln!(
            &mut out,
            "{first} {last},{}.{}{i}@example.com,555{:07},\"{company}\",{} Main St,{city},WA,USA,{:05},{}.{:02}",
            first.to_lowercase(),
            last.to_lowercase(),
            i % 10_000_000,
            100 + i % 900,
            10_000 + i % 90_000,
            i % 5_000,
            i % 100,
        )?;
        if i % 10_000 == 0 {
            out.flush()?;
        }
    }

    out.flush()?;
    Ok(())
}
