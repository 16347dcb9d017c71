use std::env;
use std::process::ExitCode;

use corescan::affinity;
use corescan::report::Report;

struct Options {
    json: bool,
    powersave: Option<i32>,
}

impl Options {
    fn from_args() -> Result<Self, String> {
        let mut json = false;
        let mut powersave = None;

        let mut args = env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--help" | "-h" => return Err(usage()),
                "--json" => json = true,
                "--powersave" => {
                    let value = args
                        .next()
                        .ok_or_else(|| "Missing value for --powersave\n\n".to_string() + &usage())?;
                    powersave = Some(parse_powersave(&value).ok_or_else(|| {
                        format!("Invalid powersave mode: {value}\n\n{}", usage())
                    })?);
                }
                _ => return Err(format!("Unknown argument: {arg}\n\n{}", usage())),
            }
        }

        Ok(Self { json, powersave })
    }
}

fn parse_powersave(value: &str) -> Option<i32> {
    match value {
        "all" => Some(0),
        "little" => Some(1),
        "big" => Some(2),
        _ => value.parse().ok(),
    }
}

fn usage() -> String {
    [
        "Usage: corescan [options]",
        "",
        "Options:",
        "  --json               Emit the detection report as JSON",
        "  --powersave <mode>   Pin this process first: all | little | big (or 0|1|2)",
        "  -h, --help           Show this help",
    ]
    .join("\n")
}

fn main() -> ExitCode {
    env_logger::init();

    let options = match Options::from_args() {
        Ok(options) => options,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    if let Some(mode) = options.powersave
        && let Err(err) = affinity::set_powersave_mode(mode)
    {
        eprintln!("corescan error: {err}");
        return ExitCode::FAILURE;
    }

    let report = Report::collect();
    if options.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(err) => {
                eprintln!("corescan error: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        print!("{}", report.render());
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_powersave_names_and_numbers() {
        assert_eq!(parse_powersave("all"), Some(0));
        assert_eq!(parse_powersave("little"), Some(1));
        assert_eq!(parse_powersave("big"), Some(2));
        assert_eq!(parse_powersave("2"), Some(2));
        assert_eq!(parse_powersave("fast"), None);
    }

    #[test]
    fn usage_mentions_every_flag() {
        let text = usage();
        assert!(text.contains("--json"));
        assert!(text.contains("--powersave"));
    }
}
