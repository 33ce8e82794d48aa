use anyhow::{anyhow, bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use encoding::label::encoding_from_whatwg_label;
use indoc::indoc;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use evtx2json::{EvtxParser, ParserSettings, RecoveryStats, SerializedEvtxRecord};

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Copy, Clone, PartialEq, Eq)]
enum OutputFormat {
    /// One JSON document per line, streamed.
    JsonLines,
    /// A single JSON array, written as a batch.
    JsonArray,
    /// XML documents, for debugging.
    Xml,
}

/// Strips characters that are illegal in XML 1.0 from serialized text.
///
/// Event payloads routinely embed control characters (NUL-padded command
/// lines and the like) that would break downstream XML/JSON consumers.
/// This runs on the final serialized text only; tree data is never
/// touched.
fn sanitize_output(text: &str) -> String {
    text.chars()
        .filter(|&c| {
            !matches!(
                c,
                '\u{00}'..='\u{08}'
                    | '\u{0b}'
                    | '\u{0c}'
                    | '\u{0e}'..='\u{1f}'
                    | '\u{7f}'..='\u{84}'
                    | '\u{86}'..='\u{9f}'
                    | '\u{fdd0}'..='\u{fdef}'
                    | '\u{fffe}'
                    | '\u{ffff}'
            )
        })
        .collect()
}

fn cli() -> Command {
    Command::new("evtx2json")
        .version(env!("CARGO_PKG_VERSION"))
        .about(
            "Converts Windows Event Log (EVTX) files to JSON, recovering what it can \
             from corrupted files",
        )
        .arg(
            Arg::new("INPUT")
                .required(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to the .evtx file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_parser(value_parser!(PathBuf))
                .help("Write output to a file (as a JSON array unless -f overrides)"),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(["jsonl", "json", "xml"])
                .help("Output format [default: jsonl to stdout, json with --output]"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_parser(value_parser!(usize))
                .default_value("0")
                .help("Worker threads for chunk decoding, 0 = auto"),
        )
        .arg(
            Arg::new("validate-checksums")
                .long("validate-checksums")
                .action(ArgAction::SetTrue)
                .help("Skip chunks failing CRC32 validation instead of decoding best-effort"),
        )
        .arg(
            Arg::new("separate-json-attributes")
                .long("separate-json-attributes")
                .action(ArgAction::SetTrue)
                .help("Emit `<name>_attributes` siblings instead of `#attributes` keys"),
        )
        .arg(
            Arg::new("no-indent")
                .long("no-indent")
                .action(ArgAction::SetTrue)
                .help("Do not indent XML output"),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("Overwrite the output file without prompting"),
        )
        .arg(
            Arg::new("ansi-codec")
                .long("ansi-codec")
                .default_value("windows-1252")
                .help("Codec for ansi string values (a WHATWG encoding label)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("Log verbosity (-v info, -vv debug, -vvv trace), logs go to stderr"),
        )
        .after_help(indoc! {r#"
            Examples:
                evtx2json Security.evtx                  # JSON lines to stdout
                evtx2json Security.evtx -o events.json   # JSON array to a file
                evtx2json Security.evtx -f xml -v        # XML, with info logs
        "#})
}

struct Evtx2Json {
    input: PathBuf,
    output: Option<PathBuf>,
    format: OutputFormat,
    parser_settings: ParserSettings,
    confirm_overwrite: bool,
    verbosity: u8,
    no_indent: bool,
}

impl Evtx2Json {
    fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let input = matches
            .get_one::<PathBuf>("INPUT")
            .expect("INPUT is required")
            .clone();
        let output = matches.get_one::<PathBuf>("output").cloned();

        let format = match matches.get_one::<String>("format").map(String::as_str) {
            Some("jsonl") => OutputFormat::JsonLines,
            Some("json") => OutputFormat::JsonArray,
            Some("xml") => OutputFormat::Xml,
            Some(other) => bail!("unknown output format `{other}`"),
            None if output.is_some() => OutputFormat::JsonArray,
            None => OutputFormat::JsonLines,
        };

        let codec_label = matches
            .get_one::<String>("ansi-codec")
            .expect("has a default");
        let ansi_codec = encoding_from_whatwg_label(codec_label)
            .ok_or_else(|| anyhow!("`{codec_label}` is not a known encoding label"))?;

        let no_indent = matches.get_flag("no-indent");

        let parser_settings = ParserSettings::new()
            .num_threads(*matches.get_one::<usize>("threads").expect("has a default"))
            .validate_checksums(matches.get_flag("validate-checksums"))
            .separate_json_attributes(matches.get_flag("separate-json-attributes"))
            // JSON modes stream one document per line/array slot, so they
            // are never indented.
            .indent(format == OutputFormat::Xml && !no_indent)
            .ansi_codec(ansi_codec);

        Ok(Evtx2Json {
            input,
            output,
            format,
            parser_settings,
            confirm_overwrite: !matches.get_flag("no-confirm-overwrite"),
            verbosity: matches.get_count("verbose"),
            no_indent,
        })
    }

    fn init_logging(&self) {
        let level = match self.verbosity {
            0 => return,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        if TermLogger::init(
            level,
            Config::default(),
            TerminalMode::Stderr,
            ColorChoice::Auto,
        )
        .is_err()
        {
            eprintln!("logging is already initialized");
        }
    }

    fn create_output_file(&self, path: &Path) -> Result<File> {
        if path.is_dir() {
            bail!(
                "there is a directory at {}, refusing to overwrite",
                path.display()
            );
        }

        if path.exists() && self.confirm_overwrite {
            let confirmed = Confirm::new()
                .with_prompt(format!("Overwrite output file at {}?", path.display()))
                .default(false)
                .interact()
                .context("failed to prompt for confirmation")?;

            if !confirmed {
                bail!("cancelled");
            }
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        File::create(path).with_context(|| format!("failed to create {}", path.display()))
    }

    fn run(&self) -> Result<()> {
        self.init_logging();

        let mut parser = EvtxParser::from_path(&self.input)
            .with_context(|| format!("failed to read {}", self.input.display()))?
            .with_configuration(self.parser_settings.clone());

        let mut writer: Box<dyn Write> = match &self.output {
            Some(path) => Box::new(BufWriter::new(self.create_output_file(path)?)),
            None => Box::new(BufWriter::new(io::stdout())),
        };

        let stats = match self.format {
            OutputFormat::JsonLines => {
                let mut records = parser.records_json();
                for record in records.by_ref() {
                    writeln!(writer, "{}", sanitize_output(&record.data))?;
                }
                records.stats()
            }
            OutputFormat::JsonArray => {
                let mut records = parser.records_json();
                writer.write_all(b"[\n")?;
                let mut first = true;
                for record in records.by_ref() {
                    let separator = if first { "" } else { ",\n" };
                    first = false;
                    write!(writer, "{separator}    {}", sanitize_output(&record.data))?;
                }
                writer.write_all(b"\n]\n")?;
                records.stats()
            }
            OutputFormat::Xml => {
                let mut records = parser.records();
                for record in records.by_ref() {
                    self.dump_xml_record(&mut writer, &record)?;
                }
                records.stats()
            }
        };

        writer.flush()?;
        self.report(&stats);

        Ok(())
    }

    fn dump_xml_record(
        &self,
        writer: &mut impl Write,
        record: &SerializedEvtxRecord<String>,
    ) -> Result<()> {
        if !self.no_indent {
            writeln!(writer, "Record {}", record.event_record_id)?;
        }
        writeln!(writer, "{}", sanitize_output(&record.data))?;
        Ok(())
    }

    fn report(&self, stats: &RecoveryStats) {
        eprintln!("Done! {stats}");
        if let Some(path) = &self.output {
            eprintln!("File saved to: {}", path.display());
        }
    }
}

fn main() -> Result<()> {
    let matches = cli().get_matches();
    let app = Evtx2Json::from_cli_matches(&matches)?;
    app.run()
}
