//! Command-line options.
//!
//! ```text
//! beatwatch [buffer_size] [--no-log] [--no-stats] [--pitch] [--no-visual]
//!           [--json-summary] [--help|-h]
//! ```

use std::fmt;
use std::path::Path;

use beatwatch_core::config::{DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
use beatwatch_core::DetectorConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub buffer_size: u32,
    pub logging: bool,
    pub stats: bool,
    pub pitch: bool,
    pub visual: bool,
    /// Print the final summary as JSON instead of text.
    pub json_summary: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            logging: true,
            stats: true,
            pitch: false,
            visual: true,
            json_summary: false,
        }
    }
}

impl Options {
    pub fn to_config(&self) -> DetectorConfig {
        DetectorConfig {
            buffer_size: self.buffer_size,
            logging: self.logging,
            stats: self.stats,
            pitch: self.pitch,
            visual: self.visual,
            ..DetectorConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// `--help` / `-h`: print usage and exit successfully.
    Help,
    Invalid(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Help => f.write_str("help requested"),
            Self::Invalid(message) => f.write_str(message),
        }
    }
}

/// Parse everything after the program name.
pub fn parse_args<I, S>(args: I) -> Result<Options, ParseError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut options = Options::default();
    let mut saw_positional = false;

    for arg in args {
        let arg = arg.as_ref();
        match arg {
            "--help" | "-h" => return Err(ParseError::Help),
            "--no-log" => options.logging = false,
            "--no-stats" => options.stats = false,
            "--pitch" => options.pitch = true,
            "--no-visual" => options.visual = false,
            "--json-summary" => options.json_summary = true,
            positional if !positional.is_empty() && !positional.starts_with('-') => {
                if saw_positional {
                    return Err(ParseError::Invalid(
                        "too many positional arguments (only buffer_size is allowed)".into(),
                    ));
                }
                saw_positional = true;
                options.buffer_size = parse_buffer_size(positional)?;
            }
            other => return Err(ParseError::Invalid(format!("unknown option '{other}'"))),
        }
    }

    Ok(options)
}

fn parse_buffer_size(raw: &str) -> Result<u32, ParseError> {
    // `u32::from_str` accepts a leading '+'; plain decimal digits only here.
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::Invalid(
            "buffer_size must be a base-10 unsigned integer".into(),
        ));
    }
    let value = raw.parse::<u32>().map_err(|_| {
        ParseError::Invalid("buffer_size must be a base-10 unsigned integer".into())
    })?;
    if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&value) {
        return Err(ParseError::Invalid(format!(
            "buffer_size out of range [{MIN_BUFFER_SIZE}, {MAX_BUFFER_SIZE}]"
        )));
    }
    Ok(value)
}

/// File name of `argv[0]`, or a fallback.
pub fn program_name(argv0: Option<&str>) -> String {
    argv0
        .and_then(|a| Path::new(a).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("beatwatch")
        .to_string()
}

pub fn usage(program: &str) -> String {
    format!(
        " Beat Detector Usage:\n {program} [buffer_size] [options]\n\n\
         Options:\n\
         \t--no-log\t\tDisable logging to file\n\
         \t--no-stats\t\tDisable performance statistics\n\
         \t--pitch\t\t\tEnable pitch detection\n\
         \t--no-visual\t\tDisable visual feedback\n\
         \t--json-summary\t\tPrint the final statistics as JSON\n\
         \t--help,-h\t\tShow this help\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid(args: &[&str]) -> String {
        match parse_args(args) {
            Err(ParseError::Invalid(message)) => message,
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn no_arguments_gives_defaults() {
        let options = parse_args(Vec::<String>::new()).expect("defaults");
        assert_eq!(options, Options::default());
        assert_eq!(options.to_config().buffer_size, 512);
    }

    #[test]
    fn flags_and_buffer_size() {
        let options = parse_args(["1024", "--no-log", "--pitch", "--no-visual", "--no-stats"])
            .expect("valid arguments");
        assert_eq!(options.buffer_size, 1024);
        assert!(!options.logging && !options.stats && !options.visual);
        assert!(options.pitch);

        let config = options.to_config();
        assert_eq!(config.fft_size(), 2048);
        assert!(config.pitch);
    }

    #[test]
    fn arguments_are_checked_left_to_right() {
        assert_eq!(parse_args(["--pitch", "-h"]), Err(ParseError::Help));
        assert_eq!(parse_args(["--help", "nonsense"]), Err(ParseError::Help));
        assert!(invalid(&["12a", "-h"]).contains("base-10"));
        assert!(invalid(&["--loud", "--help"]).contains("unknown option"));
    }

    #[test]
    fn buffer_size_bounds() {
        assert_eq!(parse_args(["64"]).map(|o| o.buffer_size), Ok(64));
        assert_eq!(parse_args(["8192"]).map(|o| o.buffer_size), Ok(8192));
        assert!(invalid(&["63"]).contains("out of range"));
        assert!(invalid(&["8193"]).contains("out of range"));
    }

    #[test]
    fn malformed_buffer_sizes() {
        for raw in ["12a", "+512", "99999999999"] {
            assert!(invalid(&[raw]).contains("base-10"), "{raw}");
        }
    }

    #[test]
    fn rejects_extra_positionals_and_unknown_options() {
        assert!(invalid(&["512", "1024"]).contains("too many positional"));
        assert_eq!(invalid(&["--loud"]), "unknown option '--loud'");
        assert_eq!(invalid(&["-"]), "unknown option '-'");
    }

    #[test]
    fn program_name_strips_directories() {
        assert_eq!(program_name(Some("/usr/local/bin/beatwatch")), "beatwatch");
        assert_eq!(program_name(None), "beatwatch");
    }
}
