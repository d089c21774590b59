use std::{path::PathBuf, process::ExitCode, str::FromStr};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    runtime::Builder,
    sync::mpsc,
    task::LocalSet,
};
use tracing::{debug, info, warn};
use tracing_subscriber::util::SubscriberInitExt;

use crate::{
    config::Config,
    exitcode,
    tracing::{tracing_init, LogLevel},
    Clock, Millis, Scheduler, SpeedCompensatedTimer, TokioClock, TokioScheduler,
};

const USAGE_MSG: &str = "\
usage: flexitimer run [-c PATH] [-l LOG_LEVEL] [-s SPEED] DURATION_MS
       flexitimer validate [-c PATH]
       flexitimer -h | flexitimer -v";

const DESCRIPTOR: &str = "flexitimer - countdown with adjustable speed";

const HELP_MSG: &str = "Options:
  -c, --config=PATH             change the config .toml file
  -l, --log-level=LOG_LEVEL     change the log level
  -s, --speed=SPEED             speed to run the countdown at
  -h, --help                    display this help text
  -v, --version                 display version information

Commands read from stdin while running:
  speed SPEED                   change the speed of the countdown
  start DURATION_MS             restart the countdown
  stop                          stop the countdown
  status                        print nominal elapsed and remaining time
  quit                          exit immediately";

pub fn long_help_message() -> String {
    format!("{DESCRIPTOR}\n\n{USAGE_MSG}\n\n{HELP_MSG}")
}

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, PartialEq, Eq)]
enum CliArg {
    Flag(String),
    Argument(String, String),
    Rest(Vec<String>),
}

impl CliArg {
    fn normalize_arguments<I>(
        takes_argument: &[&str],
        takes_argument_short: &[char],
        iter: I,
    ) -> Result<Vec<Self>, String>
    where
        I: IntoIterator<Item = String>,
    {
        // the first argument is the binary itself
        let mut arg_iter = iter.into_iter().skip(1);
        let mut processed = vec![];
        let mut rest = vec![];

        while let Some(arg) = arg_iter.next() {
            match arg.as_str() {
                "--" => {
                    rest.extend(arg_iter);
                    break;
                }
                long_arg if long_arg.starts_with("--") => {
                    if let Some((key, value)) = long_arg.split_once('=') {
                        if takes_argument.contains(&key) {
                            processed.push(CliArg::Argument(key.to_string(), value.to_string()))
                        } else {
                            Err(format!("invalid option: '{long_arg}'"))?
                        }
                    } else if takes_argument.contains(&long_arg) {
                        if let Some(next) = arg_iter.next() {
                            processed.push(CliArg::Argument(long_arg.to_string(), next))
                        } else {
                            Err(format!("'{long_arg}' expects an argument"))?;
                        }
                    } else {
                        processed.push(CliArg::Flag(arg));
                    }
                }
                // a lone "-" or a negative number is a value, not a flag
                short_arg
                    if short_arg.len() > 1
                        && short_arg.starts_with('-')
                        && short_arg.parse::<f64>().is_err() =>
                {
                    // split combined shorthand options
                    let bundle = short_arg.trim_start_matches('-');
                    let offset = short_arg.len() - bundle.len();
                    for (index, char) in bundle.char_indices() {
                        let flag = format!("-{char}");
                        if takes_argument_short.contains(&char) {
                            let rest = short_arg[offset + index + char.len_utf8()..]
                                .trim()
                                .to_string();
                            // assignment syntax is not accepted for shorthand arguments
                            if rest.starts_with('=') {
                                Err("invalid option '='")?;
                            }
                            if !rest.is_empty() {
                                processed.push(CliArg::Argument(flag, rest));
                            } else if let Some(next) = arg_iter.next() {
                                processed.push(CliArg::Argument(flag, next));
                            } else {
                                Err(format!("'-{char}' expects an argument"))?;
                            }
                            break;
                        } else {
                            processed.push(CliArg::Flag(flag));
                        }
                    }
                }
                _argument => rest.push(arg),
            }
        }

        if !rest.is_empty() {
            processed.push(CliArg::Rest(rest));
        }

        Ok(processed)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum CliAction {
    #[default]
    Help,
    Version,
    Validate,
    Run,
}

#[derive(Debug, Default, PartialEq)]
struct CliOptions {
    config: Option<PathBuf>,
    log_level: Option<LogLevel>,
    speed: Option<f64>,
    duration: Option<Millis>,
    help: bool,
    version: bool,
    validate: bool,
    run: bool,
    action: CliAction,
}

impl CliOptions {
    const TAKES_ARGUMENT: &'static [&'static str] = &["--config", "--log-level", "--speed"];
    const TAKES_ARGUMENT_SHORT: &'static [char] = &['c', 'l', 's'];

    /// parse an iterator over command line arguments
    fn try_parse_from<I, T>(iter: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str> + Clone,
    {
        let mut options = CliOptions::default();
        let arg_iter = CliArg::normalize_arguments(
            Self::TAKES_ARGUMENT,
            Self::TAKES_ARGUMENT_SHORT,
            iter.into_iter().map(|x| x.as_ref().to_string()),
        )?;

        for arg in arg_iter {
            match arg {
                CliArg::Flag(flag) => match flag.as_str() {
                    "-h" | "--help" => {
                        options.help = true;
                    }
                    "-v" | "--version" => {
                        options.version = true;
                    }
                    option => {
                        Err(format!("invalid option provided: {option}"))?;
                    }
                },
                CliArg::Argument(option, value) => match option.as_str() {
                    "-c" | "--config" => {
                        options.config = Some(PathBuf::from(value));
                    }
                    "-l" | "--log-level" => match LogLevel::from_str(&value) {
                        Ok(level) => options.log_level = Some(level),
                        Err(_) => return Err("invalid log level".into()),
                    },
                    "-s" | "--speed" => match value.parse() {
                        Ok(speed) => options.speed = Some(speed),
                        Err(_) => return Err(format!("invalid speed: {value}")),
                    },
                    option => {
                        Err(format!("invalid option provided: {option}"))?;
                    }
                },
                CliArg::Rest(rest) => {
                    let mut rest = rest.into_iter();
                    match rest.next().as_deref() {
                        Some("run") => options.run = true,
                        Some("validate") => options.validate = true,
                        Some(unknown) => return Err(format!("unknown command: {unknown}")),
                        None => {}
                    }
                    if let Some(duration) = rest.next() {
                        match parse_duration(&duration) {
                            Some(duration) => options.duration = Some(duration),
                            None => return Err(format!("invalid duration: {duration}")),
                        }
                    }
                    if rest.next().is_some() {
                        return Err("too many arguments".into());
                    }
                }
            }
        }

        options.resolve_action();

        if options.action == CliAction::Run && options.duration.is_none() {
            return Err("run expects a duration in milliseconds".into());
        }

        Ok(options)
    }

    /// from the arguments resolve which action should be performed
    fn resolve_action(&mut self) {
        if self.help {
            self.action = CliAction::Help;
        } else if self.version {
            self.action = CliAction::Version;
        } else if self.validate {
            self.action = CliAction::Validate;
        } else if self.run {
            self.action = CliAction::Run;
        } else {
            self.action = CliAction::Help;
        }
    }
}

fn parse_duration(value: &str) -> Option<Millis> {
    value
        .parse::<Millis>()
        .ok()
        .filter(|duration| duration.is_finite() && *duration >= 0.0)
}

/// A line typed on stdin while a countdown is running.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    Speed(f64),
    Start(Millis),
    Stop,
    Status,
    Quit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let command = match (words.next(), words.next()) {
            (Some("speed"), Some(value)) => value
                .parse()
                .map(Command::Speed)
                .map_err(|_| format!("invalid speed: {value}"))?,
            (Some("start"), Some(value)) => parse_duration(value)
                .map(Command::Start)
                .ok_or_else(|| format!("invalid duration: {value}"))?,
            (Some("stop"), None) => Command::Stop,
            (Some("status"), None) => Command::Status,
            (Some("quit"), None) => Command::Quit,
            _ => return Err(format!("unknown command: '{}'", s.trim())),
        };

        if words.next().is_some() {
            return Err(format!("unexpected arguments: '{}'", s.trim()));
        }

        Ok(command)
    }
}

fn status_line<C, S>(timer: &SpeedCompensatedTimer<C, S>) -> String
where
    C: Clock + 'static,
    S: Scheduler + 'static,
    S::Handle: 'static,
{
    format!(
        "elapsed={:.3}ms remaining={:.3}ms speed={}x {}",
        timer.time_since_start(),
        timer.time_to_expiry(),
        timer.speed(),
        if timer.is_running() { "running" } else { "stopped" },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Continue,
    Exit,
}

/// Reacts to a delivered deadline. The countdown may have been restarted
/// between the delivery and this call, in which case the notice is stale.
fn handle_expiry<C, S>(timer: &SpeedCompensatedTimer<C, S>) -> Step
where
    C: Clock + 'static,
    S: Scheduler + 'static,
    S::Handle: 'static,
{
    if timer.is_running() {
        debug!("countdown restarted after expiry, keep running");
        Step::Continue
    } else {
        println!("expired");
        Step::Exit
    }
}

fn handle_command<C, S>(timer: &SpeedCompensatedTimer<C, S>, command: Command) -> Step
where
    C: Clock + 'static,
    S: Scheduler + 'static,
    S::Handle: 'static,
{
    match command {
        Command::Speed(speed) => {
            if !timer.update_speed(speed) {
                warn!(speed, "speed out of range, ignored");
            }
        }
        Command::Start(duration) => timer.start(duration),
        Command::Stop => timer.stop(),
        Command::Status => {}
        Command::Quit => return Step::Exit,
    }
    println!("{}", status_line(timer));
    Step::Continue
}

/// Loads the config under a temporary subscriber so problems while parsing
/// it are reported, then installs the global subscriber.
async fn initialize_logging_parse_config(options: &CliOptions) -> Option<Config> {
    let mut log_level = options.log_level.unwrap_or_default();

    let config_tracing = tracing_init(log_level, true);
    let guard = ::tracing::subscriber::set_default(config_tracing);
    let config = match Config::from_args(options.config.as_ref()).await {
        Ok(config) => config,
        Err(e) => {
            // print to stderr because tracing is not yet setup
            eprintln!("There was an error loading the config: {e}");
            return None;
        }
    };
    drop(guard);

    if let Some(config_log_level) = config.observability.log_level {
        if options.log_level.is_none() {
            log_level = config_log_level;
        }
    }

    tracing_init(log_level, config.observability.ansi_colors).init();

    Some(config)
}

async fn validate(options: &CliOptions) -> ExitCode {
    let config = {
        let _guard = ::tracing::subscriber::set_default(tracing_init(LogLevel::Info, true));
        Config::from_args(options.config.as_ref()).await
    };

    match config {
        Ok(config) => match config.check() {
            Ok(()) => {
                eprintln!("Config looks good");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Error: Could not load configuration: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(options: CliOptions) -> std::io::Result<ExitCode> {
    let Some(config) = initialize_logging_parse_config(&options).await else {
        return Ok(ExitCode::from(exitcode::CONFIG));
    };

    let (expired_sender, mut expired_receiver) = mpsc::unbounded_channel();
    let timer = match SpeedCompensatedTimer::from_config(
        TokioClock::new(),
        TokioScheduler::new(),
        move || {
            // the receiver only goes away once we are shutting down
            let _ = expired_sender.send(());
        },
        &config.timer,
    ) {
        Ok(timer) => timer,
        Err(e) => {
            eprintln!("Error: invalid timer config: {e}");
            return Ok(ExitCode::from(exitcode::CONFIG));
        }
    };

    if let Some(speed) = options.speed {
        if !timer.update_speed(speed) {
            eprintln!(
                "Error: speed {speed} is outside of [{}, {}]",
                timer.min_speed(),
                timer.max_speed()
            );
            return Ok(ExitCode::from(exitcode::USAGE));
        }
    }

    let duration = options.duration.unwrap_or_default();
    info!(duration, speed = timer.speed(), "starting countdown");
    timer.start(duration);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        // stdin goes first so a restart is applied before a queued expiry is seen
        tokio::select! {
            biased;
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line? else {
                    stdin_open = false;
                    if !timer.is_running() {
                        break;
                    }
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }

                match line.parse::<Command>() {
                    Ok(command) => {
                        if let Step::Exit = handle_command(&timer, command) {
                            break;
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
            Some(()) = expired_receiver.recv() => {
                if let Step::Exit = handle_expiry(&timer) {
                    break;
                }
            }
            else => break,
        }
    }

    timer.stop();
    Ok(ExitCode::SUCCESS)
}

pub fn main() -> std::io::Result<ExitCode> {
    let options = match CliOptions::try_parse_from(std::env::args()) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{msg}\n\n{USAGE_MSG}");
            return Ok(ExitCode::from(exitcode::USAGE));
        }
    };

    match options.action {
        CliAction::Help => {
            println!("{}", long_help_message());
            Ok(ExitCode::SUCCESS)
        }
        CliAction::Version => {
            eprintln!("flexitimer {VERSION}");
            Ok(ExitCode::SUCCESS)
        }
        action => {
            // the timer and its scheduled callbacks live on this thread
            let runtime = Builder::new_current_thread().enable_all().build()?;
            let local = LocalSet::new();
            let result = match action {
                CliAction::Validate => Ok(local.block_on(&runtime, validate(&options))),
                _ => local.block_on(&runtime, run(options)),
            };
            drop(local);
            // a stdin read blocked on the terminal must not keep us alive
            runtime.shutdown_background();
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<CliOptions, String> {
        CliOptions::try_parse_from(std::iter::once("flexitimer").chain(args.iter().copied()))
    }

    #[test]
    fn test_normalize_arguments() {
        let args = ["flexitimer", "-c=/x", "--speed", "2", "-l", "debug", "run", "100"];
        let result = CliArg::normalize_arguments(
            CliOptions::TAKES_ARGUMENT,
            CliOptions::TAKES_ARGUMENT_SHORT,
            args.iter().map(|s| s.to_string()),
        );
        assert_eq!(result, Err("invalid option '='".into()));

        let args = ["flexitimer", "-c/x", "--speed", "2", "-hl", "debug", "run", "100"];
        let result = CliArg::normalize_arguments(
            CliOptions::TAKES_ARGUMENT,
            CliOptions::TAKES_ARGUMENT_SHORT,
            args.iter().map(|s| s.to_string()),
        )
        .unwrap();
        assert_eq!(
            result,
            vec![
                CliArg::Argument("-c".into(), "/x".into()),
                CliArg::Argument("--speed".into(), "2".into()),
                CliArg::Flag("-h".into()),
                CliArg::Argument("-l".into(), "debug".into()),
                CliArg::Rest(vec!["run".into(), "100".into()]),
            ]
        );
    }

    #[test]
    fn test_normalize_non_ascii_shorthand() {
        let args = ["flexitimer", "-écx.toml", "run"];
        let result = CliArg::normalize_arguments(
            CliOptions::TAKES_ARGUMENT,
            CliOptions::TAKES_ARGUMENT_SHORT,
            args.iter().map(|s| s.to_string()),
        )
        .unwrap();
        assert_eq!(
            result,
            vec![
                CliArg::Flag("-é".into()),
                CliArg::Argument("-c".into(), "x.toml".into()),
                CliArg::Rest(vec!["run".into()]),
            ]
        );

        let args = ["flexitimer", "-éc=x"];
        let result = CliArg::normalize_arguments(
            CliOptions::TAKES_ARGUMENT,
            CliOptions::TAKES_ARGUMENT_SHORT,
            args.iter().map(|s| s.to_string()),
        );
        assert_eq!(result, Err("invalid option '='".into()));

        // unknown multibyte flags are reported, not a panic
        assert!(parse(&["run", "-ééc", "x.toml", "10"]).is_err());
        assert!(parse(&["-ü"]).is_err());
    }

    #[test]
    fn test_parse_run() {
        let options = parse(&["run", "-s", "0.5", "--config=timer.toml", "1500"]).unwrap();
        assert_eq!(options.action, CliAction::Run);
        assert_eq!(options.speed, Some(0.5));
        assert_eq!(options.duration, Some(1500.0));
        assert_eq!(options.config, Some(PathBuf::from("timer.toml")));
        assert_eq!(options.log_level, None);

        let options = parse(&["run", "--log-level", "trace", "20"]).unwrap();
        assert_eq!(options.log_level, Some(LogLevel::Trace));
        assert_eq!(options.speed, None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse(&["run"]).is_err());
        assert!(parse(&["run", "-5"]).is_err());
        assert!(parse(&["run", "ten"]).is_err());
        assert!(parse(&["run", "10", "20"]).is_err());
        assert!(parse(&["run", "-s", "fast", "10"]).is_err());
        assert!(parse(&["run", "-l", "loud", "10"]).is_err());
        assert!(parse(&["run", "--speed"]).is_err());
        assert!(parse(&["jump"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());
    }

    #[test]
    fn test_resolve_action() {
        assert_eq!(parse(&[]).unwrap().action, CliAction::Help);
        assert_eq!(parse(&["-v"]).unwrap().action, CliAction::Version);
        assert_eq!(parse(&["validate", "-c", "x.toml"]).unwrap().action, CliAction::Validate);
        // help wins over everything
        assert_eq!(parse(&["run", "10", "-h"]).unwrap().action, CliAction::Help);
    }

    #[test]
    fn test_parse_command() {
        assert_eq!("speed 2".parse(), Ok(Command::Speed(2.0)));
        assert_eq!("  start 250.5 ".parse(), Ok(Command::Start(250.5)));
        assert_eq!("stop".parse(), Ok(Command::Stop));
        assert_eq!("status".parse(), Ok(Command::Status));
        assert_eq!("quit".parse(), Ok(Command::Quit));

        assert!("speed".parse::<Command>().is_err());
        assert!("speed x".parse::<Command>().is_err());
        assert!("start -1".parse::<Command>().is_err());
        assert!("stop now".parse::<Command>().is_err());
        assert!("pause".parse::<Command>().is_err());
    }

    #[test]
    fn test_status_line() {
        use crate::manual::ManualClock;

        let clock = ManualClock::new();
        let timer =
            SpeedCompensatedTimer::new(clock.clone(), clock.make_scheduler(), || {}, 10.0).unwrap();
        assert_eq!(
            status_line(&timer),
            "elapsed=0.000ms remaining=0.000ms speed=1x stopped"
        );

        timer.update_speed(2.0);
        timer.start(1000.0);
        clock.advance(100.0);
        assert_eq!(
            status_line(&timer),
            "elapsed=200.000ms remaining=800.000ms speed=2x running"
        );
    }

    #[test]
    fn test_expiry_after_restart_is_ignored() {
        use crate::manual::ManualClock;

        let clock = ManualClock::new();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let timer = SpeedCompensatedTimer::new(
            clock.clone(),
            clock.make_scheduler(),
            move || {
                let _ = sender.send(());
            },
            10.0,
        )
        .unwrap();

        timer.start(100.0);
        clock.advance(100.0);

        // a start command lands before the queued expiry is handled
        assert_eq!(handle_command(&timer, Command::Start(50.0)), Step::Continue);
        assert!(receiver.try_recv().is_ok());
        assert_eq!(handle_expiry(&timer), Step::Continue);
        assert!(timer.is_running());

        clock.advance(50.0);
        assert!(receiver.try_recv().is_ok());
        assert_eq!(handle_expiry(&timer), Step::Exit);
    }

    #[test]
    fn test_quit_command_exits() {
        use crate::manual::ManualClock;

        let clock = ManualClock::new();
        let timer =
            SpeedCompensatedTimer::new(clock.clone(), clock.make_scheduler(), || {}, 10.0).unwrap();
        timer.start(100.0);
        assert_eq!(handle_command(&timer, Command::Speed(2.0)), Step::Continue);
        assert_eq!(timer.speed(), 2.0);
        assert_eq!(handle_command(&timer, Command::Quit), Step::Exit);
    }
}
