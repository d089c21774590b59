#![forbid(unsafe_code)]

fn main() -> std::io::Result<std::process::ExitCode> {
    flexitimer::cli_main()
}
