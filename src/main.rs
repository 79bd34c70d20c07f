fn main() {
    use clap::Parser;
    use std::error::Error;
    let args = novelsync::cli::Args::parse();
    let level = novelsync::logging::level_for(args.quiet, args.verbose);
    if let Err(e) = novelsync::logging::init(level) {
        eprintln!("{}", e);
    }
    if let Err(e) = novelsync::cli::run(&args) {
        eprintln!("{}", e);
        if args.verbose {
            let mut source = e.source();
            while let Some(s) = source {
                eprintln!("  cause: {}", s);
                source = s.source();
            }
        }
        std::process::exit(e.exit_code());
    }
}
