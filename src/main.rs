use clap::{Parser, ValueEnum};
use psieve::{sieve_with, CondvarFrontier, FutexFrontier, Sieve, SieveConfig, SieveError};
use std::{
    error::Error as _,
    io::{self, BufWriter, Write},
    process::ExitCode,
    time::{Duration, Instant},
};

#[derive(Parser)]
#[command(name = "psieve")]
#[command(about = "Find all prime numbers below a given bound using parallel sieving threads")]
struct Cli {
    #[arg(help = "Exclusive upper bound of the primes to be found")]
    max: u64,

    #[arg(
        short,
        long,
        help = "Number of sieving threads [default: number of CPUs]"
    )]
    threads: Option<usize>,

    #[arg(
        long,
        default_value = "3",
        help = "First odd number handled by the sieving threads"
    )]
    start: u64,

    #[arg(
        long,
        value_enum,
        default_value = "condvar",
        help = "How sieving threads wait for each other"
    )]
    frontier: FrontierKind,

    #[arg(short, long, help = "Only print how many primes were found")]
    count: bool,

    #[arg(
        long,
        value_name = "MS",
        help = "Warn about sieving threads that wait this long without progress"
    )]
    stall_warning_ms: Option<u64>,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Log more (repeat for more detail)")]
    verbose: u8,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum FrontierKind {
    /// Mutex and condition variable
    Condvar,
    /// Mutex for updates, futex for waiting
    Futex,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let mut config = SieveConfig::new(cli.max).with_start(cli.start);
    if let Some(threads) = cli.threads {
        config = config.with_threads(threads);
    }
    if let Some(ms) = cli.stall_warning_ms {
        config = config.with_stall_warning(Duration::from_millis(ms));
    }

    let started = Instant::now();
    let result = match cli.frontier {
        FrontierKind::Condvar => sieve_with::<CondvarFrontier>(&config),
        FrontierKind::Futex => sieve_with::<FutexFrontier>(&config),
    };
    let sieve = match result {
        Ok(sieve) => sieve,
        Err(e) => {
            report(&e);
            return ExitCode::FAILURE;
        }
    };
    log::info!(
        "sieved below {} in {:?} with {} threads",
        sieve.max(),
        started.elapsed(),
        config.threads
    );

    let printed = if cli.count {
        writeln!(io::stdout(), "{}", sieve.count())
    } else {
        print_primes(&sieve)
    };
    match printed {
        Ok(()) => ExitCode::SUCCESS,
        // Output piped into e.g. `head`
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("failed to print primes: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Print one prime per line
fn print_primes(sieve: &Sieve) -> io::Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    for prime in sieve.primes() {
        writeln!(out, "{prime}")?;
    }
    out.flush()
}

/// Log an error along with its causes
fn report(e: &SieveError) {
    log::error!("{e}");
    let mut source = e.source();
    while let Some(cause) = source {
        log::error!("caused by: {cause}");
        source = cause.source();
    }
}
